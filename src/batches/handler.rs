use super::filter::{BatchFilter, BatchQueryParams};
use super::lifecycle::{append_note, transition, BatchAction};
use super::store::{self, Batch, BatchDetail, BatchMaterialLine, NewBatch};
use crate::analytics::types::BatchRow;
use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::cache::WriteEvent;
use crate::catalog::{load_equipment, Equipment};
use crate::entries::check_edit_window;
use crate::error::{unique_violation, AppError, AppResult, LoggedJson};
use crate::local_time;
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{BatchStatus, BatchType, EquipmentStatus, Shift};
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Local;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateBatch {
    pub batch_number: String,
    pub batch_type: BatchType,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub notes: Option<String>,
    pub shift: Option<Shift>,
    /// `YYYY-MM-DDTHH:MM` local; defaults to now.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchPage {
    pub batches: Vec<BatchRow>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddMaterial {
    pub material_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaterialQuantity {
    /// Id of the batch material line.
    pub id: i64,
    pub quantity: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBatch {
    pub batch_number: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub materials: Vec<MaterialQuantity>,
}

#[derive(Debug, Deserialize)]
pub struct StartOperation {
    pub batch_number: String,
    pub equipment_id: Option<i64>,
    pub shift: Option<Shift>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OperatorDashboard {
    pub batch_type: BatchType,
    pub active: Vec<BatchRow>,
    pub recent_completed: Vec<BatchRow>,
    pub equipment: Vec<Equipment>,
    pub today: Vec<BatchRow>,
}

fn parse_optional_minute(value: Option<&str>, field: &str) -> AppResult<Option<i64>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => local_time::parse_minute(v).map(Some).ok_or_else(|| {
            AppError::Validation(format!("invalid {field}: {v}, expected YYYY-MM-DDTHH:MM"))
        }),
    }
}

fn empty_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl CreateBatch {
    fn into_new_batch(self, user_id: i64) -> AppResult<NewBatch> {
        let start_time = parse_optional_minute(self.start_time.as_deref(), "start_time")?
            .unwrap_or_else(unix_now);
        let end_time = parse_optional_minute(self.end_time.as_deref(), "end_time")?;
        let batch = NewBatch {
            batch_number: self.batch_number,
            batch_type: self.batch_type,
            product_id: self.product_id,
            equipment_id: self.equipment_id,
            user_id,
            shift: self.shift.unwrap_or_default(),
            notes: empty_to_none(self.notes),
            start_time,
            end_time,
        };
        batch.validate()?;
        Ok(batch)
    }
}

/// POST /v1/batches
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<CreateBatch>,
) -> AppResult<Json<Batch>> {
    let new_batch = input.into_new_batch(user.user_id)?;
    let batch = interact(&state.pool, move |conn| store::insert_batch(conn, &new_batch)).await?;
    state.cache.invalidate(WriteEvent::BatchWritten);

    tracing::info!(
        batch_id = batch.id,
        batch_number = %batch.batch_number,
        batch_type = %batch.batch_type,
        user_id = user.user_id,
        "batch created"
    );
    Ok(Json(batch))
}

/// GET /v1/batches - Filtered, paginated listing; operators only see their own.
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(params): Query<BatchQueryParams>,
) -> AppResult<Json<BatchPage>> {
    let mut filter = BatchFilter::from_params(&params);
    if !user.role.is_supervisor() {
        filter.user_id = Some(user.user_id);
    }
    let page = params.page.unwrap_or(1).max(1);
    let page_size = state.config.production.page_size;
    let offset = (page - 1).saturating_mul(page_size);

    let (batches, total) = interact(&state.pool, move |conn| {
        let rows = store::query_rows(conn, &filter, Some((page_size, offset)))?;
        let total = store::count_rows(conn, &filter)?;
        Ok((rows, total))
    })
    .await?;

    Ok(Json(BatchPage {
        batches,
        page,
        page_size,
        total,
    }))
}

/// GET /v1/batches/{id}
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<BatchDetail>> {
    let detail = interact(&state.pool, move |conn| store::load_detail(conn, id)).await?;
    user.ensure_owner_or_supervisor(Some(detail.batch.user_id))?;
    Ok(Json(detail))
}

/// POST /v1/batches/{id}/materials
pub async fn add_batch_material(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<AddMaterial>,
) -> AppResult<Json<BatchMaterialLine>> {
    let line = interact(&state.pool, move |conn| {
        let batch = store::load_batch(conn, id)?;
        user.ensure_owner_or_supervisor(Some(batch.user_id))?;
        store::add_material(conn, id, input.material_id, input.quantity)
    })
    .await?;
    state.cache.invalidate(WriteEvent::BatchMaterialsWritten);

    tracing::info!(batch_id = id, material_id = line.material_id, quantity = line.quantity, "batch material recorded");
    Ok(Json(line))
}

async fn apply_action(
    state: &AppState,
    user: SessionUser,
    id: i64,
    action: BatchAction,
) -> AppResult<Json<Batch>> {
    let name = action.name();
    let batch = interact(&state.pool, move |conn| {
        let batch = store::load_batch(conn, id)?;
        user.ensure_owner_or_supervisor(Some(batch.user_id))?;
        let now = Local::now();
        let next = transition(batch.status, &action, now)?;
        let end_time = if next.ends {
            Some(now.timestamp())
        } else {
            batch.end_time
        };
        let notes = match &next.note {
            Some(note) => Some(append_note(batch.notes.as_deref(), note)),
            None => batch.notes.clone(),
        };
        conn.execute(
            "UPDATE batches SET status = ?1, end_time = ?2, notes = ?3, updated_at = ?4
             WHERE id = ?5",
            params![next.status.as_str(), end_time, notes, now.timestamp(), id],
        )?;
        store::load_batch(conn, id)
    })
    .await?;
    state.cache.invalidate(WriteEvent::BatchWritten);

    tracing::info!(batch_id = id, action = name, status = %batch.status, "batch status changed");
    Ok(Json(batch))
}

/// POST /v1/batches/{id}/complete
pub async fn complete_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Batch>> {
    apply_action(&state, user, id, BatchAction::Complete).await
}

/// POST /v1/batches/{id}/cancel
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<CancelRequest>,
) -> AppResult<Json<Batch>> {
    let reason = input.reason.unwrap_or_default();
    apply_action(&state, user, id, BatchAction::Cancel { reason }).await
}

/// POST /v1/batches/{id}/pause
pub async fn pause_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Batch>> {
    apply_action(&state, user, id, BatchAction::Pause).await
}

/// POST /v1/batches/{id}/resume
pub async fn resume_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Batch>> {
    apply_action(&state, user, id, BatchAction::Resume).await
}

/// PUT /v1/batches/{id} - Edit number, notes and recorded quantities while
/// the edit window is open.
pub async fn update_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<UpdateBatch>,
) -> AppResult<Json<BatchDetail>> {
    if let Some(number) = &input.batch_number {
        if number.trim().is_empty() {
            return Err(AppError::Validation("batch_number must not be empty".into()));
        }
    }
    if input
        .materials
        .iter()
        .any(|m| !m.quantity.is_finite() || m.quantity < 0.0)
    {
        return Err(AppError::Validation(
            "material quantities must be non-negative".into(),
        ));
    }
    let window = state.config.production.edit_window_mins;

    let detail = interact(&state.pool, move |conn| {
        let batch = store::load_batch(conn, id)?;
        user.ensure_owner_or_supervisor(Some(batch.user_id))?;
        let now = unix_now();
        check_edit_window(batch.created_at, now, window)?;

        let tx = conn.transaction()?;
        let number = input
            .batch_number
            .as_deref()
            .map(str::trim)
            .unwrap_or(&batch.batch_number)
            .to_string();
        let notes = input.notes.clone().or(batch.notes);
        tx.execute(
            "UPDATE batches SET batch_number = ?1, notes = ?2, updated_at = ?3 WHERE id = ?4",
            params![number, notes, now, id],
        )
        .map_err(|e| unique_violation(e, "a batch with that number already exists"))?;
        for line in &input.materials {
            let updated = tx.execute(
                "UPDATE batch_materials SET quantity = ?1 WHERE id = ?2 AND batch_id = ?3",
                params![line.quantity, line.id, id],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound(format!(
                    "batch material {} not found on batch {id}",
                    line.id
                )));
            }
        }
        tx.commit()?;
        store::load_detail(conn, id)
    })
    .await?;

    state.cache.invalidate(WriteEvent::BatchMaterialsWritten);
    tracing::info!(batch_id = id, "batch updated");
    Ok(Json(detail))
}

/// POST /v1/batches/duplicate-last - Restart the caller's latest batch with
/// the same materials under a fresh number.
pub async fn duplicate_last(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<BatchDetail>> {
    let user_id = user.user_id;
    let detail = interact(&state.pool, move |conn| {
        let last = store::latest_batch_of(conn, user_id)?
            .ok_or_else(|| AppError::Validation("no batches to duplicate".into()))?;
        let now = Local::now();
        let copy = NewBatch {
            batch_number: format!("{}_copy_{}", last.batch_number, now.format("%H%M%S")),
            batch_type: last.batch_type,
            product_id: last.product_id,
            equipment_id: last.equipment_id,
            user_id,
            shift: last.shift,
            notes: Some(format!("Created from batch {}", last.batch_number)),
            start_time: now.timestamp(),
            end_time: None,
        };

        let tx = conn.transaction()?;
        let batch = store::insert_batch(&tx, &copy)?;
        let lines: Vec<(i64, f64)> = store::load_materials(&tx, last.id)?
            .iter()
            .map(|line| (line.material_id, line.quantity))
            .collect();
        store::copy_materials(&tx, batch.id, &lines)?;
        tx.commit()?;
        store::load_detail(conn, batch.id)
    })
    .await?;
    state.cache.invalidate(WriteEvent::BatchMaterialsWritten);

    tracing::info!(batch_id = detail.batch.id, batch_number = %detail.batch.batch_number, "batch duplicated");
    Ok(Json(detail))
}

fn operated_type(user: &SessionUser) -> AppResult<BatchType> {
    user.role.operated_batch_type().ok_or_else(|| {
        AppError::Forbidden(format!("role {} does not run an operator station", user.role))
    })
}

/// POST /v1/operations/start - Start a batch of the station's type.
pub async fn start_operation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<StartOperation>,
) -> AppResult<Json<Batch>> {
    let batch_type = operated_type(&user)?;
    let new_batch = NewBatch {
        batch_number: input.batch_number,
        batch_type,
        product_id: None,
        equipment_id: input.equipment_id,
        user_id: user.user_id,
        shift: input.shift.unwrap_or_default(),
        notes: empty_to_none(input.notes),
        start_time: unix_now(),
        end_time: None,
    };
    let batch = interact(&state.pool, move |conn| store::insert_batch(conn, &new_batch)).await?;
    state.cache.invalidate(WriteEvent::BatchWritten);

    tracing::info!(batch_id = batch.id, batch_type = %batch_type, "operation started");
    Ok(Json(batch))
}

/// POST /v1/operations/{id}/stop
pub async fn stop_operation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Batch>> {
    let batch_type = operated_type(&user)?;
    let user_id = user.user_id;
    let batch = interact(&state.pool, move |conn| store::load_batch(conn, id)).await?;
    if batch.user_id != user_id {
        return Err(AppError::Forbidden("not your batch".into()));
    }
    if batch.batch_type != batch_type {
        return Err(AppError::Validation(format!(
            "batch {id} is a {} batch, not {batch_type}",
            batch.batch_type
        )));
    }
    apply_action(&state, user, id, BatchAction::Complete).await
}

/// GET /v1/operations/dashboard
pub async fn operations_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<OperatorDashboard>> {
    let batch_type = operated_type(&user)?;
    let user_id = user.user_id;
    let today = local_time::today();

    let dashboard = interact(&state.pool, move |conn| {
        let mine = BatchFilter {
            batch_type: Some(batch_type),
            user_id: Some(user_id),
            ..Default::default()
        };
        let active = store::query_rows(
            conn,
            &BatchFilter {
                status: Some(BatchStatus::Active),
                ..mine.clone()
            },
            None,
        )?;
        let mut recent_completed = store::query_rows(
            conn,
            &BatchFilter {
                status: Some(BatchStatus::Completed),
                ..mine.clone()
            },
            None,
        )?;
        recent_completed.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        recent_completed.truncate(10);
        let today_rows = store::query_rows(
            conn,
            &BatchFilter {
                date_from: Some(today),
                date_to: Some(today),
                ..mine
            },
            Some((10, 0)),
        )?;
        let equipment = load_equipment(conn, Some(batch_type), Some(EquipmentStatus::Operational))?;
        Ok(OperatorDashboard {
            batch_type,
            active,
            recent_completed,
            equipment,
            today: today_rows,
        })
    })
    .await?;
    Ok(Json(dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: Option<&str>, end: Option<&str>) -> CreateBatch {
        CreateBatch {
            batch_number: "C-1".into(),
            batch_type: BatchType::Casting,
            product_id: None,
            equipment_id: None,
            notes: Some("".into()),
            shift: None,
            start_time: start.map(Into::into),
            end_time: end.map(Into::into),
        }
    }

    #[test]
    fn test_create_request_parses_local_minutes() {
        let batch = request(Some("2024-03-05T08:00"), Some("2024-03-05T09:30"))
            .into_new_batch(1)
            .unwrap();
        assert_eq!(batch.end_time.unwrap() - batch.start_time, 90 * 60);
        assert_eq!(batch.shift, Shift::Day);
        assert_eq!(batch.notes, None);
    }

    #[test]
    fn test_create_request_rejects_bad_times() {
        assert!(request(Some("05.03.2024 08:00"), None).into_new_batch(1).is_err());
        assert!(request(Some("2024-03-05T08:00"), Some("2024-03-05T07:00"))
            .into_new_batch(1)
            .is_err());
        assert!(request(None, Some("garbage")).into_new_batch(1).is_err());
    }

    #[test]
    fn test_blank_times_default_to_now() {
        let before = unix_now();
        let batch = request(Some(" "), None).into_new_batch(1).unwrap();
        assert!(batch.start_time >= before);
    }
}
