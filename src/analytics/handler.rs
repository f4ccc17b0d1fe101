use super::consumption::{self, MaterialConsumption};
use super::dashboard::{self, Dashboard};
use super::periodic::{self, DailyMaterials, PeriodSummary};
use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::batches::filter::{BatchFilter, BatchQueryParams};
use crate::error::{AppError, AppResult};
use crate::local_time;
use crate::storage::sqlite::interact;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct DateParam {
    pub date: Option<String>,
}

impl DateParam {
    fn resolve(&self) -> AppResult<NaiveDate> {
        match self.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            None => Ok(local_time::today()),
            Some(raw) => local_time::parse_date(raw)
                .ok_or_else(|| AppError::Validation(format!("invalid date: {raw}, expected YYYY-MM-DD"))),
        }
    }
}

async fn cached_consumption(state: &AppState) -> AppResult<Arc<MaterialConsumption>> {
    state
        .cache
        .material_consumption(|| consumption::material_consumption(&state.pool))
        .await
}

/// GET /v1/analytics/dashboard
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(params): Query<BatchQueryParams>,
) -> AppResult<Json<Dashboard>> {
    user.ensure_analytics()?;

    // Dates fall back to the last seven days when missing or malformed.
    let filter = BatchFilter::from_params(&params);
    let date_to = filter.date_to.unwrap_or_else(local_time::today);
    let date_from = filter
        .date_from
        .unwrap_or_else(|| date_to.checked_sub_days(Days::new(7)).unwrap_or(date_to));

    let (entries, batches) = interact(&state.pool, move |conn| {
        let entries = periodic::load_entries(conn, date_from, date_to)?;
        let batches = periodic::load_batches(conn, date_from, date_to)?;
        Ok((entries, batches))
    })
    .await?;

    let material_consumption = cached_consumption(&state).await?;

    Ok(Json(dashboard::build_dashboard(
        date_from,
        date_to,
        &entries,
        &batches,
        &filter,
        material_consumption,
    )))
}

/// GET /v1/analytics/consumption
pub async fn get_consumption(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<Arc<MaterialConsumption>>> {
    user.ensure_analytics()?;
    Ok(Json(cached_consumption(&state).await?))
}

/// GET /v1/analytics/daily?date=YYYY-MM-DD
pub async fn get_daily(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(param): Query<DateParam>,
) -> AppResult<Json<Arc<PeriodSummary>>> {
    user.ensure_analytics()?;
    let date = param.resolve()?;
    let summary = state
        .cache
        .daily(date, || periodic::daily_analytics(&state.pool, date))
        .await?;
    Ok(Json(summary))
}

/// GET /v1/analytics/weekly?date=YYYY-MM-DD
pub async fn get_weekly(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(param): Query<DateParam>,
) -> AppResult<Json<Arc<PeriodSummary>>> {
    user.ensure_analytics()?;
    let date = param.resolve()?;
    let summary = state
        .cache
        .weekly(date, || periodic::weekly_analytics(&state.pool, date))
        .await?;
    Ok(Json(summary))
}

/// GET /v1/analytics/daily-materials
pub async fn get_daily_materials(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<serde_json::Value>> {
    user.ensure_analytics()?;
    let series: Vec<DailyMaterials> = periodic::daily_material_series(&state.pool).await?;
    let total_entries: i64 = series.iter().map(|d| d.count).sum();
    Ok(Json(serde_json::json!({
        "daily_data": series,
        "total_entries": total_entries,
    })))
}
