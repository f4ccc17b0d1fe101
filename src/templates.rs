use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::batches::store::{self, BatchDetail, NewBatch};
use crate::cache::WriteEvent;
use crate::error::{no_rows, AppError, AppResult, LoggedJson};
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{column_enum, BatchType, Shift};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateMaterial {
    pub material_id: i64,
    pub material_name: String,
    pub unit: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchTemplate {
    pub id: i64,
    pub name: String,
    pub batch_type: BatchType,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: i64,
    pub materials: Vec<TemplateMaterial>,
}

#[derive(Debug, Deserialize)]
pub struct MaterialLine {
    pub material_id: i64,
    pub quantity: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    pub batch_type: BatchType,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub notes: Option<String>,
    #[serde(default)]
    pub materials: Vec<MaterialLine>,
}

#[derive(Debug, Deserialize)]
pub struct BatchFromTemplate {
    pub batch_number: String,
    pub notes: Option<String>,
    pub shift: Option<Shift>,
}

/// Lines worth storing: positive, finite quantities only.
fn kept_lines(lines: &[MaterialLine]) -> Vec<(i64, f64)> {
    lines
        .iter()
        .filter(|l| l.quantity.is_finite() && l.quantity > 0.0)
        .map(|l| (l.material_id, l.quantity))
        .collect()
}

fn load_template_materials(conn: &Connection, template_id: i64) -> rusqlite::Result<Vec<TemplateMaterial>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tm.material_id, m.name, m.unit, tm.quantity
         FROM template_materials tm
         JOIN materials m ON m.id = tm.material_id
         WHERE tm.template_id = ?1
         ORDER BY tm.id",
    )?;
    let rows = stmt.query_map([template_id], |row| {
        Ok(TemplateMaterial {
            material_id: row.get(0)?,
            material_name: row.get(1)?,
            unit: row.get(2)?,
            quantity: row.get(3)?,
        })
    })?;
    rows.collect()
}

const TEMPLATE_COLUMNS: &str =
    "id, name, batch_type, product_id, equipment_id, notes, created_by, created_at";

fn read_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchTemplate> {
    Ok(BatchTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        batch_type: column_enum(row, 2)?,
        product_id: row.get(3)?,
        equipment_id: row.get(4)?,
        notes: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        materials: Vec::new(),
    })
}

pub fn load_template(conn: &Connection, id: i64) -> AppResult<BatchTemplate> {
    let mut template = conn
        .query_row(
            &format!("SELECT {TEMPLATE_COLUMNS} FROM batch_templates WHERE id = ?1 AND is_active = 1"),
            [id],
            read_template,
        )
        .map_err(|e| no_rows(e, "template"))?;
    template.materials = load_template_materials(conn, id)?;
    Ok(template)
}

pub fn insert_template(conn: &mut Connection, input: &CreateTemplate, created_by: i64) -> AppResult<BatchTemplate> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".into()));
    }
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO batch_templates (name, batch_type, product_id, equipment_id, notes, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            input.name.trim(),
            input.batch_type.as_str(),
            input.product_id,
            input.equipment_id,
            input.notes,
            created_by,
            unix_now()
        ],
    )?;
    let id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO template_materials (template_id, material_id, quantity) VALUES (?1, ?2, ?3)",
        )?;
        for (material_id, quantity) in kept_lines(&input.materials) {
            stmt.execute(params![id, material_id, quantity])?;
        }
    }
    tx.commit()?;
    load_template(conn, id)
}

/// GET /v1/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<Vec<BatchTemplate>>> {
    user.ensure_supervisor()?;
    let templates = interact(&state.pool, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM batch_templates WHERE is_active = 1 ORDER BY name"
        ))?;
        let mut templates = stmt
            .query_map([], read_template)?
            .collect::<Result<Vec<_>, _>>()?;
        for template in &mut templates {
            template.materials = load_template_materials(conn, template.id)?;
        }
        Ok(templates)
    })
    .await?;
    Ok(Json(templates))
}

/// POST /v1/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<CreateTemplate>,
) -> AppResult<Json<BatchTemplate>> {
    user.ensure_supervisor()?;
    let created_by = user.user_id;
    let template = interact(&state.pool, move |conn| insert_template(conn, &input, created_by)).await?;

    tracing::info!(template_id = template.id, name = %template.name, materials = template.materials.len(), "template created");
    Ok(Json(template))
}

/// POST /v1/templates/{id}/batches - Start a batch pre-filled from a template.
pub async fn create_batch_from_template(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<BatchFromTemplate>,
) -> AppResult<Json<BatchDetail>> {
    let user_id = user.user_id;
    let detail = interact(&state.pool, move |conn| {
        let template = load_template(conn, id)?;
        let notes = input
            .notes
            .filter(|n| !n.trim().is_empty())
            .or(template.notes.clone());
        let new_batch = NewBatch {
            batch_number: input.batch_number,
            batch_type: template.batch_type,
            product_id: template.product_id,
            equipment_id: template.equipment_id,
            user_id,
            shift: input.shift.unwrap_or_default(),
            notes,
            start_time: unix_now(),
            end_time: None,
        };
        let lines: Vec<(i64, f64)> = template
            .materials
            .iter()
            .map(|m| (m.material_id, m.quantity))
            .collect();

        let tx = conn.transaction()?;
        let batch = store::insert_batch(&tx, &new_batch)?;
        store::copy_materials(&tx, batch.id, &lines)?;
        tx.commit()?;
        store::load_detail(conn, batch.id)
    })
    .await?;
    state.cache.invalidate(WriteEvent::BatchMaterialsWritten);

    tracing::info!(template_id = id, batch_id = detail.batch.id, "batch created from template");
    Ok(Json(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username, password_hash, fio, role, created_at)
             VALUES (1, 'tech', 'x', 'Tech', 'chief_technologist', 0);
             INSERT INTO materials (id, name, unit) VALUES (1, 'Цемент', 'kg'), (2, 'Вода', 'l');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_template_keeps_only_positive_quantities() {
        let mut conn = setup();
        let input = CreateTemplate {
            name: "D500 standard".into(),
            batch_type: BatchType::Casting,
            product_id: None,
            equipment_id: None,
            notes: Some("standard mix".into()),
            materials: vec![
                MaterialLine { material_id: 1, quantity: 350.0 },
                MaterialLine { material_id: 2, quantity: 0.0 },
            ],
        };
        let template = insert_template(&mut conn, &input, 1).unwrap();
        assert_eq!(template.materials.len(), 1);
        assert_eq!(template.materials[0].material_name, "Цемент");
        assert_eq!(template.created_by, Some(1));
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let conn = setup();
        assert!(matches!(load_template(&conn, 9), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut conn = setup();
        let input = CreateTemplate {
            name: " ".into(),
            batch_type: BatchType::Cutting,
            product_id: None,
            equipment_id: None,
            notes: None,
            materials: Vec::new(),
        };
        assert!(insert_template(&mut conn, &input, 1).is_err());
    }
}
