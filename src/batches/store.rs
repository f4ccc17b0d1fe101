use super::filter::BatchFilter;
use crate::analytics::queries::BATCH_ROWS_SQL;
use crate::analytics::types::BatchRow;
use crate::error::{no_rows, unique_violation, AppError, AppResult};
use crate::storage::sqlite::unix_now;
use crate::types::{column_enum, BatchStatus, BatchType, Shift};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: i64,
    pub batch_number: String,
    pub batch_type: BatchType,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub user_id: i64,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: BatchStatus,
    pub shift: Shift,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMaterialLine {
    pub id: i64,
    pub material_id: i64,
    pub material_name: String,
    pub unit: String,
    pub quantity: f64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: Batch,
    pub operator: String,
    pub product_name: Option<String>,
    pub equipment_name: Option<String>,
    pub materials: Vec<BatchMaterialLine>,
}

/// Everything needed to insert a batch; ids already resolved.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch_number: String,
    pub batch_type: BatchType,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub user_id: i64,
    pub shift: Shift,
    pub notes: Option<String>,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl NewBatch {
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_number.trim().is_empty() {
            return Err(AppError::Validation("batch_number is required".to_string()));
        }
        if let Some(end) = self.end_time {
            if end <= self.start_time {
                return Err(AppError::Validation(
                    "end_time must be after start_time".to_string(),
                ));
            }
        }
        Ok(())
    }
}

const BATCH_COLUMNS: &str = "id, batch_number, batch_type, product_id, equipment_id, user_id, \
     start_time, end_time, status, shift, notes, created_at, updated_at";

fn read_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        batch_number: row.get(1)?,
        batch_type: column_enum(row, 2)?,
        product_id: row.get(3)?,
        equipment_id: row.get(4)?,
        user_id: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        status: column_enum(row, 8)?,
        shift: column_enum(row, 9)?,
        notes: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub fn load_batch(conn: &Connection, id: i64) -> AppResult<Batch> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
        [id],
        read_batch,
    )
    .map_err(|e| no_rows(e, "batch"))
}

/// The caller's most recently started batch, if any.
pub fn latest_batch_of(conn: &Connection, user_id: i64) -> AppResult<Option<Batch>> {
    let batch = conn
        .query_row(
            &format!(
                "SELECT {BATCH_COLUMNS} FROM batches WHERE user_id = ?1
                 ORDER BY start_time DESC, id DESC LIMIT 1"
            ),
            [user_id],
            read_batch,
        )
        .optional()?;
    Ok(batch)
}

pub fn load_detail(conn: &Connection, id: i64) -> AppResult<BatchDetail> {
    let batch = load_batch(conn, id)?;
    let (operator, product_name, equipment_name) = conn.query_row(
        "SELECT u.fio, p.name, e.name
         FROM batches b
         JOIN users u ON u.id = b.user_id
         LEFT JOIN products p ON p.id = b.product_id
         LEFT JOIN equipment e ON e.id = b.equipment_id
         WHERE b.id = ?1",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let materials = load_materials(conn, id)?;
    Ok(BatchDetail {
        batch,
        operator,
        product_name,
        equipment_name,
        materials,
    })
}

pub fn load_materials(conn: &Connection, batch_id: i64) -> AppResult<Vec<BatchMaterialLine>> {
    let mut stmt = conn.prepare_cached(
        "SELECT bm.id, bm.material_id, m.name, m.unit, bm.quantity, bm.recorded_at
         FROM batch_materials bm
         JOIN materials m ON m.id = bm.material_id
         WHERE bm.batch_id = ?1
         ORDER BY bm.recorded_at, bm.id",
    )?;
    let rows = stmt
        .query_map([batch_id], |row| {
            Ok(BatchMaterialLine {
                id: row.get(0)?,
                material_id: row.get(1)?,
                material_name: row.get(2)?,
                unit: row.get(3)?,
                quantity: row.get(4)?,
                recorded_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_batch(conn: &Connection, batch: &NewBatch) -> AppResult<Batch> {
    batch.validate()?;
    let now = unix_now();
    conn.execute(
        "INSERT INTO batches (batch_number, batch_type, product_id, equipment_id, user_id,
                              start_time, end_time, status, shift, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?9, ?10)",
        params![
            batch.batch_number.trim(),
            batch.batch_type.as_str(),
            batch.product_id,
            batch.equipment_id,
            batch.user_id,
            batch.start_time,
            batch.end_time,
            batch.shift.as_str(),
            batch.notes,
            now
        ],
    )
    .map_err(|e| unique_violation(e, "a batch with that number already exists"))?;
    load_batch(conn, conn.last_insert_rowid())
}

fn material_exists(conn: &Connection, material_id: i64) -> AppResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM materials WHERE id = ?1",
            [material_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn add_material(
    conn: &Connection,
    batch_id: i64,
    material_id: i64,
    quantity: f64,
) -> AppResult<BatchMaterialLine> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(AppError::Validation(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if !material_exists(conn, material_id)? {
        return Err(AppError::Validation(format!("unknown material: {material_id}")));
    }
    conn.execute(
        "INSERT INTO batch_materials (batch_id, material_id, quantity, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![batch_id, material_id, quantity, unix_now()],
    )?;
    let id = conn.last_insert_rowid();
    load_materials(conn, batch_id)?
        .into_iter()
        .find(|line| line.id == id)
        .ok_or_else(|| AppError::Internal(format!("batch material {id} vanished")))
}

/// Copy `(material_id, quantity)` pairs onto a batch, e.g. from a template
/// or a duplicated batch.
pub fn copy_materials(conn: &Connection, batch_id: i64, lines: &[(i64, f64)]) -> AppResult<usize> {
    let now = unix_now();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO batch_materials (batch_id, material_id, quantity, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (material_id, quantity) in lines {
        stmt.execute(params![batch_id, material_id, quantity, now])?;
    }
    Ok(lines.len())
}

/// Filtered batch rows, newest first. `page` is `(page_size, offset)`.
pub fn query_rows(
    conn: &Connection,
    filter: &BatchFilter,
    page: Option<(i64, i64)>,
) -> AppResult<Vec<BatchRow>> {
    let mut sql = String::from(BATCH_ROWS_SQL);
    let mut bind_values: Vec<Box<dyn ToSql>> = Vec::new();
    filter.push_sql(&mut sql, &mut bind_values);
    sql.push_str(" ORDER BY b.start_time DESC, b.id DESC");
    if let Some((limit, offset)) = page {
        sql.push_str(&format!(
            " LIMIT ?{} OFFSET ?{}",
            bind_values.len() + 1,
            bind_values.len() + 2
        ));
        bind_values.push(Box::new(limit));
        bind_values.push(Box::new(offset));
    }

    let params_ref: Vec<&dyn ToSql> = bind_values.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), BatchRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_rows(conn: &Connection, filter: &BatchFilter) -> AppResult<i64> {
    let mut sql = String::from("SELECT COUNT(*) FROM batches b WHERE 1=1");
    let mut bind_values: Vec<Box<dyn ToSql>> = Vec::new();
    filter.push_sql(&mut sql, &mut bind_values);
    let params_ref: Vec<&dyn ToSql> = bind_values.iter().map(|b| b.as_ref()).collect();
    let total = conn.query_row(&sql, params_ref.as_slice(), |row| row.get(0))?;
    Ok(total)
}
