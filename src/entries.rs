use crate::analytics::consumption::EntryMaterial;
use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::cache::WriteEvent;
use crate::error::{no_rows, AppError, AppResult, LoggedJson};
use crate::local_time;
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{column_enum, Shift};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{Local, NaiveTime};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub entry_date: String,
    pub entry_time: String,
    pub shift: Shift,
    pub cement: f64,
    pub lime: f64,
    pub aluminum_powder: f64,
    pub sludge: f64,
    pub gypsum: f64,
    pub water: f64,
    pub sulfanol: f64,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Material quantities keyed by column name. Missing values mean zero on
/// create and "unchanged" on update.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EntryInput {
    pub cement: Option<f64>,
    pub lime: Option<f64>,
    pub aluminum_powder: Option<f64>,
    pub sludge: Option<f64>,
    pub gypsum: Option<f64>,
    pub water: Option<f64>,
    pub sulfanol: Option<f64>,
    pub shift: Option<Shift>,
    /// `HH:MM:SS`; only honoured on update.
    pub entry_time: Option<String>,
}

impl EntryInput {
    fn get(&self, material: EntryMaterial) -> Option<f64> {
        match material {
            EntryMaterial::Cement => self.cement,
            EntryMaterial::Lime => self.lime,
            EntryMaterial::AluminumPowder => self.aluminum_powder,
            EntryMaterial::Sludge => self.sludge,
            EntryMaterial::Gypsum => self.gypsum,
            EntryMaterial::Water => self.water,
            EntryMaterial::Sulfanol => self.sulfanol,
        }
    }

    fn validate(&self) -> AppResult<()> {
        for material in EntryMaterial::ALL {
            if let Some(q) = self.get(material) {
                if !q.is_finite() || q < 0.0 {
                    return Err(AppError::Validation(format!(
                        "{} must be a non-negative number",
                        material.column()
                    )));
                }
            }
        }
        if let Some(time) = &self.entry_time {
            NaiveTime::parse_from_str(time, local_time::TIME_FORMAT).map_err(|_| {
                AppError::Validation(format!("invalid entry_time: {time}, expected HH:MM:SS"))
            })?;
        }
        Ok(())
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, entry_date, entry_time, shift, cement, lime, \
     aluminum_powder, sludge, gypsum, water, sulfanol, created_at, updated_at";

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entry_date: row.get(2)?,
        entry_time: row.get(3)?,
        shift: column_enum(row, 4)?,
        cement: row.get(5)?,
        lime: row.get(6)?,
        aluminum_powder: row.get(7)?,
        sludge: row.get(8)?,
        gypsum: row.get(9)?,
        water: row.get(10)?,
        sulfanol: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

pub fn load_entry(conn: &Connection, id: i64) -> AppResult<Entry> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
        [id],
        read_entry,
    )
    .map_err(|e| no_rows(e, "entry"))
}

/// Records may only be changed for a limited time after they were created.
pub fn check_edit_window(created_at: i64, now: i64, window_mins: i64) -> AppResult<()> {
    if now - created_at > window_mins * 60 {
        return Err(AppError::Validation(format!(
            "edit window expired: records can only be edited within {window_mins} minutes of creation"
        )));
    }
    Ok(())
}

pub fn insert_entry(conn: &Connection, user_id: i64, input: &EntryInput) -> AppResult<Entry> {
    let now = Local::now();
    let created_at = now.timestamp();
    let date = now.format(local_time::DATE_FORMAT).to_string();
    let time = now.format(local_time::TIME_FORMAT).to_string();
    let shift = input.shift.unwrap_or_default();
    let q = |m| input.get(m).unwrap_or(0.0);

    conn.execute(
        "INSERT INTO entries (user_id, entry_date, entry_time, shift, cement, lime,
                              aluminum_powder, sludge, gypsum, water, sulfanol, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            user_id,
            date,
            time,
            shift.as_str(),
            q(EntryMaterial::Cement),
            q(EntryMaterial::Lime),
            q(EntryMaterial::AluminumPowder),
            q(EntryMaterial::Sludge),
            q(EntryMaterial::Gypsum),
            q(EntryMaterial::Water),
            q(EntryMaterial::Sulfanol),
            created_at
        ],
    )?;
    load_entry(conn, conn.last_insert_rowid())
}

/// POST /v1/entries
pub async fn create_entry(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    LoggedJson(input): LoggedJson<EntryInput>,
) -> AppResult<Json<Entry>> {
    user.ensure_entry_logger()?;
    input.validate()?;

    let user_id = user.user_id;
    let entry = interact(&state.pool, move |conn| insert_entry(conn, user_id, &input)).await?;
    state.cache.invalidate(WriteEvent::EntryWritten);

    tracing::info!(entry_id = entry.id, user_id, shift = %entry.shift, "entry recorded");
    Ok(Json(entry))
}

/// GET /v1/entries/today - the caller's ten latest entries of today.
pub async fn list_today(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
) -> AppResult<Json<Vec<Entry>>> {
    user.ensure_entry_logger()?;
    let today = local_time::today().format(local_time::DATE_FORMAT).to_string();
    let user_id = user.user_id;
    let entries = interact(&state.pool, move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND entry_date = ?2
             ORDER BY entry_time DESC, id DESC LIMIT 10"
        ))?;
        let rows = stmt
            .query_map(params![user_id, today], read_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;
    Ok(Json(entries))
}

/// PUT /v1/entries/{id}
pub async fn update_entry(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<EntryInput>,
) -> AppResult<Json<Entry>> {
    input.validate()?;
    let window = state.config.production.edit_window_mins;

    let entry = interact(&state.pool, move |conn| {
        let current = load_entry(conn, id)?;
        user.ensure_owner_or_supervisor(current.user_id)?;
        let now = unix_now();
        check_edit_window(current.created_at, now, window)?;

        let pick = |m: EntryMaterial, old: f64| input.get(m).unwrap_or(old);
        conn.execute(
            "UPDATE entries SET cement = ?1, lime = ?2, aluminum_powder = ?3, sludge = ?4,
                    gypsum = ?5, water = ?6, sulfanol = ?7, entry_time = ?8, shift = ?9,
                    updated_at = ?10
             WHERE id = ?11",
            params![
                pick(EntryMaterial::Cement, current.cement),
                pick(EntryMaterial::Lime, current.lime),
                pick(EntryMaterial::AluminumPowder, current.aluminum_powder),
                pick(EntryMaterial::Sludge, current.sludge),
                pick(EntryMaterial::Gypsum, current.gypsum),
                pick(EntryMaterial::Water, current.water),
                pick(EntryMaterial::Sulfanol, current.sulfanol),
                input.entry_time.clone().unwrap_or(current.entry_time),
                input.shift.unwrap_or(current.shift).as_str(),
                now,
                id
            ],
        )?;
        load_entry(conn, id)
    })
    .await?;

    state.cache.invalidate(WriteEvent::EntryWritten);
    tracing::info!(entry_id = id, "entry updated");
    Ok(Json(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    #[test]
    fn test_edit_window_boundary() {
        assert!(check_edit_window(0, 30 * 60, 30).is_ok());
        assert!(check_edit_window(0, 30 * 60 + 1, 30).is_err());
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let input = EntryInput {
            lime: Some(-1.0),
            ..Default::default()
        };
        assert!(input.validate().is_err());

        let input = EntryInput {
            entry_time: Some("8am".into()),
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_insert_defaults_missing_quantities_to_zero() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, fio, role, created_at)
             VALUES (1, 'e', 'x', 'E', 'employee', 0)",
            [],
        )
        .unwrap();
        let input = EntryInput {
            cement: Some(10.0),
            shift: Some(Shift::Night),
            ..Default::default()
        };
        let entry = insert_entry(&conn, 1, &input).unwrap();
        assert_eq!(entry.cement, 10.0);
        assert_eq!(entry.water, 0.0);
        assert_eq!(entry.shift, Shift::Night);
        assert_eq!(entry.entry_date, local_time::today().format("%Y-%m-%d").to_string());
    }
}
