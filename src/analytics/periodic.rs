use super::queries;
use super::types::{BatchRow, EntryRow};
use crate::error::AppResult;
use crate::local_time;
use crate::storage::sqlite::interact;
use chrono::{Days, NaiveDate};
use deadpool_sqlite::Pool;
use rusqlite::{params, Connection};
use serde::Serialize;

/// Entries and batches of a local date range with their operators.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub entries: Vec<EntryRow>,
    pub batches: Vec<BatchRow>,
    pub total_entries: usize,
    pub total_batches: usize,
}

impl PeriodSummary {
    pub fn empty(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from,
            date_to,
            entries: Vec::new(),
            batches: Vec::new(),
            total_entries: 0,
            total_batches: 0,
        }
    }
}

/// The seven local days ending at `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let from = date.checked_sub_days(Days::new(6)).unwrap_or(date);
    (from, date)
}

pub fn load_entries(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<Vec<EntryRow>> {
    let mut stmt = conn.prepare_cached(queries::ENTRIES_IN_RANGE_SQL)?;
    let rows = stmt.query_map(
        params![
            from.format(local_time::DATE_FORMAT).to_string(),
            to.format(local_time::DATE_FORMAT).to_string()
        ],
        EntryRow::from_row,
    )?;
    rows.collect()
}

pub fn load_batches(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<Vec<BatchRow>> {
    let (start, end) = local_time::day_range(from, to);
    let mut stmt = conn.prepare_cached(queries::BATCHES_IN_RANGE_SQL)?;
    let rows = stmt.query_map(params![start, end], BatchRow::from_row)?;
    rows.collect()
}

pub fn load_period(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<PeriodSummary> {
    let entries = load_entries(conn, from, to)?;
    let batches = load_batches(conn, from, to)?;
    Ok(PeriodSummary {
        date_from: from,
        date_to: to,
        total_entries: entries.len(),
        total_batches: batches.len(),
        entries,
        batches,
    })
}

pub async fn daily_analytics(pool: &Pool, date: NaiveDate) -> AppResult<PeriodSummary> {
    interact(pool, move |conn| Ok(load_period(conn, date, date)?)).await
}

pub async fn weekly_analytics(pool: &Pool, date: NaiveDate) -> AppResult<PeriodSummary> {
    let (from, to) = week_bounds(date);
    interact(pool, move |conn| Ok(load_period(conn, from, to)?)).await
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyMaterials {
    pub date: String,
    pub cement: f64,
    pub lime: f64,
    pub water: f64,
    pub count: i64,
}

/// Per-day cement, lime and water totals over all entries. Not cached.
pub async fn daily_material_series(pool: &Pool) -> AppResult<Vec<DailyMaterials>> {
    interact(pool, |conn| {
        let mut stmt = conn.prepare(queries::DAILY_MATERIAL_SERIES_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(DailyMaterials {
                date: row.get(0)?,
                cement: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                lime: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                water: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                count: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, fio, role, created_at)
             VALUES (1, 'op', 'x', 'Иванов И.И.', 'employee', 0)",
            [],
        )
        .unwrap();
        for (date, cement) in [("2024-03-01", 1.0), ("2024-03-05", 10.0), ("2024-03-05", 5.0)] {
            conn.execute(
                "INSERT INTO entries (user_id, entry_date, entry_time, cement, created_at)
                 VALUES (1, ?1, '08:00:00', ?2, 0)",
                params![date, cement],
            )
            .unwrap();
        }
        let start = local_time::parse_minute("2024-03-05T09:00").unwrap();
        conn.execute(
            "INSERT INTO batches (batch_number, batch_type, user_id, start_time, created_at)
             VALUES ('A-1', 'autoclave', 1, ?1, ?1)",
            [start],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_week_bounds_cover_seven_days() {
        let d = local_time::parse_date("2024-03-05").unwrap();
        let (from, to) = week_bounds(d);
        assert_eq!(from, local_time::parse_date("2024-02-28").unwrap());
        assert_eq!(to, d);
    }

    #[test]
    fn test_daily_period_only_counts_that_day() {
        let conn = seeded();
        let d = local_time::parse_date("2024-03-05").unwrap();
        let summary = load_period(&conn, d, d).unwrap();
        assert_eq!(summary.total_entries, 2);
        assert_eq!(summary.total_batches, 1);
        assert_eq!(summary.entries[0].operator, "Иванов И.И.");

        let (from, to) = week_bounds(d);
        let week = load_period(&conn, from, to).unwrap();
        assert_eq!(week.total_entries, 3);
    }
}
