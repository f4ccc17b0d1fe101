//! Spreadsheet downloads for supervisors.

use crate::analytics::consumption::EntryMaterial;
use crate::analytics::queries::ENTRY_ROWS_SQL;
use crate::analytics::types::{BatchRow, EntryRow};
use crate::app::AppState;
use crate::auth::session::SessionUser;
use crate::batches::filter::{BatchFilter, BatchQueryParams};
use crate::batches::store;
use crate::error::{AppError, AppResult};
use crate::local_time;
use crate::storage::sqlite::interact;
use crate::types::{BatchStatus, BatchType, Shift};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{Local, NaiveDate};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct EntryExportParams {
    pub shift: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn count(value: usize) -> Self {
        Cell::Number(value as f64)
    }

    fn display_len(&self) -> usize {
        match self {
            Cell::Text(s) => s.chars().count(),
            Cell::Number(n) => n.to_string().len(),
        }
    }
}

/// Label/value block written under the main table.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub title: &'static str,
    pub rows: Vec<(&'static str, usize)>,
}

/// One worksheet: a styled header row, data rows and an optional summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: &'static str,
    pub header_color: u32,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub centered: bool,
    /// Columns from this index on get a two-decimal number format.
    pub decimals_from: Option<usize>,
    pub summary: Option<Summary>,
}

impl Sheet {
    /// Longest rendered value per column plus padding, capped.
    pub fn column_widths(&self) -> Vec<f64> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        let mut widen = |col: usize, len: usize| {
            if col >= widths.len() {
                widths.resize(col + 1, 0);
            }
            widths[col] = widths[col].max(len);
        };
        for row in &self.rows {
            for (col, cell) in row.iter().enumerate() {
                widen(col, cell.display_len());
            }
        }
        if let Some(summary) = &self.summary {
            widen(0, summary.title.chars().count());
            for (label, count) in &summary.rows {
                widen(0, label.chars().count());
                widen(1, count.to_string().len());
            }
        }
        widths
            .into_iter()
            .map(|w| (w + 2).min(MAX_COLUMN_WIDTH) as f64)
            .collect()
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>, XlsxError> {
        let border = Format::new().set_border(FormatBorder::Thin);
        let header = border
            .clone()
            .set_bold()
            .set_font_size(12)
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(self.header_color))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
        let body = border.clone().set_align(if self.centered {
            FormatAlign::Center
        } else {
            FormatAlign::Left
        });
        let decimal = body.clone().set_num_format("0.00");
        let summary_title = border
            .clone()
            .set_bold()
            .set_font_size(11)
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(0x5D4037));
        let summary_value = border.clone().set_align(FormatAlign::Center);

        let mut workbook = Workbook::new();
        {
            let sheet = workbook.add_worksheet();
            sheet.set_name(self.name)?;

            for (col, title) in self.headers.iter().enumerate() {
                sheet.write_string_with_format(0, col as u16, title.as_str(), &header)?;
            }
            for (i, row) in self.rows.iter().enumerate() {
                let r = i as u32 + 1;
                for (col, cell) in row.iter().enumerate() {
                    let c = col as u16;
                    match cell {
                        Cell::Text(text) => {
                            sheet.write_string_with_format(r, c, text.as_str(), &body)?;
                        }
                        Cell::Number(n) if self.decimals_from.is_some_and(|d| col >= d) => {
                            sheet.write_number_with_format(r, c, *n, &decimal)?;
                        }
                        Cell::Number(n) => {
                            sheet.write_number_with_format(r, c, *n, &body)?;
                        }
                    }
                }
            }

            if let Some(summary) = &self.summary {
                // One blank row between the table and the summary.
                let top = self.rows.len() as u32 + 2;
                sheet.write_string_with_format(top, 0, summary.title, &summary_title)?;
                for (i, (label, count)) in summary.rows.iter().enumerate() {
                    let r = top + 1 + i as u32;
                    sheet.write_string_with_format(r, 0, *label, &border)?;
                    sheet.write_number_with_format(r, 1, *count as f64, &summary_value)?;
                }
            }

            for (col, width) in self.column_widths().into_iter().enumerate() {
                sheet.set_column_width(col as u16, width)?;
            }
            sheet.set_freeze_panes(1, 0)?;
        }
        workbook.save_to_buffer()
    }
}

fn xlsx_response(prefix: &str, sheet: &Sheet) -> AppResult<Response> {
    let body = sheet
        .to_xlsx()
        .map_err(|e| AppError::Internal(format!("workbook error: {e}")))?;
    let filename = format!("{prefix}_{}.xlsx", Local::now().format("%Y%m%d_%H%M%S"));
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

fn batch_type_title(batch_type: BatchType) -> &'static str {
    match batch_type {
        BatchType::Casting => "Заливка",
        BatchType::Cutting => "Резка",
        BatchType::Autoclave => "Автоклав",
    }
}

fn unit_title(material: EntryMaterial) -> &'static str {
    match material.unit() {
        "l" => "л",
        _ => "кг",
    }
}

pub fn batches_sheet(rows: &[BatchRow]) -> Sheet {
    let headers = [
        "ID", "Номер партии", "Тип", "Статус", "Смена", "Продукт", "Оператор",
        "Время начала", "Время окончания", "Длительность (мин)",
    ];
    Sheet {
        name: "Производственные партии",
        header_color: 0x366092,
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| {
                vec![
                    Cell::Number(row.id as f64),
                    Cell::text(row.batch_number.as_str()),
                    Cell::text(row.batch_type.as_str()),
                    Cell::text(row.status.as_str()),
                    Cell::text(row.shift.as_str()),
                    Cell::text(row.product_name.clone().unwrap_or_default()),
                    Cell::text(row.operator.as_str()),
                    Cell::text(local_time::format_local(row.start_time)),
                    Cell::text(row.end_time.map(local_time::format_local).unwrap_or_default()),
                    row.duration_minutes()
                        .map(|m| Cell::Number(m.round()))
                        .unwrap_or_else(|| Cell::text("")),
                ]
            })
            .collect(),
        centered: false,
        decimals_from: None,
        summary: None,
    }
}

pub fn entries_sheet(rows: &[EntryRow]) -> Sheet {
    let mut headers: Vec<String> = ["ID", "Дата", "Время", "Смена", "Оператор"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    headers.extend(
        EntryMaterial::ALL
            .iter()
            .map(|m| format!("{} ({})", m.catalog_name(), unit_title(*m))),
    );
    let fixed_columns = 5;

    let rows = rows
        .iter()
        .map(|row| {
            let date = local_time::parse_date(&row.entry_date)
                .map(|d| d.format("%d.%m.%Y").to_string())
                .unwrap_or_else(|| row.entry_date.clone());
            let mut cells = vec![
                Cell::Number(row.id as f64),
                Cell::Text(date),
                Cell::text(row.entry_time.as_str()),
                Cell::text(row.shift.as_str()),
                Cell::text(row.operator.as_str()),
            ];
            cells.extend(EntryMaterial::ALL.iter().map(|m| Cell::Number(row.quantity(*m))));
            cells
        })
        .collect();

    Sheet {
        name: "Записи ввода материалов",
        header_color: 0x2E7D32,
        headers,
        rows,
        centered: false,
        decimals_from: Some(fixed_columns),
        summary: None,
    }
}

/// Per-type status counts followed by plant-wide totals.
pub fn analytics_sheet(rows: &[BatchRow]) -> Sheet {
    let count = |batch_type: Option<BatchType>, status: Option<BatchStatus>| {
        rows.iter()
            .filter(|b| batch_type.map_or(true, |t| b.batch_type == t))
            .filter(|b| status.map_or(true, |s| b.status == s))
            .count()
    };
    let headers = [
        "Тип партии", "Количество", "Завершено", "Активно", "Отменено", "Приостановлено",
    ];

    let per_type = BatchType::ALL
        .iter()
        .map(|batch_type| {
            let t = Some(*batch_type);
            vec![
                Cell::text(batch_type_title(*batch_type)),
                Cell::count(count(t, None)),
                Cell::count(count(t, Some(BatchStatus::Completed))),
                Cell::count(count(t, Some(BatchStatus::Active))),
                Cell::count(count(t, Some(BatchStatus::Cancelled))),
                Cell::count(count(t, Some(BatchStatus::Inactive))),
            ]
        })
        .collect();

    Sheet {
        name: "Аналитика производства",
        header_color: 0xD32F2F,
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: per_type,
        centered: true,
        decimals_from: None,
        summary: Some(Summary {
            title: "ОБЩАЯ СТАТИСТИКА",
            rows: vec![
                ("Всего партий", count(None, None)),
                ("Завершено", count(None, Some(BatchStatus::Completed))),
                ("Активно", count(None, Some(BatchStatus::Active))),
                ("Отменено", count(None, Some(BatchStatus::Cancelled))),
                ("Приостановлено", count(None, Some(BatchStatus::Inactive))),
            ],
        }),
    }
}

fn load_entry_rows(
    conn: &Connection,
    shift: Option<Shift>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> rusqlite::Result<Vec<EntryRow>> {
    let mut sql = String::from(ENTRY_ROWS_SQL);
    let mut bind_values: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(shift) = shift {
        sql.push_str(&format!(" AND e.shift = ?{}", bind_values.len() + 1));
        bind_values.push(Box::new(shift.as_str()));
    }
    if let Some(from) = from {
        sql.push_str(&format!(" AND e.entry_date >= ?{}", bind_values.len() + 1));
        bind_values.push(Box::new(from.format(local_time::DATE_FORMAT).to_string()));
    }
    if let Some(to) = to {
        sql.push_str(&format!(" AND e.entry_date <= ?{}", bind_values.len() + 1));
        bind_values.push(Box::new(to.format(local_time::DATE_FORMAT).to_string()));
    }
    sql.push_str(" ORDER BY e.entry_date DESC, e.entry_time DESC");

    let params_ref: Vec<&dyn ToSql> = bind_values.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_ref.as_slice(), EntryRow::from_row)?;
    rows.collect()
}

/// GET /v1/export/batches
pub async fn export_batches(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(params): Query<BatchQueryParams>,
) -> AppResult<Response> {
    user.ensure_supervisor()?;
    let filter = BatchFilter::from_params(&params);
    let rows = interact(&state.pool, move |conn| store::query_rows(conn, &filter, None)).await?;
    tracing::info!(rows = rows.len(), "batches exported");
    xlsx_response("batches", &batches_sheet(&rows))
}

/// GET /v1/export/entries
pub async fn export_entries(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(params): Query<EntryExportParams>,
) -> AppResult<Response> {
    user.ensure_supervisor()?;
    let shift = params
        .shift
        .as_deref()
        .filter(|s| *s != "all")
        .and_then(|s| s.parse().ok());
    let from = params.date_from.as_deref().and_then(local_time::parse_date);
    let to = params.date_to.as_deref().and_then(local_time::parse_date);
    let rows = interact(&state.pool, move |conn| {
        Ok(load_entry_rows(conn, shift, from, to)?)
    })
    .await?;
    tracing::info!(rows = rows.len(), "entries exported");
    xlsx_response("entries", &entries_sheet(&rows))
}

/// GET /v1/export/analytics
pub async fn export_analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(params): Query<BatchQueryParams>,
) -> AppResult<Response> {
    user.ensure_supervisor()?;
    let filter = BatchFilter::from_params(&params);
    let rows = interact(&state.pool, move |conn| store::query_rows(conn, &filter, None)).await?;
    xlsx_response("analytics", &analytics_sheet(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn batch(id: i64, batch_type: BatchType, status: BatchStatus) -> BatchRow {
        BatchRow {
            id,
            batch_number: format!("B-{id}"),
            batch_type,
            status,
            shift: Shift::Day,
            product_id: None,
            product_code: None,
            product_name: Some("Блок, D500".into()),
            equipment_id: None,
            user_id: 1,
            operator: "Op".into(),
            operator_role: Role::CastingOperator,
            start_time: 0,
            end_time: Some(5400),
        }
    }

    #[test]
    fn test_batches_sheet_rows_and_widths() {
        let sheet = batches_sheet(&[batch(1, BatchType::Casting, BatchStatus::Completed)]);
        assert_eq!(sheet.headers.len(), 10);
        let row = &sheet.rows[0];
        assert_eq!(row[0], Cell::Number(1.0));
        assert_eq!(row[5], Cell::text("Блок, D500"));
        assert_eq!(row[9], Cell::Number(90.0));

        let widths = sheet.column_widths();
        // "Номер партии" is twelve characters; widths count chars, not bytes.
        assert_eq!(widths[1], 14.0);
        assert!(widths.iter().all(|w| *w <= MAX_COLUMN_WIDTH as f64));
    }

    #[test]
    fn test_long_values_cap_column_width() {
        let mut row = batch(2, BatchType::Cutting, BatchStatus::Active);
        row.product_name = Some("x".repeat(80));
        let widths = batches_sheet(&[row]).column_widths();
        assert_eq!(widths[5], MAX_COLUMN_WIDTH as f64);
    }

    #[test]
    fn test_analytics_sheet_counts_per_type() {
        let rows = vec![
            batch(1, BatchType::Casting, BatchStatus::Completed),
            batch(2, BatchType::Casting, BatchStatus::Cancelled),
            batch(3, BatchType::Autoclave, BatchStatus::Inactive),
        ];
        let sheet = analytics_sheet(&rows);
        let counts = |i: usize| -> Vec<Cell> { sheet.rows[i][1..].to_vec() };
        assert_eq!(sheet.rows[0][0], Cell::text("Заливка"));
        assert_eq!(counts(0), [2.0, 1.0, 0.0, 1.0, 0.0].map(Cell::Number).to_vec());
        assert_eq!(counts(1), [0.0; 5].map(Cell::Number).to_vec());
        assert_eq!(counts(2), [1.0, 0.0, 0.0, 0.0, 1.0].map(Cell::Number).to_vec());

        let summary = sheet.summary.unwrap();
        assert_eq!(summary.rows[0], ("Всего партий", 3));
        assert_eq!(summary.rows[4], ("Приостановлено", 1));
    }

    #[test]
    fn test_entries_sheet_formats_date_and_units() {
        let sheet = entries_sheet(&[]);
        assert_eq!(sheet.headers[5], "Цемент (кг)");
        assert_eq!(sheet.headers[10], "Вода (л)");
        assert_eq!(sheet.decimals_from, Some(5));
    }

    #[test]
    fn test_workbook_is_a_zip_container() {
        let rows = vec![batch(1, BatchType::Casting, BatchStatus::Completed)];
        let bytes = analytics_sheet(&rows).to_xlsx().unwrap();
        assert_eq!(&bytes[..2], b"PK");
        let bytes = batches_sheet(&rows).to_xlsx().unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
