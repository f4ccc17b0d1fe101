use crate::analytics::consumption::EntryMaterial;
use crate::local_time;
use crate::types::{column_enum, BatchStatus, BatchType, Role, Shift};
use serde::Serialize;

/// An entry joined with its operator.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub operator: String,
    pub operator_role: Role,
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
}

impl EntryRow {
    /// Column order of `ENTRIES_IN_RANGE_SQL`.
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            operator: row.get(2)?,
            operator_role: column_enum(row, 3)?,
            entry_date: row.get(4)?,
            entry_time: row.get(5)?,
            shift: column_enum(row, 6)?,
            cement: row.get(7)?,
            lime: row.get(8)?,
            aluminum_powder: row.get(9)?,
            sludge: row.get(10)?,
            gypsum: row.get(11)?,
            water: row.get(12)?,
            sulfanol: row.get(13)?,
        })
    }

    pub fn quantity(&self, material: EntryMaterial) -> f64 {
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

    pub fn instant(&self) -> i64 {
        local_time::entry_instant(&self.entry_date, &self.entry_time).unwrap_or(0)
    }
}

/// A batch joined with its operator and product.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRow {
    pub id: i64,
    pub batch_number: String,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub shift: Shift,
    pub product_id: Option<i64>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub equipment_id: Option<i64>,
    pub user_id: i64,
    pub operator: String,
    pub operator_role: Role,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl BatchRow {
    /// Column order of `BATCHES_IN_RANGE_SQL`.
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch_number: row.get(1)?,
            batch_type: column_enum(row, 2)?,
            status: column_enum(row, 3)?,
            shift: column_enum(row, 4)?,
            product_id: row.get(5)?,
            product_code: row.get(6)?,
            product_name: row.get(7)?,
            equipment_id: row.get(8)?,
            user_id: row.get(9)?,
            operator: row.get(10)?,
            operator_role: column_enum(row, 11)?,
            start_time: row.get(12)?,
            end_time: row.get(13)?,
        })
    }

    pub fn duration_minutes(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time) as f64 / 60.0)
    }
}
