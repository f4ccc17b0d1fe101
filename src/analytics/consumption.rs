use super::queries;
use crate::error::AppResult;
use crate::storage::sqlite::interact;
use crate::types::{column_enum, BatchType};
use deadpool_sqlite::Pool;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

/// The fixed material columns on an entry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMaterial {
    Cement,
    Lime,
    AluminumPowder,
    Sludge,
    Gypsum,
    Water,
    Sulfanol,
}

impl EntryMaterial {
    pub const ALL: [EntryMaterial; 7] = [
        EntryMaterial::Cement,
        EntryMaterial::Lime,
        EntryMaterial::AluminumPowder,
        EntryMaterial::Sludge,
        EntryMaterial::Gypsum,
        EntryMaterial::Water,
        EntryMaterial::Sulfanol,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            EntryMaterial::Cement => "cement",
            EntryMaterial::Lime => "lime",
            EntryMaterial::AluminumPowder => "aluminum_powder",
            EntryMaterial::Sludge => "sludge",
            EntryMaterial::Gypsum => "gypsum",
            EntryMaterial::Water => "water",
            EntryMaterial::Sulfanol => "sulfanol",
        }
    }

    /// Name used in the materials catalog.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            EntryMaterial::Cement => "Цемент",
            EntryMaterial::Lime => "Известь",
            EntryMaterial::AluminumPowder => "Алюминиевая пудра",
            EntryMaterial::Sludge => "Шлам",
            EntryMaterial::Gypsum => "Гипс",
            EntryMaterial::Water => "Вода",
            EntryMaterial::Sulfanol => "Сульфанол",
        }
    }

    pub fn english_name(&self) -> &'static str {
        match self {
            EntryMaterial::Cement => "Cement",
            EntryMaterial::Lime => "Lime",
            EntryMaterial::AluminumPowder => "Aluminum powder",
            EntryMaterial::Sludge => "Sludge",
            EntryMaterial::Gypsum => "Gypsum",
            EntryMaterial::Water => "Water",
            EntryMaterial::Sulfanol => "Sulfanol",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            EntryMaterial::Sludge | EntryMaterial::Water | EntryMaterial::Sulfanol => "l",
            _ => "kg",
        }
    }

    /// Reporting key, e.g. `Цемент (Cement)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.catalog_name(), self.english_name())
    }

    /// Match a free-form material name (catalog, English or label form),
    /// ignoring case and surrounding whitespace.
    pub fn from_alias(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|m| {
            wanted == m.catalog_name().to_lowercase()
                || wanted == m.english_name().to_lowercase()
                || wanted == m.label().to_lowercase()
        })
    }
}

/// Reporting name for a material: the label for the fixed entry materials,
/// the trimmed name otherwise.
pub fn canonical_material_name(name: &str) -> String {
    match EntryMaterial::from_alias(name) {
        Some(material) => material.label(),
        None => name.trim().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionSource {
    Entry,
    Batch,
}

/// One pre-summed row from either source.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionRecord {
    pub source: ConsumptionSource,
    pub batch_type: BatchType,
    pub material_name: String,
    pub unit: String,
    pub total_quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialAmount {
    pub unit: String,
    pub quantity: f64,
}

/// Material name -> amount. Lookups accept any alias of a fixed material.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MaterialTable(BTreeMap<String, MaterialAmount>);

impl MaterialTable {
    pub fn get(&self, name: &str) -> Option<&MaterialAmount> {
        self.0.get(&canonical_material_name(name))
    }

    pub fn quantity(&self, name: &str) -> f64 {
        self.get(name).map(|a| a.quantity).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MaterialAmount)> {
        self.0.iter()
    }

    fn add(&mut self, name: &str, unit: &str, quantity: f64, scope: &str) {
        let amount = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| MaterialAmount {
                unit: unit.to_string(),
                quantity: 0.0,
            });
        if amount.unit != unit {
            tracing::warn!(
                material = name,
                scope,
                previous_unit = %amount.unit,
                unit,
                "material reported with conflicting units, keeping the latest"
            );
            amount.unit = unit.to_string();
        }
        amount.quantity += quantity;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialConsumption {
    pub materials_total: MaterialTable,
    /// Always holds all three batch types, possibly with empty tables.
    pub materials_by_batch_type: BTreeMap<BatchType, MaterialTable>,
}

impl MaterialConsumption {
    pub fn by_type(&self, batch_type: BatchType) -> &MaterialTable {
        // Every batch type is inserted by `fold_consumption`.
        &self.materials_by_batch_type[&batch_type]
    }
}

/// Fold pre-summed rows into totals per material and per (batch type,
/// material). Rows without a name or with a missing, zero or non-finite
/// quantity are skipped.
pub fn fold_consumption(
    records: impl IntoIterator<Item = ConsumptionRecord>,
) -> MaterialConsumption {
    let mut materials_total = MaterialTable::default();
    let mut materials_by_batch_type: BTreeMap<BatchType, MaterialTable> = BatchType::ALL
        .iter()
        .map(|t| (*t, MaterialTable::default()))
        .collect();

    for record in records {
        let quantity = match record.total_quantity {
            Some(q) if q.is_finite() && q != 0.0 => q,
            _ => continue,
        };
        if record.material_name.trim().is_empty() {
            continue;
        }
        let name = canonical_material_name(&record.material_name);
        materials_total.add(&name, &record.unit, quantity, "total");
        materials_by_batch_type
            .entry(record.batch_type)
            .or_default()
            .add(&name, &record.unit, quantity, record.batch_type.as_str());
    }

    MaterialConsumption {
        materials_total,
        materials_by_batch_type,
    }
}

/// Entry column sums followed by grouped batch-material sums.
pub fn load_records(conn: &Connection) -> rusqlite::Result<Vec<ConsumptionRecord>> {
    let sums: Vec<Option<f64>> = conn.query_row(queries::ENTRY_MATERIAL_SUMS_SQL, [], |row| {
        (0..EntryMaterial::ALL.len())
            .map(|i| row.get::<_, Option<f64>>(i))
            .collect()
    })?;

    let mut records: Vec<ConsumptionRecord> = EntryMaterial::ALL
        .iter()
        .zip(sums)
        .map(|(material, total)| ConsumptionRecord {
            source: ConsumptionSource::Entry,
            batch_type: BatchType::Casting,
            material_name: material.catalog_name().to_string(),
            unit: material.unit().to_string(),
            total_quantity: total,
        })
        .collect();

    let mut stmt = conn.prepare(queries::BATCH_MATERIAL_SUMS_SQL)?;
    let rows = stmt.query_map([], |row| {
        Ok(ConsumptionRecord {
            source: ConsumptionSource::Batch,
            batch_type: column_enum(row, 0)?,
            material_name: row.get(1)?,
            unit: row.get(2)?,
            total_quantity: row.get(3)?,
        })
    })?;
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Compute the consumption breakdown from the store.
pub async fn material_consumption(pool: &Pool) -> AppResult<MaterialConsumption> {
    let records = interact(pool, |conn| Ok(load_records(conn)?)).await?;
    tracing::debug!(rows = records.len(), "material consumption computed");
    Ok(fold_consumption(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn record(batch_type: BatchType, name: &str, unit: &str, qty: Option<f64>) -> ConsumptionRecord {
        ConsumptionRecord {
            source: ConsumptionSource::Batch,
            batch_type,
            material_name: name.to_string(),
            unit: unit.to_string(),
            total_quantity: qty,
        }
    }

    #[test]
    fn test_aliases_resolve_to_label() {
        assert_eq!(canonical_material_name("Cement"), "Цемент (Cement)");
        assert_eq!(canonical_material_name(" цемент "), "Цемент (Cement)");
        assert_eq!(canonical_material_name("Цемент (Cement)"), "Цемент (Cement)");
        assert_eq!(canonical_material_name("Песок"), "Песок");
    }

    #[test]
    fn test_all_batch_types_present_when_empty() {
        let result = fold_consumption(Vec::new());
        assert!(result.materials_total.is_empty());
        for t in BatchType::ALL {
            assert!(result.by_type(*t).is_empty());
        }
    }

    #[test]
    fn test_skips_empty_zero_and_missing_rows() {
        let result = fold_consumption(vec![
            record(BatchType::Cutting, "", "kg", Some(5.0)),
            record(BatchType::Cutting, "Песок", "kg", Some(0.0)),
            record(BatchType::Cutting, "Зола", "kg", None),
            record(BatchType::Cutting, "Гипс", "kg", Some(f64::NAN)),
        ]);
        assert!(result.materials_total.is_empty());
    }

    #[test]
    fn test_unit_conflict_keeps_latest_unit() {
        let result = fold_consumption(vec![
            record(BatchType::Cutting, "Песок", "kg", Some(1.0)),
            record(BatchType::Autoclave, "Песок", "t", Some(2.0)),
        ]);
        let total = result.materials_total.get("Песок").unwrap();
        assert_eq!(total.unit, "t");
        assert_eq!(total.quantity, 3.0);
    }

    #[test]
    fn test_entry_and_batch_sources_combine() {
        let mut records: Vec<ConsumptionRecord> = EntryMaterial::ALL
            .iter()
            .map(|m| ConsumptionRecord {
                source: ConsumptionSource::Entry,
                batch_type: BatchType::Casting,
                material_name: m.catalog_name().to_string(),
                unit: m.unit().to_string(),
                total_quantity: match m {
                    EntryMaterial::Cement => Some(10.0),
                    EntryMaterial::Lime => Some(5.0),
                    EntryMaterial::Water => Some(2.0),
                    _ => Some(0.0),
                },
            })
            .collect();
        records.push(record(BatchType::Cutting, "Cement", "kg", Some(3.0)));

        let result = fold_consumption(records);
        assert_eq!(result.materials_total.quantity("Цемент (Cement)"), 13.0);
        assert_eq!(result.by_type(BatchType::Casting).quantity("Cement"), 10.0);
        assert_eq!(result.by_type(BatchType::Cutting).quantity("Cement"), 3.0);
        assert_eq!(result.materials_total.quantity("Lime"), 5.0);
        assert!(result.materials_total.get("Gypsum").is_none());
    }

    #[test]
    fn test_load_records_from_store_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username, password_hash, fio, role, created_at)
                 VALUES (1, 'op', 'x', 'Operator', 'cutting_operator', 0);
             INSERT INTO materials (id, name, unit) VALUES (1, 'Cement', 'kg');
             INSERT INTO entries (user_id, entry_date, entry_time, cement, lime, water, created_at)
                 VALUES (1, '2024-03-05', '08:00:00', 10, 5, 2, 0);
             INSERT INTO batches (id, batch_number, batch_type, user_id, start_time, created_at)
                 VALUES (1, 'C-1', 'cutting', 1, 0, 0);
             INSERT INTO batch_materials (batch_id, material_id, quantity, recorded_at) VALUES (1, 1, 3, 0);",
        )
        .unwrap();

        let first = fold_consumption(load_records(&conn).unwrap());
        let second = fold_consumption(load_records(&conn).unwrap());
        assert_eq!(first, second);
        assert_eq!(first.materials_total.quantity("Цемент (Cement)"), 13.0);
        assert_eq!(first.by_type(BatchType::Casting).quantity("Cement"), 10.0);
        assert_eq!(first.by_type(BatchType::Cutting).quantity("Cement"), 3.0);
    }
}
