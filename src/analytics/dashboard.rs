use super::consumption::{EntryMaterial, MaterialConsumption};
use super::types::{BatchRow, EntryRow};
use crate::batches::filter::BatchFilter;
use crate::local_time;
use crate::types::{BatchStatus, BatchType, Role, Shift};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ShiftCount {
    pub day: usize,
    pub night: usize,
}

impl ShiftCount {
    fn bump(&mut self, shift: Shift) {
        match shift {
            Shift::Day => self.day += 1,
            Shift::Night => self.night += 1,
        }
    }
}

/// Operations per shift. Casting counts entries; cutting and autoclave count
/// batches. The shift split ignores the type/status/product/equipment filter.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ShiftStats {
    pub total: ShiftCount,
    pub casting: ShiftCount,
    pub cutting: ShiftCount,
    pub autoclave: ShiftCount,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EntryTotals {
    pub total_entries: usize,
    pub materials: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TypeStats {
    pub total: usize,
    /// Active and paused batches.
    pub active: usize,
    pub completed: usize,
    pub avg_duration_minutes: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProductStats {
    pub name: String,
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProductionMetrics {
    pub total_production: usize,
    /// Paused batches.
    pub downtime: usize,
    pub active: usize,
    /// Cancelled batches.
    pub defects: usize,
    /// Batches missing a product or equipment.
    pub tech_violations: usize,
    pub efficiency_pct: f64,
    pub avg_duration_minutes: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperatorStats {
    pub user_id: i64,
    pub name: String,
    pub role: Role,
    pub entries_count: usize,
    pub batches_count: usize,
    pub last_activity: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Entry,
    Batch,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimelineItem {
    pub kind: TimelineKind,
    pub id: i64,
    pub at: i64,
    pub at_local: String,
    pub user_id: Option<i64>,
    pub operator: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub shift_stats: ShiftStats,
    pub entry_totals: EntryTotals,
    pub batch_type_stats: BTreeMap<BatchType, TypeStats>,
    /// Ten most recent batches per type.
    pub recent_batches: BTreeMap<BatchType, Vec<BatchRow>>,
    pub product_stats: BTreeMap<String, ProductStats>,
    pub production: ProductionMetrics,
    pub operator_stats: Vec<OperatorStats>,
    pub timeline: Vec<TimelineItem>,
    pub material_consumption: Arc<MaterialConsumption>,
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub fn shift_stats(entries: &[EntryRow], batches: &[BatchRow]) -> ShiftStats {
    let mut stats = ShiftStats::default();
    for entry in entries {
        stats.casting.bump(entry.shift);
        stats.total.bump(entry.shift);
    }
    for batch in batches {
        match batch.batch_type {
            BatchType::Cutting => stats.cutting.bump(batch.shift),
            BatchType::Autoclave => stats.autoclave.bump(batch.shift),
            BatchType::Casting => {}
        }
        stats.total.bump(batch.shift);
    }
    stats
}

pub fn entry_totals(entries: &[EntryRow]) -> EntryTotals {
    let materials = EntryMaterial::ALL
        .iter()
        .map(|m| (m.label(), entries.iter().map(|e| e.quantity(*m)).sum()))
        .collect();
    EntryTotals {
        total_entries: entries.len(),
        materials,
    }
}

pub fn batch_type_stats(batches: &[&BatchRow]) -> BTreeMap<BatchType, TypeStats> {
    BatchType::ALL
        .iter()
        .map(|t| {
            let of_type: Vec<&&BatchRow> = batches.iter().filter(|b| b.batch_type == *t).collect();
            let stats = TypeStats {
                total: of_type.len(),
                active: of_type
                    .iter()
                    .filter(|b| matches!(b.status, BatchStatus::Active | BatchStatus::Inactive))
                    .count(),
                completed: of_type
                    .iter()
                    .filter(|b| b.status == BatchStatus::Completed)
                    .count(),
                avg_duration_minutes: average(of_type.iter().filter_map(|b| b.duration_minutes())),
            };
            (*t, stats)
        })
        .collect()
}

pub fn product_stats(batches: &[&BatchRow]) -> BTreeMap<String, ProductStats> {
    let mut out: BTreeMap<String, ProductStats> = BTreeMap::new();
    for batch in batches {
        let Some(code) = &batch.product_code else {
            continue;
        };
        let stats = out.entry(code.clone()).or_insert_with(|| ProductStats {
            name: batch.product_name.clone().unwrap_or_default(),
            ..Default::default()
        });
        stats.total += 1;
        match batch.status {
            BatchStatus::Active => stats.active += 1,
            BatchStatus::Completed => stats.completed += 1,
            _ => {}
        }
    }
    out
}

pub fn production_metrics(batches: &[&BatchRow]) -> ProductionMetrics {
    let total = batches.len();
    let count = |status: BatchStatus| batches.iter().filter(|b| b.status == status).count();
    let completed = count(BatchStatus::Completed);
    ProductionMetrics {
        total_production: total,
        downtime: count(BatchStatus::Inactive),
        active: count(BatchStatus::Active),
        defects: count(BatchStatus::Cancelled),
        tech_violations: batches
            .iter()
            .filter(|b| b.product_id.is_none() || b.equipment_id.is_none())
            .count(),
        efficiency_pct: if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        avg_duration_minutes: average(batches.iter().filter_map(|b| b.duration_minutes())),
    }
}

/// Entries and batches merged newest first.
pub fn timeline(entries: &[EntryRow], batches: &[BatchRow]) -> Vec<TimelineItem> {
    let mut items: Vec<TimelineItem> = entries
        .iter()
        .map(|e| {
            let at = e.instant();
            TimelineItem {
                kind: TimelineKind::Entry,
                id: e.id,
                at,
                at_local: local_time::format_local(at),
                user_id: e.user_id,
                operator: e.operator.clone(),
                description: format!("Casting entry, {} shift", e.shift),
            }
        })
        .chain(batches.iter().map(|b| {
            let suffix = match b.status {
                BatchStatus::Active => "",
                BatchStatus::Completed => " (completed)",
                BatchStatus::Cancelled => " (cancelled)",
                BatchStatus::Inactive => " (paused)",
            };
            TimelineItem {
                kind: TimelineKind::Batch,
                id: b.id,
                at: b.start_time,
                at_local: local_time::format_local(b.start_time),
                user_id: Some(b.user_id),
                operator: b.operator.clone(),
                description: format!("{} batch {}{}", b.batch_type, b.batch_number, suffix),
            }
        }))
        .collect();
    items.sort_by(|a, b| b.at.cmp(&a.at));
    items
}

/// Per-operator activity over the timeline, most recently active first.
pub fn operator_stats(
    entries: &[EntryRow],
    batches: &[BatchRow],
    timeline: &[TimelineItem],
) -> Vec<OperatorStats> {
    let mut roles: HashMap<i64, Role> = HashMap::new();
    for e in entries {
        if let Some(uid) = e.user_id {
            roles.insert(uid, e.operator_role);
        }
    }
    for b in batches {
        roles.insert(b.user_id, b.operator_role);
    }

    let mut by_user: HashMap<i64, OperatorStats> = HashMap::new();
    for item in timeline {
        let Some(uid) = item.user_id else {
            continue;
        };
        let stats = by_user.entry(uid).or_insert_with(|| OperatorStats {
            user_id: uid,
            name: item.operator.clone(),
            role: roles.get(&uid).copied().unwrap_or(Role::Employee),
            entries_count: 0,
            batches_count: 0,
            last_activity: item.at,
        });
        match item.kind {
            TimelineKind::Entry => stats.entries_count += 1,
            TimelineKind::Batch => stats.batches_count += 1,
        }
        stats.last_activity = stats.last_activity.max(item.at);
    }

    let mut out: Vec<OperatorStats> = by_user.into_values().collect();
    out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.user_id.cmp(&b.user_id)));
    out
}

/// Assemble the director dashboard from rows already limited to the date
/// window. `filter` narrows the batch metrics; shift stats, entry totals and
/// the timeline cover the whole window.
pub fn build_dashboard(
    date_from: NaiveDate,
    date_to: NaiveDate,
    entries: &[EntryRow],
    batches: &[BatchRow],
    filter: &BatchFilter,
    material_consumption: Arc<MaterialConsumption>,
) -> Dashboard {
    let filtered: Vec<&BatchRow> = batches.iter().filter(|b| filter.matches(b)).collect();

    let recent_batches = BatchType::ALL
        .iter()
        .map(|t| {
            let recent: Vec<BatchRow> = filtered
                .iter()
                .filter(|b| b.batch_type == *t)
                .take(10)
                .map(|b| (*b).clone())
                .collect();
            (*t, recent)
        })
        .collect();

    let timeline = timeline(entries, batches);
    let operator_stats = operator_stats(entries, batches, &timeline);

    Dashboard {
        date_from,
        date_to,
        shift_stats: shift_stats(entries, batches),
        entry_totals: entry_totals(entries),
        batch_type_stats: batch_type_stats(&filtered),
        recent_batches,
        product_stats: product_stats(&filtered),
        production: production_metrics(&filtered),
        operator_stats,
        timeline,
        material_consumption,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::consumption::fold_consumption;

    fn batch(id: i64, t: BatchType, status: BatchStatus, shift: Shift, minutes: Option<i64>) -> BatchRow {
        BatchRow {
            id,
            batch_number: format!("B-{id}"),
            batch_type: t,
            status,
            shift,
            product_id: Some(1),
            product_code: Some("GB-D400-200".into()),
            product_name: Some("Газоблок D400".into()),
            equipment_id: if id % 2 == 0 { Some(1) } else { None },
            user_id: 10,
            operator: "Петров".into(),
            operator_role: Role::CuttingOperator,
            start_time: 1_000 * id,
            end_time: minutes.map(|m| 1_000 * id + m * 60),
        }
    }

    fn entry(id: i64, shift: Shift, cement: f64) -> EntryRow {
        EntryRow {
            id,
            user_id: Some(20),
            operator: "Сидоров".into(),
            operator_role: Role::Employee,
            entry_date: "2024-03-05".into(),
            entry_time: format!("08:0{id}:00"),
            shift,
            cement,
            lime: 0.0,
            aluminum_powder: 0.0,
            sludge: 0.0,
            gypsum: 0.0,
            water: 1.0,
            sulfanol: 0.0,
        }
    }

    #[test]
    fn test_shift_stats_count_entries_as_casting() {
        let entries = vec![entry(1, Shift::Day, 1.0), entry(2, Shift::Night, 1.0)];
        let batches = vec![
            batch(1, BatchType::Cutting, BatchStatus::Active, Shift::Day, None),
            batch(2, BatchType::Autoclave, BatchStatus::Active, Shift::Night, None),
        ];
        let stats = shift_stats(&entries, &batches);
        assert_eq!(stats.casting, ShiftCount { day: 1, night: 1 });
        assert_eq!(stats.cutting, ShiftCount { day: 1, night: 0 });
        assert_eq!(stats.total, ShiftCount { day: 2, night: 2 });
    }

    #[test]
    fn test_production_metrics() {
        let rows = [
            batch(1, BatchType::Cutting, BatchStatus::Completed, Shift::Day, Some(30)),
            batch(2, BatchType::Cutting, BatchStatus::Completed, Shift::Day, Some(90)),
            batch(3, BatchType::Cutting, BatchStatus::Cancelled, Shift::Day, None),
            batch(4, BatchType::Autoclave, BatchStatus::Inactive, Shift::Day, None),
        ];
        let refs: Vec<&BatchRow> = rows.iter().collect();
        let m = production_metrics(&refs);
        assert_eq!(m.total_production, 4);
        assert_eq!(m.downtime, 1);
        assert_eq!(m.defects, 1);
        assert_eq!(m.tech_violations, 2);
        assert_eq!(m.efficiency_pct, 50.0);
        assert_eq!(m.avg_duration_minutes, 60.0);

        let per_type = batch_type_stats(&refs);
        assert_eq!(per_type[&BatchType::Cutting].completed, 2);
        assert_eq!(per_type[&BatchType::Autoclave].active, 1);
        assert_eq!(per_type[&BatchType::Casting].total, 0);
    }

    #[test]
    fn test_filter_narrows_batch_metrics_only() {
        let entries = vec![entry(1, Shift::Day, 10.0)];
        let batches = vec![
            batch(1, BatchType::Cutting, BatchStatus::Completed, Shift::Day, Some(10)),
            batch(2, BatchType::Autoclave, BatchStatus::Active, Shift::Night, None),
        ];
        let filter = BatchFilter {
            batch_type: Some(BatchType::Autoclave),
            ..Default::default()
        };
        let d = local_time::parse_date("2024-03-05").unwrap();
        let dash = build_dashboard(
            d,
            d,
            &entries,
            &batches,
            &filter,
            Arc::new(fold_consumption(Vec::new())),
        );
        assert_eq!(dash.production.total_production, 1);
        assert_eq!(dash.shift_stats.total, ShiftCount { day: 2, night: 1 });
        assert_eq!(dash.timeline.len(), 3);
        assert_eq!(dash.entry_totals.materials["Цемент (Cement)"], 10.0);
        assert_eq!(dash.operator_stats.len(), 2);
        assert_eq!(dash.product_stats["GB-D400-200"].active, 1);
    }
}
