//! SQL for the analytics module. Instants are unix seconds; entry dates are
//! local `YYYY-MM-DD` text.

/// One row of column sums over every entry, in `EntryMaterial::ALL` order.
pub const ENTRY_MATERIAL_SUMS_SQL: &str = r#"
SELECT
    SUM(cement),
    SUM(lime),
    SUM(aluminum_powder),
    SUM(sludge),
    SUM(gypsum),
    SUM(water),
    SUM(sulfanol)
FROM entries
"#;

/// Batch-material quantities summed per (batch type, material, unit).
pub const BATCH_MATERIAL_SUMS_SQL: &str = r#"
SELECT
    b.batch_type,
    m.name,
    m.unit,
    SUM(bm.quantity)
FROM batch_materials bm
JOIN batches b ON b.id = bm.batch_id
JOIN materials m ON m.id = bm.material_id
GROUP BY b.batch_type, m.name, m.unit
ORDER BY b.batch_type, m.name
"#;

/// Entries in an inclusive local date range with their operator.
/// Parameters: ?1 = date_from, ?2 = date_to
pub const ENTRIES_IN_RANGE_SQL: &str = r#"
SELECT
    e.id, e.user_id, COALESCE(u.fio, ''), COALESCE(u.role, 'employee'),
    e.entry_date, e.entry_time, e.shift,
    e.cement, e.lime, e.aluminum_powder, e.sludge, e.gypsum, e.water, e.sulfanol
FROM entries e
LEFT JOIN users u ON u.id = e.user_id
WHERE e.entry_date >= ?1 AND e.entry_date <= ?2
ORDER BY e.entry_date DESC, e.entry_time DESC
"#;

/// Batches started in a half-open unix-seconds range with their operator.
/// Parameters: ?1 = start (inclusive), ?2 = end (exclusive)
pub const BATCHES_IN_RANGE_SQL: &str = r#"
SELECT
    b.id, b.batch_number, b.batch_type, b.status, b.shift,
    b.product_id, p.code, p.name,
    b.equipment_id,
    b.user_id, u.fio, u.role,
    b.start_time, b.end_time
FROM batches b
JOIN users u ON u.id = b.user_id
LEFT JOIN products p ON p.id = b.product_id
WHERE b.start_time >= ?1 AND b.start_time < ?2
ORDER BY b.start_time DESC
"#;

/// Cement / lime / water totals and entry count per day.
pub const DAILY_MATERIAL_SERIES_SQL: &str = r#"
SELECT
    entry_date,
    SUM(cement),
    SUM(lime),
    SUM(water),
    COUNT(*)
FROM entries
GROUP BY entry_date
ORDER BY entry_date
"#;

/// Batch rows in `BatchRow` column order, open for `BatchFilter::push_sql`.
pub const BATCH_ROWS_SQL: &str = r#"
SELECT
    b.id, b.batch_number, b.batch_type, b.status, b.shift,
    b.product_id, p.code, p.name,
    b.equipment_id,
    b.user_id, u.fio, u.role,
    b.start_time, b.end_time
FROM batches b
JOIN users u ON u.id = b.user_id
LEFT JOIN products p ON p.id = b.product_id
WHERE 1=1"#;

/// Entry rows in `EntryRow` column order, open for extra ` AND` clauses.
pub const ENTRY_ROWS_SQL: &str = r#"
SELECT
    e.id, e.user_id, COALESCE(u.fio, ''), COALESCE(u.role, 'employee'),
    e.entry_date, e.entry_time, e.shift,
    e.cement, e.lime, e.aluminum_powder, e.sludge, e.gypsum, e.water, e.sulfanol
FROM entries e
LEFT JOIN users u ON u.id = e.user_id
WHERE 1=1"#;
