use crate::analytics::types::BatchRow;
use crate::local_time;
use crate::types::{BatchStatus, BatchType};
use chrono::NaiveDate;
use rusqlite::types::ToSql;
use serde::Deserialize;

/// Raw query string for batch listings, dashboards and exports. Values are
/// kept as strings so `all`, blanks and malformed values can be ignored
/// rather than rejected.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BatchQueryParams {
    pub batch_type: Option<String>,
    pub status: Option<String>,
    pub product_id: Option<String>,
    pub equipment_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchFilter {
    pub batch_type: Option<BatchType>,
    pub status: Option<BatchStatus>,
    pub product_id: Option<i64>,
    pub equipment_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Restricts to one operator's batches; set for non-supervisors.
    pub user_id: Option<i64>,
}

fn meaningful(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "all")
}

impl BatchFilter {
    pub fn from_params(params: &BatchQueryParams) -> Self {
        Self {
            batch_type: meaningful(&params.batch_type).and_then(|v| v.parse().ok()),
            status: meaningful(&params.status).and_then(|v| v.parse().ok()),
            product_id: meaningful(&params.product_id).and_then(|v| v.parse().ok()),
            equipment_id: meaningful(&params.equipment_id).and_then(|v| v.parse().ok()),
            date_from: meaningful(&params.date_from).and_then(local_time::parse_date),
            date_to: meaningful(&params.date_to).and_then(local_time::parse_date),
            user_id: None,
        }
    }

    /// Append ` AND ...` clauses on the `b` alias, numbering placeholders
    /// after whatever is already bound.
    pub fn push_sql(&self, sql: &mut String, bind_values: &mut Vec<Box<dyn ToSql>>) {
        if let Some(batch_type) = self.batch_type {
            sql.push_str(&format!(" AND b.batch_type = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(batch_type.as_str()));
        }
        if let Some(status) = self.status {
            sql.push_str(&format!(" AND b.status = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(status.as_str()));
        }
        if let Some(product_id) = self.product_id {
            sql.push_str(&format!(" AND b.product_id = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(product_id));
        }
        if let Some(equipment_id) = self.equipment_id {
            sql.push_str(&format!(" AND b.equipment_id = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(equipment_id));
        }
        if let Some(from) = self.date_from {
            sql.push_str(&format!(" AND b.start_time >= ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(local_time::day_start(from)));
        }
        if let Some(to) = self.date_to {
            let (_, end) = local_time::day_range(to, to);
            sql.push_str(&format!(" AND b.start_time < ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(end));
        }
        if let Some(user_id) = self.user_id {
            sql.push_str(&format!(" AND b.user_id = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(user_id));
        }
    }

    /// In-memory equivalent of the type, status, product, equipment and
    /// operator clauses. Date bounds are left to the query that loaded the rows.
    pub fn matches(&self, row: &BatchRow) -> bool {
        self.batch_type.map_or(true, |t| row.batch_type == t)
            && self.status.map_or(true, |s| row.status == s)
            && self.product_id.map_or(true, |p| row.product_id == Some(p))
            && self.equipment_id.map_or(true, |e| row.equipment_id == Some(e))
            && self.user_id.map_or(true, |u| row.user_id == u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_blank_and_invalid_values_are_ignored() {
        let params = BatchQueryParams {
            batch_type: Some("all".into()),
            status: Some("paused".into()),
            product_id: Some("".into()),
            equipment_id: Some("abc".into()),
            date_from: Some("05.03.2024".into()),
            date_to: None,
            page: None,
        };
        assert_eq!(BatchFilter::from_params(&params), BatchFilter::default());
    }

    #[test]
    fn test_push_sql_numbers_placeholders_in_order() {
        let filter = BatchFilter {
            batch_type: Some(BatchType::Cutting),
            product_id: Some(3),
            user_id: Some(7),
            ..Default::default()
        };
        let mut sql = String::from("SELECT 1 FROM batches b WHERE 1=1");
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(0)];
        filter.push_sql(&mut sql, &mut binds);
        assert!(sql.ends_with(
            " AND b.batch_type = ?2 AND b.product_id = ?3 AND b.user_id = ?4"
        ));
        assert_eq!(binds.len(), 4);
    }
}
