//! Row-aligned per-epoch metadata.
//!
//! One JSON-object row per retained epoch. The row count must equal the
//! selection length on every use; a table that drifted out of alignment is a
//! hard error, not a best-effort repair. Queries cover equality and
//! membership only.
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::error::EpoError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

/// Equality/membership sub-selection over one column.
#[derive(Debug, Clone)]
pub enum Query {
    /// Rows where `column == value`.
    Eq(String, Value),
    /// Rows where `column` is any of the listed values.
    In(String, Vec<Value>),
}

impl MetadataTable {
    pub fn new(columns: Vec<String>, rows: Vec<Map<String, Value>>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    bail!(EpoError::validation(format!(
                        "metadata row {i} has a value for unknown column {key:?}"
                    )));
                }
            }
        }
        Ok(MetadataTable { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row(&self, idx: usize) -> &Map<String, Value> {
        &self.rows[idx]
    }

    pub fn value(&self, idx: usize, column: &str) -> Option<&Value> {
        self.rows[idx].get(column)
    }

    /// Enforce the row-alignment invariant against the current epoch count.
    pub fn check_aligned(&self, n_rows: usize) -> Result<()> {
        if self.rows.len() != n_rows {
            bail!(EpoError::state(format!(
                "metadata has {} rows but the store holds {} epochs",
                self.rows.len(),
                n_rows
            )));
        }
        Ok(())
    }

    /// Row indices matching the query.
    pub fn select(&self, query: &Query) -> Result<Vec<usize>> {
        let column = match query {
            Query::Eq(c, _) | Query::In(c, _) => c,
        };
        if !self.columns.iter().any(|c| c == column) {
            bail!(EpoError::validation(format!(
                "metadata has no column {column:?}"
            )));
        }
        let matched = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| match query {
                Query::Eq(c, v) => row.get(c) == Some(v),
                Query::In(c, vs) => row.get(c).map_or(false, |rv| vs.contains(rv)),
            })
            .map(|(i, _)| i)
            .collect();
        Ok(matched)
    }

    /// New table holding only the given rows, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        MetadataTable {
            columns: self.columns.clone(),
            rows: rows.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.rows,
        })
        .to_string()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let v: Value = serde_json::from_str(json).context("parse metadata json")?;
        let columns = v["columns"]
            .as_array()
            .context("metadata json missing 'columns'")?
            .iter()
            .map(|c| c.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .context("metadata column names must be strings")?;
        let rows = v["rows"]
            .as_array()
            .context("metadata json missing 'rows'")?
            .iter()
            .map(|r| r.as_object().cloned())
            .collect::<Option<Vec<_>>>()
            .context("metadata rows must be objects")?;
        MetadataTable::new(columns, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> MetadataTable {
        let columns = vec!["kind".to_string(), "rt".to_string(), "hit".to_string()];
        let rows = vec![
            json!({"kind": "target", "rt": 0.43, "hit": true}),
            json!({"kind": "standard", "rt": 0.61, "hit": false}),
            json!({"kind": "target", "rt": 0.39, "hit": true}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        MetadataTable::new(columns, rows).unwrap()
    }

    #[test]
    fn equality_and_membership_queries() {
        let t = table();
        let q = Query::Eq("kind".into(), json!("target"));
        assert_eq!(t.select(&q).unwrap(), vec![0, 2]);
        let q = Query::In("rt".into(), vec![json!(0.61), json!(0.39)]);
        assert_eq!(t.select(&q).unwrap(), vec![1, 2]);
        let q = Query::Eq("hit".into(), json!(false));
        assert_eq!(t.select(&q).unwrap(), vec![1]);
    }

    #[test]
    fn unknown_column_is_error() {
        let t = table();
        assert!(t.select(&Query::Eq("nope".into(), json!(1))).is_err());
    }

    #[test]
    fn alignment_check() {
        let t = table();
        assert!(t.check_aligned(3).is_ok());
        assert!(t.check_aligned(2).is_err());
    }

    #[test]
    fn row_subset_and_json_round_trip() {
        let t = table();
        let sub = t.take_rows(&[2, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.value(0, "rt"), Some(&json!(0.39)));
        let back = MetadataTable::from_json(&t.to_json()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn unknown_row_key_rejected() {
        let rows = vec![json!({"x": 1}).as_object().unwrap().clone()];
        assert!(MetadataTable::new(vec!["y".to_string()], rows).is_err());
    }
}
