//! In-memory CRUD tables.

use serde_json::{Map, Value};

pub const TABLE_NAMES: [&str; 4] = ["vendor_urls", "credentials", "proxies", "tasks"];

pub type Row = Map<String, Value>;

/// A list of JSON objects keyed by a numeric `id`.
#[derive(Debug, Default)]
pub struct Table {
    rows: Vec<Row>,
    next_id: u64,
}

impl Table {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }

    pub fn list(&self) -> &[Row] {
        &self.rows
    }

    /// Insert `fields` under a fresh id. A client-supplied `id` is overwritten.
    pub fn create(&mut self, mut fields: Row) -> Row {
        fields.insert("id".to_string(), Value::from(self.next_id));
        self.next_id += 1;
        self.rows.push(fields.clone());
        fields
    }

    /// Merge `fields` into the row with `id`. The id itself never changes.
    pub fn update(&mut self, id: u64, fields: Row) -> Option<Row> {
        let row = self.rows.iter_mut().find(|r| row_id(r) == Some(id))?;
        row.extend(fields);
        row.insert("id".to_string(), Value::from(id));
        Some(row.clone())
    }

    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| row_id(r) != Some(id));
        self.rows.len() != before
    }

    /// Remove every row whose id is listed. Returns how many were removed.
    pub fn bulk_delete(&mut self, ids: &[u64]) -> usize {
        let before = self.rows.len();
        self.rows
            .retain(|r| !row_id(r).is_some_and(|id| ids.contains(&id)));
        before - self.rows.len()
    }
}

fn row_id(row: &Row) -> Option<u64> {
    row.get("id").and_then(Value::as_u64)
}
