///
/// Result rows.
///
/// A row keeps the statement's column names (shared between all rows of the
/// statement) and its values in column order. Values can be read by column
/// name or position, or iterated in order. When a result has duplicate column
/// names, lookup by name returns the last of them.
///

use std::ffi::c_int;
use std::ops::Index;
use std::sync::Arc;

use rusqlite::ffi;

use crate::arena;
use crate::value::{self, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    /// Value of the column named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rposition(|column| column == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no column named '{name}' in row"),
        }
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Column names of a prepared statement.
///
/// # Safety
/// `stmt` must be a live statement handle.
pub(crate) unsafe fn column_names(stmt: *mut ffi::sqlite3_stmt) -> Arc<[String]> {
    let count = unsafe { ffi::sqlite3_column_count(stmt) };
    (0..count)
        .map(|i| unsafe { arena::decode_cstring(ffi::sqlite3_column_name(stmt, i), None) })
        .collect()
}

/// Reads the current row, reusing `columns` when the statement has not
/// changed shape since they were read.
///
/// # Safety
/// `stmt` must be a live statement positioned on a row.
pub(crate) unsafe fn read_row(stmt: *mut ffi::sqlite3_stmt, columns: Option<Arc<[String]>>) -> Row {
    let count = unsafe { ffi::sqlite3_data_count(stmt) };
    let columns = columns
        .filter(|c| c.len() == count as usize)
        .unwrap_or_else(|| unsafe { column_names(stmt) });
    let values = (0..count as c_int)
        .map(|i| unsafe { value::read_column(stmt, i) })
        .collect();
    Row { columns, values }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "id".to_string()].into(),
            vec![Value::Number(1.0), Value::Text("a".into()), Value::Number(2.0)],
        )
    }

    #[test]
    fn test_lookup_by_name_last_duplicate_wins() {
        let row = row();
        assert_eq!(row.get("id"), Some(&Value::Number(2.0)));
        assert_eq!(row["name"], Value::Text("a".into()));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_positional_access() {
        let row = row();
        assert_eq!(row[0], Value::Number(1.0));
        assert_eq!(row.get_index(2), Some(&Value::Number(2.0)));
        assert_eq!(row.get_index(3), None);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_iteration_in_column_order() {
        let row = row();
        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "name", "id"]);
        let values: Vec<Value> = row.into_iter().collect();
        assert_eq!(values[1], Value::Text("a".into()));
    }
}
