use crate::models::error::{BackupError, Result};
use rusqlite::types::Value;
use std::sync::Arc;

/// One materialized row, detached from the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Column names compare case-insensitively, like SQLite identifiers.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .and_then(|index| self.values.get(index))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.get_opt_i64(name)?.ok_or_else(|| BackupError::Column {
            column: name.to_string(),
            problem: "is NULL".to_string(),
        })
    }

    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.required(name)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            Value::Real(value) => Ok(Some(*value as i64)),
            Value::Text(text) => text.trim().parse().map(Some).map_err(|_| BackupError::Column {
                column: name.to_string(),
                problem: format!("is not an integer ('{}')", text),
            }),
            Value::Blob(_) => Err(BackupError::Column {
                column: name.to_string(),
                problem: "is a blob, expected an integer".to_string(),
            }),
        }
    }

    /// NULL reads as an empty string; rows created with default values have NULL paths.
    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.required(name)? {
            Value::Null => Ok(String::new()),
            Value::Text(text) => Ok(text.clone()),
            Value::Integer(value) => Ok(value.to_string()),
            Value::Real(value) => Ok(value.to_string()),
            Value::Blob(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    fn required(&self, name: &str) -> Result<&Value> {
        self.value_by_name(name).ok_or_else(|| BackupError::Column {
            column: name.to_string(),
            problem: "is missing from the result".to_string(),
        })
    }
}

/// Renders a bound parameter for error reports.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(text) => text.clone(),
        Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}
