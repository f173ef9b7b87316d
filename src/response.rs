//! Query responses.
//!
//! A `Response` is created before a statement runs and filled in afterwards:
//! `receive` decodes a raw result into rows, `fail` records an error. Error
//! handlers therefore always see the response of the failed statement.

use crate::coerce::decode_value;
use crate::core::db::query::RawResult;
use crate::core::{Result, SqlmateError};
use crate::value::{Record, Value};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::ops::Index;
use std::sync::Arc;
use tracing::warn;

/// One result row. Column names are shared between all rows of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Row { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn into_record(self) -> Record {
        self.columns.iter().cloned().zip(self.values).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(column, value)| (column.to_string(), value.to_json()))
                .collect(),
        )
    }
}

impl Index<&str> for Row {
    type Output = Value;

    /// # Panics
    ///
    /// Panics if the row has no such column.
    fn index(&self, column: &str) -> &Value {
        match self.get(column) {
            Some(value) => value,
            None => panic!("row has no column '{}'", column),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// The outcome of one statement.
#[derive(Debug, Clone)]
pub struct Response {
    /// Database the statement ran against
    pub database: Option<String>,
    /// Statement text as sent to SQLite
    pub query: Option<String>,
    pub columns: Vec<String>,
    rows: Vec<Row>,
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
    pub successful: bool,
    pub error_info: Option<String>,
    auto_raise_errors: bool,
}

impl Response {
    pub fn new(database: Option<&str>, query: Option<String>, auto_raise_errors: bool) -> Self {
        Response {
            database: database.map(str::to_string),
            query,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            last_insert_id: None,
            successful: false,
            error_info: None,
            auto_raise_errors,
        }
    }

    /// Decodes a raw result into this response and marks it successful.
    ///
    /// Values are decoded by each column's declared type. A value that
    /// doesn't decode is an error when `auto_raise_errors` is set; otherwise
    /// it is kept in its storage form and a warning is logged.
    pub fn receive(&mut self, raw: RawResult) -> Result<()> {
        let columns: Arc<[String]> = raw.columns.clone().into();
        let mut rows = Vec::with_capacity(raw.rows.len());

        for raw_row in raw.rows {
            let mut values = Vec::with_capacity(raw_row.len());
            for (i, cell) in raw_row.into_iter().enumerate() {
                let declared = raw.decl_types.get(i).and_then(|d| d.as_deref());
                let fallback = cell.clone();
                match decode_value(cell, declared) {
                    Ok(value) => values.push(value),
                    Err(message) => {
                        let column = columns.get(i).map(String::as_str).unwrap_or("?");
                        if self.auto_raise_errors {
                            let err = SqlmateError::conversion(column, message);
                            self.fail(&err);
                            return Err(err);
                        }
                        warn!(column, %message, "keeping undecodable value as stored");
                        values.push(Value::from_sql_value(fallback));
                    }
                }
            }
            rows.push(Row::new(Arc::clone(&columns), values));
        }

        self.columns = raw.columns;
        self.rows = rows;
        self.rows_affected = raw.rows_affected;
        self.last_insert_id = raw.last_insert_id;
        self.successful = true;
        self.error_info = None;
        Ok(())
    }

    /// Marks the response failed with `err`'s message.
    pub fn fail(&mut self, err: &SqlmateError) {
        self.successful = false;
        self.error_info = Some(err.to_string());
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows.iter().cloned().map(Row::into_record).collect()
    }

    /// Rows as a JSON array of objects.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.iter().map(Row::to_json).collect())
    }

    /// Deserializes every row into `T` by column name.
    pub fn rows_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(row.to_json()).map_err(SqlmateError::from))
            .collect()
    }
}

impl Index<usize> for Response {
    type Output = Row;

    fn index(&self, index: usize) -> &Row {
        &self.rows[index]
    }
}

impl IntoIterator for Response {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Response {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value as SqlValue;
    use serde::Deserialize;

    fn raw() -> RawResult {
        RawResult {
            columns: vec!["id".into(), "active".into(), "seen".into()],
            decl_types: vec![Some("INTEGER".into()), Some("BOOL".into()), Some("DATETIME".into())],
            rows: vec![
                vec![
                    SqlValue::Integer(1),
                    SqlValue::Integer(1),
                    SqlValue::Text("2024-01-01 08:00:00".into()),
                ],
                vec![SqlValue::Integer(2), SqlValue::Integer(0), SqlValue::Null],
            ],
            rows_affected: 0,
            last_insert_id: None,
        }
    }

    #[test]
    fn test_receive_decodes_by_declared_type() {
        let mut response = Response::new(Some("main"), Some("SELECT ...".into()), false);
        assert!(!response.successful);
        response.receive(raw()).unwrap();

        assert!(response.successful);
        assert_eq!(response.len(), 2);
        assert_eq!(response[0]["active"], Value::Bool(true));
        assert!(matches!(response[0]["seen"], Value::Timestamp(_)));
        assert_eq!(response[1]["seen"], Value::Null);
        assert_eq!(response[1].get("missing"), None);
    }

    #[test]
    fn test_undecodable_value_handling() {
        let mut bad = raw();
        bad.rows[0][2] = SqlValue::Text("not a time".into());

        let mut lenient = Response::new(None, None, false);
        lenient.receive(bad.clone()).unwrap();
        assert_eq!(lenient[0]["seen"], Value::Text("not a time".into()));

        let mut strict = Response::new(None, None, true);
        match strict.receive(bad) {
            Err(SqlmateError::Conversion { column, .. }) => assert_eq!(column, "seen"),
            other => panic!("Expected Conversion error, got {:?}", other),
        }
        assert!(!strict.successful);
        assert!(strict.error_info.is_some());
    }

    #[test]
    fn test_rows_as_and_json() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Flag {
            id: i64,
            active: bool,
        }

        let mut response = Response::new(None, None, false);
        response.receive(raw()).unwrap();
        let flags: Vec<Flag> = response.rows_as().unwrap();
        assert_eq!(flags[1], Flag { id: 2, active: false });

        let json = response.to_json();
        assert_eq!(json[0]["seen"], serde_json::json!("2024-01-01 08:00:00"));
        assert_eq!(serde_json::to_value(&response[1]).unwrap()["id"], serde_json::json!(2));
    }

    #[test]
    fn test_fail_marks_response() {
        let mut response = Response::new(Some("main"), None, false);
        response.fail(&SqlmateError::Query("boom".into()));
        assert!(!response.successful);
        assert_eq!(response.error_info.as_deref(), Some("Query error: boom"));
    }
}
