//! Value coercion against column metadata.
//!
//! Writes go through `convert_value`, which turns an application `Value`
//! into the storage value SQLite binds (truncating text, range-checking
//! integers, formatting timestamps). Reads go through `decode_value`, which
//! uses a result column's declared type to restore booleans and temporal
//! values from their storage form.

use crate::core::{Result, SqlmateError};
use crate::schema_cache::{ColumnMeta, ColumnMetadataMap};
use crate::types::{self, DeclaredType, TypeKind};
use crate::value::{
    parse_date, parse_time, parse_timestamp, CoercedRecord, Record, Value, DATETIME_FORMAT,
    DATE_FORMAT, TIME_FORMAT,
};
use rusqlite::types::Value as SqlValue;
use uuid::Uuid;

/// Coerces one value for `column` using the table's metadata.
///
/// # Errors
///
/// Returns `SqlmateError::MissingColumn` if `column` has no metadata and
/// `SqlmateError::Conversion` if the value doesn't fit the column.
pub fn convert_value(column: &str, raw: &Value, coldata: &ColumnMetadataMap) -> Result<SqlValue> {
    let meta = coldata
        .get(column)
        .ok_or_else(|| SqlmateError::MissingColumn {
            column: column.to_string(),
        })?;
    coerce(column, raw, meta)
}

/// Coerces every value of every record.
pub fn correct_types(records: Vec<Record>, coldata: &ColumnMetadataMap) -> Result<Vec<CoercedRecord>> {
    records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .map(|(column, raw)| {
                    let value = convert_value(&column, &raw, coldata)?;
                    Ok((column, value))
                })
                .collect()
        })
        .collect()
}

/// Coerces `raw` into the storage form for a column described by `meta`.
pub fn coerce(column: &str, raw: &Value, meta: &ColumnMeta) -> Result<SqlValue> {
    if raw.is_null() {
        return if meta.is_nullable {
            Ok(SqlValue::Null)
        } else {
            Err(SqlmateError::conversion(column, "NULL is not allowed for a NOT NULL column"))
        };
    }

    let fail = |expected: &str| {
        SqlmateError::conversion(
            column,
            format!("expected {} for {}, got {} {}", expected, meta.column_type, raw.type_name(), raw),
        )
    };

    match meta.data_type.kind {
        TypeKind::Integer { min, max } => {
            let (min, max) = if meta.unsigned {
                (0, max.saturating_mul(2).saturating_add(1))
            } else {
                (min, max)
            };
            let i = to_i64(raw).ok_or_else(|| fail("an integer"))?;
            if i < min || i > max {
                return Err(SqlmateError::conversion(
                    column,
                    format!("{} is out of range for {} ({}..={})", i, meta.column_type, min, max),
                ));
            }
            Ok(SqlValue::Integer(i))
        }
        TypeKind::Boolean => to_bool(raw)
            .map(|b| SqlValue::Integer(i64::from(b)))
            .ok_or_else(|| fail("a boolean")),
        TypeKind::Float => to_f64(raw).map(SqlValue::Real).ok_or_else(|| fail("a number")),
        TypeKind::Decimal => {
            let f = to_f64(raw).ok_or_else(|| fail("a number"))?;
            Ok(SqlValue::Real(match meta.numeric_scale {
                Some(scale) => round_to(f, scale),
                None => f,
            }))
        }
        TypeKind::Text => {
            let text = to_text(raw).ok_or_else(|| fail("text"))?;
            Ok(SqlValue::Text(truncate_chars(text, meta.max_length())))
        }
        TypeKind::Json => {
            let text = match raw {
                Value::Json(j) => j.to_string(),
                Value::Text(s) => s.clone(),
                other => other.to_json().to_string(),
            };
            Ok(SqlValue::Text(truncate_chars(text, meta.max_length())))
        }
        TypeKind::Enum => {
            let text = to_text(raw).ok_or_else(|| fail("text"))?;
            if !meta.enum_values.is_empty() && !meta.enum_values.contains(&text) {
                return Err(SqlmateError::conversion(
                    column,
                    format!("'{}' is not one of {:?}", text, meta.enum_values),
                ));
            }
            Ok(SqlValue::Text(text))
        }
        TypeKind::Binary => {
            let mut bytes = match raw {
                Value::Bytes(b) => b.clone(),
                Value::Text(s) => s.clone().into_bytes(),
                _ => return Err(fail("bytes")),
            };
            if let Some(max) = meta.max_length() {
                bytes.truncate(usize::try_from(max).unwrap_or(usize::MAX));
            }
            Ok(SqlValue::Blob(bytes))
        }
        TypeKind::Date => {
            let date = match raw {
                Value::Date(d) => Some(*d),
                Value::Timestamp(ts) => Some(ts.date()),
                Value::Text(s) => parse_date(s).or_else(|| parse_timestamp(s).map(|ts| ts.date())),
                _ => None,
            };
            date.map(|d| SqlValue::Text(d.format(DATE_FORMAT).to_string()))
                .ok_or_else(|| fail("a date"))
        }
        TypeKind::Time => {
            let time = match raw {
                Value::Time(t) => Some(*t),
                Value::Timestamp(ts) => Some(ts.time()),
                Value::Text(s) => parse_time(s),
                _ => None,
            };
            time.map(|t| SqlValue::Text(t.format(TIME_FORMAT).to_string()))
                .ok_or_else(|| fail("a time"))
        }
        TypeKind::DateTime => {
            let ts = match raw {
                Value::Timestamp(ts) => Some(*ts),
                Value::Date(d) => d.and_hms_opt(0, 0, 0),
                Value::Text(s) => parse_timestamp(s),
                _ => None,
            };
            ts.map(|ts| SqlValue::Text(ts.format(DATETIME_FORMAT).to_string()))
                .ok_or_else(|| fail("a timestamp"))
        }
        TypeKind::Year => {
            let year = match raw {
                Value::Date(d) => Some(i64::from(chrono::Datelike::year(d))),
                Value::Timestamp(ts) => Some(i64::from(chrono::Datelike::year(ts))),
                other => to_i64(other),
            }
            .ok_or_else(|| fail("a year"))?;
            if year != 0 && !(1901..=2155).contains(&year) {
                return Err(SqlmateError::conversion(
                    column,
                    format!("{} is out of range for YEAR", year),
                ));
            }
            Ok(SqlValue::Integer(year))
        }
        TypeKind::Uuid => {
            let uuid = match raw {
                Value::Uuid(u) => Some(*u),
                Value::Text(s) => Uuid::parse_str(s.trim()).ok(),
                Value::Bytes(b) => Uuid::from_slice(b).ok(),
                _ => None,
            };
            uuid.map(|u| SqlValue::Text(u.hyphenated().to_string()))
                .ok_or_else(|| fail("a UUID"))
        }
        TypeKind::Any => Ok(raw.to_sql_value()),
    }
}

/// Decodes a storage value read from a column declared as `declared`.
///
/// Unknown or absent declarations map by storage class alone.
pub fn decode_value(raw: SqlValue, declared: Option<&str>) -> std::result::Result<Value, String> {
    let kind = declared
        .map(DeclaredType::parse)
        .and_then(|t| types::registry().get(&t.base))
        .map(|d| d.kind);

    match (kind, raw) {
        (_, SqlValue::Null) => Ok(Value::Null),
        (Some(TypeKind::Boolean), SqlValue::Integer(i)) => Ok(Value::Bool(i != 0)),
        (Some(TypeKind::Boolean), SqlValue::Text(s)) => parse_bool(&s)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a boolean", s)),
        (Some(TypeKind::DateTime), SqlValue::Text(s)) => parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("'{}' is not a timestamp", s)),
        (Some(TypeKind::Date), SqlValue::Text(s)) => parse_date(&s)
            .map(Value::Date)
            .ok_or_else(|| format!("'{}' is not a date", s)),
        (Some(TypeKind::Time), SqlValue::Text(s)) => parse_time(&s)
            .map(Value::Time)
            .ok_or_else(|| format!("'{}' is not a time", s)),
        (_, other) => Ok(Value::from_sql_value(other)),
    }
}

fn to_i64(raw: &Value) -> Option<i64> {
    match raw {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        // 2^63 itself is out of range; `as` would saturate
        Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
            Some(*f as i64)
        }
        Value::Float(_) => None,
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_f64(raw: &Value) -> Option<f64> {
    match raw {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Text(s) => parse_bool(s),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn to_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Text(s) => Some(s.clone()),
        Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
        Value::Json(j) => Some(j.to_string()),
        Value::Null => None,
        other => match other.to_sql_value() {
            SqlValue::Text(s) => Some(s),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            _ => None,
        },
    }
}

fn truncate_chars(text: String, max: Option<u64>) -> String {
    match max.and_then(|m| usize::try_from(m).ok()) {
        Some(max) => match text.char_indices().nth(max) {
            Some((cut, _)) => text[..cut].to_string(),
            None => text,
        },
        None => text,
    }
}

fn round_to(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale.min(15) as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta(declared: &str, nullable: bool) -> ColumnMeta {
        ColumnMeta::from_declared(declared, nullable).unwrap()
    }

    fn coldata(columns: &[(&str, &str)]) -> ColumnMetadataMap {
        columns
            .iter()
            .map(|(name, declared)| (name.to_string(), meta(declared, true)))
            .collect()
    }

    #[test]
    fn test_text_truncation_by_class() {
        let long = Value::Text("x".repeat(300));
        let tiny = coerce("c", &long, &meta("TINYTEXT", true)).unwrap();
        assert_eq!(tiny, SqlValue::Text("x".repeat(255)));

        for declared in ["TEXT", "MEDIUMTEXT", "LONGTEXT"] {
            let kept = coerce("c", &long, &meta(declared, true)).unwrap();
            assert_eq!(kept, SqlValue::Text("x".repeat(300)), "{}", declared);
        }

        let sized = coerce("c", &long, &meta("VARCHAR(10)", true)).unwrap();
        assert_eq!(sized, SqlValue::Text("x".repeat(10)));
    }

    #[test]
    fn test_truncation_counts_characters() {
        let text = Value::Text("héllo wörld".to_string());
        let out = coerce("c", &text, &meta("VARCHAR(5)", true)).unwrap();
        assert_eq!(out, SqlValue::Text("héllo".to_string()));
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(coerce("c", &Value::Int(127), &meta("TINYINT", true)).unwrap(), SqlValue::Integer(127));
        match coerce("c", &Value::Int(128), &meta("TINYINT", true)) {
            Err(SqlmateError::Conversion { column, message }) => {
                assert_eq!(column, "c");
                assert!(message.contains("out of range"));
            }
            other => panic!("Expected Conversion error, got {:?}", other),
        }
        assert!(coerce("c", &Value::Int(200), &meta("TINYINT UNSIGNED", true)).is_ok());
        assert!(coerce("c", &Value::Int(-1), &meta("INT UNSIGNED", true)).is_err());
        assert_eq!(
            coerce("c", &Value::Text(" 42 ".into()), &meta("INTEGER", true)).unwrap(),
            SqlValue::Integer(42)
        );
        assert!(coerce("c", &Value::Float(1.5), &meta("INT", true)).is_err());
        assert_eq!(
            coerce("c", &Value::Float(-3.0), &meta("INTEGER", true)).unwrap(),
            SqlValue::Integer(-3)
        );
    }

    #[test]
    fn test_unrepresentable_floats_rejected() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e30, -1e30, 9_223_372_036_854_775_808.0] {
            match coerce("c", &Value::Float(f), &meta("BIGINT", true)) {
                Err(SqlmateError::Conversion { column, .. }) => assert_eq!(column, "c"),
                other => panic!("Expected Conversion error for {}, got {:?}", f, other),
            }
        }
        assert!(coerce("c", &Value::Float(1e30), &meta("YEAR", true)).is_err());
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(coerce("c", &Value::Null, &meta("TEXT", true)).unwrap(), SqlValue::Null);
        match coerce("c", &Value::Null, &meta("TEXT", false)) {
            Err(SqlmateError::Conversion { .. }) => {}
            other => panic!("Expected Conversion error, got {:?}", other),
        }
    }

    #[test]
    fn test_temporal_and_bool() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(
            coerce("c", &Value::Timestamp(ts), &meta("DATETIME", true)).unwrap(),
            SqlValue::Text("2024-05-06 07:08:09".to_string())
        );
        assert_eq!(
            coerce("c", &Value::Timestamp(ts), &meta("DATE", true)).unwrap(),
            SqlValue::Text("2024-05-06".to_string())
        );
        assert_eq!(
            coerce("c", &Value::Text("yes".into()), &meta("BOOLEAN", true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert!(coerce("c", &Value::Text("someday".into()), &meta("TIMESTAMP", true)).is_err());
    }

    #[test]
    fn test_decimal_enum_uuid_json() {
        assert_eq!(
            coerce("c", &Value::Float(12.3456), &meta("DECIMAL(6,2)", true)).unwrap(),
            SqlValue::Real(12.35)
        );
        assert!(coerce("c", &Value::Text("live".into()), &meta("ENUM('draft','live')", true)).is_ok());
        assert!(coerce("c", &Value::Text("gone".into()), &meta("ENUM('draft','live')", true)).is_err());

        let id = Uuid::new_v4();
        assert_eq!(
            coerce("c", &Value::Text(id.to_string()), &meta("UUID", true)).unwrap(),
            SqlValue::Text(id.hyphenated().to_string())
        );
        assert_eq!(
            coerce("c", &Value::Json(serde_json::json!({"a": 1})), &meta("JSON", true)).unwrap(),
            SqlValue::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_convert_value_missing_column() {
        let data = coldata(&[("id", "INTEGER")]);
        match convert_value("ghost", &Value::Int(1), &data) {
            Err(SqlmateError::MissingColumn { column }) => assert_eq!(column, "ghost"),
            other => panic!("Expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_correct_types_records() {
        let data = coldata(&[("id", "INTEGER"), ("flag", "BOOL"), ("note", "TINYTEXT")]);
        let mut record = Record::new();
        record.insert("id".into(), Value::Text("7".into()));
        record.insert("flag".into(), Value::Bool(false));
        record.insert("note".into(), Value::Text("n".repeat(400)));

        let out = correct_types(vec![record], &data).unwrap();
        assert_eq!(out[0]["id"], SqlValue::Integer(7));
        assert_eq!(out[0]["flag"], SqlValue::Integer(0));
        assert_eq!(out[0]["note"], SqlValue::Text("n".repeat(255)));
    }

    #[test]
    fn test_decode_by_declared_type() {
        assert_eq!(decode_value(SqlValue::Integer(1), Some("BOOL")), Ok(Value::Bool(true)));
        assert_eq!(decode_value(SqlValue::Integer(1), Some("INTEGER")), Ok(Value::Int(1)));
        assert_eq!(decode_value(SqlValue::Null, Some("DATETIME")), Ok(Value::Null));
        assert_eq!(
            decode_value(SqlValue::Text("2024-01-02".into()), Some("date")),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
        );
        assert!(decode_value(SqlValue::Text("garbage".into()), Some("TIMESTAMP")).is_err());
        assert_eq!(
            decode_value(SqlValue::Text("{}".into()), Some("JSON")),
            Ok(Value::Text("{}".into()))
        );
        assert_eq!(decode_value(SqlValue::Real(1.5), None), Ok(Value::Float(1.5)));
    }
}
