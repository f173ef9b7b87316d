//! Application-level values.
//!
//! `Value` is what callers put into records and read out of rows. It is
//! richer than SQLite's five storage classes: booleans, timestamps, dates,
//! times, JSON documents and UUIDs survive a write/read cycle when the column
//! declares a matching type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value as SqlValue;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Canonical text form for timestamps stored in SQLite.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// A write payload: column name to raw value.
pub type Record = BTreeMap<String, Value>;

/// A write payload after coercion, ready to bind.
pub type CoercedRecord = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
            Value::Uuid(_) => "uuid",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Storage-class encoding used when no column type is known.
    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Int(i) => SqlValue::Integer(*i),
            Value::Float(f) => SqlValue::Real(*f),
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Bytes(b) => SqlValue::Blob(b.clone()),
            Value::Timestamp(ts) => SqlValue::Text(ts.format(DATETIME_FORMAT).to_string()),
            Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
            Value::Time(t) => SqlValue::Text(t.format(TIME_FORMAT).to_string()),
            Value::Json(j) => SqlValue::Text(j.to_string()),
            Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
        }
    }

    /// Maps a storage value back without any column type information.
    pub fn from_sql_value(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Int(i),
            SqlValue::Real(f) => Value::Float(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Bytes(b),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::Timestamp(ts) => Json::String(ts.format(DATETIME_FORMAT).to_string()),
            Value::Date(d) => Json::String(d.format(DATE_FORMAT).to_string()),
            Value::Time(t) => Json::String(t.format(TIME_FORMAT).to_string()),
            Value::Json(j) => j.clone(),
            Value::Uuid(u) => Json::String(u.hyphenated().to_string()),
        }
    }

    /// Converts a JSON scalar into a value; arrays and objects become `Json`.
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            Json::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.partial_cmp(b),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            other => match other.to_json() {
                serde_json::Value::String(s) => write!(f, "{}", s),
                json => write!(f, "{}", json),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDateTime => Timestamp,
    NaiveDate => Date,
    NaiveTime => Time,
    serde_json::Value => Json,
    Uuid => Uuid,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Parses the timestamp spellings SQLite and callers commonly use.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    const FORMATS: &[&str] = &[
        DATETIME_FORMAT,
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}
