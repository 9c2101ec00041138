//! Cell values and their mapping onto SQLite storage classes

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::storage::ColumnType;

/// Text layout used for DateTime cells, matching what most SQLite tooling
/// writes for `DATETIME` columns.
pub const DATETIME_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const DATETIME_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// A single cell value.
///
/// On the wire a `Value` is plain JSON: numbers, strings, booleans, null,
/// arrays and objects. DateTime values are written as ISO-8601 text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
        }
    }

    /// Convert a caller-supplied value into the representation stored for
    /// `column_type`. Null always passes; NOT NULL is the engine's concern.
    pub fn coerce(self, column_type: ColumnType) -> Result<Value, String> {
        let mismatch = |v: &Value| format!("expected {}, got {}", column_type, v.type_name());

        match (column_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Json, Value::Json(j)) => Ok(Value::Json(j)),
            (ColumnType::Json, other) => Ok(Value::Json(other.into_json())),

            (ColumnType::Integer, Value::Integer(i)) => Ok(Value::Integer(i)),
            (ColumnType::Integer, Value::Float(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Ok(Value::Integer(f as i64))
            }

            (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),

            (ColumnType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
            (ColumnType::Boolean, Value::Integer(0)) => Ok(Value::Boolean(false)),
            (ColumnType::Boolean, Value::Integer(1)) => Ok(Value::Boolean(true)),

            (ColumnType::String, Value::String(s)) => Ok(Value::String(s)),

            (ColumnType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
            (ColumnType::DateTime, Value::String(s)) => parse_datetime(&s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("'{}' is not a valid datetime", s)),

            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Decode a stored cell according to the column's declared type. Data
    /// that does not look like the declared type is returned by storage class.
    pub fn from_stored(raw: ValueRef<'_>, column_type: ColumnType) -> Value {
        match (column_type, raw) {
            (_, ValueRef::Null) => Value::Null,
            (ColumnType::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
            (ColumnType::Float, ValueRef::Integer(i)) => Value::Float(i as f64),
            (ColumnType::DateTime, ValueRef::Text(t)) => {
                let text = String::from_utf8_lossy(t);
                match parse_datetime(&text) {
                    Some(dt) => Value::DateTime(dt),
                    None => Value::String(text.into_owned()),
                }
            }
            (ColumnType::Json, ValueRef::Text(t)) => {
                let text = String::from_utf8_lossy(t);
                match serde_json::from_str::<JsonValue>(&text) {
                    Ok(j) => Value::Json(j),
                    Err(_) => Value::String(text.into_owned()),
                }
            }
            (_, raw) => Value::from_storage_class(raw),
        }
    }

    fn from_storage_class(raw: ValueRef<'_>) -> Value {
        match raw {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Render as a SQL literal, for DDL `DEFAULT` clauses where parameters
    /// are not allowed.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => format!("{:?}", f),
            Value::Float(_) => "NULL".to_string(),
            Value::String(s) => quote_literal(s),
            Value::DateTime(dt) => quote_literal(&dt.format(DATETIME_STORAGE_FORMAT).to_string()),
            Value::Json(j) => quote_literal(&j.to_string()),
        }
    }

    pub fn into_json(self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(b),
            Value::Integer(i) => JsonValue::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s),
            Value::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Json(j) => j,
        }
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::DateTime(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::Json(j) => j.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Value::from)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::DateTime(dt) => {
                ToSqlOutput::from(dt.format(DATETIME_STORAGE_FORMAT).to_string())
            }
            Value::Json(j) => ToSqlOutput::from(j.to_string()),
        })
    }
}
