//! Type mapping definitions
//!
//! This module provides the semantic field types entities are declared with
//! and the runtime values that flow between entities and the engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Column values of one row, keyed by field name
pub type Record = BTreeMap<String, Value>;

/// Semantic type of an entity field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Integer primary key assigned by the engine
    Id,
    String,
    Text,
    Boolean,
    Integer,
    BigInteger,
    Double,
    Decimal { precision: u8, scale: u8 },
    Date,
    Time,
    DateTime,
    Blob,
    Password,
    /// Name of an uploaded file
    Upload,
    /// Primary key of a row in the named entity
    Reference(String),
    ListOfString,
    ListOfInteger,
    /// Primary keys of rows in the named entity
    ListOfReference(String),
    Json,
}

impl FieldType {
    /// Default decimal type, mirroring `decimal(10,2)`
    pub fn decimal() -> Self {
        FieldType::Decimal {
            precision: 10,
            scale: 2,
        }
    }

    /// Entity referenced by this field, if any
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            FieldType::Reference(table) | FieldType::ListOfReference(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldType::ListOfString | FieldType::ListOfInteger | FieldType::ListOfReference(_)
        )
    }

    /// Short name used in diagnostics and DDL comments
    pub fn name(&self) -> String {
        match self {
            FieldType::Id => "id".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Text => "text".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::BigInteger => "bigint".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Decimal { precision, scale } => format!("decimal({},{})", precision, scale),
            FieldType::Date => "date".to_string(),
            FieldType::Time => "time".to_string(),
            FieldType::DateTime => "datetime".to_string(),
            FieldType::Blob => "blob".to_string(),
            FieldType::Password => "password".to_string(),
            FieldType::Upload => "upload".to_string(),
            FieldType::Reference(table) => format!("reference {}", table),
            FieldType::ListOfString => "list:string".to_string(),
            FieldType::ListOfInteger => "list:integer".to_string(),
            FieldType::ListOfReference(table) => format!("list:reference {}", table),
            FieldType::Json => "json".to_string(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Runtime value of a single column
///
/// Variants are tagged when serialized so cached payloads come back with the
/// exact same types (a date stays a date, a decimal keeps its scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Blob(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Blob(_) => "blob",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// SQL-style ordering. `None` when either side is NULL or the types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Value::Integer(a), Value::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Value::Integer(_) | Value::Float(_) | Value::Decimal(_), _)
                if matches!(other, Value::Integer(_) | Value::Float(_) | Value::Decimal(_)) =>
            {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Timestamp(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Value::Timestamp(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL `=`: NULL never equals anything
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.sql_eq(y))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// JSON-safe rendition used when exporting rows
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => serde_json::Value::String(t.format("%H:%M:%S").to_string()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::Blob(bytes) => serde_json::Value::String(hex::encode(bytes)),
            Value::Json(value) => value.clone(),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Blob(bytes) => write!(f, "\\x{}", hex::encode(bytes)),
            Value::Json(value) => write!(f, "{}", value),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Value::Text(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value::Text(val.to_string())
    }
}

impl From<&String> for Value {
    fn from(val: &String) -> Self {
        Value::Text(val.clone())
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Value::Integer(val as i64)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::Integer(val)
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Value::Integer(val as i64)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value::Float(val)
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Value::Boolean(val)
    }
}

impl From<Decimal> for Value {
    fn from(val: Decimal) -> Self {
        Value::Decimal(val)
    }
}

impl From<NaiveDate> for Value {
    fn from(val: NaiveDate) -> Self {
        Value::Date(val)
    }
}

impl From<NaiveTime> for Value {
    fn from(val: NaiveTime) -> Self {
        Value::Time(val)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(val: NaiveDateTime) -> Self {
        Value::Timestamp(val)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(val: DateTime<Utc>) -> Self {
        Value::Timestamp(val.naive_utc())
    }
}

impl From<Vec<u8>> for Value {
    fn from(val: Vec<u8>) -> Self {
        Value::Blob(val)
    }
}

impl From<serde_json::Value> for Value {
    fn from(val: serde_json::Value) -> Self {
        Value::Json(val)
    }
}

impl From<Vec<String>> for Value {
    fn from(val: Vec<String>) -> Self {
        Value::Array(val.into_iter().map(Value::Text).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(val: Vec<&str>) -> Self {
        Value::Array(val.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(val: Vec<i64>) -> Self {
        Value::Array(val.into_iter().map(Value::Integer).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(val: Option<T>) -> Self {
        match val {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
