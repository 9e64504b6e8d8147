//! Coercion of engine-native values into semantic field types
//!
//! Engines hand back whatever their driver produces: dates as text, booleans as
//! `'T'`/`'F'`, lists as `|a|b|` strings, decimals as floats. `FieldType::coerce`
//! turns those into the one representation each semantic type uses.

use crate::serialize::decode_list;
use crate::types::{FieldType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("cannot coerce {found} value '{value}' to {expected}")]
pub struct CoercionError {
    pub expected: String,
    pub found: &'static str,
    pub value: String,
}

impl CoercionError {
    fn new(expected: &FieldType, value: &Value) -> Self {
        Self {
            expected: expected.name(),
            found: value.type_name(),
            value: value.to_string(),
        }
    }

    fn rust(expected: &str, value: &Value) -> Self {
        Self {
            expected: expected.to_string(),
            found: value.type_name(),
            value: value.to_string(),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(text).map(|dt| dt.date()))
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
}

fn decimal_from_f64(f: f64) -> Option<Decimal> {
    // Go through the shortest textual form so 0.1 stays 0.1
    Decimal::from_str(&f.to_string()).ok()
}

impl FieldType {
    /// Convert an engine-native value into this field type's representation.
    ///
    /// NULL passes through unchanged; callers decide whether NULL is acceptable.
    pub fn coerce(&self, value: Value) -> Result<Value, CoercionError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let coerced = match self {
            FieldType::Id
            | FieldType::Integer
            | FieldType::BigInteger
            | FieldType::Reference(_) => coerce_integer(&value).map(Value::Integer),
            FieldType::Double => match &value {
                Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Float),
                other => other.as_f64().map(Value::Float),
            },
            FieldType::Decimal { scale, .. } => {
                let decimal = match &value {
                    Value::Decimal(d) => Some(*d),
                    Value::Integer(i) => Some(Decimal::from(*i)),
                    Value::Float(f) => decimal_from_f64(*f),
                    Value::Text(s) => Decimal::from_str(s.trim()).ok(),
                    _ => None,
                };
                decimal.map(|d| {
                    if d.scale() > u32::from(*scale) {
                        Value::Decimal(d.round_dp(u32::from(*scale)))
                    } else {
                        Value::Decimal(d)
                    }
                })
            }
            FieldType::Boolean => match &value {
                Value::Boolean(b) => Some(Value::Boolean(*b)),
                Value::Integer(i) => Some(Value::Boolean(*i != 0)),
                Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "t" | "true" | "1" | "on" => Some(Value::Boolean(true)),
                    "f" | "false" | "0" | "off" | "" => Some(Value::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            FieldType::String | FieldType::Text | FieldType::Password | FieldType::Upload => {
                match &value {
                    Value::Text(s) => Some(Value::Text(s.clone())),
                    Value::Blob(bytes) => String::from_utf8(bytes.clone()).ok().map(Value::Text),
                    Value::Json(serde_json::Value::String(s)) => Some(Value::Text(s.clone())),
                    Value::Array(_) | Value::Json(_) => None,
                    other => Some(Value::Text(other.to_string())),
                }
            }
            FieldType::Date => match &value {
                Value::Date(d) => Some(Value::Date(*d)),
                Value::Timestamp(ts) => Some(Value::Date(ts.date())),
                Value::Text(s) => parse_date(s).map(Value::Date),
                _ => None,
            },
            FieldType::Time => match &value {
                Value::Time(t) => Some(Value::Time(*t)),
                Value::Timestamp(ts) => Some(Value::Time(ts.time())),
                Value::Text(s) => parse_time(s).map(Value::Time),
                _ => None,
            },
            FieldType::DateTime => match &value {
                Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
                Value::Date(d) => Some(Value::Timestamp(d.and_time(NaiveTime::MIN))),
                Value::Text(s) => parse_datetime(s).map(Value::Timestamp),
                _ => None,
            },
            FieldType::Blob => match &value {
                Value::Blob(bytes) => Some(Value::Blob(bytes.clone())),
                Value::Text(s) => Some(Value::Blob(s.as_bytes().to_vec())),
                _ => None,
            },
            FieldType::Json => match &value {
                Value::Json(json) => Some(Value::Json(json.clone())),
                Value::Text(s) => serde_json::from_str(s).ok().map(Value::Json),
                other => Some(Value::Json(other.to_json())),
            },
            FieldType::ListOfString => coerce_list(&value, |item| match item {
                Value::Text(s) => Some(Value::Text(s.clone())),
                Value::Json(serde_json::Value::String(s)) => Some(Value::Text(s.clone())),
                Value::Null => None,
                other => Some(Value::Text(other.to_string())),
            }),
            FieldType::ListOfInteger | FieldType::ListOfReference(_) => {
                coerce_list(&value, |item| coerce_integer(item).map(Value::Integer))
            }
        };

        coerced.ok_or_else(|| CoercionError::new(self, &value))
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        Value::Boolean(b) => Some(i64::from(*b)),
        Value::Json(serde_json::Value::Number(n)) => n.as_i64(),
        other => other.as_i64(),
    }
}

fn coerce_list<F>(value: &Value, item: F) -> Option<Value>
where
    F: Fn(&Value) -> Option<Value>,
{
    let items: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        Value::Json(serde_json::Value::Array(items)) => {
            items.iter().cloned().map(json_to_value).collect()
        }
        Value::Text(s) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<serde_json::Value>(s).ok()? {
                serde_json::Value::Array(items) => items.into_iter().map(json_to_value).collect(),
                _ => return None,
            }
        }
        Value::Text(s) => decode_list(s).into_iter().map(Value::Text).collect(),
        _ => return None,
    };

    items
        .iter()
        .map(&item)
        .collect::<Option<Vec<Value>>>()
        .map(Value::Array)
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

/// Typed extraction of a runtime value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, CoercionError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        value.as_i64().ok_or_else(|| CoercionError::rust("i64", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .ok_or_else(|| CoercionError::rust("i32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        value.as_f64().ok_or_else(|| CoercionError::rust("f64", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        value.as_bool().ok_or_else(|| CoercionError::rust("bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoercionError::rust("String", value))
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Decimal(d) => Ok(*d),
            Value::Integer(i) => Ok(Decimal::from(*i)),
            _ => Err(CoercionError::rust("Decimal", value)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Date(d) => Ok(*d),
            _ => Err(CoercionError::rust("NaiveDate", value)),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Time(t) => Ok(*t),
            _ => Err(CoercionError::rust("NaiveTime", value)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            _ => Err(CoercionError::rust("NaiveDateTime", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        Ok(value.to_json())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            _ => Err(CoercionError::rust("Vec", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dates_from_engine_text() {
        let date = FieldType::Date.coerce(Value::from("2024-03-01")).unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let ts = FieldType::DateTime
            .coerce(Value::from("2024-03-01 12:30:00"))
            .unwrap();
        assert!(matches!(ts, Value::Timestamp(_)));

        let t = FieldType::Time.coerce(Value::from("08:15")).unwrap();
        assert_eq!(t, Value::Time(NaiveTime::from_hms_opt(8, 15, 0).unwrap()));
    }

    #[test]
    fn test_decimal_keeps_precision() {
        let value = FieldType::decimal().coerce(Value::from("19.99")).unwrap();
        assert_eq!(value.to_string(), "19.99");

        let from_float = FieldType::decimal().coerce(Value::Float(0.1)).unwrap();
        assert_eq!(from_float, Value::Decimal(Decimal::from_str("0.1").unwrap()));
    }

    #[test]
    fn test_list_encodings() {
        let pipes = FieldType::ListOfString.coerce(Value::from("|a|b||c|")).unwrap();
        assert_eq!(pipes, Value::from(vec!["a", "b|c"]));

        let json = FieldType::ListOfReference("tag".into())
            .coerce(Value::from("[1, 2, 3]"))
            .unwrap();
        assert_eq!(json, Value::from(vec![1i64, 2, 3]));

        let native = FieldType::ListOfInteger
            .coerce(Value::Array(vec![Value::from("4")]))
            .unwrap();
        assert_eq!(native, Value::from(vec![4i64]));
    }

    #[test]
    fn test_boolean_chars() {
        assert_eq!(FieldType::Boolean.coerce(Value::from("T")).unwrap(), Value::Boolean(true));
        assert_eq!(FieldType::Boolean.coerce(Value::Integer(0)).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_incoercible_value_errors() {
        let err = FieldType::Integer.coerce(Value::from("twelve")).unwrap_err();
        assert_eq!(err.expected, "integer");
        assert_eq!(err.found, "text");
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(FieldType::Date.coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(i64::from_value(&Value::Integer(7)).unwrap(), 7);
        assert_eq!(Option::<String>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(
            Vec::<i64>::from_value(&Value::from(vec![1i64, 2])).unwrap(),
            vec![1, 2]
        );
        assert!(bool::from_value(&Value::from("yes")).is_err());
    }
}
