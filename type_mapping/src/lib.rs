//! Unified type mapping between semantic field types, runtime values and PostgreSQL
//! This crate provides the coercion rules shared across the typehaus ecosystem

pub mod coerce;
pub mod serialize;
pub mod sql;
pub mod types;

pub use coerce::{CoercionError, FromValue};
pub use serialize::{decode_list, encode_list, record_to_json};
pub use sql::{field_type_to_pg_type, is_array_type};
pub use types::{FieldType, Record, Value};

pub use rust_decimal::Decimal;
