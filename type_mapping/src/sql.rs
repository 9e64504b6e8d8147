//! SQL type conversion utilities
//!
//! This module maps semantic field types to their PostgreSQL column types.

use crate::types::FieldType;

/// Map a semantic field type to the PostgreSQL type used in DDL generation
pub fn field_type_to_pg_type(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Id => "BIGSERIAL".to_string(),
        FieldType::String | FieldType::Password | FieldType::Upload => "VARCHAR(512)".to_string(),
        FieldType::Text => "TEXT".to_string(),
        FieldType::Boolean => "BOOLEAN".to_string(),
        FieldType::Integer => "INTEGER".to_string(),
        FieldType::BigInteger => "BIGINT".to_string(),
        FieldType::Double => "DOUBLE PRECISION".to_string(),
        FieldType::Decimal { precision, scale } => format!("NUMERIC({},{})", precision, scale),
        FieldType::Date => "DATE".to_string(),
        FieldType::Time => "TIME".to_string(),
        FieldType::DateTime => "TIMESTAMP".to_string(),
        FieldType::Blob => "BYTEA".to_string(),
        FieldType::Reference(table) => {
            format!("BIGINT REFERENCES \"{}\"(\"id\") ON DELETE CASCADE", table)
        }
        FieldType::ListOfString => "TEXT[]".to_string(),
        FieldType::ListOfInteger | FieldType::ListOfReference(_) => "BIGINT[]".to_string(),
        FieldType::Json => "JSONB".to_string(),
    }
}

/// Whether the PostgreSQL column is a native array
pub fn is_array_type(field_type: &FieldType) -> bool {
    field_type.is_list()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_types() {
        assert_eq!(field_type_to_pg_type(&FieldType::decimal()), "NUMERIC(10,2)");
        assert_eq!(
            field_type_to_pg_type(&FieldType::Reference("person".into())),
            "BIGINT REFERENCES \"person\"(\"id\") ON DELETE CASCADE"
        );
        assert_eq!(field_type_to_pg_type(&FieldType::ListOfString), "TEXT[]");
        assert!(is_array_type(&FieldType::ListOfReference("tag".into())));
    }
}
