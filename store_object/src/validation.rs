//! Identifier validation
//!
//! Entity, field and relationship names end up as quoted SQL identifiers and as
//! alias prefixes (`{relation}_{n}`), so they are restricted to a safe subset.

use thiserror::Error;

/// PostgreSQL identifier length limit
pub const MAX_NAME_LENGTH: usize = 63;

/// Words that would read as SQL when used bare in a generated query
const RESERVED_KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN",
    "CONSTRAINT", "CREATE", "CROSS", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE",
    "END", "EXISTS", "FALSE", "FOREIGN", "FROM", "FULL", "GRANT", "GROUP", "HAVING", "ILIKE",
    "IN", "INDEX", "INNER", "INSERT", "INTO", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT",
    "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES", "RETURNING",
    "REVOKE", "RIGHT", "SELECT", "SET", "TABLE", "THEN", "TRUE", "UNION", "UNIQUE", "UPDATE",
    "USER", "USING", "VALUES", "WHEN", "WHERE",
];

/// Why a schema name was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    Empty,

    #[error("Name '{name}' is too long: {length} characters (max 63)")]
    TooLong { name: String, length: usize },

    #[error("Name '{0}' must start with a letter or underscore")]
    InvalidStartCharacter(String),

    #[error("Invalid characters in name '{0}': only ASCII letters, digits and underscores are allowed")]
    InvalidCharacters(String),

    #[error("Name '{0}' is a reserved SQL keyword")]
    ReservedKeyword(String),
}

/// Check a schema name and return it as an owned string
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let Some(first) = name.chars().next() else {
        return Err(ValidationError::Empty);
    };
    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            name: name.to_string(),
            length: name.len(),
        });
    }
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ValidationError::InvalidStartCharacter(name.to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidCharacters(name.to_string()));
    }
    if RESERVED_KEYWORDS.contains(&name.to_ascii_uppercase().as_str()) {
        return Err(ValidationError::ReservedKeyword(name.to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        let longest = "a".repeat(MAX_NAME_LENGTH);
        for name in ["person", "person_role", "PersonRole", "_private", "post2", "key", "data", longest.as_str()] {
            assert_eq!(validate_name(name).as_deref(), Ok(name), "should accept {}", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        let cases = [
            ("", ValidationError::Empty),
            ("1person", ValidationError::InvalidStartCharacter("1person".to_string())),
            ("person-role", ValidationError::InvalidCharacters("person-role".to_string())),
            ("author.name", ValidationError::InvalidCharacters("author.name".to_string())),
            ("select", ValidationError::ReservedKeyword("select".to_string())),
            ("Order", ValidationError::ReservedKeyword("Order".to_string())),
        ];
        for (name, expected) in cases {
            assert_eq!(validate_name(name), Err(expected), "name: {}", name);
        }
    }

    #[test]
    fn test_too_long_name() {
        match validate_name(&"a".repeat(64)) {
            Err(ValidationError::TooLong { length, .. }) => assert_eq!(length, 64),
            other => panic!("expected a length error, got {:?}", other),
        }
    }
}
