//! Serialization utilities
//!
//! This module provides the `|a|b|` list encoding used by engines without
//! native array columns, and JSON export of whole records.

use crate::types::Record;

/// Encode list items as `|a|b|`, doubling any `|` inside an item
pub fn encode_list<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let escaped: Vec<String> = items
        .iter()
        .map(|item| item.as_ref().replace('|', "||"))
        .collect();
    format!("|{}|", escaped.join("|"))
}

/// Decode the `|a|b|` list encoding. Empty input is an empty list.
pub fn decode_list(encoded: &str) -> Vec<String> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() || trimmed == "||" {
        return Vec::new();
    }
    let inner = trimmed
        .strip_prefix('|')
        .and_then(|rest| rest.strip_suffix('|'))
        .unwrap_or(trimmed);

    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '|' {
            if chars.peek() == Some(&'|') {
                chars.next();
                current.push('|');
            } else {
                items.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    items.push(current);
    items
}

/// Convert a record into a JSON object with plain JSON values
pub fn record_to_json(record: &Record) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = record
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(map)
}
