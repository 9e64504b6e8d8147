//! Database event types and definitions
//!
//! This module defines the structure of database events
//! that flow through the signal system.

use serde::{Deserialize, Serialize};
use std::fmt;
use type_mapping::Record;

/// Database event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Insert,
    Update,
    Delete,
    Select,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Select => "select",
        };
        f.write_str(name)
    }
}

/// Whether the event fires before the engine call or after it returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPhase {
    Before,
    After,
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPhase::Before => f.write_str("before"),
            EventPhase::After => f.write_str("after"),
        }
    }
}

/// Database event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEvent {
    pub event_type: EventType,
    pub phase: EventPhase,
    /// Table name
    pub table_name: String,
    /// Primary keys touched by the operation, when known
    pub record_ids: Vec<i64>,
    /// Values written by inserts and updates
    pub payload: Record,
    /// Event timestamp (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DatabaseEvent {
    pub fn new(event_type: EventType, phase: EventPhase, table_name: &str) -> Self {
        Self {
            event_type,
            phase,
            table_name: table_name.to_string(),
            record_ids: Vec::new(),
            payload: Record::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn before(event_type: EventType, table_name: &str) -> Self {
        Self::new(event_type, EventPhase::Before, table_name)
    }

    pub fn after(event_type: EventType, table_name: &str) -> Self {
        Self::new(event_type, EventPhase::After, table_name)
    }

    pub fn with_record_ids(mut self, record_ids: Vec<i64>) -> Self {
        self.record_ids = record_ids;
        self
    }

    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = payload;
        self
    }
}
