use crate::query_builder::field::FieldRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One ORDER BY item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderBy {
    Field { field: FieldRef, order: SortOrder },
    /// Random order; cannot be combined with other items
    Random,
}

impl OrderBy {
    pub fn asc(field: impl Into<FieldRef>) -> Self {
        OrderBy::Field {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldRef>) -> Self {
        OrderBy::Field {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    pub fn random() -> Self {
        OrderBy::Random
    }

    pub fn field(&self) -> Option<&FieldRef> {
        match self {
            OrderBy::Field { field, .. } => Some(field),
            OrderBy::Random => None,
        }
    }
}

/// `"name"` sorts ascending, `"-name"` descending
impl From<&str> for OrderBy {
    fn from(path: &str) -> Self {
        match path.strip_prefix('-') {
            Some(path) => OrderBy::desc(path),
            None => OrderBy::asc(path),
        }
    }
}

impl From<FieldRef> for OrderBy {
    fn from(field: FieldRef) -> Self {
        OrderBy::asc(field)
    }
}
