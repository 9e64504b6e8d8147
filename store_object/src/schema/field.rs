//! Field descriptors
//!
//! A descriptor carries everything the engine and the materializer need to know
//! about one column: semantic type, whether it is required, its default and any
//! engine options passed through untouched.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use type_mapping::{FieldType, Value};

pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Value used for a field an insert does not name
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    /// Called once per insert
    Producer(DefaultFn),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Producer(producer) => producer(),
        }
    }

    fn same(&self, other: &DefaultValue) -> bool {
        match (self, other) {
            (DefaultValue::Literal(a), DefaultValue::Literal(b)) => a == b,
            // Producers cannot be compared; any two count as the same default
            (DefaultValue::Producer(_), DefaultValue::Producer(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip)]
    pub default: Option<DefaultValue>,
    /// Free-form engine options
    pub options: BTreeMap<String, serde_json::Value>,
}

impl FieldDescriptor {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
            options: BTreeMap::new(),
        }
    }

    /// The implicit primary key every entity starts with
    pub fn id() -> Self {
        Self::new("id", FieldType::Id).required()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    pub fn default_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Producer(Arc::new(producer)));
        self
    }

    pub fn option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn big_integer(name: &str) -> Self {
        Self::new(name, FieldType::BigInteger)
    }

    pub fn double(name: &str) -> Self {
        Self::new(name, FieldType::Double)
    }

    pub fn decimal(name: &str, precision: u8, scale: u8) -> Self {
        Self::new(name, FieldType::Decimal { precision, scale })
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn time(name: &str) -> Self {
        Self::new(name, FieldType::Time)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    pub fn blob(name: &str) -> Self {
        Self::new(name, FieldType::Blob)
    }

    pub fn password(name: &str) -> Self {
        Self::new(name, FieldType::Password)
    }

    pub fn upload(name: &str) -> Self {
        Self::new(name, FieldType::Upload)
    }

    pub fn reference(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::Reference(target.to_string()))
    }

    pub fn list_of_string(name: &str) -> Self {
        Self::new(name, FieldType::ListOfString)
    }

    pub fn list_of_integer(name: &str) -> Self {
        Self::new(name, FieldType::ListOfInteger)
    }

    pub fn list_of_reference(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::ListOfReference(target.to_string()))
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn is_id(&self) -> bool {
        self.field_type == FieldType::Id
    }

    pub(crate) fn same_shape(&self, other: &FieldDescriptor) -> bool {
        let defaults_match = match (&self.default, &other.default) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        };
        self.name == other.name
            && self.field_type == other.field_type
            && self.required == other.required
            && self.options == other.options
            && defaults_match
    }
}
