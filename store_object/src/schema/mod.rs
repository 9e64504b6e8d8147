//! Entity definitions and the session registry

pub mod entity;
pub mod field;
pub mod fragment;
pub mod registry;
pub mod relationship;

pub use entity::{EntityBuilder, EntityDef, RecordHook};
pub use field::{DefaultValue, FieldDescriptor};
pub use fragment::{slug, slugify, timestamps, SchemaFragment};
pub use registry::Registry;
pub use relationship::{JoinSpec, JoinStep, Multiplicity, OnScope, Relationship};
