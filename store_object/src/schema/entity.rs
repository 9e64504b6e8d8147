//! Entity definitions
//!
//! Entities are declared with an explicit builder:
//!
//! ```rust
//! use store_object::schema::{timestamps, EntityBuilder, FieldDescriptor, Relationship};
//!
//! let post = EntityBuilder::new("post")
//!     .field(FieldDescriptor::string("title").required())
//!     .field(FieldDescriptor::reference("author", "person").required())
//!     .field(FieldDescriptor::list_of_reference("tags", "tag"))
//!     .fragment(timestamps())
//!     .relationship("comments", Relationship::many_by("comment", "post"))
//!     .build()
//!     .unwrap();
//! assert_eq!(post.field_names()[0], "id");
//! ```

use crate::engine::{ColumnSchema, TableSchema};
use crate::errors::DalError;
use crate::query_builder::field::TableRef;
use crate::schema::field::FieldDescriptor;
use crate::schema::fragment::SchemaFragment;
use crate::schema::relationship::Relationship;
use crate::validation::validate_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use type_mapping::Record;

/// Hook run on the values of an insert or update before they are validated
pub type RecordHook = Arc<dyn Fn(&mut Record) + Send + Sync>;

#[derive(Clone)]
pub struct EntityDef {
    name: String,
    fields: Vec<FieldDescriptor>,
    relationships: BTreeMap<String, Relationship>,
    before_insert: Vec<RecordHook>,
    before_update: Vec<RecordHook>,
    cache_dependency: bool,
}

impl EntityDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order, `id` first
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn relationships(&self) -> &BTreeMap<String, Relationship> {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    pub fn before_insert_hooks(&self) -> &[RecordHook] {
        &self.before_insert
    }

    pub fn before_update_hooks(&self) -> &[RecordHook] {
        &self.before_update
    }

    /// Whether writes to this entity invalidate cached results that read it
    pub fn cache_dependency(&self) -> bool {
        self.cache_dependency
    }

    /// The entity as the base table of a query
    pub fn table_ref(&self) -> TableRef {
        TableRef::base(&self.name)
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema {
            name: self.name.clone(),
            columns: self
                .fields
                .iter()
                .map(|field| ColumnSchema {
                    name: field.name.clone(),
                    field_type: field.field_type.clone(),
                    required: field.required,
                    options: field.options.clone(),
                })
                .collect(),
        }
    }

    pub(crate) fn add_relationship(&mut self, name: &str, relationship: Relationship) {
        self.relationships.insert(name.to_string(), relationship);
    }

    /// Same fields, relationships and flags; hook closures are not compared
    pub fn same_shape(&self, other: &EntityDef) -> bool {
        let explicit = |def: &EntityDef| {
            def.relationships
                .iter()
                .filter(|(_, relationship)| !relationship.implicit)
                .map(|(name, relationship)| (name.clone(), relationship.clone()))
                .collect::<Vec<_>>()
        };
        let (mine, theirs) = (explicit(self), explicit(other));

        self.name == other.name
            && self.cache_dependency == other.cache_dependency
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.same_shape(b))
            && mine.len() == theirs.len()
            && mine
                .iter()
                .zip(&theirs)
                .all(|((a_name, a), (b_name, b))| a_name == b_name && a.same_shape(b))
            && self.before_insert.len() == other.before_insert.len()
            && self.before_update.len() == other.before_update.len()
    }
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("fields", &self.field_names())
            .field("relationships", &self.relationships.keys().collect::<Vec<_>>())
            .field("cache_dependency", &self.cache_dependency)
            .finish()
    }
}

/// Builder for `EntityDef`; problems are reported by `build`
pub struct EntityBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    relationships: Vec<(String, Relationship)>,
    before_insert: Vec<RecordHook>,
    before_update: Vec<RecordHook>,
    cache_dependency: bool,
}

impl EntityBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            relationships: Vec::new(),
            before_insert: Vec::new(),
            before_update: Vec::new(),
            cache_dependency: true,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn fragment(mut self, fragment: SchemaFragment) -> Self {
        self.fields.extend(fragment.fields);
        self.before_insert.extend(fragment.before_insert);
        self.before_update.extend(fragment.before_update);
        self
    }

    pub fn relationship(mut self, name: &str, relationship: Relationship) -> Self {
        self.relationships.push((name.to_string(), relationship));
        self
    }

    /// On by default. Turning it off means writes to this entity never invalidate cached results.
    pub fn cache_dependency(mut self, enabled: bool) -> Self {
        self.cache_dependency = enabled;
        self
    }

    pub fn before_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        self.before_insert.push(Arc::new(hook));
        self
    }

    pub fn before_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        self.before_update.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<EntityDef, DalError> {
        let name = validate_name(&self.name)?;

        let mut fields = vec![FieldDescriptor::id()];
        for field in self.fields {
            validate_name(&field.name)?;
            if field.name == "id" || field.is_id() {
                return Err(DalError::Configuration(format!(
                    "{}: the id field is implicit and cannot be declared",
                    name
                )));
            }
            if fields.iter().any(|existing| existing.name == field.name) {
                return Err(DalError::Configuration(format!(
                    "{}: field '{}' is declared twice",
                    name, field.name
                )));
            }
            fields.push(field);
        }

        let mut relationships = BTreeMap::new();
        for (relationship_name, relationship) in self.relationships {
            validate_name(&relationship_name)?;
            if relationships
                .insert(relationship_name.clone(), relationship)
                .is_some()
            {
                return Err(DalError::Configuration(format!(
                    "{}: relationship '{}' is declared twice",
                    name, relationship_name
                )));
            }
        }

        Ok(EntityDef {
            name,
            fields,
            relationships,
            before_insert: self.before_insert,
            before_update: self.before_update,
            cache_dependency: self.cache_dependency,
        })
    }
}
