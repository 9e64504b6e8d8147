//! Session-owned entity registry
//!
//! Entities are defined in any order; `finalize` then adds the relationships
//! implied by reference fields and checks that every relationship target exists.
//! Queries only run against a finalized registry.

use crate::errors::DalError;
use crate::schema::entity::EntityDef;
use crate::schema::relationship::Relationship;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use type_mapping::FieldType;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, Arc<EntityDef>>,
    finalized: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Defining the same shape again is a no-op; a different shape is an error.
    pub fn define(&mut self, def: EntityDef) -> Result<Arc<EntityDef>, DalError> {
        if let Some(existing) = self.entities.get(def.name()) {
            if existing.same_shape(&def) {
                return Ok(existing.clone());
            }
            return Err(DalError::DuplicateEntity(def.name().to_string()));
        }

        crate::debug_log!("Defining entity {}", def.name());
        let def = Arc::new(def);
        self.entities.insert(def.name().to_string(), def.clone());
        self.finalized = false;
        Ok(def)
    }

    /// Replace an entity definition, whatever its previous shape
    pub fn redefine(&mut self, def: EntityDef) -> Arc<EntityDef> {
        crate::debug_log!("Redefining entity {}", def.name());
        let def = Arc::new(def);
        self.entities.insert(def.name().to_string(), def.clone());
        self.finalized = false;
        def
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDef>> {
        self.entities.get(name)
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityDef>, DalError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DalError::UnknownEntity(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.values()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Resolve relationships. Every target must be a defined entity.
    pub fn finalize(&mut self) -> Result<(), DalError> {
        for entity in self.entities.values() {
            for field in entity.fields() {
                if let Some(target) = field.field_type.referenced_table() {
                    if !self.entities.contains_key(target) {
                        return Err(DalError::UnresolvedRelationship {
                            entity: entity.name().to_string(),
                            relationship: field.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
            for (name, relationship) in entity.relationships() {
                if !self.entities.contains_key(&relationship.target) {
                    return Err(DalError::UnresolvedRelationship {
                        entity: entity.name().to_string(),
                        relationship: name.clone(),
                        target: relationship.target.clone(),
                    });
                }
            }
        }

        for def in self.entities.values_mut() {
            let implied: Vec<(String, Relationship)> = def
                .fields()
                .iter()
                .filter(|field| def.relationship(&field.name).is_none())
                .filter_map(|field| implicit_relationship(&field.name, &field.field_type, field.required))
                .collect();
            if implied.is_empty() {
                continue;
            }
            let def = Arc::make_mut(def);
            for (name, relationship) in implied {
                def.add_relationship(&name, relationship);
            }
        }

        self.finalized = true;
        tracing::info!("Schema finalized with {} entities", self.entities.len());
        Ok(())
    }

    /// Entities ordered so referenced tables come before the tables referencing them.
    /// Reference cycles are broken by name order.
    pub fn migration_order(&self) -> Vec<Arc<EntityDef>> {
        let mut ordered = Vec::with_capacity(self.entities.len());
        let mut placed = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for name in self.entities.keys() {
            self.visit(name, &mut placed, &mut visiting, &mut ordered);
        }
        ordered
    }

    fn visit(
        &self,
        name: &str,
        placed: &mut BTreeSet<String>,
        visiting: &mut BTreeSet<String>,
        ordered: &mut Vec<Arc<EntityDef>>,
    ) {
        if placed.contains(name) || !visiting.insert(name.to_string()) {
            return;
        }
        let Some(def) = self.entities.get(name) else {
            return;
        };
        for field in def.fields() {
            if let Some(target) = field.field_type.referenced_table() {
                if target != name {
                    self.visit(target, placed, visiting, ordered);
                }
            }
        }
        visiting.remove(name);
        if placed.insert(name.to_string()) {
            ordered.push(def.clone());
        }
    }
}

/// Relationship implied by a reference field, if any
fn implicit_relationship(
    name: &str,
    field_type: &FieldType,
    required: bool,
) -> Option<(String, Relationship)> {
    let local = name.to_string();
    let mut relationship = match field_type {
        FieldType::Reference(target) if required => Relationship::one_by(target, &local).inner(),
        FieldType::Reference(target) => Relationship::one_by(target, &local).left(),
        FieldType::ListOfReference(target) => Relationship::many(target, move |source, target| {
            source.field(&local).contains_field(&target.id())
        }),
        _ => return None,
    };
    relationship.implicit = true;
    Some((name.to_string(), relationship))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::join::JoinType;
    use crate::schema::entity::EntityBuilder;
    use crate::schema::field::FieldDescriptor;
    use crate::schema::relationship::Multiplicity;

    fn person() -> EntityDef {
        EntityBuilder::new("person")
            .field(FieldDescriptor::string("name").required())
            .build()
            .unwrap()
    }

    fn post() -> EntityDef {
        EntityBuilder::new("post")
            .field(FieldDescriptor::string("title").required())
            .field(FieldDescriptor::reference("author", "person").required())
            .field(FieldDescriptor::reference("editor", "person"))
            .field(FieldDescriptor::list_of_reference("tags", "tag"))
            .build()
            .unwrap()
    }

    fn tag() -> EntityDef {
        EntityBuilder::new("tag")
            .field(FieldDescriptor::string("name"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_forward_references_resolve_at_finalize() {
        let mut registry = Registry::new();
        registry.define(post()).unwrap();
        registry.define(person()).unwrap();
        registry.define(tag()).unwrap();
        registry.finalize().unwrap();

        let post = registry.entity("post").unwrap();
        let author = post.relationship("author").unwrap();
        assert_eq!(author.join, JoinType::Inner);
        assert_eq!(author.multiplicity, Multiplicity::One);
        assert!(author.is_implicit());
        assert_eq!(post.relationship("editor").unwrap().join, JoinType::Left);

        let tags = post.relationship("tags").unwrap();
        assert_eq!(tags.multiplicity, Multiplicity::Many);
        assert_eq!(tags.target, "tag");
    }

    #[test]
    fn test_unresolved_target_is_fatal() {
        let mut registry = Registry::new();
        registry.define(post()).unwrap();
        registry.define(person()).unwrap();
        let err = registry.finalize().unwrap_err();
        assert!(matches!(
            err,
            DalError::UnresolvedRelationship { ref target, .. } if target == "tag"
        ));
        assert!(!registry.is_finalized());
    }

    #[test]
    fn test_define_twice() {
        let mut registry = Registry::new();
        registry.define(person()).unwrap();
        registry.define(person()).unwrap();

        let other = EntityBuilder::new("person")
            .field(FieldDescriptor::text("bio"))
            .build()
            .unwrap();
        assert!(matches!(
            registry.define(other.clone()),
            Err(DalError::DuplicateEntity(_))
        ));
        registry.redefine(other);
        assert!(registry.entity("person").unwrap().has_field("bio"));
    }

    #[test]
    fn test_declared_relationship_wins_over_implicit() {
        let mut registry = Registry::new();
        registry.define(person()).unwrap();
        registry
            .define(
                EntityBuilder::new("note")
                    .field(FieldDescriptor::reference("owner", "person"))
                    .relationship("owner", Relationship::one_by("person", "owner").inner().explicit())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.finalize().unwrap();
        let owner = registry.entity("note").unwrap().relationship("owner").cloned().unwrap();
        assert!(owner.explicit);
        assert!(!owner.is_implicit());
    }

    #[test]
    fn test_migration_order() {
        let mut registry = Registry::new();
        registry.define(post()).unwrap();
        registry.define(tag()).unwrap();
        registry.define(person()).unwrap();
        let order: Vec<String> = registry
            .migration_order()
            .iter()
            .map(|def| def.name().to_string())
            .collect();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("person") < position("post"));
        assert_eq!(order.len(), 3);
    }
}
