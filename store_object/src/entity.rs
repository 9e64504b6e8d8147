//! Materialized entity instances

use crate::dal::Dal;
use crate::errors::DalError;
use crate::query_builder::builder::JoinOptions;
use crate::query_builder::join::JoinType;
use crate::schema::relationship::Multiplicity;
use config::LazyPolicy;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use type_mapping::{FromValue, Record, Value};

/// Related data of one relationship
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Related {
    pub(crate) fn empty(multiplicity: Multiplicity) -> Self {
        match multiplicity {
            Multiplicity::One => Related::One(None),
            Multiplicity::Many => Related::Many(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(entity) => entity.is_none(),
            Related::Many(entities) => entities.is_empty(),
        }
    }

    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(entity) => entity.as_deref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            Related::Many(entities) => entities,
            Related::One(_) => &[],
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(Some(entity)) => entity.as_json(),
            Related::One(None) => serde_json::Value::Null,
            Related::Many(entities) => {
                serde_json::Value::Array(entities.iter().map(Entity::as_json).collect())
            }
        }
    }
}

/// One row of an entity with the related data joined in the same query
#[derive(Clone)]
pub struct Entity {
    table: String,
    /// Alias the row was read under
    alias: String,
    values: Record,
    relations: BTreeMap<String, Related>,
    dal: Option<Arc<Dal>>,
}

impl Entity {
    pub(crate) fn new(table: &str, alias: &str, values: Record) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            values,
            relations: BTreeMap::new(),
            dal: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn id(&self) -> Option<i64> {
        self.values.get("id").and_then(Value::as_i64)
    }

    pub fn values(&self) -> &Record {
        &self.values
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Typed read of a projected field
    pub fn get<T: FromValue>(&self, field: &str) -> Result<T, DalError> {
        let value = self
            .values
            .get(field)
            .ok_or_else(|| DalError::unknown_field(&self.table, field))?;
        Ok(T::from_value(value)?)
    }

    /// Related data joined by the query that loaded this entity
    pub fn joined(&self, relationship: &str) -> Option<&Related> {
        self.relations.get(relationship)
    }

    /// Joined relationships by name
    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(name, related)| (name.as_str(), related))
    }

    pub(crate) fn relations_mut(&mut self) -> &mut BTreeMap<String, Related> {
        &mut self.relations
    }

    pub fn one(&self, relationship: &str) -> Option<&Entity> {
        self.joined(relationship).and_then(Related::as_one)
    }

    pub fn many(&self, relationship: &str) -> &[Entity] {
        self.joined(relationship).map_or(&[], Related::as_many)
    }

    /// Related data, joined or loaded on demand as the lazy policy allows
    pub async fn related(&self, relationship: &str) -> Result<Related, DalError> {
        if let Some(related) = self.relations.get(relationship) {
            return Ok(related.clone());
        }

        let dal = self.session()?;
        let def = dal.registry().entity(&self.table)?;
        let declared = def
            .relationship(relationship)
            .ok_or_else(|| DalError::UnknownRelationship {
                entity: self.table.clone(),
                relationship: relationship.to_string(),
            })?;
        let empty = Related::empty(declared.multiplicity);

        match declared.lazy.unwrap_or(dal.lazy_policy()) {
            LazyPolicy::Forbid => {
                return Err(DalError::LazyAccess {
                    table: self.table.clone(),
                    relationship: relationship.to_string(),
                })
            }
            LazyPolicy::Warn => {
                tracing::warn!(
                    "{}.{} was not joined; returning an empty value",
                    self.table,
                    relationship
                );
                return Ok(empty);
            }
            LazyPolicy::Ignore => return Ok(empty),
            LazyPolicy::Tolerate => {
                tracing::warn!(
                    "{}.{} was not joined; loading it with an extra query",
                    self.table,
                    relationship
                );
            }
            LazyPolicy::Allow => {}
        }

        let id = self.require_id()?;
        let loaded = dal
            .query(&self.table)?
            .where_eq("id", id)
            .join_with([relationship], JoinOptions::method(JoinType::Left))
            .first()
            .await?;
        Ok(loaded
            .and_then(|entity| entity.relations.get(relationship).cloned())
            .unwrap_or(empty))
    }

    /// Update this row and reload its values
    pub async fn update_record(&mut self, values: Record) -> Result<(), DalError> {
        let dal = self.session()?.clone();
        let id = self.require_id()?;
        let def = dal.registry().entity(&self.table)?;
        dal.update_ids(&def, &[id], values).await?;

        if let Some(fresh) = dal.table(&self.table)?.get_by_id(id).await? {
            self.values = fresh.values;
        }
        Ok(())
    }

    /// Delete this row; returns whether a row was deleted
    pub async fn delete_record(self) -> Result<bool, DalError> {
        let dal = self.session()?;
        let id = self.require_id()?;
        let def = dal.registry().entity(&self.table)?;
        Ok(!dal.delete_ids(&def, &[id]).await?.is_empty())
    }

    /// Values and nested related data as plain JSON
    pub fn as_json(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect();
        for (name, related) in &self.relations {
            map.insert(name.clone(), related.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Deserialize into an application type through the JSON form
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DalError> {
        Ok(serde_json::from_value(self.as_json())?)
    }

    pub(crate) fn attach(&mut self, dal: &Arc<Dal>) {
        self.dal = Some(dal.clone());
        for related in self.relations.values_mut() {
            match related {
                Related::One(Some(entity)) => entity.attach(dal),
                Related::One(None) => {}
                Related::Many(entities) => entities.iter_mut().for_each(|e| e.attach(dal)),
            }
        }
    }

    fn session(&self) -> Result<&Arc<Dal>, DalError> {
        self.dal.as_ref().ok_or_else(|| {
            DalError::Configuration(format!("{} row is not attached to a session", self.table))
        })
    }

    fn require_id(&self) -> Result<i64, DalError> {
        self.id().ok_or_else(|| {
            DalError::Query(format!("{} row was loaded without its primary key", self.table))
        })
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.alias == other.alias
            && self.values == other.values
            && self.relations == other.relations
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("table", &self.table)
            .field("alias", &self.alias)
            .field("values", &self.values)
            .field("relations", &self.relations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn person(id: i64, name: &str) -> Entity {
        let mut values = Record::new();
        values.insert("id".to_string(), Value::Integer(id));
        values.insert("name".to_string(), Value::from(name));
        Entity::new("person", "person", values)
    }

    #[test]
    fn test_typed_access() {
        let entity = person(3, "Ada");
        assert_eq!(entity.id(), Some(3));
        assert_eq!(entity.get::<String>("name").unwrap(), "Ada");
        assert!(entity.get::<Option<String>>("name").unwrap().is_some());
        assert!(matches!(
            entity.get::<String>("missing"),
            Err(DalError::UnknownField { .. })
        ));
        assert!(matches!(entity.get::<i64>("name"), Err(DalError::Coercion(_))));
    }

    #[test]
    fn test_json_includes_relations() {
        let mut author = person(1, "Ada");
        author.relations_mut().insert(
            "posts".to_string(),
            Related::Many(vec![Entity::new("post", "posts_1", {
                let mut values = Record::new();
                values.insert("id".to_string(), Value::Integer(10));
                values
            })]),
        );
        author
            .relations_mut()
            .insert("manager".to_string(), Related::One(None));

        assert_eq!(
            author.as_json(),
            serde_json::json!({
                "id": 1,
                "name": "Ada",
                "posts": [{"id": 10}],
                "manager": null
            })
        );
        assert_eq!(author.many("posts").len(), 1);
        assert!(author.one("manager").is_none());
        assert!(author.many("unknown").is_empty());
    }

    #[test]
    fn test_decode() {
        #[derive(Deserialize)]
        struct Person {
            id: i64,
            name: String,
        }

        let decoded: Person = person(7, "Grace").decode().unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.name, "Grace");
    }

    #[tokio::test]
    async fn test_detached_entity_cannot_load() {
        let entity = person(1, "Ada");
        assert!(matches!(
            entity.related("posts").await,
            Err(DalError::Configuration(_))
        ));
    }
}
