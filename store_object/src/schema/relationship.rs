//! Relationship declarations
//!
//! A relationship is a named edge from one entity to another. It either carries
//! a condition over the two aliased tables, or an `on` builder that lays out the
//! join steps itself (junction traversal). Targets are entity names and may be
//! declared before the target entity exists; `Registry::finalize` resolves them.

use crate::query_builder::compile::AliasCounter;
use crate::query_builder::field::TableRef;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::join::JoinType;
use config::LazyPolicy;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    One,
    Many,
}

pub type ConditionFn = Arc<dyn Fn(&TableRef, &TableRef) -> QueryFilter + Send + Sync>;
pub type OnFn = Arc<dyn Fn(&mut OnScope<'_>) -> Vec<JoinStep> + Send + Sync>;

/// How the related rows are joined
#[derive(Clone)]
pub enum JoinSpec {
    /// Condition over (source, target)
    Condition(ConditionFn),
    /// Explicit join steps, used verbatim
    On(OnFn),
}

/// One step of an `on` relationship
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub table: TableRef,
    pub condition: QueryFilter,
    /// Overrides the relationship's join method for this step only
    pub method: Option<JoinType>,
}

impl JoinStep {
    pub fn new(table: TableRef, condition: QueryFilter) -> Self {
        Self {
            table,
            condition,
            method: None,
        }
    }

    pub fn inner(mut self) -> Self {
        self.method = Some(JoinType::Inner);
        self
    }

    pub fn left(mut self) -> Self {
        self.method = Some(JoinType::Left);
        self
    }
}

/// Alias allocation for `on` relationships
///
/// Every table the steps touch gets its own `{relation}_{n}` alias from the
/// query-wide counter, so the same junction joined twice never collides.
pub struct OnScope<'a> {
    relation: &'a str,
    source: TableRef,
    target_table: &'a str,
    counter: &'a mut AliasCounter,
    target: Option<TableRef>,
}

impl<'a> OnScope<'a> {
    pub(crate) fn new(
        relation: &'a str,
        source: TableRef,
        target_table: &'a str,
        counter: &'a mut AliasCounter,
    ) -> Self {
        Self {
            relation,
            source,
            target_table,
            counter,
            target: None,
        }
    }

    /// The table the relationship starts from
    pub fn source(&self) -> &TableRef {
        &self.source
    }

    /// The relationship's target table; allocated once, the same alias on every call
    pub fn target(&mut self) -> TableRef {
        if let Some(target) = &self.target {
            return target.clone();
        }
        let alias = self.counter.next(self.relation);
        let target = TableRef::new(self.target_table, &alias);
        self.target = Some(target.clone());
        target
    }

    /// A fresh alias for an intermediate table
    pub fn table(&mut self, table: &str) -> TableRef {
        let alias = self.counter.next(self.relation);
        TableRef::new(table, &alias)
    }

    pub(crate) fn into_target(self) -> Option<TableRef> {
        self.target
    }
}

#[derive(Clone)]
pub struct Relationship {
    pub target: String,
    pub multiplicity: Multiplicity,
    pub join: JoinType,
    pub spec: JoinSpec,
    /// `None` uses the session default
    pub lazy: Option<LazyPolicy>,
    /// Skipped by `join()` without names
    pub explicit: bool,
    pub(crate) implicit: bool,
}

impl Relationship {
    fn with_spec(target: &str, multiplicity: Multiplicity, spec: JoinSpec) -> Self {
        Self {
            target: target.to_string(),
            multiplicity,
            join: JoinType::Left,
            spec,
            lazy: None,
            explicit: false,
            implicit: false,
        }
    }

    /// Single related row matched by `condition(source, target)`
    pub fn one<F>(target: &str, condition: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> QueryFilter + Send + Sync + 'static,
    {
        Self::with_spec(target, Multiplicity::One, JoinSpec::Condition(Arc::new(condition)))
    }

    /// Related rows matched by `condition(source, target)`
    pub fn many<F>(target: &str, condition: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> QueryFilter + Send + Sync + 'static,
    {
        Self::with_spec(target, Multiplicity::Many, JoinSpec::Condition(Arc::new(condition)))
    }

    pub fn one_on<F>(target: &str, on: F) -> Self
    where
        F: Fn(&mut OnScope<'_>) -> Vec<JoinStep> + Send + Sync + 'static,
    {
        Self::with_spec(target, Multiplicity::One, JoinSpec::On(Arc::new(on)))
    }

    /// Related rows reached through explicit join steps, e.g. a junction table
    pub fn many_on<F>(target: &str, on: F) -> Self
    where
        F: Fn(&mut OnScope<'_>) -> Vec<JoinStep> + Send + Sync + 'static,
    {
        Self::with_spec(target, Multiplicity::Many, JoinSpec::On(Arc::new(on)))
    }

    /// The row whose id is stored in `local_field` of the source
    pub fn one_by(target: &str, local_field: &str) -> Self {
        let local_field = local_field.to_string();
        Self::one(target, move |source, target| {
            source.field(&local_field).eq_field(&target.id())
        })
    }

    /// The rows whose `foreign_field` holds the source id
    pub fn many_by(target: &str, foreign_field: &str) -> Self {
        let foreign_field = foreign_field.to_string();
        Self::many(target, move |source, target| {
            target.field(&foreign_field).eq_field(&source.id())
        })
    }

    pub fn inner(mut self) -> Self {
        self.join = JoinType::Inner;
        self
    }

    pub fn left(mut self) -> Self {
        self.join = JoinType::Left;
        self
    }

    pub fn lazy(mut self, policy: LazyPolicy) -> Self {
        self.lazy = Some(policy);
        self
    }

    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    /// Whether the relationship was derived from a reference field
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// Closures are not compared
    pub(crate) fn same_shape(&self, other: &Relationship) -> bool {
        let same_kind = matches!(
            (&self.spec, &other.spec),
            (JoinSpec::Condition(_), JoinSpec::Condition(_)) | (JoinSpec::On(_), JoinSpec::On(_))
        );
        self.target == other.target
            && self.multiplicity == other.multiplicity
            && self.join == other.join
            && self.lazy == other.lazy
            && self.explicit == other.explicit
            && same_kind
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = match self.spec {
            JoinSpec::Condition(_) => "condition",
            JoinSpec::On(_) => "on",
        };
        f.debug_struct("Relationship")
            .field("target", &self.target)
            .field("multiplicity", &self.multiplicity)
            .field("join", &self.join)
            .field("spec", &spec)
            .field("lazy", &self.lazy)
            .field("explicit", &self.explicit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::field::FieldRef;

    #[test]
    fn test_one_by_condition() {
        let relationship = Relationship::one_by("person", "author").inner();
        let JoinSpec::Condition(condition) = &relationship.spec else {
            panic!("expected a condition relationship");
        };
        let filter = condition(&TableRef::base("post"), &TableRef::new("person", "author_1"));
        assert_eq!(
            filter,
            FieldRef::scoped("post", "author").eq_field(&FieldRef::scoped("author_1", "id"))
        );
        assert_eq!(relationship.join, JoinType::Inner);
        assert_eq!(relationship.multiplicity, Multiplicity::One);
    }

    #[test]
    fn test_on_scope_allocates_unique_aliases() {
        let mut counter = AliasCounter::default();
        let mut scope = OnScope::new("roles", TableRef::base("person"), "role", &mut counter);
        let junction = scope.table("person_role");
        let target = scope.target();
        assert_eq!(junction.alias, "roles_1");
        assert_eq!(target.alias, "roles_2");
        assert_eq!(scope.target(), target);
        assert_eq!(scope.into_target().map(|t| t.table), Some("role".to_string()));
    }
}
