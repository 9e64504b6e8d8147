//! Task-local dependency tracking
//!
//! `DependencyScope::track` runs a future with a fresh set of touched rows.
//! Every row fetch made while the future runs records into the innermost scope,
//! and a finished scope hands its rows to the enclosing one. Work spawned onto
//! other tasks is not tracked.

use crate::store::{Dependency, DependencySet};
use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static TOUCHED: RefCell<DependencySet>;
}

pub struct DependencyScope;

impl DependencyScope {
    /// Run `future` in a new scope, returning its output and every row it touched
    pub async fn track<F: Future>(future: F) -> (F::Output, DependencySet) {
        let (output, touched) = TOUCHED
            .scope(RefCell::new(DependencySet::new()), async move {
                let output = future.await;
                let touched = TOUCHED.with(|cell| cell.take());
                (output, touched)
            })
            .await;

        // Nested scopes report upwards so an outer memoized call depends on
        // everything its inner calls read.
        Self::record_all(touched.iter().cloned());
        (output, touched)
    }

    /// Record one touched row in the current scope, if any
    pub fn record(table: &str, id: i64) {
        let _ = TOUCHED.try_with(|cell| cell.borrow_mut().insert(Dependency::new(table, id)));
    }

    /// Record several touched rows in the current scope, if any
    pub fn record_all(dependencies: impl IntoIterator<Item = Dependency>) {
        let _ = TOUCHED.try_with(|cell| cell.borrow_mut().extend(dependencies));
    }

    /// Whether a scope is active on this task
    pub fn is_active() -> bool {
        TOUCHED.try_with(|_| ()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_only_inside_scope() {
        DependencyScope::record("person", 1);
        assert!(!DependencyScope::is_active());

        let ((), touched) = DependencyScope::track(async {
            assert!(DependencyScope::is_active());
            DependencyScope::record("person", 2);
            DependencyScope::record("person", 2);
            DependencyScope::record("post", 9);
        })
        .await;

        assert_eq!(touched.len(), 2);
        assert!(touched.contains(&Dependency::new("person", 2)));
        assert!(!touched.contains(&Dependency::new("person", 1)));
    }

    #[tokio::test]
    async fn test_nested_scope_propagates_to_parent() {
        let (inner, outer) = DependencyScope::track(async {
            DependencyScope::record("person", 1);
            let ((), inner) = DependencyScope::track(async {
                DependencyScope::record("tag", 3);
            })
            .await;
            inner
        })
        .await;

        assert_eq!(inner.len(), 1);
        assert!(outer.contains(&Dependency::new("tag", 3)));
        assert!(outer.contains(&Dependency::new("person", 1)));
    }
}
