//! Schema migration
//!
//! Sessions opened with `orm.migrate` create their tables on open. These helpers
//! cover sessions opened without it: print the DDL, or apply it later.

use crate::core::TypeHaus;
use crate::errors::TypeHausError;
use store_object::query_builder::sql_generation::SqlGenerator;
use store_object::{Registry, TableHandle};

/// `CREATE TABLE` statements for every entity, referenced tables first
pub fn create_table_statements(registry: &Registry) -> Vec<String> {
    registry
        .migration_order()
        .iter()
        .map(|entity| SqlGenerator::create_table(&entity.schema()))
        .collect()
}

impl TypeHaus {
    /// DDL of the session's schema
    pub fn migration_sql(&self) -> Vec<String> {
        create_table_statements(self.dal().registry())
    }

    /// Create missing tables and add missing columns, reporting what changed
    pub async fn migrate(&self) -> Result<Vec<TableHandle>, TypeHausError> {
        let engine = self.dal().engine();
        let mut changed = Vec::new();
        for entity in self.dal().registry().migration_order() {
            let handle = engine.define_table(&entity.schema()).await?;
            if handle.created {
                tracing::info!("Created table {}", handle.name);
            } else if !handle.added_columns.is_empty() {
                tracing::info!("Added columns {:?} to table {}", handle.added_columns, handle.name);
            } else {
                crate::debug_log!("Table {} is up to date", handle.name);
                continue;
            }
            changed.push(handle);
        }
        Ok(changed)
    }
}
