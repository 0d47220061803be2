//! A named database: an insertion-ordered set of tables.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::db::table::AnyTable;
use crate::error::{Result, TableError};

/// Owner of an ordered collection of tables. Table lookup compares names
/// ordinally after trimming surrounding whitespace.
pub struct Database {
    name: Box<str>,
    tables: RwLock<IndexMap<Box<str>, Arc<dyn AnyTable>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl Database {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.trim().into(),
            tables: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table names, in creation order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().map(|k| k.to_string()).collect()
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    pub(crate) fn any_table(&self, name: &str) -> Option<Arc<dyn AnyTable>> {
        self.tables.read().get(name.trim()).cloned()
    }

    pub(crate) fn insert_table(&self, table: Arc<dyn AnyTable>) -> Result<()> {
        let mut tables = self.tables.write();
        let name: Box<str> = table.table_name().into();
        if tables.contains_key(&name) {
            return Err(TableError::AlreadyExists(name.to_string()).into());
        }
        tables.insert(name, table);
        Ok(())
    }

    pub(crate) fn remove_table(&self, name: &str) -> bool {
        self.tables.write().shift_remove(name.trim()).is_some()
    }

    /// A point-in-time copy of the table handles, in creation order.
    pub(crate) fn tables_snapshot(&self) -> Vec<Arc<dyn AnyTable>> {
        self.tables.read().values().cloned().collect()
    }
}
