//! The table registry: the manager-owned map from row-type tag to the
//! currently active table handle for that type.
//!
//! Foreign-key checks resolve their target table here, and deletes/PK
//! changes ask it for the tables whose row types reference a given tag.
//! Every registration change bumps a monotonic version; tables cache their
//! dependents keyed on that version and rebuild when it advances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::db::table::AnyTable;

#[derive(Default)]
pub(crate) struct Catalog {
    tables: RwLock<HashMap<Box<str>, Weak<dyn AnyTable>>>,
    version: AtomicU64,
}

impl Catalog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs or replaces the active table for a row type.
    pub(crate) fn register(&self, tag: &str, table: Weak<dyn AnyTable>) {
        self.tables.write().insert(tag.into(), table);
        self.bump();
    }

    /// The live table handle currently registered for `tag`, if any.
    pub(crate) fn lookup(&self, tag: &str) -> Option<Arc<dyn AnyTable>> {
        self.tables.read().get(tag).and_then(Weak::upgrade)
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Removes the entry for `tag` if its table has been released. Called by
    /// tables on drop; a replacement registered under the same tag survives.
    pub(crate) fn purge_dead(&self, tag: &str) {
        let mut tables = self.tables.write();
        let dead = tables.get(tag).is_some_and(|w| w.upgrade().is_none());
        if dead {
            tables.remove(tag);
            drop(tables);
            self.bump();
        }
    }

    /// The tables whose row types carry a foreign-key column pointing at
    /// `tag`, paired with that column's name. Dead registrations are skipped.
    pub(crate) fn dependents_of(&self, tag: &str) -> Vec<(Weak<dyn AnyTable>, Box<str>)> {
        let tables = self.tables.read();
        let mut dependents = Vec::new();
        for weak in tables.values() {
            let Some(table) = weak.upgrade() else { continue };
            for (col, target) in table.schema_ref().foreign_keys() {
                if target == tag {
                    dependents.push((weak.clone(), col.name.clone()));
                }
            }
        }
        dependents
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }
}
