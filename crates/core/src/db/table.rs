//! The typed table engine.
//!
//! A [`Table`] stores rows of one row type behind a single reader/writer
//! lock guarding the row sequence, the primary-key index and the
//! auto-increment counter. Every value handed out is an independent copy.
//!
//! Lock discipline: a mutation takes the acting table's write lock first and
//! only ever touches *other* tables through their read-locked snapshot
//! helpers ([`AnyTable::contains_pk`], [`AnyTable::holds_reference`]). No
//! call chain holds two tables' write locks.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;

use crate::db::catalog::Catalog;
use crate::error::{DbError, Result, SnapshotError, TableError};
use crate::row::schema::{ColumnDef, RowSchema};
use crate::row::value::{values_equal, ColumnValue};
use crate::row::{Row, RowCells};

struct TableState<R> {
    rows: Vec<R>,
    pk_index: HashMap<ColumnValue, usize>,
    next_auto: i32,
}

impl<R> TableState<R> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            pk_index: HashMap::new(),
            next_auto: 1,
        }
    }
}

/// Cached "who references me" set, rebuilt when the catalog version moves.
#[derive(Default)]
struct DepsCache {
    version: u64,
    referencing: Vec<(Weak<dyn AnyTable>, Box<str>)>,
}

/// A named, insertion-ordered collection of rows of type `R`.
pub struct Table<R: Row> {
    name: Box<str>,
    schema: Arc<RowSchema>,
    transient: bool,
    catalog: Arc<Catalog>,
    state: RwLock<TableState<R>>,
    deps: Mutex<DepsCache>,
}

impl<R: Row> std::fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}

impl<R: Row> Table<R> {
    pub(crate) fn new(name: &str, schema: Arc<RowSchema>, catalog: Arc<Catalog>, transient: bool) -> Self {
        Self {
            name: name.trim().into(),
            schema,
            transient,
            catalog,
            state: RwLock::new(TableState::new()),
            deps: Mutex::new(DepsCache::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().rows.is_empty()
    }

    /// Snapshot copies of all rows, in insertion order.
    pub fn rows(&self) -> Vec<R> {
        self.state.read().rows.clone()
    }

    /// Snapshot copies of the rows matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&R) -> bool) -> Vec<R> {
        self.state
            .read()
            .rows
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// Inserts a copy of `value` and returns the stored row (with any
    /// assigned auto-increment key).
    pub fn insert(&self, value: &R) -> Result<R> {
        let mut state = self.state.write();
        let mut row = value.clone();
        let pk = self.prepare_pk(&mut state, &mut row)?;
        self.validate_required(&row)?;
        self.validate_foreign_keys(&state, &row)?;
        if let Some(key) = &pk {
            if state.pk_index.contains_key(key) {
                return Err(self.duplicate_pk(key.clone()));
            }
        }
        let idx = state.rows.len();
        state.rows.push(row.clone());
        if let Some(key) = pk {
            state.pk_index.insert(key, idx);
        }
        Ok(row)
    }

    /// Inserts copies of all `values`, in order, all-or-nothing: on any
    /// failure no row from this call remains.
    pub fn insert_range(&self, values: &[R]) -> Result<()> {
        let mut state = self.state.write();
        let mut batch: Vec<R> = values.to_vec();

        if let Some(pk) = self.schema.primary_key().filter(|c| c.attrs.auto_inc) {
            // First advance the counter past every preset key, then assign
            // keys to the rows that lack one.
            for row in &batch {
                if let Some(preset) = row.get(&pk.name).as_i32() {
                    if preset > 0 {
                        state.next_auto = state.next_auto.max(preset + 1);
                    }
                }
            }
            for row in &mut batch {
                if row.get(&pk.name).as_i32().unwrap_or(0) <= 0 {
                    let assigned = state.next_auto;
                    state.next_auto += 1;
                    row.set(&pk.name, ColumnValue::I32(assigned))?;
                }
            }
        }

        let first_new = state.rows.len();
        let mut added_keys = Vec::new();
        let mut failure = None;
        for row in batch {
            match self.validate_for_append(&state, &row) {
                Ok(key) => {
                    let idx = state.rows.len();
                    state.rows.push(row);
                    if let Some(key) = key {
                        state.pk_index.insert(key.clone(), idx);
                        added_keys.push(key);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            state.rows.truncate(first_new);
            for key in added_keys {
                state.pk_index.remove(&key);
            }
            return Err(e);
        }
        Ok(())
    }

    /// An independent copy of the row with the given primary key.
    pub fn find_by_primary_key(&self, key: &ColumnValue) -> Result<Option<R>> {
        self.pk_column()?;
        let state = self.state.read();
        Ok(state.pk_index.get(key).map(|&i| state.rows[i].clone()))
    }

    /// Removes the row with the given primary key. Refuses with
    /// `ReferentialIntegrity` while any table holds a row referencing it.
    pub fn delete_by_primary_key(&self, key: &ColumnValue) -> Result<bool> {
        self.pk_column()?;
        let mut state = self.state.write();
        let Some(&idx) = state.pk_index.get(key) else {
            return Ok(false);
        };
        self.ensure_unreferenced(&state, key)?;
        state.rows.remove(idx);
        self.rebuild_pk_index(&mut state);
        Ok(true)
    }

    /// Removes every row matching `predicate` (evaluated against copies).
    /// Each removal is subject to the referencing check; any refusal leaves
    /// the table unchanged. Returns the number of rows removed.
    pub fn delete(&self, predicate: impl Fn(&R) -> bool) -> Result<usize> {
        let mut state = self.state.write();
        let matched: Vec<usize> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| predicate(&(*r).clone()))
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Ok(0);
        }
        if let Some(pk) = self.schema.primary_key() {
            for &i in &matched {
                let key = state.rows[i].get(&pk.name);
                self.ensure_unreferenced(&state, &key)?;
            }
        }
        for &i in matched.iter().rev() {
            state.rows.remove(i);
        }
        self.rebuild_pk_index(&mut state);
        Ok(matched.len())
    }

    /// Applies `mutate` to a copy of every row matching `predicate`,
    /// re-validating required columns, foreign keys and (on a key change)
    /// primary-key uniqueness and inbound references. All matched rows are
    /// validated before any is replaced. Returns the number changed.
    pub fn update(&self, predicate: impl Fn(&R) -> bool, mut mutate: impl FnMut(&mut R)) -> Result<usize> {
        let mut state = self.state.write();
        let pk_col = self.schema.primary_key();

        let mut staged: Vec<(usize, R)> = Vec::new();
        let mut vacated: Vec<ColumnValue> = Vec::new();
        let mut claimed: Vec<ColumnValue> = Vec::new();
        for (i, row) in state.rows.iter().enumerate() {
            if !predicate(&row.clone()) {
                continue;
            }
            let mut updated = row.clone();
            mutate(&mut updated);
            self.validate_required(&updated)?;
            self.validate_foreign_keys(&state, &updated)?;
            if let Some(pk) = pk_col {
                let old_key = row.get(&pk.name);
                let new_key = updated.get(&pk.name);
                if old_key != new_key {
                    if new_key.is_absent() {
                        return Err(TableError::PrimaryKeyMissing {
                            table: self.name.to_string(),
                        }
                        .into());
                    }
                    let taken = state.pk_index.contains_key(&new_key) && !vacated.contains(&new_key);
                    if taken || claimed.contains(&new_key) {
                        return Err(self.duplicate_pk(new_key));
                    }
                    self.ensure_unreferenced(&state, &old_key)?;
                    vacated.push(old_key);
                    claimed.push(new_key);
                }
            }
            staged.push((i, updated));
        }

        let changed = staged.len();
        for (i, updated) in staged {
            state.rows[i] = updated;
        }
        if changed > 0 {
            self.rebuild_pk_index(&mut state);
        }
        Ok(changed)
    }

    /// Drops all rows and resets the auto-increment counter to 1.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.rows.clear();
        state.pk_index.clear();
        state.next_auto = 1;
    }

    fn pk_column(&self) -> Result<&ColumnDef> {
        self.schema.primary_key().ok_or_else(|| {
            TableError::NoPrimaryKey {
                table: self.name.to_string(),
            }
            .into()
        })
    }

    fn duplicate_pk(&self, key: ColumnValue) -> DbError {
        TableError::DuplicatePrimaryKey {
            table: self.name.to_string(),
            key,
        }
        .into()
    }

    /// Assigns or checks the primary key of a row about to be inserted and
    /// returns the key value to index.
    fn prepare_pk(&self, state: &mut TableState<R>, row: &mut R) -> Result<Option<ColumnValue>> {
        let Some(pk) = self.schema.primary_key() else {
            return Ok(None);
        };
        if pk.attrs.auto_inc {
            // A preset of zero or less means "assign one for me".
            let preset = row.get(&pk.name).as_i32().unwrap_or(0);
            let assigned = if preset > 0 {
                state.next_auto = state.next_auto.max(preset + 1);
                preset
            } else {
                let assigned = state.next_auto;
                state.next_auto += 1;
                assigned
            };
            row.set(&pk.name, ColumnValue::I32(assigned))?;
            Ok(Some(ColumnValue::I32(assigned)))
        } else {
            let key = row.get(&pk.name);
            if key.is_absent() {
                return Err(TableError::PrimaryKeyMissing {
                    table: self.name.to_string(),
                }
                .into());
            }
            Ok(Some(key))
        }
    }

    /// The per-row validation of `insert_range`'s final pass; the key has
    /// already been assigned.
    fn validate_for_append(&self, state: &TableState<R>, row: &R) -> Result<Option<ColumnValue>> {
        let key = match self.schema.primary_key() {
            Some(pk) => {
                let key = row.get(&pk.name);
                if !pk.attrs.auto_inc && key.is_absent() {
                    return Err(TableError::PrimaryKeyMissing {
                        table: self.name.to_string(),
                    }
                    .into());
                }
                Some(key)
            }
            None => None,
        };
        self.validate_required(row)?;
        self.validate_foreign_keys(state, row)?;
        if let Some(key) = &key {
            if state.pk_index.contains_key(key) {
                return Err(self.duplicate_pk(key.clone()));
            }
        }
        Ok(key)
    }

    fn validate_required(&self, row: &R) -> Result<()> {
        for col in self.schema.columns() {
            if col.attrs.required && row.get(&col.name).is_absent() {
                return Err(TableError::RequiredMissing {
                    table: self.name.to_string(),
                    column: col.name.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Checks every foreign-key column against the registered target table.
    /// A `Null` foreign key passes; requiredness is validated separately.
    fn validate_foreign_keys(&self, state: &TableState<R>, row: &R) -> Result<()> {
        for (col, target) in self.schema.foreign_keys() {
            let key = row.get(&col.name);
            if key.is_null() {
                continue;
            }
            let violation = |target_name: &str| {
                DbError::from(TableError::ForeignKeyViolation {
                    table: self.name.to_string(),
                    column: col.name.to_string(),
                    target: target_name.to_string(),
                    key: key.clone(),
                })
            };
            if target == self.schema.type_tag() {
                // Self-referencing type: resolve against our own, already
                // locked state rather than re-entering the lock.
                if !state.pk_index.contains_key(&key) {
                    return Err(violation(&self.name));
                }
                continue;
            }
            match self.catalog.lookup(target) {
                Some(parent) => {
                    if !parent.contains_pk(&key) {
                        return Err(violation(parent.table_name()));
                    }
                }
                None => return Err(violation(target)),
            }
        }
        Ok(())
    }

    /// Refuses with `ReferentialIntegrity` if any registered table holds a
    /// row whose foreign key equals `key`.
    fn ensure_unreferenced(&self, state: &TableState<R>, key: &ColumnValue) -> Result<()> {
        for (weak, column) in self.dependents() {
            let Some(table) = weak.upgrade() else { continue };
            let held = if std::ptr::addr_eq(Arc::as_ptr(&table), self as *const Self) {
                state.rows.iter().any(|r| values_equal(&r.get(&column), key))
            } else {
                table.holds_reference(&column, key)
            };
            if held {
                return Err(TableError::ReferentialIntegrity {
                    table: self.name.to_string(),
                    key: key.clone(),
                    referencing: table.table_name().to_string(),
                    column: column.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn dependents(&self) -> Vec<(Weak<dyn AnyTable>, Box<str>)> {
        let mut cache = self.deps.lock();
        let version = self.catalog.version();
        if cache.version != version {
            cache.referencing = self.catalog.dependents_of(self.schema.type_tag());
            cache.version = version;
        }
        cache.referencing.clone()
    }

    fn rebuild_pk_index(&self, state: &mut TableState<R>) {
        state.pk_index.clear();
        if let Some(pk) = self.schema.primary_key() {
            let TableState { rows, pk_index, .. } = state;
            for (i, row) in rows.iter().enumerate() {
                pk_index.insert(row.get(&pk.name), i);
            }
        }
    }
}

impl<R: Row> Drop for Table<R> {
    fn drop(&mut self) {
        self.catalog.purge_dead(self.schema.type_tag());
    }
}

/// The type-erased table seam: what the catalog, the SQL interpreter and the
/// snapshot codec need from a table without knowing its row type.
pub(crate) trait AnyTable: Send + Sync + 'static {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn table_name(&self) -> &str;
    fn schema_ref(&self) -> &Arc<RowSchema>;
    fn is_transient(&self) -> bool;
    fn row_count(&self) -> usize;
    fn clear_rows(&self);

    /// Whether a row with this primary key exists. Takes the table's read
    /// lock; callers may hold their own (different) table's write lock.
    fn contains_pk(&self, key: &ColumnValue) -> bool;

    /// Whether any row's `column` equals `key`. Read-locked snapshot check.
    fn holds_reference(&self, column: &str, key: &ColumnValue) -> bool;

    fn scan(&self) -> Vec<RowCells>;
    fn insert_cells(&self, values: &[(String, ColumnValue)]) -> Result<()>;
    fn update_where(&self, predicate: &dyn Fn(&RowCells) -> bool, assigns: &[(String, ColumnValue)])
        -> Result<usize>;
    fn delete_where(&self, predicate: &dyn Fn(&RowCells) -> bool) -> Result<usize>;

    fn rows_to_json(&self) -> Vec<JsonValue>;
    fn load_rows_json(&self, rows: &[JsonValue]) -> Result<()>;
}

impl<R: Row> AnyTable for Table<R> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    fn schema_ref(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn row_count(&self) -> usize {
        self.len()
    }

    fn clear_rows(&self) {
        self.clear();
    }

    fn contains_pk(&self, key: &ColumnValue) -> bool {
        self.state.read().pk_index.contains_key(key)
    }

    fn holds_reference(&self, column: &str, key: &ColumnValue) -> bool {
        self.state
            .read()
            .rows
            .iter()
            .any(|r| values_equal(&r.get(column), key))
    }

    fn scan(&self) -> Vec<RowCells> {
        let state = self.state.read();
        state
            .rows
            .iter()
            .map(|r| RowCells::capture(&self.schema, r))
            .collect()
    }

    fn insert_cells(&self, values: &[(String, ColumnValue)]) -> Result<()> {
        let mut row = R::default();
        for (column, value) in values {
            row.set(column, value.clone())?;
        }
        self.insert(&row)?;
        Ok(())
    }

    fn update_where(
        &self,
        predicate: &dyn Fn(&RowCells) -> bool,
        assigns: &[(String, ColumnValue)],
    ) -> Result<usize> {
        let schema = self.schema.clone();
        self.update(
            |row| predicate(&RowCells::capture(&schema, row)),
            |row| {
                for (column, value) in assigns {
                    // Columns are resolved against the schema before we get
                    // here, so a set cannot name an unknown column.
                    let _ = row.set(column, value.clone());
                }
            },
        )
    }

    fn delete_where(&self, predicate: &dyn Fn(&RowCells) -> bool) -> Result<usize> {
        let schema = self.schema.clone();
        self.delete(|row| predicate(&RowCells::capture(&schema, row)))
    }

    fn rows_to_json(&self) -> Vec<JsonValue> {
        let state = self.state.read();
        state
            .rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for col in self.schema.columns() {
                    object.insert(col.name.to_string(), row.get(&col.name).to_json());
                }
                JsonValue::Object(object)
            })
            .collect()
    }

    fn load_rows_json(&self, rows: &[JsonValue]) -> Result<()> {
        let mut state = self.state.write();
        state.rows.clear();
        state.pk_index.clear();
        state.next_auto = 1;
        for value in rows {
            let Some(object) = value.as_object() else {
                return Err(SnapshotError::MalformedTable {
                    table: self.name.to_string(),
                    reason: format!("row is not an object: `{value}`"),
                }
                .into());
            };
            let mut row = R::default();
            for col in self.schema.columns() {
                if let Some(v) = object.get(col.name.as_ref()) {
                    let parsed =
                        ColumnValue::from_json(col.ty, v).map_err(|reason| SnapshotError::MalformedTable {
                            table: self.name.to_string(),
                            reason,
                        })?;
                    row.set(&col.name, parsed)?;
                }
            }
            state.rows.push(row);
        }
        self.rebuild_pk_index(&mut state);
        if let Some(pk) = self.schema.primary_key().filter(|c| c.attrs.auto_inc) {
            let max = state
                .rows
                .iter()
                .filter_map(|r| r.get(&pk.name).as_i32())
                .max()
                .unwrap_or(0);
            state.next_auto = max.max(0) + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::DatabaseManager;
    use crate::error::SchemaError;
    use crate::row::schema::RowSchema;
    use crate::row::value::LogicalType;
    use crate::row::StaticRow;
    use crate::testing::{Child, Customer, Order, Parent};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn manager_with<R: StaticRow>(name: &str) -> (Arc<DatabaseManager>, Arc<Table<R>>) {
        let manager = DatabaseManager::new();
        manager.create_database("test").unwrap();
        let table = manager.create_table::<R>("test", Some(name)).unwrap();
        (manager, table)
    }

    fn pk(id: i32) -> ColumnValue {
        ColumnValue::I32(id)
    }

    #[test]
    fn insert_assigns_sequential_keys_and_stores_a_copy() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        let mut caller = Parent {
            name: "A".into(),
            ..Parent::default()
        };
        let stored = parents.insert(&caller).unwrap();
        // Mutating the caller's object afterwards must not reach the table.
        caller.name = "X".into();
        assert_eq!(stored.id, 1);
        let fetched = parents.find_by_primary_key(&pk(1)).unwrap().unwrap();
        assert_eq!(fetched.name, "A");

        for i in 2..=5 {
            let row = parents
                .insert(&Parent {
                    name: format!("P{i}"),
                    ..Parent::default()
                })
                .unwrap();
            assert_eq!(row.id, i);
        }
    }

    #[test]
    fn preset_key_advances_the_counter() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents
            .insert(&Parent {
                id: 10,
                name: "M".into(),
            })
            .unwrap();
        let row = parents
            .insert(&Parent {
                name: "N".into(),
                ..Parent::default()
            })
            .unwrap();
        assert_eq!(row.id, 11);
    }

    #[test]
    fn insert_range_respects_presets_then_continues_after_them() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents
            .insert_range(&[
                Parent {
                    id: 10,
                    name: "preset".into(),
                },
                Parent {
                    name: "auto".into(),
                    ..Parent::default()
                },
            ])
            .unwrap();
        let ids: Vec<i32> = parents.rows().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![10, 11]);
        let next = parents
            .insert(&Parent {
                name: "later".into(),
                ..Parent::default()
            })
            .unwrap();
        assert_eq!(next.id, 12);
    }

    #[test]
    fn every_row_is_reachable_through_the_index() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        for i in 0..20 {
            parents
                .insert(&Parent {
                    name: format!("P{i}"),
                    ..Parent::default()
                })
                .unwrap();
        }
        let rows = parents.rows();
        assert_eq!(rows.len(), 20);
        for row in rows {
            let found = parents.find_by_primary_key(&pk(row.id)).unwrap().unwrap();
            assert_eq!(found, row);
        }
    }

    #[test]
    fn returned_rows_are_detached_copies() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents.insert(&Parent { name: "original".into(), ..Parent::default() }).unwrap();
        let mut fetched = parents.find_by_primary_key(&pk(1)).unwrap().unwrap();
        fetched.name = "tampered".into();
        assert_eq!(parents.find_by_primary_key(&pk(1)).unwrap().unwrap().name, "original");
        let mut scanned = parents.rows();
        scanned[0].name = "tampered".into();
        assert_eq!(parents.rows()[0].name, "original");
    }

    #[test]
    fn required_column_rejects_null_and_empty_string() {
        let (_m, customers) = manager_with::<Customer>("Customers");
        let err = customers.insert(&Customer::default()).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::RequiredMissing { .. })));
        let err = customers
            .insert(&Customer {
                name: "".into(),
                ..Customer::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::RequiredMissing { .. })));
        assert!(customers.is_empty());
    }

    #[test]
    fn duplicate_preset_key_is_rejected() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents.insert(&Parent { id: 5, name: "a".into() }).unwrap();
        let err = parents.insert(&Parent { id: 5, name: "b".into() }).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::DuplicatePrimaryKey { .. })));
        assert_eq!(parents.len(), 1);
    }

    #[test]
    fn foreign_key_must_point_at_an_existing_row() {
        let manager = DatabaseManager::new();
        manager.create_database("test").unwrap();
        let children = manager.create_table::<Child>("test", Some("Children")).unwrap();
        // No Parents table registered at all.
        let err = children
            .insert(&Child {
                parent_id: 1,
                name: "c".into(),
                ..Child::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ForeignKeyViolation { .. })));

        let parents = manager.create_table::<Parent>("test", Some("Parents")).unwrap();
        parents.insert(&Parent { name: "p".into(), ..Parent::default() }).unwrap();
        let err = children
            .insert(&Child {
                parent_id: 99,
                name: "c".into(),
                ..Child::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ForeignKeyViolation { .. })));
        children
            .insert(&Child {
                parent_id: 1,
                name: "c".into(),
                ..Child::default()
            })
            .unwrap();
    }

    #[test]
    fn referenced_row_cannot_be_deleted_until_children_are_gone() {
        let manager = DatabaseManager::new();
        manager.create_database("test").unwrap();
        let parents = manager.create_table::<Parent>("test", Some("Parents")).unwrap();
        let children = manager.create_table::<Child>("test", Some("Children")).unwrap();
        parents.insert(&Parent { name: "P".into(), ..Parent::default() }).unwrap();
        children
            .insert(&Child {
                parent_id: 1,
                name: "C".into(),
                ..Child::default()
            })
            .unwrap();

        let err = parents.delete_by_primary_key(&pk(1)).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ReferentialIntegrity { .. })));
        assert_eq!(parents.len(), 1);

        assert_eq!(children.delete(|c| c.parent_id == 1).unwrap(), 1);
        assert!(parents.delete_by_primary_key(&pk(1)).unwrap());
        assert!(parents.is_empty());
    }

    #[test]
    fn key_change_is_refused_while_referenced_and_leaves_state_unchanged() {
        let manager = DatabaseManager::new();
        manager.create_database("test").unwrap();
        let parents = manager.create_table::<Parent>("test", Some("Parents")).unwrap();
        let children = manager.create_table::<Child>("test", Some("Children")).unwrap();
        parents.insert(&Parent { name: "P".into(), ..Parent::default() }).unwrap();
        children
            .insert(&Child {
                parent_id: 1,
                name: "C".into(),
                ..Child::default()
            })
            .unwrap();

        let err = parents.update(|p| p.id == 1, |p| p.id = 2).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ReferentialIntegrity { .. })));
        assert!(parents.find_by_primary_key(&pk(1)).unwrap().is_some());
        assert!(parents.find_by_primary_key(&pk(2)).unwrap().is_none());
    }

    #[test]
    fn key_change_moves_the_index_entry() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents.insert(&Parent { name: "a".into(), ..Parent::default() }).unwrap();
        parents.insert(&Parent { name: "b".into(), ..Parent::default() }).unwrap();

        let changed = parents.update(|p| p.id == 2, |p| p.id = 9).unwrap();
        assert_eq!(changed, 1);
        assert!(parents.find_by_primary_key(&pk(2)).unwrap().is_none());
        assert_eq!(parents.find_by_primary_key(&pk(9)).unwrap().unwrap().name, "b");

        let err = parents.update(|p| p.id == 9, |p| p.id = 1).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::DuplicatePrimaryKey { .. })));
    }

    #[test]
    fn update_revalidates_required_and_foreign_keys() {
        let manager = DatabaseManager::new();
        manager.create_database("test").unwrap();
        let customers = manager.create_table::<Customer>("test", Some("Customers")).unwrap();
        let orders = manager.create_table::<Order>("test", Some("Orders")).unwrap();
        customers
            .insert(&Customer { name: "A".into(), ..Customer::default() })
            .unwrap();
        orders
            .insert(&Order {
                customer_id: 1,
                status: "Open".into(),
                ..Order::default()
            })
            .unwrap();

        let err = orders.update(|o| o.id == 1, |o| o.status = String::new()).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::RequiredMissing { .. })));
        let err = orders.update(|o| o.id == 1, |o| o.customer_id = 42).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ForeignKeyViolation { .. })));
        assert_eq!(orders.rows()[0].status, "Open");
    }

    #[test]
    fn insert_range_failure_leaves_no_rows_behind() {
        let (_m, customers) = manager_with::<Customer>("Customers");
        let err = customers
            .insert_range(&[
                Customer { name: "ok".into(), ..Customer::default() },
                Customer::default(), // missing required Name
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::RequiredMissing { .. })));
        assert!(customers.is_empty());
        // The sequence is not rolled back, like any database sequence.
        let row = customers
            .insert(&Customer { name: "later".into(), ..Customer::default() })
            .unwrap();
        assert_eq!(row.id, 3);
    }

    #[test]
    fn clear_resets_the_auto_increment_counter() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        parents.insert(&Parent { name: "a".into(), ..Parent::default() }).unwrap();
        parents.insert(&Parent { name: "b".into(), ..Parent::default() }).unwrap();
        parents.clear();
        assert!(parents.is_empty());
        let row = parents.insert(&Parent { name: "c".into(), ..Parent::default() }).unwrap();
        assert_eq!(row.id, 1);
    }

    #[test]
    fn concurrent_readers_observe_monotonic_growth() {
        let (_m, parents) = manager_with::<Parent>("Parents");
        let writer_table = parents.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..200 {
                writer_table
                    .insert(&Parent {
                        name: format!("P{i}"),
                        ..Parent::default()
                    })
                    .unwrap();
            }
        });

        let mut last_seen = 0;
        loop {
            let rows = parents.rows();
            assert!(rows.len() >= last_seen, "row count shrank under a writer");
            last_seen = rows.len();
            let ids: HashSet<i32> = rows.iter().map(|p| p.id).collect();
            assert_eq!(ids.len(), rows.len(), "duplicate key observed");
            assert!(rows.iter().all(|p| p.id > 0), "non-positive key observed");
            if rows.len() == 200 {
                break;
            }
            std::thread::yield_now();
        }
        writer.join().unwrap();
        assert_eq!(parents.len(), 200);
    }

    // A row type referencing itself exercises the same-table fast paths of
    // the foreign-key and dependents checks.
    #[derive(Clone, Debug, Default, PartialEq)]
    struct Employee {
        id: i32,
        manager_id: ColumnValue,
        name: String,
    }

    impl crate::row::Row for Employee {
        fn get(&self, column: &str) -> ColumnValue {
            if column.eq_ignore_ascii_case("Id") {
                ColumnValue::I32(self.id)
            } else if column.eq_ignore_ascii_case("ManagerId") {
                self.manager_id.clone()
            } else if column.eq_ignore_ascii_case("Name") {
                ColumnValue::String(self.name.clone())
            } else {
                ColumnValue::Null
            }
        }

        fn set(&mut self, column: &str, value: ColumnValue) -> std::result::Result<(), SchemaError> {
            if column.eq_ignore_ascii_case("Id") {
                self.id = value.as_i32().unwrap_or(0);
            } else if column.eq_ignore_ascii_case("ManagerId") {
                self.manager_id = value;
            } else if column.eq_ignore_ascii_case("Name") {
                self.name = match value {
                    ColumnValue::String(s) => s,
                    _ => String::new(),
                };
            } else {
                return Err(SchemaError::NoSuchColumn(column.to_string()));
            }
            Ok(())
        }
    }

    impl StaticRow for Employee {
        const TYPE_TAG: &'static str = "Employee";

        fn schema() -> RowSchema {
            RowSchema::builder(Self::TYPE_TAG)
                .column("Id", LogicalType::I32)
                .primary_key()
                .auto_inc()
                .column("ManagerId", LogicalType::I32)
                .references(Self::TYPE_TAG)
                .column("Name", LogicalType::String)
                .build()
                .expect("static schema")
        }
    }

    #[test]
    fn self_referencing_foreign_keys_resolve_in_place() {
        let (_m, employees) = manager_with::<Employee>("Employees");
        let boss = employees
            .insert(&Employee {
                name: "boss".into(),
                manager_id: ColumnValue::Null,
                ..Employee::default()
            })
            .unwrap();
        employees
            .insert(&Employee {
                name: "report".into(),
                manager_id: ColumnValue::I32(boss.id),
                ..Employee::default()
            })
            .unwrap();

        let err = employees
            .insert(&Employee {
                name: "orphan".into(),
                manager_id: ColumnValue::I32(99),
                ..Employee::default()
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ForeignKeyViolation { .. })));

        // The boss is referenced by the report.
        let err = employees.delete_by_primary_key(&pk(boss.id)).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::ReferentialIntegrity { .. })));
        assert!(employees.delete_by_primary_key(&pk(2)).unwrap());
        assert!(employees.delete_by_primary_key(&pk(boss.id)).unwrap());
    }
}
