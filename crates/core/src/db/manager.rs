//! The database manager: the registry of named databases, the owner of the
//! snapshot codec and the enforcer of snapshot retention.
//!
//! Snapshots are UTF-8 JSON, gzip-compressed at the highest level for the
//! on-disk `.json.gz` forms. A database serializes as
//! `{ "<table>": { "TypeName": "<tag>", "Rows": [...] }, ... }`; the whole
//! manager adds one more layer keyed by database name. Loading consults the
//! row-type registry to turn tags back into typed tables, so every row type
//! that appears in a dump must be registered before the dump is read.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use log::warn;
use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

use crate::config::SnapshotConfig;
use crate::db::catalog::Catalog;
use crate::db::database::Database;
use crate::db::table::{AnyTable, Table};
use crate::error::{DbError, Result, SnapshotError, TableError};
use crate::row::schema::RowSchema;
use crate::row::{DynRow, StaticRow};

struct RowTypeEntry {
    make_table: Box<dyn Fn(&str, Arc<Catalog>) -> Arc<dyn AnyTable> + Send + Sync>,
}

/// Process-wide entry point: named databases, snapshot configurations and
/// the row-type registry used to reload dumps.
pub struct DatabaseManager {
    databases: RwLock<IndexMap<Box<str>, Arc<Database>>>,
    configs: RwLock<HashMap<Box<str>, SnapshotConfig>>,
    row_types: RwLock<HashMap<Box<str>, RowTypeEntry>>,
    catalog: Arc<Catalog>,
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self {
            databases: RwLock::new(IndexMap::new()),
            configs: RwLock::new(HashMap::new()),
            row_types: RwLock::new(HashMap::new()),
            catalog: Catalog::new(),
        }
    }
}

impl DatabaseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the named database if absent; idempotent.
    pub fn create_database(&self, name: &str) -> Result<Arc<Database>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidArgument("database name is empty".into()));
        }
        let mut databases = self.databases.write();
        if let Some(db) = databases.get(name) {
            return Ok(db.clone());
        }
        let db = Arc::new(Database::new(name));
        databases.insert(name.into(), db.clone());
        Ok(db)
    }

    /// Creates the database named by `config` and registers (or replaces)
    /// its snapshot configuration.
    pub fn create_database_with(&self, config: SnapshotConfig) -> Result<Arc<Database>> {
        config.validate()?;
        let db = self.create_database(&config.database_name)?;
        self.configs
            .write()
            .insert(config.database_name.trim().into(), config);
        Ok(db)
    }

    pub fn snapshot_config(&self, name: &str) -> Option<SnapshotConfig> {
        self.configs.read().get(name.trim()).cloned()
    }

    /// Removes and disposes the database; returns whether it existed.
    pub fn drop_database(&self, name: &str) -> bool {
        self.databases.write().shift_remove(name.trim()).is_some()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.databases.read().contains_key(name.trim())
    }

    /// An independent snapshot of the registered databases, in creation order.
    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }

    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name.trim()).cloned()
    }

    /// The first database ever registered, the fallback target for SQL
    /// calls that name no database.
    pub fn first_database(&self) -> Option<Arc<Database>> {
        self.databases.read().values().next().cloned()
    }

    fn database_or_err(&self, name: &str) -> Result<Arc<Database>> {
        self.database(name)
            .ok_or_else(|| DbError::DatabaseNotFound(name.trim().to_string()))
    }

    /// Teaches the manager how to rebuild tables of row type `R` from a
    /// snapshot. Implied by [`Self::create_table`]; only needs to be called
    /// explicitly when a dump is loaded before any table of `R` exists.
    pub fn register_row_type<R: StaticRow>(&self) {
        self.row_types.write().entry(R::TYPE_TAG.into()).or_insert_with(|| RowTypeEntry {
            make_table: Box::new(|name, catalog| {
                Arc::new(Table::<R>::new(name, Arc::new(R::schema()), catalog, false))
            }),
        });
    }

    /// Creates a table of row type `R` in the named database. The table name
    /// defaults to the row type's tag.
    pub fn create_table<R: StaticRow>(&self, database: &str, name: Option<&str>) -> Result<Arc<Table<R>>> {
        let db = self.database_or_err(database)?;
        let table_name = name.unwrap_or(R::TYPE_TAG).trim();
        if table_name.is_empty() {
            return Err(DbError::InvalidArgument("table name is empty".into()));
        }
        let schema = Arc::new(R::schema());
        let table = Arc::new(Table::<R>::new(table_name, schema, self.catalog.clone(), false));
        let erased: Arc<dyn AnyTable> = table.clone();
        db.insert_table(erased.clone())?;
        self.catalog.register(R::TYPE_TAG, Arc::downgrade(&erased));
        self.register_row_type::<R>();
        Ok(table)
    }

    /// Fetches a table by name, failing with `TableNotFound` when it is
    /// absent or stores a different row type.
    pub fn get_table<R: StaticRow>(&self, database: &str, name: &str) -> Result<Arc<Table<R>>> {
        let db = self.database_or_err(database)?;
        let not_found = || DbError::from(TableError::NotFound(name.trim().to_string()));
        let table = db.any_table(name).ok_or_else(not_found)?;
        if table.schema_ref().type_tag() != R::TYPE_TAG {
            return Err(not_found());
        }
        table.as_any().downcast::<Table<R>>().map_err(|_| not_found())
    }

    /// Creates a transient dynamic-row table with a runtime schema. Such
    /// tables take part in foreign-key checks and SQL like any other, but
    /// the snapshot codec skips them.
    pub fn create_dynamic_table(
        &self,
        database: &str,
        name: &str,
        schema: RowSchema,
    ) -> Result<Arc<Table<DynRow>>> {
        let db = self.database_or_err(database)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidArgument("table name is empty".into()));
        }
        let schema = Arc::new(schema);
        let tag = schema.type_tag().to_string();
        let table = Arc::new(Table::<DynRow>::new(name, schema, self.catalog.clone(), true));
        let erased: Arc<dyn AnyTable> = table.clone();
        db.insert_table(erased.clone())?;
        self.catalog.register(&tag, Arc::downgrade(&erased));
        Ok(table)
    }

    /// Removes the named table from the database.
    pub fn drop_table(&self, database: &str, name: &str) -> Result<bool> {
        let db = self.database_or_err(database)?;
        Ok(db.remove_table(name))
    }

    /// Empties every table of the database; the database itself remains.
    pub fn clear_database(&self, name: &str) -> Result<()> {
        let db = self.database_or_err(name)?;
        for table in db.tables_snapshot() {
            table.clear_rows();
        }
        Ok(())
    }

    // ---- snapshot codec -------------------------------------------------

    fn database_json(db: &Database) -> JsonValue {
        let mut object = JsonMap::new();
        for table in db.tables_snapshot() {
            if table.is_transient() {
                continue;
            }
            let mut entry = JsonMap::new();
            entry.insert(
                "TypeName".into(),
                JsonValue::from(table.schema_ref().type_tag().to_string()),
            );
            entry.insert("Rows".into(), JsonValue::Array(table.rows_to_json()));
            object.insert(table.table_name().to_string(), JsonValue::Object(entry));
        }
        JsonValue::Object(object)
    }

    fn manager_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        for db in self.databases() {
            object.insert(db.name().to_string(), Self::database_json(&db));
        }
        JsonValue::Object(object)
    }

    /// Rebuilds one database from its JSON form, using the row-type registry.
    fn build_database(&self, name: &str, tables: &JsonMap<String, JsonValue>) -> Result<Arc<Database>> {
        let db = Arc::new(Database::new(name));
        let row_types = self.row_types.read();
        for (table_name, entry) in tables {
            let malformed = |reason: &str| {
                DbError::from(SnapshotError::MalformedTable {
                    table: table_name.clone(),
                    reason: reason.to_string(),
                })
            };
            let entry = entry.as_object().ok_or_else(|| malformed("table entry is not an object"))?;
            let tag = entry
                .get("TypeName")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| malformed("missing `TypeName`"))?;
            let rows = entry
                .get("Rows")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| malformed("missing `Rows`"))?;
            let row_type = row_types
                .get(tag)
                .ok_or_else(|| DbError::from(SnapshotError::UnknownRowType(tag.to_string())))?;
            let table = (row_type.make_table)(table_name, self.catalog.clone());
            table.load_rows_json(rows)?;
            db.insert_table(table.clone())?;
            self.catalog
                .register(table.schema_ref().type_tag(), Arc::downgrade(&table));
        }
        Ok(db)
    }

    /// The whole manager as uncompressed JSON.
    pub fn serialize_databases(&self) -> Result<String> {
        serde_json::to_string(&self.manager_json()).map_err(|e| SnapshotError::Json(e).into())
    }

    /// Replaces the entire database set with the one encoded in `json`. The
    /// new set is built completely before the old one is swapped out.
    pub fn deserialize_databases(&self, json: &str) -> Result<()> {
        let value: JsonValue = serde_json::from_str(json).map_err(SnapshotError::Json)?;
        let object = value
            .as_object()
            .ok_or_else(|| DbError::InvalidArgument("serialized form is not a JSON object".into()))?;
        let mut replacement = IndexMap::new();
        for (db_name, tables) in object {
            let tables = tables.as_object().ok_or_else(|| {
                DbError::InvalidArgument(format!("database `{db_name}` is not a JSON object"))
            })?;
            let db = self.build_database(db_name, tables)?;
            replacement.insert(db_name.trim().into(), db);
        }
        *self.databases.write() = replacement;
        Ok(())
    }

    /// Writes one database to `path` as gzip-compressed JSON.
    pub fn dump_database(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let db = self.database_or_err(name)?;
        write_gzip(path.as_ref(), &Self::database_json(&db))
    }

    /// Creates or overwrites the named database from a gzip-compressed dump.
    pub fn load_database(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let text = read_gzip(path.as_ref())?;
        let value: JsonValue = serde_json::from_str(&text).map_err(SnapshotError::Json)?;
        let object = value
            .as_object()
            .ok_or_else(|| DbError::InvalidArgument("dump is not a JSON object".into()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidArgument("database name is empty".into()));
        }
        let db = self.build_database(name, object)?;
        self.databases.write().insert(name.into(), db);
        Ok(())
    }

    /// Writes a timestamped dump `{prefix}_{yyyyMMdd_HHmmss}.json.gz` into
    /// the configured directory, then applies retention. Returns the path
    /// of the written file.
    pub fn dump_database_with(&self, config: &SnapshotConfig) -> Result<PathBuf> {
        fs::create_dir_all(&config.dump_directory)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = config
            .dump_directory
            .join(format!("{}_{stamp}.json.gz", config.dump_file_prefix));
        self.dump_database(&config.database_name, &path)?;
        self.trim_snapshot_history(config)?;
        Ok(path)
    }

    /// Every registered database, compressed, in the whole-manager shape.
    pub fn save_all_databases(&self, path: impl AsRef<Path>) -> Result<()> {
        write_gzip(path.as_ref(), &self.manager_json())
    }

    /// Replaces all databases from a whole-manager dump.
    pub fn load_all_databases(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = read_gzip(path.as_ref())?;
        self.deserialize_databases(&text)
    }

    /// Deletes the oldest files matching `{prefix}_*.json.gz` until at most
    /// `max_snapshot_history` remain; a retention of zero removes them all.
    /// Individual delete failures are logged and swallowed.
    pub fn trim_snapshot_history(&self, config: &SnapshotConfig) -> Result<()> {
        let snapshots = list_snapshots(&config.dump_directory, &config.dump_file_prefix)?;
        for (path, _) in snapshots.iter().skip(config.max_snapshot_history) {
            if let Err(e) = fs::remove_file(path) {
                warn!("failed to delete stale snapshot {}: {e}", path.display());
            }
        }
        Ok(())
    }

    /// Loads the newest dump matching the configured prefix. Returns whether
    /// a restore happened.
    pub fn restore_latest_dump(&self, config: &SnapshotConfig) -> Result<bool> {
        let snapshots = list_snapshots(&config.dump_directory, &config.dump_file_prefix)?;
        let Some((path, _)) = snapshots.first() else {
            return Ok(false);
        };
        self.load_database(&config.database_name, path)?;
        Ok(true)
    }
}

/// Files matching `{prefix}_*.json.gz` under `dir`, newest first by
/// last-write time. A missing directory lists as empty.
fn list_snapshots(dir: &Path, prefix: &str) -> Result<Vec<(PathBuf, SystemTime)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let lead = format!("{prefix}_");
    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&lead) || !name.ends_with(".json.gz") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        snapshots.push((entry.path(), modified));
    }
    snapshots.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(snapshots)
}

fn write_gzip(path: &Path, value: &JsonValue) -> Result<()> {
    let json = serde_json::to_string(value).map_err(SnapshotError::Json)?;
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::best());
    encoder.write_all(json.as_bytes())?;
    encoder.finish()?;
    Ok(())
}

fn read_gzip(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::row::value::{ColumnValue, LogicalType};
    use crate::row::{DynRow, Row as _};
    use crate::testing::{Child, Customer, Order, Parent};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seeded_manager() -> Arc<DatabaseManager> {
        let manager = DatabaseManager::new();
        manager.create_database("crm").unwrap();
        let customers = manager.create_table::<Customer>("crm", Some("Customers")).unwrap();
        let orders = manager.create_table::<Order>("crm", Some("Orders")).unwrap();
        customers
            .insert_range(&[
                Customer { name: "Alice".into(), region: "N".into(), ..Customer::default() },
                Customer { name: "Bob".into(), region: "W".into(), ..Customer::default() },
            ])
            .unwrap();
        orders
            .insert(&Order {
                customer_id: 1,
                status: "Open".into(),
                total: Decimal::from(100),
                ..Order::default()
            })
            .unwrap();
        manager
    }

    fn fresh_manager_with_types() -> Arc<DatabaseManager> {
        let manager = DatabaseManager::new();
        manager.register_row_type::<Customer>();
        manager.register_row_type::<Order>();
        manager.register_row_type::<Parent>();
        manager.register_row_type::<Child>();
        manager
    }

    #[test]
    fn database_creation_is_idempotent_and_name_trimmed() {
        let manager = DatabaseManager::new();
        let first = manager.create_database("crm").unwrap();
        let second = manager.create_database("  crm  ").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(manager.exists(" crm "));
        assert_eq!(manager.databases().len(), 1);
        assert!(manager.create_database("   ").is_err());
    }

    #[test]
    fn drop_database_reports_whether_something_was_removed() {
        let manager = DatabaseManager::new();
        manager.create_database("a").unwrap();
        assert!(manager.drop_database("a"));
        assert!(!manager.drop_database("a"));
        assert!(!manager.exists("a"));
    }

    #[test]
    fn table_name_collision_is_rejected() {
        let manager = DatabaseManager::new();
        manager.create_database("crm").unwrap();
        manager.create_table::<Customer>("crm", Some("Customers")).unwrap();
        let err = manager.create_table::<Order>("crm", Some(" Customers ")).unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::AlreadyExists(_))));
    }

    #[test]
    fn get_table_with_wrong_row_type_is_not_found() {
        let manager = seeded_manager();
        assert!(manager.get_table::<Customer>("crm", "Customers").is_ok());
        let err = manager.get_table::<Order>("crm", "Customers").unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::NotFound(_))));
        let err = manager.get_table::<Customer>("crm", "Missing").unwrap_err();
        assert!(matches!(err, DbError::Table(TableError::NotFound(_))));
        let err = manager.get_table::<Customer>("nope", "Customers").unwrap_err();
        assert!(matches!(err, DbError::DatabaseNotFound(_)));
    }

    #[test]
    fn clear_database_empties_tables_but_keeps_them() {
        let manager = seeded_manager();
        manager.clear_database("crm").unwrap();
        let customers = manager.get_table::<Customer>("crm", "Customers").unwrap();
        assert!(customers.is_empty());
        assert_eq!(manager.database("crm").unwrap().table_names(), vec!["Customers", "Orders"]);
    }

    #[test]
    fn serialize_then_deserialize_reproduces_every_database() {
        let manager = seeded_manager();
        manager.create_database("org").unwrap();
        let parents = manager.create_table::<Parent>("org", Some("Parents")).unwrap();
        parents.insert(&Parent { name: "p1".into(), ..Parent::default() }).unwrap();

        let json = manager.serialize_databases().unwrap();

        let restored = fresh_manager_with_types();
        restored.deserialize_databases(&json).unwrap();

        let names: Vec<String> = restored.databases().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["crm", "org"]);
        assert_eq!(
            restored.database("crm").unwrap().table_names(),
            vec!["Customers", "Orders"]
        );
        let customers = restored.get_table::<Customer>("crm", "Customers").unwrap();
        assert_eq!(
            customers.rows(),
            manager.get_table::<Customer>("crm", "Customers").unwrap().rows()
        );
        let orders = restored.get_table::<Order>("crm", "Orders").unwrap();
        assert_eq!(orders.rows()[0].total, Decimal::from(100));
    }

    #[test]
    fn deserialize_replaces_the_existing_set_atomically() {
        let manager = seeded_manager();
        let json = manager.serialize_databases().unwrap();

        let other = fresh_manager_with_types();
        other.create_database("stale").unwrap();
        other.deserialize_databases(&json).unwrap();
        assert!(!other.exists("stale"));
        assert!(other.exists("crm"));
    }

    #[test]
    fn deserialize_with_unregistered_row_type_fails() {
        let manager = seeded_manager();
        let json = manager.serialize_databases().unwrap();
        let restored = DatabaseManager::new();
        let err = restored.deserialize_databases(&json).unwrap_err();
        assert!(matches!(err, DbError::Snapshot(SnapshotError::UnknownRowType(_))));
    }

    #[test]
    fn dump_then_load_reproduces_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crm.json.gz");
        let manager = seeded_manager();
        manager.dump_database("crm", &path).unwrap();

        let restored = fresh_manager_with_types();
        restored.load_database("crm", &path).unwrap();
        let customers = restored.get_table::<Customer>("crm", "Customers").unwrap();
        assert_eq!(customers.rows().len(), 2);
        assert_eq!(customers.rows()[0].name, "Alice");
        // The auto-increment counter continues after the loaded keys.
        let row = customers
            .insert(&Customer { name: "Carol".into(), ..Customer::default() })
            .unwrap();
        assert_eq!(row.id, 3);
    }

    #[test]
    fn save_and_load_all_databases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("all.json.gz");
        let manager = seeded_manager();
        manager.save_all_databases(&path).unwrap();

        let restored = fresh_manager_with_types();
        restored.load_all_databases(&path).unwrap();
        assert!(restored.exists("crm"));
        assert_eq!(
            restored.get_table::<Customer>("crm", "Customers").unwrap().len(),
            2
        );
    }

    #[test]
    fn transient_tables_are_excluded_from_snapshots() {
        let manager = seeded_manager();
        let schema = RowSchema::builder("Scratch")
            .column("Id", LogicalType::I32)
            .primary_key()
            .auto_inc()
            .column("Note", LogicalType::String)
            .build()
            .unwrap();
        let scratch = manager.create_dynamic_table("crm", "Scratch", schema).unwrap();
        scratch
            .insert(&DynRow::new().with("Note", ColumnValue::String("temp".into())))
            .unwrap();
        assert_eq!(scratch.rows()[0].get("Id"), ColumnValue::I32(1));

        let json = manager.serialize_databases().unwrap();
        assert!(!json.contains("Scratch"));

        let restored = fresh_manager_with_types();
        restored.deserialize_databases(&json).unwrap();
        assert_eq!(
            restored.database("crm").unwrap().table_names(),
            vec!["Customers", "Orders"]
        );
    }

    #[test]
    fn timestamped_dump_applies_retention() {
        let dir = TempDir::new().unwrap();
        let manager = seeded_manager();
        let config = SnapshotConfig::new("crm", dir.path())
            .with_prefix("crm")
            .with_max_history(1);
        let first = manager.dump_database_with(&config).unwrap();
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("crm_"));
        assert!(first.extension().is_some());
        let survivors = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(survivors, 1);
    }

    #[test]
    fn retention_keeps_the_newest_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("app_2024010{i}_000000.json.gz")), b"x").unwrap();
            std::thread::sleep(Duration::from_millis(25));
        }
        std::fs::write(dir.path().join("other_20240101_000000.json.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("app_not_a_dump.txt"), b"x").unwrap();

        let manager = DatabaseManager::new();
        let config = SnapshotConfig::new("app", dir.path()).with_max_history(2);
        manager.trim_snapshot_history(&config).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "app_20240103_000000.json.gz",
                "app_20240104_000000.json.gz",
                "app_not_a_dump.txt",
                "other_20240101_000000.json.gz",
            ]
        );

        // Retention zero removes every matching file.
        let config = SnapshotConfig {
            max_snapshot_history: 0,
            ..SnapshotConfig::new("app", dir.path())
        };
        manager.trim_snapshot_history(&config).unwrap();
        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn restore_latest_picks_the_newest_dump() {
        let dir = TempDir::new().unwrap();
        let manager = seeded_manager();
        let config = SnapshotConfig::new("crm", dir.path());
        assert!(!manager.restore_latest_dump(&config).unwrap());

        manager.dump_database_with(&config).unwrap();
        let customers = manager.get_table::<Customer>("crm", "Customers").unwrap();
        customers
            .insert(&Customer { name: "Carol".into(), ..Customer::default() })
            .unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        manager.dump_database_with(&config).unwrap();

        let restored = fresh_manager_with_types();
        assert!(restored.restore_latest_dump(&config).unwrap());
        let names: Vec<String> = restored
            .get_table::<Customer>("crm", "Customers")
            .unwrap()
            .rows()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn serialize_tolerates_concurrent_table_creation() {
        let manager = seeded_manager();
        let writer = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    manager
                        .create_table::<Parent>("crm", Some(&format!("Parents{i}")))
                        .unwrap();
                }
            })
        };
        for _ in 0..50 {
            manager.serialize_databases().unwrap();
        }
        writer.join().unwrap();
        // Everything registered by now shows up in the next serialization.
        let json = manager.serialize_databases().unwrap();
        assert!(json.contains("Parents49"));
    }

    #[test]
    fn invalid_snapshot_config_is_rejected_at_registration() {
        let manager = DatabaseManager::new();
        let err = manager
            .create_database_with(SnapshotConfig::new("crm", "/tmp").with_max_history(0))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!manager.exists("crm"));

        manager
            .create_database_with(SnapshotConfig::new("crm", "/tmp"))
            .unwrap();
        assert!(manager.snapshot_config("crm").is_some());
    }
}
