//! Filesystem metadata bootstrap for residb.
//!
//! Reads table descriptor files laid out as
//! `Metadata/<database>/Tables/*.json`, turns each into a runtime row
//! schema, and installs a transient dynamic table through the normal
//! manager API. The engine itself knows nothing about this format; this
//! crate is a producer of tables like any other caller.
//!
//! Descriptor shape:
//!
//! ```json
//! { "DatabaseName": "crm", "TableName": "Imports", "Fields":
//!   [{ "Name": "Id", "DataType": "INT", "Length": 0,
//!      "AllowBlank": false, "AutoGenerated": true }] }
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;

use residb::{DatabaseManager, DbError, DynRow, LogicalType, RowSchema, RowSchemaBuilder, Table};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescriptor {
    pub database_name: String,
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub allow_blank: bool,
    #[serde(default)]
    pub auto_generated: bool,
}

/// Maps a descriptor's `DataType` to the engine's logical types.
fn logical_type(data_type: &str) -> Result<LogicalType, DbError> {
    Ok(match data_type.trim().to_ascii_uppercase().as_str() {
        "INT" => LogicalType::I32,
        "BIGINT" => LogicalType::I64,
        "DECIMAL" => LogicalType::Decimal,
        "BIT" => LogicalType::Bool,
        "DATE" | "DATETIME" => LogicalType::DateTime,
        "NVARCHAR" | "VARCHAR" => LogicalType::String,
        "UNIQUEIDENTIFIER" => LogicalType::Uuid,
        other => {
            return Err(DbError::InvalidArgument(format!(
                "unknown metadata data type `{other}`"
            )));
        }
    })
}

/// Builds a runtime row schema from one descriptor. An `AutoGenerated`
/// integer field becomes the auto-increment primary key; `AllowBlank:
/// false` marks a required column.
pub fn schema_from_descriptor(descriptor: &TableDescriptor) -> Result<RowSchema, DbError> {
    let mut builder: RowSchemaBuilder = RowSchema::builder(descriptor.table_name.clone());
    for field in &descriptor.fields {
        let ty = logical_type(&field.data_type)?;
        builder = builder.column(field.name.clone(), ty);
        if field.auto_generated {
            builder = builder.primary_key().auto_inc();
        } else if !field.allow_blank {
            builder = builder.required();
        }
    }
    Ok(builder.build()?)
}

/// Installs the table described by `descriptor` as a transient dynamic
/// table, creating its database if needed.
pub fn install_descriptor(
    manager: &DatabaseManager,
    descriptor: &TableDescriptor,
) -> Result<Arc<Table<DynRow>>, DbError> {
    let schema = schema_from_descriptor(descriptor)?;
    manager.create_database(&descriptor.database_name)?;
    manager.create_dynamic_table(&descriptor.database_name, &descriptor.table_name, schema)
}

/// Walks `Metadata/<database>/Tables/*.json` under `root` and installs
/// every descriptor found. A missing tree yields no tables; an unreadable
/// or malformed descriptor file fails the bootstrap.
pub fn bootstrap(manager: &DatabaseManager, root: impl AsRef<Path>) -> Result<Vec<String>, DbError> {
    let metadata_dir = root.as_ref().join("Metadata");
    let mut installed = Vec::new();
    let databases = match fs::read_dir(&metadata_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(installed),
        Err(e) => return Err(e.into()),
    };
    for database in databases {
        let tables_dir = database?.path().join("Tables");
        let tables = match fs::read_dir(&tables_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} has no Tables directory", tables_dir.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for table in tables {
            let path = table?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let descriptor: TableDescriptor = serde_json::from_str(&text)
                .map_err(|e| DbError::InvalidArgument(format!("{}: {e}", path.display())))?;
            install_descriptor(manager, &descriptor)?;
            info!(
                "installed metadata table {}.{}",
                descriptor.database_name, descriptor.table_name
            );
            installed.push(format!("{}.{}", descriptor.database_name, descriptor.table_name));
        }
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use residb::{ColumnValue, SqlRunner};
    use std::fs;
    use tempfile::TempDir;

    fn write_descriptor(root: &Path, json: &str) {
        let dir = root.join("Metadata/crm/Tables");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("imports.json"), json).unwrap();
    }

    const DESCRIPTOR: &str = r#"{
        "DatabaseName": "crm",
        "TableName": "Imports",
        "Fields": [
            { "Name": "Id", "DataType": "INT", "Length": 0, "AllowBlank": false, "AutoGenerated": true },
            { "Name": "Label", "DataType": "NVARCHAR", "Length": 80, "AllowBlank": false, "AutoGenerated": false },
            { "Name": "Seen", "DataType": "DATETIME", "Length": 0, "AllowBlank": true, "AutoGenerated": false }
        ]
    }"#;

    #[test]
    fn bootstrap_installs_transient_tables() {
        let root = TempDir::new().unwrap();
        write_descriptor(root.path(), DESCRIPTOR);

        let manager = DatabaseManager::new();
        let installed = bootstrap(&manager, root.path()).unwrap();
        assert_eq!(installed, vec!["crm.Imports"]);

        // The table behaves like any other: auto keys, required columns, SQL.
        let runner = SqlRunner::new(manager.clone()).with_default_database("crm");
        runner
            .run("INSERT INTO Imports (Label) VALUES ('first')")
            .unwrap();
        let rows = runner.run("SELECT * FROM Imports").unwrap().rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Id"), Some(&ColumnValue::I32(1)));

        let err = runner.run("INSERT INTO Imports (Seen) VALUES (NULL)").unwrap_err();
        assert!(matches!(err, DbError::Table(_)));

        // Transient tables never reach a snapshot.
        let json = manager.serialize_databases().unwrap();
        assert!(!json.contains("Imports"));
    }

    #[test]
    fn missing_metadata_tree_is_not_an_error() {
        let root = TempDir::new().unwrap();
        let manager = DatabaseManager::new();
        assert!(bootstrap(&manager, root.path()).unwrap().is_empty());
    }

    #[test]
    fn unknown_data_type_is_rejected() {
        let root = TempDir::new().unwrap();
        write_descriptor(
            root.path(),
            r#"{ "DatabaseName": "crm", "TableName": "Bad",
                 "Fields": [{ "Name": "X", "DataType": "GEOGRAPHY" }] }"#,
        );
        let manager = DatabaseManager::new();
        let err = bootstrap(&manager, root.path()).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn dyn_rows_enforce_required_fields() {
        let root = TempDir::new().unwrap();
        write_descriptor(root.path(), DESCRIPTOR);
        let manager = DatabaseManager::new();
        bootstrap(&manager, root.path()).unwrap();

        let imports = manager.database("crm").unwrap();
        assert_eq!(imports.table_names(), vec!["Imports"]);
        let runner = SqlRunner::new(manager).with_default_database("crm");
        let err = runner.run("INSERT INTO Imports (Label) VALUES ('')").unwrap_err();
        assert!(matches!(err, DbError::Table(_)));
    }
}
