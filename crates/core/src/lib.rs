//! residb: an in-process, resident-memory relational database kernel.
//!
//! Every row lives in memory. Tables enforce schema-first constraints
//! (primary keys, auto-increment, required columns, foreign keys), a SQL
//! subset evaluates against them, and whole databases round-trip through
//! gzip-compressed JSON snapshots with bounded retention.

pub mod config;
pub mod db;
pub mod error;
pub mod row;
pub mod sql;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SnapshotConfig;
pub use db::database::Database;
pub use db::manager::DatabaseManager;
pub use db::snapshot::SnapshotWorker;
pub use db::table::Table;
pub use error::{DbError, SchemaError, SnapshotError, SqlError, TableError};
pub use row::schema::{ColumnAttrs, ColumnDef, RowSchema, RowSchemaBuilder};
pub use row::value::{ColumnValue, LogicalType};
pub use row::{DynRow, Row, RowCells, StaticRow};
pub use sql::queue::SqlQueue;
pub use sql::{SqlResult, SqlRow, SqlRunner};
