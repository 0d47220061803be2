use thiserror::Error;

use crate::row::value::{ColumnValue, LogicalType};

/// Rejections raised while constructing a row schema descriptor.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("column `{0}` is declared more than once")]
    DuplicateColumn(String),
    #[error("row type `{0}` declares more than one primary-key column")]
    MultiplePrimaryKeys(String),
    #[error("row type `{0}` declares more than one auto-increment column")]
    MultipleAutoIncrement(String),
    #[error("auto-increment column `{0}` is not the primary key")]
    AutoIncrementNotPrimaryKey(String),
    #[error("auto-increment column `{column}` must be of integer type, found {found}")]
    AutoIncrementNotInteger { column: String, found: LogicalType },
    #[error("foreign-key column `{0}` does not name a referenced row type")]
    MissingForeignKeyTarget(String),
    #[error("attribute `{attr}` applied before any column was declared")]
    AttributeWithoutColumn { attr: &'static str },
    #[error("column `{0}` not found")]
    NoSuchColumn(String),
    #[error("column `{column}` expects {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: LogicalType,
        found: LogicalType,
    },
}

/// Failures of table-level operations and constraint checks.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("table with name `{0}` already exists")]
    AlreadyExists(String),
    #[error("table with name `{0}` not found")]
    NotFound(String),
    #[error("table `{table}` has no primary-key column")]
    NoPrimaryKey { table: String },
    #[error("required column `{table}.{column}` is missing or empty")]
    RequiredMissing { table: String, column: String },
    #[error("primary key for table `{table}` is missing or empty")]
    PrimaryKeyMissing { table: String },
    #[error("duplicate primary key {key} in table `{table}`")]
    DuplicatePrimaryKey { table: String, key: ColumnValue },
    #[error("foreign key `{table}.{column}` = {key} has no matching row in `{target}`")]
    ForeignKeyViolation {
        table: String,
        column: String,
        target: String,
        key: ColumnValue,
    },
    #[error("row {key} of table `{table}` is referenced by `{referencing}.{column}`")]
    ReferentialIntegrity {
        table: String,
        key: ColumnValue,
        referencing: String,
        column: String,
    },
}

/// SQL interpretation failures.
#[derive(Error, Debug)]
pub enum SqlError {
    #[error("unsupported command `{0}`")]
    UnsupportedCommand(String),
    #[error("unsupported feature: {feature}")]
    Unsupported { feature: String },
    #[error("{error}, executing `{sql}`")]
    Parse {
        sql: String,
        error: sqlparser::parser::ParserError,
    },
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("unknown table or alias `{0}`")]
    UnknownAlias(String),
    #[error("{0}")]
    Malformed(String),
}

/// Snapshot encode/decode failures.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot names unknown row type `{0}`; register it before loading")]
    UnknownRowType(String),
    #[error("snapshot table `{table}` has malformed payload: {reason}")]
    MalformedTable { table: String, reason: String },
}

/// The top-level error type of the engine.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("database `{0}` not found")]
    DatabaseNotFound(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request was cancelled before execution")]
    Cancelled,
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;
