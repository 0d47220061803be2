//! The SQL interpreter: parses a subset of SQL and evaluates it against
//! tables through the engine's row interface.
//!
//! Supported: `SELECT` with `[LEFT] JOIN ... ON a = b`, `WHERE`, `GROUP BY`
//! with `COUNT`/`SUM`/`AVG`/`MIN`/`MAX`, `ORDER BY`; `INSERT` with an
//! explicit column list; `UPDATE`; `DELETE`. Keywords are case-insensitive,
//! string literals are single-quoted with `''` escaping, and a trailing
//! semicolon is ignored.

pub(crate) mod ast;
pub(crate) mod execute;
pub(crate) mod expr;
pub mod queue;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::db::database::Database;
use crate::db::manager::DatabaseManager;
use crate::error::{DbError, Result};
use crate::row::value::ColumnValue;

/// One projected result row: output column name → value, in projection
/// order.
pub type SqlRow = IndexMap<String, ColumnValue>;

/// The outcome of one statement.
#[derive(Debug, Clone)]
pub struct SqlResult {
    /// Present only for queries.
    pub rows: Option<Vec<SqlRow>>,
    pub affected_rows: usize,
    pub is_query: bool,
}

impl SqlResult {
    pub(crate) fn query(rows: Vec<SqlRow>) -> Self {
        Self {
            affected_rows: rows.len(),
            rows: Some(rows),
            is_query: true,
        }
    }

    pub(crate) fn dml(affected_rows: usize) -> Self {
        Self {
            rows: None,
            affected_rows,
            is_query: false,
        }
    }
}

/// Executes SQL text against databases registered with a manager.
pub struct SqlRunner {
    manager: Arc<DatabaseManager>,
    default_database: Option<String>,
}

impl SqlRunner {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            manager,
            default_database: None,
        }
    }

    /// Makes `name` the target when a call does not specify a database.
    pub fn with_default_database(mut self, name: impl Into<String>) -> Self {
        self.default_database = Some(name.into());
        self
    }

    /// Runs one statement against the default database (or, lacking one,
    /// the first database registered with the manager).
    pub fn run(&self, sql: &str) -> Result<SqlResult> {
        self.run_on(None, sql)
    }

    /// Runs one statement against the named database.
    pub fn run_on(&self, database: Option<&str>, sql: &str) -> Result<SqlResult> {
        let ast = ast::compile(sql)?;
        let db = self.resolve_database(database)?;
        execute::execute(&db, ast)
    }

    fn resolve_database(&self, database: Option<&str>) -> Result<Arc<Database>> {
        match database.or(self.default_database.as_deref()) {
            Some(name) => self
                .manager
                .database(name)
                .ok_or_else(|| DbError::DatabaseNotFound(name.trim().to_string())),
            None => self
                .manager
                .first_database()
                .ok_or_else(|| DbError::DatabaseNotFound("(no database registered)".into())),
        }
    }
}
