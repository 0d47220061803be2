//! Rows and row types.
//!
//! A table stores values of one row type. Typed application rows implement
//! [`StaticRow`] with a compile-time schema; tables whose schema only exists
//! at runtime (metadata descriptors) store [`DynRow`]s instead. Both paths
//! share the same table operations through the column-level [`Row`] seam.

pub mod schema;
pub mod value;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SchemaError;
use schema::RowSchema;
use value::ColumnValue;

/// Column-level access to a row: everything the table engine and the SQL
/// interpreter need from a stored value.
pub trait Row: Clone + Default + Send + Sync + 'static {
    /// The value of `column`, or [`ColumnValue::Null`] when unset.
    fn get(&self, column: &str) -> ColumnValue;

    /// Stores `value` into `column`.
    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError>;
}

/// A row type whose schema is known at compile time.
///
/// `TYPE_TAG` is the stable identity written into snapshots; it must not
/// change between runs if dumps are to be reloaded.
pub trait StaticRow: Row {
    const TYPE_TAG: &'static str;

    /// The descriptor for this row type. Implementations build it once per
    /// call through [`RowSchema::builder`]; the engine caches it per table.
    fn schema() -> RowSchema;
}

/// A schema-at-runtime row: a plain column-name → value map.
///
/// Tables of `DynRow`s are created through
/// [`DatabaseManager::create_dynamic_table`](crate::db::manager::DatabaseManager::create_dynamic_table)
/// and are transient: the snapshot codec skips them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynRow {
    values: BTreeMap<Box<str>, ColumnValue>,
}

impl DynRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: ColumnValue) -> Self {
        self.values.insert(column.into().into_boxed_str(), value);
        self
    }
}

impl Row for DynRow {
    fn get(&self, column: &str) -> ColumnValue {
        self.values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.clone())
            .unwrap_or(ColumnValue::Null)
    }

    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError> {
        let key = self
            .values
            .keys()
            .find(|name| name.eq_ignore_ascii_case(column))
            .cloned()
            .unwrap_or_else(|| column.into());
        self.values.insert(key, value);
        Ok(())
    }
}

/// A detached, schema-ordered copy of one row's values, used wherever the
/// engine hands rows across the erased-table seam (SQL evaluation, FK
/// checks). Never a live view into table state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCells {
    schema: Arc<RowSchema>,
    values: Vec<ColumnValue>,
}

impl RowCells {
    pub(crate) fn capture<R: Row>(schema: &Arc<RowSchema>, row: &R) -> Self {
        let values = schema.columns().iter().map(|c| row.get(&c.name)).collect();
        Self {
            schema: schema.clone(),
            values,
        }
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    /// The value of `column` (case-insensitive), or `None` when the schema
    /// has no such column.
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.schema.column(column).map(|(i, _)| &self.values[i])
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }
}
