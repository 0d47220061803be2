//! Row schema descriptors: the per-row-type column metadata every table is
//! built from. A descriptor is validated once at construction and immutable
//! afterwards; tables share it behind an `Arc`.

use crate::error::SchemaError;
use crate::row::value::LogicalType;

/// Attribute flags of a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnAttrs {
    pub primary_key: bool,
    pub auto_inc: bool,
    pub required: bool,
    /// Row-type tag of the referenced table, when this is a foreign key.
    pub foreign_key: Option<Box<str>>,
}

/// A single column of a row type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Box<str>,
    pub ty: LogicalType,
    pub attrs: ColumnAttrs,
}

/// The validated descriptor of one row type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    type_tag: Box<str>,
    columns: Vec<ColumnDef>,
    primary_key: Option<usize>,
}

impl RowSchema {
    pub fn builder(type_tag: impl Into<String>) -> RowSchemaBuilder {
        RowSchemaBuilder {
            type_tag: type_tag.into(),
            columns: Vec::new(),
            deferred: None,
        }
    }

    /// The opaque tag written into snapshots to identify this row type.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Finds a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name.eq_ignore_ascii_case(name))
    }

    /// The primary-key column, if the row type declares one.
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.primary_key.map(|i| &self.columns[i])
    }

    pub fn has_auto_inc(&self) -> bool {
        self.primary_key().is_some_and(|c| c.attrs.auto_inc)
    }

    /// The foreign-key columns of this row type: `(column, referenced tag)`.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.attrs.foreign_key.as_deref().map(|target| (c, target)))
    }
}

/// Chained construction of a [`RowSchema`]; attribute methods apply to the
/// most recently declared column.
pub struct RowSchemaBuilder {
    type_tag: String,
    columns: Vec<ColumnDef>,
    deferred: Option<SchemaError>,
}

impl RowSchemaBuilder {
    pub fn column(mut self, name: impl Into<String>, ty: LogicalType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into().into_boxed_str(),
            ty,
            attrs: ColumnAttrs::default(),
        });
        self
    }

    fn last_attrs(&mut self, attr: &'static str) -> Option<&mut ColumnAttrs> {
        if self.columns.is_empty() && self.deferred.is_none() {
            self.deferred = Some(SchemaError::AttributeWithoutColumn { attr });
        }
        self.columns.last_mut().map(|c| &mut c.attrs)
    }

    pub fn primary_key(mut self) -> Self {
        if let Some(attrs) = self.last_attrs("primary_key") {
            attrs.primary_key = true;
        }
        self
    }

    pub fn auto_inc(mut self) -> Self {
        if let Some(attrs) = self.last_attrs("auto_inc") {
            attrs.auto_inc = true;
        }
        self
    }

    pub fn required(mut self) -> Self {
        if let Some(attrs) = self.last_attrs("required") {
            attrs.required = true;
        }
        self
    }

    pub fn references(mut self, target_tag: impl Into<String>) -> Self {
        if let Some(attrs) = self.last_attrs("references") {
            attrs.foreign_key = Some(target_tag.into().into_boxed_str());
        }
        self
    }

    pub fn build(self) -> Result<RowSchema, SchemaError> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        let tag = self.type_tag;
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name.eq_ignore_ascii_case(&col.name)) {
                return Err(SchemaError::DuplicateColumn(col.name.to_string()));
            }
            if let Some(target) = &col.attrs.foreign_key {
                if target.trim().is_empty() {
                    return Err(SchemaError::MissingForeignKeyTarget(col.name.to_string()));
                }
            }
        }
        let mut primary_key = None;
        for (i, col) in self.columns.iter().enumerate() {
            if col.attrs.primary_key {
                if primary_key.replace(i).is_some() {
                    return Err(SchemaError::MultiplePrimaryKeys(tag));
                }
            }
        }
        let mut auto_inc = None;
        for (i, col) in self.columns.iter().enumerate() {
            if col.attrs.auto_inc {
                if auto_inc.replace(i).is_some() {
                    return Err(SchemaError::MultipleAutoIncrement(tag));
                }
            }
        }
        if let Some(i) = auto_inc {
            let col = &self.columns[i];
            if primary_key != Some(i) {
                return Err(SchemaError::AutoIncrementNotPrimaryKey(col.name.to_string()));
            }
            if col.ty != LogicalType::I32 {
                return Err(SchemaError::AutoIncrementNotInteger {
                    column: col.name.to_string(),
                    found: col.ty,
                });
            }
        }
        Ok(RowSchema {
            type_tag: tag.into_boxed_str(),
            columns: self.columns,
            primary_key,
        })
    }
}
