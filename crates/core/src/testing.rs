//! Shared row types and fixtures for the crate's tests.

use rust_decimal::Decimal;

use crate::error::SchemaError;
use crate::row::schema::RowSchema;
use crate::row::value::{ColumnValue, LogicalType};
use crate::row::{Row, StaticRow};

fn take_i32(value: ColumnValue) -> i32 {
    value.as_i32().unwrap_or(0)
}

fn take_string(value: ColumnValue) -> String {
    match value {
        ColumnValue::String(s) => s,
        _ => String::new(),
    }
}

fn take_decimal(value: ColumnValue) -> Decimal {
    value.as_decimal().unwrap_or(Decimal::ZERO)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Customer {
    pub id: i32,
    pub name: String,
    pub region: String,
}

impl Row for Customer {
    fn get(&self, column: &str) -> ColumnValue {
        if column.eq_ignore_ascii_case("Id") {
            ColumnValue::I32(self.id)
        } else if column.eq_ignore_ascii_case("Name") {
            ColumnValue::String(self.name.clone())
        } else if column.eq_ignore_ascii_case("Region") {
            ColumnValue::String(self.region.clone())
        } else {
            ColumnValue::Null
        }
    }

    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError> {
        if column.eq_ignore_ascii_case("Id") {
            self.id = take_i32(value);
        } else if column.eq_ignore_ascii_case("Name") {
            self.name = take_string(value);
        } else if column.eq_ignore_ascii_case("Region") {
            self.region = take_string(value);
        } else {
            return Err(SchemaError::NoSuchColumn(column.to_string()));
        }
        Ok(())
    }
}

impl StaticRow for Customer {
    const TYPE_TAG: &'static str = "Customer";

    fn schema() -> RowSchema {
        RowSchema::builder(Self::TYPE_TAG)
            .column("Id", LogicalType::I32)
            .primary_key()
            .auto_inc()
            .column("Name", LogicalType::String)
            .required()
            .column("Region", LogicalType::String)
            .build()
            .expect("static schema")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Order {
    pub id: i32,
    pub customer_id: i32,
    pub status: String,
    pub total: Decimal,
}

impl Row for Order {
    fn get(&self, column: &str) -> ColumnValue {
        if column.eq_ignore_ascii_case("Id") {
            ColumnValue::I32(self.id)
        } else if column.eq_ignore_ascii_case("CustomerId") {
            ColumnValue::I32(self.customer_id)
        } else if column.eq_ignore_ascii_case("Status") {
            ColumnValue::String(self.status.clone())
        } else if column.eq_ignore_ascii_case("Total") {
            ColumnValue::Decimal(self.total)
        } else {
            ColumnValue::Null
        }
    }

    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError> {
        if column.eq_ignore_ascii_case("Id") {
            self.id = take_i32(value);
        } else if column.eq_ignore_ascii_case("CustomerId") {
            self.customer_id = take_i32(value);
        } else if column.eq_ignore_ascii_case("Status") {
            self.status = take_string(value);
        } else if column.eq_ignore_ascii_case("Total") {
            self.total = take_decimal(value);
        } else {
            return Err(SchemaError::NoSuchColumn(column.to_string()));
        }
        Ok(())
    }
}

impl StaticRow for Order {
    const TYPE_TAG: &'static str = "Order";

    fn schema() -> RowSchema {
        RowSchema::builder(Self::TYPE_TAG)
            .column("Id", LogicalType::I32)
            .primary_key()
            .auto_inc()
            .column("CustomerId", LogicalType::I32)
            .references(Customer::TYPE_TAG)
            .column("Status", LogicalType::String)
            .required()
            .column("Total", LogicalType::Decimal)
            .build()
            .expect("static schema")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Parent {
    pub id: i32,
    pub name: String,
}

impl Row for Parent {
    fn get(&self, column: &str) -> ColumnValue {
        if column.eq_ignore_ascii_case("Id") {
            ColumnValue::I32(self.id)
        } else if column.eq_ignore_ascii_case("Name") {
            ColumnValue::String(self.name.clone())
        } else {
            ColumnValue::Null
        }
    }

    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError> {
        if column.eq_ignore_ascii_case("Id") {
            self.id = take_i32(value);
        } else if column.eq_ignore_ascii_case("Name") {
            self.name = take_string(value);
        } else {
            return Err(SchemaError::NoSuchColumn(column.to_string()));
        }
        Ok(())
    }
}

impl StaticRow for Parent {
    const TYPE_TAG: &'static str = "Parent";

    fn schema() -> RowSchema {
        RowSchema::builder(Self::TYPE_TAG)
            .column("Id", LogicalType::I32)
            .primary_key()
            .auto_inc()
            .column("Name", LogicalType::String)
            .build()
            .expect("static schema")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Child {
    pub id: i32,
    pub parent_id: i32,
    pub name: String,
}

impl Row for Child {
    fn get(&self, column: &str) -> ColumnValue {
        if column.eq_ignore_ascii_case("Id") {
            ColumnValue::I32(self.id)
        } else if column.eq_ignore_ascii_case("ParentId") {
            ColumnValue::I32(self.parent_id)
        } else if column.eq_ignore_ascii_case("Name") {
            ColumnValue::String(self.name.clone())
        } else {
            ColumnValue::Null
        }
    }

    fn set(&mut self, column: &str, value: ColumnValue) -> Result<(), SchemaError> {
        if column.eq_ignore_ascii_case("Id") {
            self.id = take_i32(value);
        } else if column.eq_ignore_ascii_case("ParentId") {
            self.parent_id = take_i32(value);
        } else if column.eq_ignore_ascii_case("Name") {
            self.name = take_string(value);
        } else {
            return Err(SchemaError::NoSuchColumn(column.to_string()));
        }
        Ok(())
    }
}

impl StaticRow for Child {
    const TYPE_TAG: &'static str = "Child";

    fn schema() -> RowSchema {
        RowSchema::builder(Self::TYPE_TAG)
            .column("Id", LogicalType::I32)
            .primary_key()
            .auto_inc()
            .column("ParentId", LogicalType::I32)
            .references(Parent::TYPE_TAG)
            .column("Name", LogicalType::String)
            .build()
            .expect("static schema")
    }
}
