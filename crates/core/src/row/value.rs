//! The value model shared by every table: a closed set of logical column
//! types and a tagged runtime value.
//!
//! The set deliberately contains no floating-point type, so [`ColumnValue`]
//! is `Eq + Hash` and any column value can serve as a primary-key index key.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// The logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    I32,
    I64,
    Decimal,
    Bool,
    DateTime,
    String,
    Uuid,
    Bytes,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::I32 => "integer",
            LogicalType::I64 => "long",
            LogicalType::Decimal => "decimal",
            LogicalType::Bool => "bool",
            LogicalType::DateTime => "datetime",
            LogicalType::String => "string",
            LogicalType::Uuid => "uuid",
            LogicalType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A single runtime column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnValue {
    Null,
    I32(i32),
    I64(i64),
    Decimal(Decimal),
    Bool(bool),
    DateTime(DateTime<Utc>),
    String(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl Default for ColumnValue {
    fn default() -> Self {
        ColumnValue::Null
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("NULL"),
            ColumnValue::I32(v) => write!(f, "{v}"),
            ColumnValue::I64(v) => write!(f, "{v}"),
            ColumnValue::Decimal(v) => write!(f, "{v}"),
            ColumnValue::Bool(v) => write!(f, "{v}"),
            ColumnValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            ColumnValue::String(v) => write!(f, "'{v}'"),
            ColumnValue::Uuid(v) => write!(f, "{v}"),
            ColumnValue::Bytes(v) => write!(f, "{}", BASE64.encode(v)),
        }
    }
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// `Null`, or the empty string: the states a required column rejects.
    pub fn is_absent(&self) -> bool {
        match self {
            ColumnValue::Null => true,
            ColumnValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn logical_type(&self) -> Option<LogicalType> {
        Some(match self {
            ColumnValue::Null => return None,
            ColumnValue::I32(_) => LogicalType::I32,
            ColumnValue::I64(_) => LogicalType::I64,
            ColumnValue::Decimal(_) => LogicalType::Decimal,
            ColumnValue::Bool(_) => LogicalType::Bool,
            ColumnValue::DateTime(_) => LogicalType::DateTime,
            ColumnValue::String(_) => LogicalType::String,
            ColumnValue::Uuid(_) => LogicalType::Uuid,
            ColumnValue::Bytes(_) => LogicalType::Bytes,
        })
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ColumnValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::I32(v) => Some(i64::from(*v)),
            ColumnValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            ColumnValue::I32(v) => Some(Decimal::from(*v)),
            ColumnValue::I64(v) => Some(Decimal::from(*v)),
            ColumnValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ColumnValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            ColumnValue::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ColumnValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// The JSON form used by the snapshot codec.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ColumnValue::Null => JsonValue::Null,
            ColumnValue::I32(v) => JsonValue::from(*v),
            ColumnValue::I64(v) => JsonValue::from(*v),
            ColumnValue::Decimal(v) => JsonValue::from(v.to_string()),
            ColumnValue::Bool(v) => JsonValue::from(*v),
            ColumnValue::DateTime(v) => JsonValue::from(v.to_rfc3339()),
            ColumnValue::String(v) => JsonValue::from(v.clone()),
            ColumnValue::Uuid(v) => JsonValue::from(v.to_string()),
            ColumnValue::Bytes(v) => JsonValue::from(BASE64.encode(v)),
        }
    }

    /// Reads a value of logical type `ty` back out of its JSON form.
    pub fn from_json(ty: LogicalType, value: &JsonValue) -> Result<ColumnValue, String> {
        if value.is_null() {
            return Ok(ColumnValue::Null);
        }
        let mismatch = || format!("expected {ty}, found `{value}`");
        Ok(match ty {
            LogicalType::I32 => {
                let n = value.as_i64().ok_or_else(mismatch)?;
                ColumnValue::I32(i32::try_from(n).map_err(|_| mismatch())?)
            }
            LogicalType::I64 => ColumnValue::I64(value.as_i64().ok_or_else(mismatch)?),
            LogicalType::Decimal => {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => n.to_string(),
                    _ => return Err(mismatch()),
                };
                ColumnValue::Decimal(Decimal::from_str(&text).map_err(|_| mismatch())?)
            }
            LogicalType::Bool => ColumnValue::Bool(value.as_bool().ok_or_else(mismatch)?),
            LogicalType::DateTime => {
                let s = value.as_str().ok_or_else(mismatch)?;
                ColumnValue::DateTime(parse_datetime(s).ok_or_else(mismatch)?)
            }
            LogicalType::String => ColumnValue::String(value.as_str().ok_or_else(mismatch)?.to_owned()),
            LogicalType::Uuid => {
                let s = value.as_str().ok_or_else(mismatch)?;
                ColumnValue::Uuid(Uuid::parse_str(s).map_err(|_| mismatch())?)
            }
            LogicalType::Bytes => {
                let s = value.as_str().ok_or_else(mismatch)?;
                ColumnValue::Bytes(BASE64.decode(s).map_err(|_| mismatch())?)
            }
        })
    }

    /// Converts `self` into logical type `ty`, the conversion applied to SQL
    /// literals before they reach a typed column. `Null` passes through.
    pub fn coerce_to(self, ty: LogicalType) -> Result<ColumnValue, String> {
        if self.is_null() {
            return Ok(ColumnValue::Null);
        }
        if self.logical_type() == Some(ty) {
            return Ok(self);
        }
        let mismatch = |v: &ColumnValue| format!("cannot convert {v} to {ty}");
        Ok(match (ty, &self) {
            (LogicalType::I32, ColumnValue::String(s)) => {
                ColumnValue::I32(s.trim().parse().map_err(|_| mismatch(&self))?)
            }
            (LogicalType::I64, ColumnValue::String(s)) => {
                ColumnValue::I64(s.trim().parse().map_err(|_| mismatch(&self))?)
            }
            (LogicalType::Decimal, ColumnValue::String(s)) => {
                ColumnValue::Decimal(Decimal::from_str(s.trim()).map_err(|_| mismatch(&self))?)
            }
            (LogicalType::Bool, ColumnValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => ColumnValue::Bool(true),
                "false" | "0" => ColumnValue::Bool(false),
                _ => return Err(mismatch(&self)),
            },
            (LogicalType::I32, v) => {
                let n = v.as_i64().ok_or_else(|| mismatch(v))?;
                ColumnValue::I32(i32::try_from(n).map_err(|_| mismatch(v))?)
            }
            (LogicalType::I64, v) => ColumnValue::I64(v.as_i64().ok_or_else(|| mismatch(v))?),
            (LogicalType::Decimal, v) => ColumnValue::Decimal(v.as_decimal().ok_or_else(|| mismatch(v))?),
            (LogicalType::DateTime, ColumnValue::String(s)) => {
                ColumnValue::DateTime(parse_datetime(s).ok_or_else(|| mismatch(&self))?)
            }
            (LogicalType::Uuid, ColumnValue::String(s)) => {
                ColumnValue::Uuid(Uuid::parse_str(s).map_err(|_| mismatch(&self))?)
            }
            (LogicalType::Bytes, ColumnValue::String(s)) => {
                ColumnValue::Bytes(BASE64.decode(s).map_err(|_| mismatch(&self))?)
            }
            (_, v) => return Err(mismatch(v)),
        })
    }
}

/// Parses an ISO-8601 / RFC 3339 date or datetime, assuming UTC when the
/// text carries no offset.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Compares two values, coercing across the numeric family and parsing
/// strings against datetime/uuid/decimal peers. `None` when either side is
/// `Null` or the types are incomparable.
pub fn try_compare(a: &ColumnValue, b: &ColumnValue) -> Option<Ordering> {
    use ColumnValue::*;
    match (a, b) {
        (Null, _) | (_, Null) => None,
        (I32(x), I32(y)) => Some(x.cmp(y)),
        (I64(x), I64(y)) => Some(x.cmp(y)),
        (Decimal(x), Decimal(y)) => Some(x.cmp(y)),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (DateTime(x), DateTime(y)) => Some(x.cmp(y)),
        (String(x), String(y)) => Some(x.as_str().cmp(y.as_str())),
        (Uuid(x), Uuid(y)) => Some(x.cmp(y)),
        (Bytes(x), Bytes(y)) => Some(x.cmp(y)),
        (String(s), DateTime(d)) => parse_datetime(s).map(|x| x.cmp(d)),
        (DateTime(d), String(s)) => parse_datetime(s).map(|x| d.cmp(&x)),
        (String(s), Uuid(u)) => uuid::Uuid::parse_str(s).ok().map(|x| x.cmp(u)),
        (Uuid(u), String(s)) => uuid::Uuid::parse_str(s).ok().map(|x| u.cmp(&x)),
        (String(s), other @ (I32(_) | I64(_) | Decimal(_))) => {
            let parsed = rust_decimal::Decimal::from_str(s).ok()?;
            Some(parsed.cmp(&other.as_decimal()?))
        }
        (other @ (I32(_) | I64(_) | Decimal(_)), String(s)) => {
            let parsed = rust_decimal::Decimal::from_str(s).ok()?;
            Some(other.as_decimal()?.cmp(&parsed))
        }
        (x, y) => {
            let (x, y) = (x.as_decimal()?, y.as_decimal()?);
            Some(x.cmp(&y))
        }
    }
}

/// Equality under the same coercions as [`try_compare`]. `Null` never equals
/// anything, including `Null`.
pub fn values_equal(a: &ColumnValue, b: &ColumnValue) -> bool {
    try_compare(a, b) == Some(Ordering::Equal)
}

/// A total order for ORDER BY: `Null` sorts before every other value, and
/// incomparable values fall back to a stable type-rank comparison.
pub fn sort_compare(a: &ColumnValue, b: &ColumnValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    try_compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(v: &ColumnValue) -> u8 {
    match v {
        ColumnValue::Null => 0,
        ColumnValue::Bool(_) => 1,
        ColumnValue::I32(_) | ColumnValue::I64(_) | ColumnValue::Decimal(_) => 2,
        ColumnValue::DateTime(_) => 3,
        ColumnValue::String(_) => 4,
        ColumnValue::Uuid(_) => 5,
        ColumnValue::Bytes(_) => 6,
    }
}
