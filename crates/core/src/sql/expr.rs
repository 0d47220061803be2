//! Scalar expressions and their evaluation against a row context.
//!
//! Comparison semantics follow the engine's two-valued collapse of SQL
//! logic: a comparison with `NULL` on either side is `false` (only
//! `IS [NOT] NULL` observes nullness), so boolean operators never see an
//! unknown truth value.

use std::fmt;

use crate::error::{Result, SqlError};
use crate::row::value::{try_compare, values_equal, ColumnValue};

/// A possibly qualified column reference, `alias.col` or `col`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "<>",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ScalarExpr {
    Column(ColumnRef),
    Literal(ColumnValue),
    Cmp {
        op: CmpOp,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
    },
    And(Box<ScalarExpr>, Box<ScalarExpr>),
    Or(Box<ScalarExpr>, Box<ScalarExpr>),
    Not(Box<ScalarExpr>),
    IsNull(Box<ScalarExpr>),
    IsNotNull(Box<ScalarExpr>),
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Column(c) => write!(f, "{c}"),
            ScalarExpr::Literal(v) => write!(f, "{v}"),
            ScalarExpr::Cmp { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            ScalarExpr::And(a, b) => write!(f, "{a} AND {b}"),
            ScalarExpr::Or(a, b) => write!(f, "{a} OR {b}"),
            ScalarExpr::Not(e) => write!(f, "NOT {e}"),
            ScalarExpr::IsNull(e) => write!(f, "{e} IS NULL"),
            ScalarExpr::IsNotNull(e) => write!(f, "{e} IS NOT NULL"),
        }
    }
}

/// Where column references resolve during evaluation.
pub(crate) trait ColumnResolver {
    fn resolve(&self, column: &ColumnRef) -> Result<ColumnValue>;
}

impl ScalarExpr {
    pub(crate) fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            ScalarExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn as_literal(&self) -> Option<&ColumnValue> {
        match self {
            ScalarExpr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Walks the expression, checking every column reference through `f`.
    /// Used to reject unknown columns before an expression is compiled into
    /// an infallible row predicate.
    pub(crate) fn visit_columns(&self, f: &mut dyn FnMut(&ColumnRef) -> Result<()>) -> Result<()> {
        match self {
            ScalarExpr::Column(c) => f(c),
            ScalarExpr::Literal(_) => Ok(()),
            ScalarExpr::Cmp { lhs, rhs, .. } => {
                lhs.visit_columns(f)?;
                rhs.visit_columns(f)
            }
            ScalarExpr::And(a, b) | ScalarExpr::Or(a, b) => {
                a.visit_columns(f)?;
                b.visit_columns(f)
            }
            ScalarExpr::Not(e) | ScalarExpr::IsNull(e) | ScalarExpr::IsNotNull(e) => e.visit_columns(f),
        }
    }

    pub(crate) fn eval(&self, row: &dyn ColumnResolver) -> Result<ColumnValue> {
        Ok(match self {
            ScalarExpr::Column(c) => row.resolve(c)?,
            ScalarExpr::Literal(v) => v.clone(),
            ScalarExpr::Cmp { op, lhs, rhs } => {
                let lhs = lhs.eval(row)?;
                let rhs = rhs.eval(row)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(ColumnValue::Bool(false));
                }
                let outcome = match op {
                    CmpOp::Eq => values_equal(&lhs, &rhs),
                    CmpOp::NotEq => !values_equal(&lhs, &rhs),
                    CmpOp::Lt => try_compare(&lhs, &rhs).is_some_and(|o| o.is_lt()),
                    CmpOp::LtEq => try_compare(&lhs, &rhs).is_some_and(|o| o.is_le()),
                    CmpOp::Gt => try_compare(&lhs, &rhs).is_some_and(|o| o.is_gt()),
                    CmpOp::GtEq => try_compare(&lhs, &rhs).is_some_and(|o| o.is_ge()),
                };
                ColumnValue::Bool(outcome)
            }
            ScalarExpr::And(a, b) => {
                // Short-circuit.
                if !a.matches(row)? {
                    ColumnValue::Bool(false)
                } else {
                    ColumnValue::Bool(b.matches(row)?)
                }
            }
            ScalarExpr::Or(a, b) => {
                if a.matches(row)? {
                    ColumnValue::Bool(true)
                } else {
                    ColumnValue::Bool(b.matches(row)?)
                }
            }
            ScalarExpr::Not(e) => ColumnValue::Bool(!e.matches(row)?),
            ScalarExpr::IsNull(e) => ColumnValue::Bool(e.eval(row)?.is_null()),
            ScalarExpr::IsNotNull(e) => ColumnValue::Bool(!e.eval(row)?.is_null()),
        })
    }

    /// Evaluates the expression as a predicate: only `true` matches.
    pub(crate) fn matches(&self, row: &dyn ColumnResolver) -> Result<bool> {
        Ok(self.eval(row)?.as_bool().unwrap_or(false))
    }

    /// A literal value, failing when the expression is anything else.
    pub(crate) fn literal_or_err(&self) -> Result<ColumnValue> {
        self.as_literal().cloned().ok_or_else(|| {
            SqlError::Unsupported {
                feature: format!("non-literal value `{self}`"),
            }
            .into()
        })
    }
}
