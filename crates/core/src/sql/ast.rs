//! Lowering from the `sqlparser` AST into the interpreter's own statement
//! types.
//!
//! The parser accepts far more SQL than the engine evaluates; everything
//! outside the supported subset is rejected here with a precise
//! "unsupported" error rather than silently ignored.

use sqlparser::ast::{
    Expr as SqlExpr, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName,
    OrderByExpr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::fmt;
use std::str::FromStr;

use crate::error::{DbError, Result, SqlError};
use crate::row::value::ColumnValue;
use crate::sql::expr::{CmpOp, ColumnRef, ScalarExpr};

/// Detects syntax the parser accepts but the engine does not evaluate.
trait Unsupported {
    fn unsupported(&self) -> bool;
}

impl Unsupported for bool {
    fn unsupported(&self) -> bool {
        *self
    }
}

impl<T> Unsupported for Option<T> {
    fn unsupported(&self) -> bool {
        self.is_some()
    }
}

impl<T> Unsupported for Vec<T> {
    fn unsupported(&self) -> bool {
        !self.is_empty()
    }
}

macro_rules! unsupported {
    ($name:literal, $a:expr) => {{
        if Unsupported::unsupported(&$a) {
            return Err(SqlError::Unsupported {
                feature: format!("{} with `{}`", $name, stringify!($a)),
            }
            .into());
        }
    }};
    ($name:literal, $($a:expr),+ $(,)?) => {{
        $(unsupported!($name, $a);)+
    }};
}

/// A table reference with its optional alias, `name [alias]`.
#[derive(Debug, Clone)]
pub(crate) struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Inner,
    Left,
}

/// `[LEFT] JOIN table ON left = right`.
#[derive(Debug, Clone)]
pub(crate) struct JoinAst {
    pub kind: JoinKind,
    pub table: TableRef,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SelectItemAst {
    Expr {
        expr: ScalarExpr,
        alias: Option<String>,
    },
    Aggregate {
        func: AggFunc,
        /// `None` is `COUNT(*)`.
        arg: Option<ScalarExpr>,
        alias: Option<String>,
    },
    Wildcard,
    QualifiedWildcard(String),
}

#[derive(Debug, Clone)]
pub(crate) struct OrderKey {
    pub expr: ScalarExpr,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SelectAst {
    pub from: TableRef,
    pub joins: Vec<JoinAst>,
    pub projection: Vec<SelectItemAst>,
    pub selection: Option<ScalarExpr>,
    pub group_by: Vec<ScalarExpr>,
    pub order_by: Vec<OrderKey>,
}

#[derive(Debug, Clone)]
pub(crate) enum SqlAst {
    Select(SelectAst),
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<ColumnValue>,
    },
    Update {
        table: String,
        assignments: Vec<(String, ColumnValue)>,
        selection: Option<ScalarExpr>,
    },
    Delete {
        table: String,
        selection: Option<ScalarExpr>,
    },
}

/// Parses and lowers one statement. Statements outside
/// SELECT/INSERT/UPDATE/DELETE are rejected before parsing.
pub(crate) fn compile(sql: &str) -> Result<SqlAst> {
    let text = sql.trim().trim_end_matches(';').trim_end();
    if text.is_empty() {
        return Err(DbError::InvalidArgument("empty SQL statement".into()));
    }
    let keyword = text.split_whitespace().next().unwrap_or_default();
    if !["SELECT", "INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
    {
        return Err(SqlError::UnsupportedCommand(keyword.to_string()).into());
    }

    let dialect = PostgreSqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, text).map_err(|error| SqlError::Parse {
        sql: text.to_string(),
        error,
    })?;
    if statements.len() != 1 {
        return Err(SqlError::Unsupported {
            feature: "multiple statements in one call".into(),
        }
        .into());
    }
    compile_statement(statements.remove(0))
}

fn compile_statement(statement: Statement) -> Result<SqlAst> {
    match statement {
        Statement::Query(query) => compile_query(*query),
        Statement::Insert {
            or,
            into,
            table_name,
            columns,
            overwrite,
            source,
            partitioned,
            after_columns,
            table,
            on,
            returning,
        } => {
            unsupported!("INSERT", or, overwrite, partitioned, after_columns, table, on, returning);
            if !into {
                return Err(SqlError::Unsupported {
                    feature: "INSERT without INTO".into(),
                }
                .into());
            }
            compile_insert(table_name, columns, *source)
        }
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            returning,
        } => {
            unsupported!("UPDATE", from, returning, table.joins);
            let table = compile_table_factor(table.relation)?;
            let assignments = assignments
                .into_iter()
                .map(|assign| {
                    let column = assign
                        .id
                        .last()
                        .map(|i| i.value.clone())
                        .ok_or_else(|| SqlError::Malformed("assignment without a column".into()))?;
                    let value = lower_expr(assign.value)?.literal_or_err()?;
                    Ok((column, value))
                })
                .collect::<Result<Vec<_>>>()?;
            let selection = selection.map(lower_expr).transpose()?;
            Ok(SqlAst::Update {
                table: table.name,
                assignments,
                selection,
            })
        }
        Statement::Delete {
            tables,
            from,
            using,
            selection,
            returning,
        } => {
            unsupported!("DELETE", tables, using, returning);
            let mut from = from.into_iter();
            let (Some(target), None) = (from.next(), from.next()) else {
                return Err(SqlError::Unsupported {
                    feature: "DELETE over multiple tables".into(),
                }
                .into());
            };
            unsupported!("DELETE", target.joins);
            let table = compile_table_factor(target.relation)?;
            let selection = selection.map(lower_expr).transpose()?;
            Ok(SqlAst::Delete {
                table: table.name,
                selection,
            })
        }
        x => Err(SqlError::Unsupported {
            feature: format!("syntax `{x}`"),
        }
        .into()),
    }
}

fn compile_query(query: Query) -> Result<SqlAst> {
    let Query {
        with,
        body,
        order_by,
        limit,
        offset,
        fetch,
        locks,
        ..
    } = query;
    unsupported!("SELECT", with, limit, offset, fetch, locks);
    let order_by = order_by
        .into_iter()
        .map(compile_order_key)
        .collect::<Result<Vec<_>>>()?;
    match *body {
        SetExpr::Select(select) => compile_select(*select, order_by),
        x => Err(SqlError::Unsupported {
            feature: format!("query body `{x}`"),
        }
        .into()),
    }
}

fn compile_order_key(key: OrderByExpr) -> Result<OrderKey> {
    unsupported!("ORDER BY", key.nulls_first);
    Ok(OrderKey {
        expr: lower_expr(key.expr)?,
        descending: key.asc == Some(false),
    })
}

fn compile_select(select: Select, order_by: Vec<OrderKey>) -> Result<SqlAst> {
    unsupported!(
        "SELECT",
        select.distinct,
        select.top,
        select.into,
        select.lateral_views,
        select.having,
        select.sort_by,
    );
    let (from, joins) = compile_from(select.from)?;
    let projection = select
        .projection
        .into_iter()
        .map(compile_select_item)
        .collect::<Result<Vec<_>>>()?;
    let selection = select.selection.map(lower_expr).transpose()?;
    let group_by = match select.group_by {
        GroupByExpr::All => {
            return Err(SqlError::Unsupported {
                feature: "GROUP BY ALL".into(),
            }
            .into());
        }
        GroupByExpr::Expressions(exprs) => exprs.into_iter().map(lower_expr).collect::<Result<Vec<_>>>()?,
    };
    Ok(SqlAst::Select(SelectAst {
        from,
        joins,
        projection,
        selection,
        group_by,
        order_by,
    }))
}

fn compile_from(from: Vec<TableWithJoins>) -> Result<(TableRef, Vec<JoinAst>)> {
    let mut from = from.into_iter();
    let Some(root) = from.next() else {
        return Err(SqlError::Malformed("missing FROM clause".into()).into());
    };
    if from.next().is_some() {
        return Err(SqlError::Unsupported {
            feature: "multiple tables in FROM".into(),
        }
        .into());
    }
    let TableWithJoins { relation, joins } = root;
    let table = compile_table_factor(relation)?;
    let joins = joins.into_iter().map(compile_join).collect::<Result<Vec<_>>>()?;
    Ok((table, joins))
}

fn compile_join(join: sqlparser::ast::Join) -> Result<JoinAst> {
    let (kind, constraint) = match join.join_operator {
        JoinOperator::Inner(constraint) => (JoinKind::Inner, constraint),
        JoinOperator::LeftOuter(constraint) => (JoinKind::Left, constraint),
        x => {
            return Err(SqlError::Unsupported {
                feature: format!("JOIN operator `{x:?}`"),
            }
            .into());
        }
    };
    let on = match constraint {
        JoinConstraint::On(expr) => lower_expr(expr)?,
        x => {
            return Err(SqlError::Unsupported {
                feature: format!("JOIN constraint `{x:?}`"),
            }
            .into());
        }
    };
    let join_equality = || SqlError::Unsupported {
        feature: "JOIN condition other than `left = right` on columns".into(),
    };
    let ScalarExpr::Cmp {
        op: CmpOp::Eq,
        lhs,
        rhs,
    } = on
    else {
        return Err(join_equality().into());
    };
    let (Some(left), Some(right)) = (lhs.as_column(), rhs.as_column()) else {
        return Err(join_equality().into());
    };
    Ok(JoinAst {
        kind,
        table: compile_table_factor(join.relation)?,
        left: left.clone(),
        right: right.clone(),
    })
}

fn compile_table_factor(factor: TableFactor) -> Result<TableRef> {
    match factor {
        TableFactor::Table {
            name,
            alias,
            args,
            with_hints,
            version,
            partitions,
        } => {
            unsupported!("table reference", args, with_hints, version, partitions);
            let alias = match alias {
                None => None,
                Some(alias) => {
                    unsupported!("table alias", alias.columns);
                    Some(alias.name.value)
                }
            };
            Ok(TableRef {
                name: object_name(&name),
                alias,
            })
        }
        x => Err(SqlError::Unsupported {
            feature: format!("table reference `{x}`"),
        }
        .into()),
    }
}

fn compile_select_item(item: SelectItem) -> Result<SelectItemAst> {
    match item {
        SelectItem::UnnamedExpr(expr) => compile_item_expr(expr, None),
        SelectItem::ExprWithAlias { expr, alias } => compile_item_expr(expr, Some(alias.value)),
        SelectItem::QualifiedWildcard(name, _) => Ok(SelectItemAst::QualifiedWildcard(object_name(&name))),
        SelectItem::Wildcard(_) => Ok(SelectItemAst::Wildcard),
    }
}

fn compile_item_expr(expr: SqlExpr, alias: Option<String>) -> Result<SelectItemAst> {
    if let SqlExpr::Function(func) = expr {
        unsupported!("aggregate", func.over);
        if func.distinct {
            return Err(SqlError::Unsupported {
                feature: "aggregate with `DISTINCT`".into(),
            }
            .into());
        }
        let name = object_name(&func.name).to_uppercase();
        let agg = match name.as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "AVG" => AggFunc::Avg,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            other => {
                return Err(SqlError::Unsupported {
                    feature: format!("function `{other}`"),
                }
                .into());
            }
        };
        let mut args = func.args;
        if args.len() != 1 {
            return Err(SqlError::Malformed(format!("{agg} takes exactly one argument")).into());
        }
        let arg = match args.remove(0) {
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                if agg != AggFunc::Count {
                    return Err(SqlError::Malformed(format!("{agg}(*) is not defined")).into());
                }
                None
            }
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(lower_expr(expr)?),
            x => {
                return Err(SqlError::Unsupported {
                    feature: format!("aggregate argument `{x}`"),
                }
                .into());
            }
        };
        return Ok(SelectItemAst::Aggregate { func: agg, arg, alias });
    }
    Ok(SelectItemAst::Expr {
        expr: lower_expr(expr)?,
        alias,
    })
}

fn lower_expr(expr: SqlExpr) -> Result<ScalarExpr> {
    use sqlparser::ast::BinaryOperator as Op;
    Ok(match expr {
        SqlExpr::Identifier(ident) => ScalarExpr::Column(ColumnRef {
            qualifier: None,
            name: ident.value,
        }),
        SqlExpr::CompoundIdentifier(parts) => {
            let mut parts: Vec<Ident> = parts;
            if parts.len() != 2 {
                return Err(SqlError::Unsupported {
                    feature: "identifiers with more than one qualifier".into(),
                }
                .into());
            }
            let name = parts.pop().map(|i| i.value).unwrap_or_default();
            let qualifier = parts.pop().map(|i| i.value);
            ScalarExpr::Column(ColumnRef { qualifier, name })
        }
        SqlExpr::Value(value) => ScalarExpr::Literal(lower_value(value)?),
        SqlExpr::BinaryOp { left, op, right } => {
            let lhs = Box::new(lower_expr(*left)?);
            let rhs = Box::new(lower_expr(*right)?);
            let cmp = match op {
                Op::And => return Ok(ScalarExpr::And(lhs, rhs)),
                Op::Or => return Ok(ScalarExpr::Or(lhs, rhs)),
                Op::Eq => CmpOp::Eq,
                Op::NotEq => CmpOp::NotEq,
                Op::Lt => CmpOp::Lt,
                Op::LtEq => CmpOp::LtEq,
                Op::Gt => CmpOp::Gt,
                Op::GtEq => CmpOp::GtEq,
                x => {
                    return Err(SqlError::Unsupported {
                        feature: format!("operator `{x}`"),
                    }
                    .into());
                }
            };
            ScalarExpr::Cmp { op: cmp, lhs, rhs }
        }
        SqlExpr::Nested(inner) => lower_expr(*inner)?,
        SqlExpr::IsNull(inner) => ScalarExpr::IsNull(Box::new(lower_expr(*inner)?)),
        SqlExpr::IsNotNull(inner) => ScalarExpr::IsNotNull(Box::new(lower_expr(*inner)?)),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => ScalarExpr::Not(Box::new(lower_expr(*expr)?)),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match lower_expr(*expr)? {
            ScalarExpr::Literal(ColumnValue::I64(v)) => ScalarExpr::Literal(ColumnValue::I64(-v)),
            ScalarExpr::Literal(ColumnValue::Decimal(v)) => ScalarExpr::Literal(ColumnValue::Decimal(-v)),
            x => {
                return Err(SqlError::Unsupported {
                    feature: format!("negation of `{x}`"),
                }
                .into());
            }
        },
        x => {
            return Err(SqlError::Unsupported {
                feature: format!("expression `{x}`"),
            }
            .into());
        }
    })
}

fn lower_value(value: Value) -> Result<ColumnValue> {
    Ok(match value {
        Value::Number(text, _) => {
            if text.contains(['e', 'E']) {
                ColumnValue::Decimal(
                    rust_decimal::Decimal::from_scientific(&text)
                        .map_err(|_| SqlError::Malformed(format!("bad numeric literal `{text}`")))?,
                )
            } else if text.contains('.') {
                ColumnValue::Decimal(
                    rust_decimal::Decimal::from_str(&text)
                        .map_err(|_| SqlError::Malformed(format!("bad numeric literal `{text}`")))?,
                )
            } else {
                ColumnValue::I64(
                    text.parse()
                        .map_err(|_| SqlError::Malformed(format!("bad numeric literal `{text}`")))?,
                )
            }
        }
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => ColumnValue::String(s),
        Value::Boolean(b) => ColumnValue::Bool(b),
        Value::Null => ColumnValue::Null,
        x => {
            return Err(SqlError::Unsupported {
                feature: format!("literal `{x}`"),
            }
            .into());
        }
    })
}

fn compile_insert(table_name: ObjectName, columns: Vec<Ident>, source: Query) -> Result<SqlAst> {
    let values = match *source.body {
        SetExpr::Values(values) => values,
        _ => {
            return Err(SqlError::Unsupported {
                feature: "INSERT without a VALUES list".into(),
            }
            .into());
        }
    };
    if columns.is_empty() {
        return Err(SqlError::Malformed("INSERT requires an explicit column list".into()).into());
    }
    let mut rows = values.rows;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported {
            feature: "INSERT with multiple VALUES rows".into(),
        }
        .into());
    }
    let row = rows.remove(0);
    if row.len() != columns.len() {
        return Err(SqlError::Malformed("column count does not match value count".into()).into());
    }
    let values = row
        .into_iter()
        .map(|expr| lower_expr(expr)?.literal_or_err())
        .collect::<Result<Vec<_>>>()?;
    Ok(SqlAst::Insert {
        table: object_name(&table_name),
        columns: columns.into_iter().map(|i| i.value).collect(),
        values,
    })
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}
