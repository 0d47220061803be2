//! Statement evaluation against a database's tables.
//!
//! SELECT builds a sequence of row contexts from the FROM table, folds each
//! JOIN in order through a hash lookup on the join key, filters with WHERE,
//! buckets for GROUP BY, projects, and finally sorts. DML statements compile
//! their WHERE clause into a row predicate and go through the same table
//! operations as the typed API, so every integrity check applies.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::db::database::Database;
use crate::db::table::AnyTable;
use crate::error::{DbError, Result, SqlError, TableError};
use crate::row::schema::RowSchema;
use crate::row::value::{sort_compare, try_compare, ColumnValue};
use crate::row::RowCells;
use crate::sql::ast::{AggFunc, JoinAst, JoinKind, SelectAst, SelectItemAst, SqlAst};
use crate::sql::expr::{ColumnRef, ColumnResolver, ScalarExpr};
use crate::sql::{SqlResult, SqlRow};

pub(crate) fn execute(db: &Database, ast: SqlAst) -> Result<SqlResult> {
    match ast {
        SqlAst::Select(select) => execute_select(db, select),
        SqlAst::Insert {
            table,
            columns,
            values,
        } => execute_insert(db, &table, &columns, values),
        SqlAst::Update {
            table,
            assignments,
            selection,
        } => execute_update(db, &table, assignments, selection),
        SqlAst::Delete { table, selection } => execute_delete(db, &table, selection),
    }
}

fn resolve_table(db: &Database, name: &str) -> Result<Arc<dyn AnyTable>> {
    db.any_table(name)
        .ok_or_else(|| TableError::NotFound(name.trim().to_string()).into())
}

/// One table's binding inside a row context: its alias, its schema, and the
/// row (`None` for the unmatched side of a LEFT JOIN).
#[derive(Clone)]
struct Slot {
    alias: String,
    schema: Arc<RowSchema>,
    cells: Option<RowCells>,
}

impl Slot {
    fn value_of(&self, column: &str) -> ColumnValue {
        self.cells
            .as_ref()
            .and_then(|cells| cells.get(column).cloned())
            .unwrap_or(ColumnValue::Null)
    }
}

/// The per-row environment identifiers resolve against.
#[derive(Clone)]
struct Ctx {
    slots: Vec<Slot>,
}

impl ColumnResolver for Ctx {
    fn resolve(&self, column: &ColumnRef) -> Result<ColumnValue> {
        match &column.qualifier {
            Some(qualifier) => {
                let slot = self
                    .slots
                    .iter()
                    .find(|s| s.alias.eq_ignore_ascii_case(qualifier))
                    .ok_or_else(|| DbError::from(SqlError::UnknownAlias(qualifier.clone())))?;
                if slot.schema.column(&column.name).is_none() {
                    return Err(SqlError::UnknownColumn(column.to_string()).into());
                }
                Ok(slot.value_of(&column.name))
            }
            None => self
                .slots
                .iter()
                .find(|s| s.schema.column(&column.name).is_some())
                .map(|s| s.value_of(&column.name))
                .ok_or_else(|| SqlError::UnknownColumn(column.name.clone()).into()),
        }
    }
}

fn execute_select(db: &Database, select: SelectAst) -> Result<SqlResult> {
    let root = resolve_table(db, &select.from.name)?;
    let root_alias = select
        .from
        .alias
        .clone()
        .unwrap_or_else(|| root.table_name().to_string());
    let root_schema = root.schema_ref().clone();

    // An all-tables context with no rows bound; the projection environment
    // when aggregating over an empty input.
    let mut template = Ctx {
        slots: vec![Slot {
            alias: root_alias.clone(),
            schema: root_schema.clone(),
            cells: None,
        }],
    };
    for join in &select.joins {
        let table = resolve_table(db, &join.table.name)?;
        template.slots.push(Slot {
            alias: join
                .table
                .alias
                .clone()
                .unwrap_or_else(|| table.table_name().to_string()),
            schema: table.schema_ref().clone(),
            cells: None,
        });
    }

    let mut ctxs: Vec<Ctx> = root
        .scan()
        .into_iter()
        .map(|cells| Ctx {
            slots: vec![Slot {
                alias: root_alias.clone(),
                schema: root_schema.clone(),
                cells: Some(cells),
            }],
        })
        .collect();

    for join in &select.joins {
        ctxs = apply_join(db, ctxs, join)?;
    }

    if let Some(selection) = &select.selection {
        let mut filtered = Vec::with_capacity(ctxs.len());
        for ctx in ctxs {
            if selection.matches(&ctx)? {
                filtered.push(ctx);
            }
        }
        ctxs = filtered;
    }

    let has_aggregates = select
        .projection
        .iter()
        .any(|item| matches!(item, SelectItemAst::Aggregate { .. }));

    let mut projected: Vec<(SqlRow, Ctx)> = Vec::new();
    if !select.group_by.is_empty() || has_aggregates {
        let mut buckets: IndexMap<Vec<ColumnValue>, Vec<Ctx>> = IndexMap::new();
        for ctx in ctxs {
            let mut key = Vec::with_capacity(select.group_by.len());
            for expr in &select.group_by {
                key.push(expr.eval(&ctx)?);
            }
            buckets.entry(key).or_default().push(ctx);
        }
        if buckets.is_empty() && select.group_by.is_empty() {
            let row = project_row(&select.projection, &template, &[])?;
            projected.push((row, template));
        }
        for (_, group) in buckets {
            let representative = group[0].clone();
            let row = project_row(&select.projection, &representative, &group)?;
            projected.push((row, representative));
        }
    } else {
        for ctx in ctxs {
            let row = project_row(&select.projection, &ctx, std::slice::from_ref(&ctx))?;
            projected.push((row, ctx));
        }
    }

    if !select.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(projected.len());
        for (row, ctx) in projected {
            let mut keys = Vec::with_capacity(select.order_by.len());
            for key in &select.order_by {
                keys.push(order_value(&key.expr, &row, &ctx)?);
            }
            keyed.push((keys, row));
        }
        keyed.sort_by(|a, b| {
            for (i, key) in select.order_by.iter().enumerate() {
                let ord = sort_compare(&a.0[i], &b.0[i]);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        return Ok(SqlResult::query(keyed.into_iter().map(|(_, row)| row).collect()));
    }

    Ok(SqlResult::query(projected.into_iter().map(|(row, _)| row).collect()))
}

fn apply_join(db: &Database, ctxs: Vec<Ctx>, join: &JoinAst) -> Result<Vec<Ctx>> {
    let right = resolve_table(db, &join.table.name)?;
    let right_alias = join
        .table
        .alias
        .clone()
        .unwrap_or_else(|| right.table_name().to_string());
    let right_schema = right.schema_ref().clone();

    // Orient the ON equality: one side names the joined table, the other
    // the accumulated context.
    let names_right = |col: &ColumnRef| match &col.qualifier {
        Some(q) => q.eq_ignore_ascii_case(&right_alias),
        None => right_schema.column(&col.name).is_some(),
    };
    let (left_key, right_key) = if names_right(&join.right) || !names_right(&join.left) {
        (&join.left, &join.right)
    } else {
        (&join.right, &join.left)
    };
    if !names_right(right_key) {
        return Err(SqlError::UnknownColumn(right_key.to_string()).into());
    }

    let mut lookup: HashMap<ColumnValue, Vec<RowCells>> = HashMap::new();
    for cells in right.scan() {
        let Some(value) = cells.get(&right_key.name).cloned() else {
            return Err(SqlError::UnknownColumn(right_key.to_string()).into());
        };
        if value.is_null() {
            continue;
        }
        lookup.entry(value).or_default().push(cells);
    }

    let mut joined = Vec::new();
    for ctx in ctxs {
        let left_value = ctx.resolve(left_key)?;
        let matches = if left_value.is_null() {
            None
        } else {
            lookup.get(&left_value)
        };
        match matches {
            Some(rows) => {
                for cells in rows {
                    let mut next = ctx.clone();
                    next.slots.push(Slot {
                        alias: right_alias.clone(),
                        schema: right_schema.clone(),
                        cells: Some(cells.clone()),
                    });
                    joined.push(next);
                }
            }
            None if join.kind == JoinKind::Left => {
                let mut next = ctx;
                next.slots.push(Slot {
                    alias: right_alias.clone(),
                    schema: right_schema.clone(),
                    cells: None,
                });
                joined.push(next);
            }
            None => {}
        }
    }
    Ok(joined)
}

fn project_row(projection: &[SelectItemAst], ctx: &Ctx, group: &[Ctx]) -> Result<SqlRow> {
    let mut row = SqlRow::new();
    for item in projection {
        match item {
            SelectItemAst::Expr { expr, alias } => {
                let name = alias.clone().unwrap_or_else(|| match expr.as_column() {
                    Some(col) => col.name.clone(),
                    None => expr.to_string(),
                });
                row.insert(name, expr.eval(ctx)?);
            }
            SelectItemAst::Aggregate { func, arg, alias } => {
                let name = alias
                    .clone()
                    .unwrap_or_else(|| match arg {
                        Some(expr) => format!("{func}({expr})"),
                        None => format!("{func}(*)"),
                    });
                row.insert(name, eval_aggregate(*func, arg.as_ref(), group)?);
            }
            SelectItemAst::Wildcard => {
                let qualify = ctx.slots.len() > 1;
                for slot in &ctx.slots {
                    expand_slot(&mut row, slot, qualify);
                }
            }
            SelectItemAst::QualifiedWildcard(qualifier) => {
                let slot = ctx
                    .slots
                    .iter()
                    .find(|s| s.alias.eq_ignore_ascii_case(qualifier))
                    .ok_or_else(|| DbError::from(SqlError::UnknownAlias(qualifier.clone())))?;
                expand_slot(&mut row, slot, false);
            }
        }
    }
    Ok(row)
}

fn expand_slot(row: &mut SqlRow, slot: &Slot, qualify_on_clash: bool) {
    for col in slot.schema.columns() {
        let value = slot.value_of(&col.name);
        let mut name = col.name.to_string();
        if qualify_on_clash && row.contains_key(&name) {
            name = format!("{}.{}", slot.alias, col.name);
        }
        row.insert(name, value);
    }
}

fn eval_aggregate(func: AggFunc, arg: Option<&ScalarExpr>, group: &[Ctx]) -> Result<ColumnValue> {
    let arg_or_err = || {
        arg.ok_or_else(|| DbError::from(SqlError::Malformed(format!("{func}(*) is not defined"))))
    };
    match func {
        AggFunc::Count => match arg {
            None => Ok(ColumnValue::I64(group.len() as i64)),
            Some(expr) => {
                let mut count = 0i64;
                for ctx in group {
                    if !expr.eval(ctx)?.is_null() {
                        count += 1;
                    }
                }
                Ok(ColumnValue::I64(count))
            }
        },
        AggFunc::Sum | AggFunc::Avg => {
            let expr = arg_or_err()?;
            let mut sum = Decimal::ZERO;
            let mut count = 0u32;
            for ctx in group {
                let value = expr.eval(ctx)?;
                if value.is_null() {
                    continue;
                }
                let term = value.as_decimal().ok_or_else(|| {
                    DbError::from(SqlError::Malformed(format!("{func} over non-numeric value {value}")))
                })?;
                sum += term;
                count += 1;
            }
            if count == 0 {
                return Ok(ColumnValue::Null);
            }
            Ok(ColumnValue::Decimal(if func == AggFunc::Avg {
                sum / Decimal::from(count)
            } else {
                sum
            }))
        }
        AggFunc::Min | AggFunc::Max => {
            let expr = arg_or_err()?;
            let mut best: Option<ColumnValue> = None;
            for ctx in group {
                let value = expr.eval(ctx)?;
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let replace = try_compare(&value, &current).is_some_and(|ord| {
                            if func == AggFunc::Min {
                                ord.is_lt()
                            } else {
                                ord.is_gt()
                            }
                        });
                        if replace {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(best.unwrap_or(ColumnValue::Null))
        }
    }
}

/// ORDER BY keys resolve against the projected row first (aliases win) and
/// fall back to the pre-projection context.
fn order_value(expr: &ScalarExpr, row: &SqlRow, ctx: &Ctx) -> Result<ColumnValue> {
    if let Some(col) = expr.as_column() {
        if col.qualifier.is_none() {
            if let Some((_, value)) = row.iter().find(|(name, _)| name.eq_ignore_ascii_case(&col.name)) {
                return Ok(value.clone());
            }
        }
    }
    expr.eval(ctx)
}

fn execute_insert(db: &Database, table: &str, columns: &[String], values: Vec<ColumnValue>) -> Result<SqlResult> {
    let target = resolve_table(db, table)?;
    let schema = target.schema_ref().clone();
    let mut cells = Vec::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(values) {
        let Some((_, def)) = schema.column(column) else {
            return Err(SqlError::UnknownColumn(column.clone()).into());
        };
        let value = value.coerce_to(def.ty).map_err(DbError::InvalidArgument)?;
        cells.push((def.name.to_string(), value));
    }
    target.insert_cells(&cells)?;
    Ok(SqlResult::dml(1))
}

fn execute_update(
    db: &Database,
    table: &str,
    assignments: Vec<(String, ColumnValue)>,
    selection: Option<ScalarExpr>,
) -> Result<SqlResult> {
    let target = resolve_table(db, table)?;
    let schema = target.schema_ref().clone();
    let mut assigns = Vec::with_capacity(assignments.len());
    for (column, value) in assignments {
        let Some((_, def)) = schema.column(&column) else {
            return Err(SqlError::UnknownColumn(column).into());
        };
        let value = value.coerce_to(def.ty).map_err(DbError::InvalidArgument)?;
        assigns.push((def.name.to_string(), value));
    }
    let predicate = compile_predicate(selection, target.table_name().to_string(), schema)?;
    let affected = target.update_where(predicate.as_ref(), &assigns)?;
    Ok(SqlResult::dml(affected))
}

fn execute_delete(db: &Database, table: &str, selection: Option<ScalarExpr>) -> Result<SqlResult> {
    let target = resolve_table(db, table)?;
    let schema = target.schema_ref().clone();
    let predicate = compile_predicate(selection, target.table_name().to_string(), schema)?;
    let affected = target.delete_where(predicate.as_ref())?;
    Ok(SqlResult::dml(affected))
}

/// Compiles a WHERE clause into an infallible row predicate. Column
/// references are resolved against the schema up front, so evaluation
/// inside the table's lock cannot fail.
fn compile_predicate(
    selection: Option<ScalarExpr>,
    table_name: String,
    schema: Arc<RowSchema>,
) -> Result<Box<dyn Fn(&RowCells) -> bool>> {
    let Some(expr) = selection else {
        return Ok(Box::new(|_| true));
    };
    expr.visit_columns(&mut |col| {
        if let Some(qualifier) = &col.qualifier {
            if !qualifier.eq_ignore_ascii_case(&table_name) {
                return Err(SqlError::UnknownAlias(qualifier.clone()).into());
            }
        }
        if schema.column(&col.name).is_none() {
            return Err(SqlError::UnknownColumn(col.to_string()).into());
        }
        Ok(())
    })?;
    Ok(Box::new(move |cells| {
        let ctx = Ctx {
            slots: vec![Slot {
                alias: table_name.clone(),
                schema: schema.clone(),
                cells: Some(cells.clone()),
            }],
        };
        expr.matches(&ctx).unwrap_or(false)
    }))
}
