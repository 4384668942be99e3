//! Rule-driven logical-to-physical transformation: predicate pushdown,
//! column pruning, and join reordering, per the three mandatory rule
//! classes. Grounded on `executor/schema.rs`'s column-ambiguity resolution
//! for the "which side does this predicate/column belong to" logic, redone
//! against the logical-plan tree instead of a flat join-table list.

use std::collections::HashSet;

use crate::error::{MiniSqlError, Result};
use crate::expr_eval::referenced_columns;
use crate::optimizer::cost;
use crate::optimizer::logical::LogicalPlan;
use crate::optimizer::physical::{AggregateCallSpec, PhysicalPlan};
use crate::parser::{BinaryOperator, Expr, JoinType, SortOrder};

/// Turn a logical plan into a physical one. `is_filterable` tells the
/// planner whether a given table's source advertises the `filterable`
/// capability (only those scans accept pushed-down predicates).
pub fn optimize(plan: LogicalPlan, is_filterable: &dyn Fn(&str) -> bool) -> Result<PhysicalPlan> {
    let physical = build(plan, is_filterable)?;
    Ok(prune_columns(physical, &HashSet::new()))
}

fn build(plan: LogicalPlan, is_filterable: &dyn Fn(&str) -> bool) -> Result<PhysicalPlan> {
    match plan {
        LogicalPlan::Scan { table, alias } => Ok(PhysicalPlan::TableScan {
            table,
            alias,
            filters: vec![],
            select_columns: None,
            limit: None,
            offset: 0,
            // Every scan is a parallel-path candidate; `exec::scan::should_parallelize`
            // makes the actual call at execution time from the real row count and
            // pushed-filter count, which aren't known yet at plan-build time.
            parallel: true,
        }),
        LogicalPlan::Filter { predicate, input } => {
            let child = build(*input, is_filterable)?;
            Ok(push_down_filter(predicate, child, is_filterable))
        }
        LogicalPlan::Join { join_type, on, left, right } => {
            let left = build(*left, is_filterable)?;
            let right = build(*right, is_filterable)?;
            build_join(join_type, on, left, right)
        }
        LogicalPlan::Aggregate { group_by, calls, input } => {
            let child = build(*input, is_filterable)?;
            Ok(PhysicalPlan::HashAggregate {
                group_by,
                calls: calls
                    .into_iter()
                    .map(|c| AggregateCallSpec { output_name: c.output_name, function: c.function, arg: c.arg, distinct: c.distinct })
                    .collect(),
                child: Box::new(child),
            })
        }
        LogicalPlan::Project { exprs, input } => {
            let child = build(*input, is_filterable)?;
            Ok(PhysicalPlan::Projection { exprs, child: Box::new(child) })
        }
        LogicalPlan::Sort { order_by, input } => {
            let child = build(*input, is_filterable)?;
            let keys = order_by.into_iter().map(|o| (o.expr, o.direction == SortOrder::Asc)).collect();
            Ok(PhysicalPlan::Sort { keys, child: Box::new(child) })
        }
        LogicalPlan::Limit { offset, limit, input } => {
            let child = build(*input, is_filterable)?;
            let child = set_scan_limit(child, offset, limit);
            Ok(PhysicalPlan::Limit { offset, limit, child: Box::new(child) })
        }
    }
}

/// Propagates a LIMIT/OFFSET down to an immediately-underlying scan so the
/// parallel-scan partitioner has a real row budget instead of the 1000-row
/// fallback; stops at the first non-pass-through node.
fn set_scan_limit(plan: PhysicalPlan, offset: u64, limit: u64) -> PhysicalPlan {
    match plan {
        PhysicalPlan::TableScan { table, alias, filters, select_columns, parallel, .. } => PhysicalPlan::TableScan {
            table,
            alias,
            filters,
            select_columns,
            limit: Some(limit),
            offset,
            parallel,
        },
        PhysicalPlan::Selection { predicates, child } => PhysicalPlan::Selection { predicates, child: Box::new(set_scan_limit(*child, offset, limit)) },
        PhysicalPlan::Projection { exprs, child } => PhysicalPlan::Projection { exprs, child: Box::new(set_scan_limit(*child, offset, limit)) },
        other => other,
    }
}

fn push_down_filter(predicate: Expr, child: PhysicalPlan, is_filterable: &dyn Fn(&str) -> bool) -> PhysicalPlan {
    let conjuncts = split_conjuncts(predicate);

    match child {
        PhysicalPlan::TableScan { table, alias, mut filters, select_columns, limit, offset, parallel } => {
            if is_filterable(&table) {
                filters.extend(conjuncts);
                PhysicalPlan::TableScan { table, alias, filters, select_columns, limit, offset, parallel }
            } else {
                PhysicalPlan::Selection {
                    predicates: conjuncts,
                    child: Box::new(PhysicalPlan::TableScan { table, alias, filters, select_columns, limit, offset, parallel }),
                }
            }
        }
        PhysicalPlan::HashJoin { join_type, left_key, right_key, left, right } => {
            let left_names = scan_names(&left);
            let right_names = scan_names(&right);

            let mut residual = Vec::new();
            let mut left_extra = Vec::new();
            let mut right_extra = Vec::new();

            for conjunct in conjuncts {
                let tables = referenced_table_qualifiers(&conjunct);
                if !tables.is_empty() && tables.iter().all(|t| left_names.contains(t)) {
                    left_extra.push(conjunct);
                } else if !tables.is_empty() && tables.iter().all(|t| right_names.contains(t)) {
                    right_extra.push(conjunct);
                } else {
                    residual.push(conjunct);
                }
            }

            let left = if left_extra.is_empty() { *left } else { push_down_filter(and_all(left_extra), *left, is_filterable) };
            let right = if right_extra.is_empty() { *right } else { push_down_filter(and_all(right_extra), *right, is_filterable) };
            let join = PhysicalPlan::HashJoin { join_type, left_key, right_key, left: Box::new(left), right: Box::new(right) };

            if residual.is_empty() {
                join
            } else {
                PhysicalPlan::Selection { predicates: residual, child: Box::new(join) }
            }
        }
        other => PhysicalPlan::Selection { predicates: conjuncts, child: Box::new(other) },
    }
}

fn and_all(mut conjuncts: Vec<Expr>) -> Expr {
    let mut expr = conjuncts.remove(0);
    for next in conjuncts {
        expr = Expr::BinaryOp { left: Box::new(expr), op: BinaryOperator::And, right: Box::new(next) };
    }
    expr
}

fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            let mut out = split_conjuncts(*left);
            out.extend(split_conjuncts(*right));
            out
        }
        other => vec![other],
    }
}

fn referenced_table_qualifiers(expr: &Expr) -> HashSet<String> {
    let mut out = HashSet::new();
    walk_qualifiers(expr, &mut out);
    out
}

fn walk_qualifiers(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Column { table: Some(t), .. } => {
            out.insert(t.clone());
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_qualifiers(left, out);
            walk_qualifiers(right, out);
        }
        Expr::Not(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) => walk_qualifiers(inner, out),
        Expr::JsonAccess { expr, .. } => walk_qualifiers(expr, out),
        Expr::FunctionCall { args, .. } => args.iter().for_each(|a| walk_qualifiers(a, out)),
        Expr::In { expr, values } | Expr::NotIn { expr, values } => {
            walk_qualifiers(expr, out);
            values.iter().for_each(|v| walk_qualifiers(v, out));
        }
        _ => {}
    }
}

/// Every scan's effective table name (alias, else table) found beneath a
/// subtree — used to decide which side of a join a qualified predicate or
/// column belongs to.
fn scan_names(plan: &PhysicalPlan) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_scan_names(plan, &mut out);
    out
}

fn collect_scan_names(plan: &PhysicalPlan, out: &mut HashSet<String>) {
    match plan {
        PhysicalPlan::TableScan { table, alias, .. } => {
            out.insert(alias.clone().unwrap_or_else(|| table.clone()));
        }
        _ => {
            for child in plan.children() {
                collect_scan_names(child, out);
            }
        }
    }
}

/// Builds a `HashJoin`, deriving keys from `on`'s equality conjuncts
/// (`CROSS JOIN` skips key derivation entirely) and reordering so the
/// smaller-estimated side becomes the build (left) side for inner joins.
fn build_join(join_type: JoinType, on: Option<Expr>, left: PhysicalPlan, right: PhysicalPlan) -> Result<PhysicalPlan> {
    if matches!(join_type, JoinType::Cross) {
        return Ok(PhysicalPlan::HashJoin { join_type, left_key: vec![], right_key: vec![], left: Box::new(left), right: Box::new(right) });
    }

    let on = on.ok_or_else(|| MiniSqlError::Schema("join requires an ON condition or CROSS JOIN".into()))?;
    let left_names = scan_names(&left);
    let right_names = scan_names(&right);

    let mut left_key = Vec::new();
    let mut right_key = Vec::new();
    for conjunct in split_conjuncts(on) {
        if let Expr::BinaryOp { left: l, op: BinaryOperator::Equal, right: r } = &conjunct {
            if let (Expr::Column { table: lt, name: ln }, Expr::Column { table: rt, name: rn }) = (l.as_ref(), r.as_ref()) {
                let l_in_left = lt.as_deref().map(|t| left_names.contains(t)).unwrap_or(true);
                let r_in_right = rt.as_deref().map(|t| right_names.contains(t)).unwrap_or(true);
                if l_in_left && r_in_right {
                    left_key.push(ln.clone());
                    right_key.push(rn.clone());
                    continue;
                }
                let l_in_right = lt.as_deref().map(|t| right_names.contains(t)).unwrap_or(false);
                let r_in_left = rt.as_deref().map(|t| left_names.contains(t)).unwrap_or(false);
                if l_in_right && r_in_left {
                    left_key.push(rn.clone());
                    right_key.push(ln.clone());
                }
            }
        }
    }

    if left_key.is_empty() || right_key.is_empty() {
        return Err(MiniSqlError::Schema(
            "join condition has no equality conjuncts between the two tables; use CROSS JOIN for a cartesian product".into(),
        ));
    }

    let (left, right, left_key, right_key) = if matches!(join_type, JoinType::Inner) && left.cost() > right.cost() {
        (right, left, right_key, left_key)
    } else {
        (left, right, left_key, right_key)
    };

    Ok(PhysicalPlan::HashJoin { join_type, left_key, right_key, left: Box::new(left), right: Box::new(right) })
}

fn prune_columns(plan: PhysicalPlan, needed: &HashSet<String>) -> PhysicalPlan {
    match plan {
        PhysicalPlan::TableScan { table, alias, filters, select_columns, limit, offset, parallel } => {
            let mut required: HashSet<String> = needed.clone();
            for f in &filters {
                let mut names = Vec::new();
                referenced_columns(f, &mut names);
                required.extend(names);
            }
            let select_columns = if required.is_empty() || required.contains("*") {
                select_columns
            } else {
                let mut cols: Vec<String> = required.into_iter().collect();
                cols.sort();
                Some(cols)
            };
            PhysicalPlan::TableScan { table, alias, filters, select_columns, limit, offset, parallel }
        }
        PhysicalPlan::Selection { predicates, child } => {
            let mut required = needed.clone();
            for p in &predicates {
                let mut names = Vec::new();
                referenced_columns(p, &mut names);
                required.extend(names);
            }
            PhysicalPlan::Selection { predicates, child: Box::new(prune_columns(*child, &required)) }
        }
        PhysicalPlan::Projection { exprs, child } => {
            let mut required = HashSet::new();
            for (e, _) in &exprs {
                let mut names = Vec::new();
                referenced_columns(e, &mut names);
                required.extend(names);
            }
            PhysicalPlan::Projection { exprs, child: Box::new(prune_columns(*child, &required)) }
        }
        PhysicalPlan::HashJoin { join_type, left_key, right_key, left, right } => {
            let mut required = needed.clone();
            required.extend(left_key.iter().cloned());
            required.extend(right_key.iter().cloned());
            PhysicalPlan::HashJoin {
                join_type,
                left_key,
                right_key,
                left: Box::new(prune_columns(*left, &required)),
                right: Box::new(prune_columns(*right, &required)),
            }
        }
        PhysicalPlan::HashAggregate { group_by, calls, child } => {
            let mut required = HashSet::new();
            for g in &group_by {
                let mut names = Vec::new();
                referenced_columns(g, &mut names);
                required.extend(names);
            }
            for c in &calls {
                if let Some(arg) = &c.arg {
                    let mut names = Vec::new();
                    referenced_columns(arg, &mut names);
                    required.extend(names);
                }
            }
            PhysicalPlan::HashAggregate { group_by, calls, child: Box::new(prune_columns(*child, &required)) }
        }
        PhysicalPlan::Sort { keys, child } => {
            let mut required = needed.clone();
            for (e, _) in &keys {
                let mut names = Vec::new();
                referenced_columns(e, &mut names);
                required.extend(names);
            }
            PhysicalPlan::Sort { keys, child: Box::new(prune_columns(*child, &required)) }
        }
        PhysicalPlan::Limit { offset, limit, child } => PhysicalPlan::Limit { offset, limit, child: Box::new(prune_columns(*child, needed)) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::logical::build_logical_plan;
    use crate::parser::{SelectColumn, TableRef};

    fn always_filterable(_: &str) -> bool {
        true
    }

    #[test]
    fn filter_over_single_scan_pushes_down_and_marks_parallel() {
        let stmt = crate::parser::SelectStmt {
            columns: vec![SelectColumn::Star],
            from: Some(TableRef { name: "users".into(), alias: None }),
            joins: vec![],
            where_clause: Some(Expr::BinaryOp {
                left: Box::new(Expr::Column { table: None, name: "age".into() }),
                op: BinaryOperator::GreaterThan,
                right: Box::new(Expr::Literal(crate::types::Value::Integer(18))),
            }),
            group_by: vec![],
            order_by: vec![],
            limit: None,
        };
        let logical = build_logical_plan(&stmt).unwrap();
        let physical = optimize(logical, &always_filterable).unwrap();
        // Projection -> TableScan (filter pushed in, no separate Selection node)
        match physical {
            PhysicalPlan::Projection { child, .. } => match *child {
                PhysicalPlan::TableScan { filters, parallel, .. } => {
                    assert_eq!(filters.len(), 1);
                    assert!(parallel);
                }
                other => panic!("expected TableScan, got {:?}", std::mem::discriminant(&other)),
            },
            other => panic!("expected Projection, got {:?}", std::mem::discriminant(&other)),
        }
    }

    #[test]
    fn join_without_equality_keys_is_a_schema_error() {
        let left = PhysicalPlan::TableScan { table: "a".into(), alias: None, filters: vec![], select_columns: None, limit: None, offset: 0, parallel: false };
        let right = PhysicalPlan::TableScan { table: "b".into(), alias: None, filters: vec![], select_columns: None, limit: None, offset: 0, parallel: false };
        let on = Some(Expr::BinaryOp {
            left: Box::new(Expr::Column { table: Some("a".into()), name: "x".into() }),
            op: BinaryOperator::GreaterThan,
            right: Box::new(Expr::Column { table: Some("b".into()), name: "y".into() }),
        });
        let err = build_join(JoinType::Inner, on, left, right);
        assert!(matches!(err, Err(MiniSqlError::Schema(_))));
    }

    #[test]
    fn pruning_columns_twice_is_the_same_as_once() {
        let stmt = crate::parser::SelectStmt {
            columns: vec![SelectColumn::Expr { expr: Expr::Column { table: None, name: "name".into() }, alias: None }],
            from: Some(TableRef { name: "employees".into(), alias: None }),
            joins: vec![],
            where_clause: Some(Expr::BinaryOp {
                left: Box::new(Expr::Column { table: None, name: "department_id".into() }),
                op: BinaryOperator::Equal,
                right: Box::new(Expr::Literal(crate::types::Value::Integer(3))),
            }),
            group_by: vec![],
            order_by: vec![],
            limit: Some(10),
        };
        let logical = build_logical_plan(&stmt).unwrap();
        let pruned_once = optimize(logical, &always_filterable).unwrap();
        let rendered_once = format!("{}", pruned_once);
        let pruned_twice = prune_columns(pruned_once, &HashSet::new());
        assert_eq!(rendered_once, format!("{}", pruned_twice));
    }

    #[test]
    fn cross_join_needs_no_keys() {
        let left = PhysicalPlan::TableScan { table: "a".into(), alias: None, filters: vec![], select_columns: None, limit: None, offset: 0, parallel: false };
        let right = PhysicalPlan::TableScan { table: "b".into(), alias: None, filters: vec![], select_columns: None, limit: None, offset: 0, parallel: false };
        let plan = build_join(JoinType::Cross, None, left, right).unwrap();
        assert!(matches!(plan, PhysicalPlan::HashJoin { .. }));
    }
}
