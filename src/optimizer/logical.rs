//! Logical plan: a straightforward tree built from `SelectStmt` before any
//! cost-based transformation. `rules.rs` turns this into a `PhysicalPlan`.

use crate::error::{MiniSqlError, Result};
use crate::exec::hash_agg::{is_aggregate_function, AggregateCall};
use crate::parser::{Expr, JoinType, OrderByClause, SelectColumn, SelectStmt};

#[derive(Debug, Clone)]
pub enum LogicalPlan {
    Scan {
        table: String,
        alias: Option<String>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Join {
        join_type: JoinType,
        on: Option<Expr>,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    Aggregate {
        group_by: Vec<Expr>,
        calls: Vec<AggregateSpec>,
        input: Box<LogicalPlan>,
    },
    Project {
        exprs: Vec<(Expr, Option<String>)>,
        input: Box<LogicalPlan>,
    },
    Sort {
        order_by: Vec<OrderByClause>,
        input: Box<LogicalPlan>,
    },
    Limit {
        offset: u64,
        limit: u64,
        input: Box<LogicalPlan>,
    },
}

/// Plain data carried alongside an `AggregateCall` (which isn't `Clone`
/// because its accumulators aren't); rebuilt into one right before
/// execution.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub output_name: String,
    pub function: String,
    pub arg: Option<Expr>,
    pub distinct: bool,
}

impl AggregateSpec {
    pub fn into_call(self) -> AggregateCall {
        AggregateCall {
            output_name: self.output_name,
            function: self.function,
            arg: self.arg,
            distinct: self.distinct,
        }
    }
}

/// `SelectStmt` has no offset field; it is carried separately by callers
/// that need one (e.g. a future pagination layer on top of `Session`).
pub fn build_logical_plan(stmt: &SelectStmt) -> Result<LogicalPlan> {
    let from = stmt.from.as_ref().ok_or_else(|| MiniSqlError::Syntax("SELECT without FROM is not supported".into()))?;

    let mut plan = LogicalPlan::Scan {
        table: from.name.clone(),
        alias: from.alias.clone(),
    };

    for join in &stmt.joins {
        let right = LogicalPlan::Scan {
            table: join.table.name.clone(),
            alias: join.table.alias.clone(),
        };
        plan = LogicalPlan::Join {
            join_type: join.join_type,
            on: join.on_condition.clone(),
            left: Box::new(plan),
            right: Box::new(right),
        };
    }

    if let Some(predicate) = &stmt.where_clause {
        plan = LogicalPlan::Filter { predicate: predicate.clone(), input: Box::new(plan) };
    }

    let agg_calls = collect_aggregate_calls(&stmt.columns)?;
    if !agg_calls.is_empty() || !stmt.group_by.is_empty() {
        plan = LogicalPlan::Aggregate {
            group_by: stmt.group_by.clone(),
            calls: agg_calls,
            input: Box::new(plan),
        };
    } else {
        let exprs = select_list_exprs(&stmt.columns)?;
        plan = LogicalPlan::Project { exprs, input: Box::new(plan) };
    }

    if !stmt.order_by.is_empty() {
        plan = LogicalPlan::Sort { order_by: stmt.order_by.clone(), input: Box::new(plan) };
    }

    if let Some(limit) = stmt.limit {
        plan = LogicalPlan::Limit { offset: 0, limit, input: Box::new(plan) };
    }

    Ok(plan)
}

fn select_list_exprs(columns: &[SelectColumn]) -> Result<Vec<(Expr, Option<String>)>> {
    let mut out = Vec::new();
    for col in columns {
        match col {
            SelectColumn::Star => out.push((Expr::Column { table: None, name: "*".into() }, None)),
            SelectColumn::QualifiedStar { table } => out.push((Expr::Column { table: Some(table.clone()), name: "*".into() }, None)),
            SelectColumn::Expr { expr, alias } => out.push((expr.clone(), alias.clone())),
        }
    }
    Ok(out)
}

fn collect_aggregate_calls(columns: &[SelectColumn]) -> Result<Vec<AggregateSpec>> {
    let mut out = Vec::new();
    for col in columns {
        if let SelectColumn::Expr { expr: Expr::FunctionCall { name, args }, alias } = col {
            if is_aggregate_function(name) {
                let output_name = alias.clone().unwrap_or_else(|| format!("{}({})", name.to_uppercase(), args.len()));
                out.push(AggregateSpec {
                    output_name,
                    function: name.clone(),
                    arg: args.first().cloned(),
                    distinct: false,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TableRef;

    fn select(table: &str) -> SelectStmt {
        SelectStmt {
            columns: vec![SelectColumn::Star],
            from: Some(TableRef { name: table.into(), alias: None }),
            joins: vec![],
            where_clause: None,
            group_by: vec![],
            order_by: vec![],
            limit: None,
        }
    }

    #[test]
    fn plain_select_builds_scan_then_project() {
        let plan = build_logical_plan(&select("users")).unwrap();
        assert!(matches!(plan, LogicalPlan::Project { .. }));
    }

    #[test]
    fn select_without_from_is_a_syntax_error() {
        let mut stmt = select("users");
        stmt.from = None;
        assert!(build_logical_plan(&stmt).is_err());
    }

    #[test]
    fn group_by_produces_aggregate_node() {
        let mut stmt = select("orders");
        stmt.columns = vec![SelectColumn::Expr {
            expr: Expr::FunctionCall { name: "COUNT".into(), args: vec![] },
            alias: Some("n".into()),
        }];
        stmt.group_by = vec![Expr::Column { table: None, name: "customer_id".into() }];
        let plan = build_logical_plan(&stmt).unwrap();
        assert!(matches!(plan, LogicalPlan::Aggregate { .. }));
    }
}
