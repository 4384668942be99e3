//! Physical operator tree. Immutable once built; `rules.rs` constructs new
//! nodes rather than mutating existing ones. `Display` renders the plain
//! indented-text tree `EXPLAIN` prints, mirroring how the existing crate
//! favors plain-text debug output elsewhere (`EngineType::description`).

use std::fmt;

use crate::exec::hash_agg::AggregateCall;
use crate::expr_eval::expr_name;
use crate::optimizer::cost;
use crate::parser::{Expr, JoinType};

pub enum PhysicalPlan {
    TableScan {
        table: String,
        /// The name the query referred to this table by, if different from
        /// `table` (e.g. `FROM orders o`). Scans still query by `table`;
        /// join-key and predicate-side resolution match qualifiers against
        /// this instead, since SQL qualifiers name the alias, not the table.
        alias: Option<String>,
        filters: Vec<Expr>,
        select_columns: Option<Vec<String>>,
        limit: Option<u64>,
        offset: u64,
        parallel: bool,
    },
    Selection {
        predicates: Vec<Expr>,
        child: Box<PhysicalPlan>,
    },
    Projection {
        exprs: Vec<(Expr, Option<String>)>,
        child: Box<PhysicalPlan>,
    },
    HashJoin {
        join_type: JoinType,
        left_key: Vec<String>,
        right_key: Vec<String>,
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
    },
    HashAggregate {
        group_by: Vec<Expr>,
        calls: Vec<AggregateCallSpec>,
        child: Box<PhysicalPlan>,
    },
    Sort {
        keys: Vec<(Expr, bool)>,
        child: Box<PhysicalPlan>,
    },
    Limit {
        offset: u64,
        limit: u64,
        child: Box<PhysicalPlan>,
    },
}

/// Plain, clonable aggregate description used by the physical tree.
/// `AggregateCall`'s accumulators are built fresh at execution time via
/// `to_call`.
#[derive(Debug, Clone)]
pub struct AggregateCallSpec {
    pub output_name: String,
    pub function: String,
    pub arg: Option<Expr>,
    pub distinct: bool,
}

impl AggregateCallSpec {
    pub fn to_call(&self) -> AggregateCall {
        AggregateCall {
            output_name: self.output_name.clone(),
            function: self.function.clone(),
            arg: self.arg.clone(),
            distinct: self.distinct,
        }
    }
}

impl PhysicalPlan {
    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::TableScan { .. } => vec![],
            PhysicalPlan::Selection { child, .. } => vec![child],
            PhysicalPlan::Projection { child, .. } => vec![child],
            PhysicalPlan::HashJoin { left, right, .. } => vec![left, right],
            PhysicalPlan::HashAggregate { child, .. } => vec![child],
            PhysicalPlan::Sort { child, .. } => vec![child],
            PhysicalPlan::Limit { child, .. } => vec![child],
        }
    }

    /// Output column names this node produces, best-effort: a `TableScan`
    /// with no pushed-down column list doesn't know its source's columns
    /// ahead of execution, and reports empty rather than guessing.
    pub fn schema(&self) -> Vec<String> {
        match self {
            PhysicalPlan::TableScan { select_columns, .. } => select_columns.clone().unwrap_or_default(),
            PhysicalPlan::Selection { child, .. } => child.schema(),
            PhysicalPlan::Projection { exprs, .. } => exprs
                .iter()
                .map(|(e, alias)| alias.clone().unwrap_or_else(|| expr_name(e)))
                .collect(),
            PhysicalPlan::HashJoin { left, right, .. } => {
                let mut cols = left.schema();
                cols.extend(right.schema());
                cols
            }
            PhysicalPlan::HashAggregate { group_by, calls, .. } => group_by
                .iter()
                .map(expr_name)
                .chain(calls.iter().map(|c| c.output_name.clone()))
                .collect(),
            PhysicalPlan::Sort { child, .. } => child.schema(),
            PhysicalPlan::Limit { child, .. } => child.schema(),
        }
    }

    pub fn cost(&self) -> f64 {
        match self {
            PhysicalPlan::TableScan { limit, .. } => cost::scan_cost(cost::estimate_scan_rows(*limit)),
            PhysicalPlan::Selection { child, .. } => cost::selection_cost(child.cost()),
            PhysicalPlan::Projection { exprs, child } => cost::projection_cost(child.cost(), exprs.len()),
            PhysicalPlan::HashJoin { left, right, .. } => cost::hash_join_cost(left.cost(), right.cost()),
            PhysicalPlan::HashAggregate { group_by, calls, child } => cost::hash_aggregate_cost(child.cost(), group_by.len(), calls.len()),
            PhysicalPlan::Sort { child, .. } => child.cost(),
            PhysicalPlan::Limit { limit, child, .. } => cost::limit_cost(child.cost(), *limit),
        }
    }

    fn label(&self) -> String {
        match self {
            PhysicalPlan::TableScan { table, alias, filters, parallel, .. } => match alias {
                Some(a) => format!("TableScan({} AS {}, filters={}, parallel={})", table, a, filters.len(), parallel),
                None => format!("TableScan({}, filters={}, parallel={})", table, filters.len(), parallel),
            },
            PhysicalPlan::Selection { predicates, .. } => format!("Selection(predicates={})", predicates.len()),
            PhysicalPlan::Projection { exprs, .. } => format!("Projection(exprs={})", exprs.len()),
            PhysicalPlan::HashJoin { join_type, left_key, .. } => format!("HashJoin({:?}, keys={})", join_type, left_key.len()),
            PhysicalPlan::HashAggregate { group_by, calls, .. } => format!("HashAggregate(group_by={}, aggs={})", group_by.len(), calls.len()),
            PhysicalPlan::Sort { keys, .. } => format!("Sort(keys={})", keys.len()),
            PhysicalPlan::Limit { offset, limit, .. } => format!("Limit(offset={}, limit={})", offset, limit),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{} cost={:.1}", "  ".repeat(depth), self.label(), self.cost())?;
        for child in self.children() {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_output_is_an_indented_tree() {
        let plan = PhysicalPlan::Limit {
            offset: 0,
            limit: 10,
            child: Box::new(PhysicalPlan::TableScan {
                table: "users".into(),
                alias: None,
                filters: vec![],
                select_columns: None,
                limit: Some(10),
                offset: 0,
                parallel: false,
            }),
        };
        let text = format!("{}", plan);
        assert!(text.starts_with("Limit("));
        assert!(text.contains("  TableScan(users"));
    }

    #[test]
    fn schema_passes_through_pass_through_nodes() {
        let scan = PhysicalPlan::TableScan {
            table: "users".into(),
            alias: None,
            filters: vec![],
            select_columns: Some(vec!["id".into(), "name".into()]),
            limit: None,
            offset: 0,
            parallel: false,
        };
        let plan = PhysicalPlan::Limit { offset: 0, limit: 10, child: Box::new(scan) };
        assert_eq!(plan.schema(), vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn schema_uses_aliases_in_projection() {
        let scan = PhysicalPlan::TableScan {
            table: "users".into(),
            alias: None,
            filters: vec![],
            select_columns: None,
            limit: None,
            offset: 0,
            parallel: false,
        };
        let plan = PhysicalPlan::Projection {
            exprs: vec![(Expr::Column { table: None, name: "age".into() }, Some("user_age".into()))],
            child: Box::new(scan),
        };
        assert_eq!(plan.schema(), vec!["user_age".to_string()]);
    }
}
