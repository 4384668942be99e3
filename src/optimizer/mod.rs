//! Rule-driven cost-based optimizer: builds a `LogicalPlan` from a parsed
//! `SELECT`, then rewrites it into a `PhysicalPlan` ready for `exec/`.

pub mod cost;
pub mod logical;
pub mod physical;
pub mod rules;

pub use logical::{build_logical_plan, AggregateSpec, LogicalPlan};
pub use physical::{AggregateCallSpec, PhysicalPlan};
pub use rules::optimize;

use crate::error::Result;
use crate::parser::SelectStmt;

/// Convenience entry point: parse tree straight to an executable plan.
pub fn plan_select(stmt: &SelectStmt, is_filterable: &dyn Fn(&str) -> bool) -> Result<PhysicalPlan> {
    let logical = build_logical_plan(stmt)?;
    optimize(logical, is_filterable)
}
