//! Single-threaded hash aggregate.
//!
//! Grounded directly on `executor/aggregation.rs`'s `AggregateAccumulator`
//! trait and its COUNT/SUM/AVG/MIN/MAX accumulators (kept essentially
//! verbatim — they operate on `Value`, not on the old positional row shape,
//! so nothing about them needed to change), wrapped in a `DistinctAccumulator`
//! decorator and driven per-group by a `HashMap` keyed on the group-by
//! expressions' string-formatted values rather than the single-group
//! whole-table case the teacher's callers used it for.

use std::collections::HashMap;

use crate::error::{MiniSqlError, Result};
use crate::expr_eval::{eval_expr, expr_name};
use crate::parser::Expr;
use crate::types::{Row, Value};

pub trait AggregateAccumulator: Send {
    fn accumulate(&mut self, value: &Value) -> Result<()>;
    fn finalize(&self) -> Value;
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator>;
}

pub struct CountAccumulator {
    count: i64,
    count_star: bool,
}

impl CountAccumulator {
    pub fn new(count_star: bool) -> Self {
        Self { count: 0, count_star }
    }
}

impl AggregateAccumulator for CountAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        if self.count_star || !value.is_null() {
            self.count += 1;
        }
        Ok(())
    }
    fn finalize(&self) -> Value {
        Value::Integer(self.count)
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(CountAccumulator::new(self.count_star))
    }
}

#[derive(Default)]
pub struct SumAccumulator {
    sum: f64,
    has_value: bool,
    is_integer: bool,
}

impl SumAccumulator {
    pub fn new() -> Self {
        Self { sum: 0.0, has_value: false, is_integer: true }
    }
}

impl AggregateAccumulator for SumAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Integer(i) => {
                self.sum += *i as f64;
                self.has_value = true;
                Ok(())
            }
            Value::Float(f) => {
                self.sum += f;
                self.has_value = true;
                self.is_integer = false;
                Ok(())
            }
            _ => Err(MiniSqlError::Type("SUM requires numeric values".into())),
        }
    }
    fn finalize(&self) -> Value {
        if !self.has_value {
            Value::Null
        } else if self.is_integer && self.sum.fract() == 0.0 {
            Value::Integer(self.sum as i64)
        } else {
            Value::Float(self.sum)
        }
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(SumAccumulator::new())
    }
}

#[derive(Default)]
pub struct AvgAccumulator {
    sum: f64,
    count: i64,
}

impl AvgAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateAccumulator for AvgAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Integer(i) => {
                self.sum += *i as f64;
                self.count += 1;
                Ok(())
            }
            Value::Float(f) => {
                self.sum += f;
                self.count += 1;
                Ok(())
            }
            _ => Err(MiniSqlError::Type("AVG requires numeric values".into())),
        }
    }
    fn finalize(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(AvgAccumulator::new())
    }
}

#[derive(Default)]
pub struct MinAccumulator {
    min: Option<Value>,
}

impl MinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateAccumulator for MinAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if self.min.as_ref().map(|c| value.partial_cmp(c) == Some(std::cmp::Ordering::Less)).unwrap_or(true) {
            self.min = Some(value.clone());
        }
        Ok(())
    }
    fn finalize(&self) -> Value {
        self.min.clone().unwrap_or(Value::Null)
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(MinAccumulator::new())
    }
}

#[derive(Default)]
pub struct MaxAccumulator {
    max: Option<Value>,
}

impl MaxAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateAccumulator for MaxAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if self.max.as_ref().map(|c| value.partial_cmp(c) == Some(std::cmp::Ordering::Greater)).unwrap_or(true) {
            self.max = Some(value.clone());
        }
        Ok(())
    }
    fn finalize(&self) -> Value {
        self.max.clone().unwrap_or(Value::Null)
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(MaxAccumulator::new())
    }
}

/// Wraps any accumulator so repeated values within one group are only
/// counted/summed/etc once, for `COUNT(DISTINCT x)`-style calls.
pub struct DistinctAccumulator {
    inner: Box<dyn AggregateAccumulator>,
    seen: std::collections::HashSet<String>,
}

impl DistinctAccumulator {
    pub fn wrap(inner: Box<dyn AggregateAccumulator>) -> Self {
        Self { inner, seen: std::collections::HashSet::new() }
    }
}

impl AggregateAccumulator for DistinctAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let key = format!("{:?}", value);
        if self.seen.insert(key) {
            self.inner.accumulate(value)?;
        }
        Ok(())
    }
    fn finalize(&self) -> Value {
        self.inner.finalize()
    }
    fn clone_empty(&self) -> Box<dyn AggregateAccumulator> {
        Box::new(DistinctAccumulator::wrap(self.inner.clone_empty()))
    }
}

pub fn is_aggregate_function(name: &str) -> bool {
    matches!(name.to_uppercase().as_str(), "COUNT" | "SUM" | "AVG" | "MIN" | "MAX")
}

/// One SELECT-list aggregate call: `COUNT(DISTINCT amount)`, `SUM(total)`, ...
pub struct AggregateCall {
    pub output_name: String,
    pub function: String,
    pub arg: Option<Expr>,
    pub distinct: bool,
}

impl AggregateCall {
    fn accumulator(&self) -> Result<Box<dyn AggregateAccumulator>> {
        let base: Box<dyn AggregateAccumulator> = match self.function.to_uppercase().as_str() {
            "COUNT" => Box::new(CountAccumulator::new(self.arg.is_none())),
            "SUM" => Box::new(SumAccumulator::new()),
            "AVG" => Box::new(AvgAccumulator::new()),
            "MIN" => Box::new(MinAccumulator::new()),
            "MAX" => Box::new(MaxAccumulator::new()),
            other => return Err(MiniSqlError::Syntax(format!("unknown aggregate function: {}", other))),
        };
        Ok(if self.distinct { Box::new(DistinctAccumulator::wrap(base)) } else { base })
    }
}

fn group_key(row: &Row, group_by: &[Expr]) -> Result<Vec<Value>> {
    group_by.iter().map(|e| eval_expr(e, row)).collect()
}

/// Runs a hash aggregate over `rows`, grouping by `group_by` (empty means a
/// single whole-input group) and computing each `AggregateCall` per group.
/// Columns in the output are the group-by expression names (in order)
/// followed by each aggregate's `output_name`. An empty input with an empty
/// `group_by` still produces one row (matching SQL's "aggregate of zero
/// rows has one group" rule), with every accumulator at its empty finalize.
pub fn hash_aggregate(rows: Vec<Row>, group_by: &[Expr], calls: &[AggregateCall]) -> Result<Vec<Row>> {
    let mut groups: HashMap<Vec<String>, (Vec<Value>, Vec<Box<dyn AggregateAccumulator>>)> = HashMap::new();
    let mut group_order: Vec<Vec<String>> = Vec::new();

    if rows.is_empty() && group_by.is_empty() {
        let mut output_values = Vec::new();
        for call in calls {
            output_values.push(call.accumulator()?.finalize());
        }
        let columns: Vec<String> = calls.iter().map(|c| c.output_name.clone()).collect();
        return Ok(vec![Row::new(std::sync::Arc::new(columns), output_values)]);
    }

    for row in rows {
        let key_values = group_key(&row, group_by)?;
        let key: Vec<String> = key_values.iter().map(|v| format!("{:?}", v)).collect();

        if !groups.contains_key(&key) {
            let accumulators: Result<Vec<_>> = calls.iter().map(|c| c.accumulator()).collect();
            groups.insert(key.clone(), (key_values.clone(), accumulators?));
            group_order.push(key.clone());
        }
        let (_, accumulators) = groups.get_mut(&key).unwrap();
        for (call, acc) in calls.iter().zip(accumulators.iter_mut()) {
            let value = match &call.arg {
                Some(expr) => eval_expr(expr, &row)?,
                None => Value::Integer(1), // COUNT(*): accumulate() ignores the value
            };
            acc.accumulate(&value)?;
        }
    }

    let group_names: Vec<String> = group_by.iter().map(expr_name).collect();
    let agg_names: Vec<String> = calls.iter().map(|c| c.output_name.clone()).collect();
    let mut columns = group_names;
    columns.extend(agg_names);
    let columns = std::sync::Arc::new(columns);

    let mut out = Vec::with_capacity(group_order.len());
    for key in group_order {
        let (group_values, accumulators) = groups.remove(&key).unwrap();
        let mut values = group_values;
        values.extend(accumulators.iter().map(|a| a.finalize()));
        out.push(Row::new(std::sync::Arc::clone(&columns), values));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        Row::new(Arc::new(columns.iter().map(|s| s.to_string()).collect()), values)
    }

    #[test]
    fn count_star_counts_all_rows_including_null() {
        let mut acc = CountAccumulator::new(true);
        acc.accumulate(&Value::Integer(1)).unwrap();
        acc.accumulate(&Value::Null).unwrap();
        assert_eq!(acc.finalize(), Value::Integer(2));
    }

    #[test]
    fn sum_ignores_nulls_and_mixes_float() {
        let mut acc = SumAccumulator::new();
        acc.accumulate(&Value::Integer(10)).unwrap();
        acc.accumulate(&Value::Null).unwrap();
        acc.accumulate(&Value::Float(5.5)).unwrap();
        assert_eq!(acc.finalize(), Value::Float(15.5));
    }

    #[test]
    fn distinct_accumulator_dedups_within_a_group() {
        let mut acc = DistinctAccumulator::wrap(Box::new(CountAccumulator::new(false)));
        acc.accumulate(&Value::Integer(1)).unwrap();
        acc.accumulate(&Value::Integer(1)).unwrap();
        acc.accumulate(&Value::Integer(2)).unwrap();
        assert_eq!(acc.finalize(), Value::Integer(2));
    }

    #[test]
    fn groups_by_column_and_sums_per_group() {
        let rows = vec![
            row(&["dept", "salary"], vec![Value::String("eng".into()), Value::Integer(100)]),
            row(&["dept", "salary"], vec![Value::String("eng".into()), Value::Integer(200)]),
            row(&["dept", "salary"], vec![Value::String("sales".into()), Value::Integer(50)]),
        ];
        let group_by = vec![Expr::Column { table: None, name: "dept".into() }];
        let calls = vec![AggregateCall {
            output_name: "total".into(),
            function: "SUM".into(),
            arg: Some(Expr::Column { table: None, name: "salary".into() }),
            distinct: false,
        }];
        let out = hash_aggregate(rows, &group_by, &calls).unwrap();
        assert_eq!(out.len(), 2);
        let eng = out.iter().find(|r| r.get("dept") == Value::String("eng".into())).unwrap();
        assert_eq!(eng.get("total"), Value::Integer(300));
    }

    #[test]
    fn aggregate_over_empty_input_with_no_group_by_yields_one_row() {
        let calls = vec![AggregateCall {
            output_name: "n".into(),
            function: "COUNT".into(),
            arg: None,
            distinct: false,
        }];
        let out = hash_aggregate(vec![], &[], &calls).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("n"), Value::Integer(0));
    }
}
