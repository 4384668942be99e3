//! Expression evaluation shared by the optimizer's predicate pushdown
//! analysis, the physical Selection/Projection/HashAggregate operators, and
//! the data sources that apply pushed-down filters themselves.
//!
//! Unlike the row-by-schema-index evaluation this grew out of, every lookup
//! here goes through `Row::get(name)`, since a `Row` is a self-describing
//! name-to-value mapping rather than a position in some fixed schema.

use crate::error::{MiniSqlError, Result};
use crate::parser::{BinaryOperator, Expr};
use crate::types::{Row, Value};

/// A human-readable name for an expression, used as a result-column header
/// when the query doesn't supply an alias.
pub fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::Column { name, .. } => name.clone(),
        Expr::Literal(v) => v.to_string(),
        Expr::JsonAccess { expr, key, as_text } => format!(
            "{}{}'{}'",
            expr_name(expr),
            if *as_text { "->>" } else { "->" },
            key
        ),
        Expr::FunctionCall { name, args } => {
            if args.is_empty() {
                format!("{}(*)", name)
            } else {
                format!("{}(...)", name)
            }
        }
        _ => "?".to_string(),
    }
}

/// Every column name this expression reads, used by column pruning.
pub fn referenced_columns(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Column { name, .. } => out.push(name.clone()),
        Expr::Literal(_) | Expr::Placeholder(_) => {}
        Expr::BinaryOp { left, right, .. } => {
            referenced_columns(left, out);
            referenced_columns(right, out);
        }
        Expr::Not(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            referenced_columns(inner, out)
        }
        Expr::JsonAccess { expr, .. } => referenced_columns(expr, out),
        Expr::In { expr, values } | Expr::NotIn { expr, values } => {
            referenced_columns(expr, out);
            for v in values {
                referenced_columns(v, out);
            }
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                referenced_columns(a, out);
            }
        }
    }
}

/// Evaluate an expression against a materialized row.
pub fn eval_expr(expr: &Expr, row: &Row) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column { name, .. } => Ok(row.get(name)),
        Expr::BinaryOp { left, op, right } => {
            let l = eval_expr(left, row)?;
            let r = eval_expr(right, row)?;
            apply_binary_op(&l, *op, &r)
        }
        Expr::Not(inner) => match eval_expr(inner, row)? {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Null => Ok(Value::Null),
            _ => Err(MiniSqlError::Type("NOT requires boolean".into())),
        },
        Expr::IsNull(inner) => Ok(Value::Boolean(eval_expr(inner, row)?.is_null())),
        Expr::IsNotNull(inner) => Ok(Value::Boolean(!eval_expr(inner, row)?.is_null())),
        Expr::JsonAccess { expr, key, as_text } => {
            let val = eval_expr(expr, row)?;
            Ok(if *as_text {
                val.json_get_text(key)
            } else {
                val.json_get(key)
            })
        }
        Expr::In { expr, values } => eval_in(expr, values, row, false),
        Expr::NotIn { expr, values } => eval_in(expr, values, row, true),
        Expr::FunctionCall { name, args } => {
            let arg_values: Result<Vec<Value>> = args.iter().map(|a| eval_expr(a, row)).collect();
            eval_function_values(name, &arg_values?)
        }
        Expr::Placeholder(_) => Err(MiniSqlError::Syntax(
            "unsubstituted placeholder in expression".into(),
        )),
    }
}

fn eval_in(expr: &Expr, values: &[Expr], row: &Row, negate: bool) -> Result<Value> {
    let expr_val = eval_expr(expr, row)?;
    if expr_val.is_null() {
        return Ok(Value::Null);
    }
    let mut saw_null = false;
    for val_expr in values {
        let val = eval_expr(val_expr, row)?;
        if val.is_null() {
            saw_null = true;
            continue;
        }
        if expr_val == val {
            return Ok(Value::Boolean(!negate));
        }
    }
    if saw_null {
        return Ok(Value::Null);
    }
    Ok(Value::Boolean(negate))
}

/// Evaluate a WHERE/predicate expression, treating NULL and non-boolean as falsy/truthy per SQL rules.
pub fn eval_predicate(expr: &Expr, row: &Row) -> Result<bool> {
    match eval_expr(expr, row)? {
        Value::Boolean(b) => Ok(b),
        Value::Null => Ok(false),
        _ => Ok(true),
    }
}

pub fn apply_binary_op(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value> {
    if matches!(left, Value::Null) || matches!(right, Value::Null) {
        match op {
            BinaryOperator::And => {
                if let (Value::Boolean(false), _) | (_, Value::Boolean(false)) = (left, right) {
                    return Ok(Value::Boolean(false));
                }
                return Ok(Value::Null);
            }
            BinaryOperator::Or => {
                if let (Value::Boolean(true), _) | (_, Value::Boolean(true)) = (left, right) {
                    return Ok(Value::Boolean(true));
                }
                return Ok(Value::Null);
            }
            _ => return Ok(Value::Null),
        }
    }

    match op {
        BinaryOperator::Equal => Ok(Value::Boolean(left == right)),
        BinaryOperator::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOperator::LessThan => Ok(Value::Boolean(
            left.partial_cmp(right) == Some(std::cmp::Ordering::Less),
        )),
        BinaryOperator::LessThanOrEqual => {
            let cmp = left.partial_cmp(right);
            Ok(Value::Boolean(matches!(
                cmp,
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            )))
        }
        BinaryOperator::GreaterThan => Ok(Value::Boolean(
            left.partial_cmp(right) == Some(std::cmp::Ordering::Greater),
        )),
        BinaryOperator::GreaterThanOrEqual => {
            let cmp = left.partial_cmp(right);
            Ok(Value::Boolean(matches!(
                cmp,
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            )))
        }
        BinaryOperator::And => match (left, right) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a && *b)),
            _ => Err(MiniSqlError::Type("AND requires boolean operands".into())),
        },
        BinaryOperator::Or => match (left, right) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
            _ => Err(MiniSqlError::Type("OR requires boolean operands".into())),
        },
        BinaryOperator::Plus => apply_arithmetic(left, right, |a, b| a + b),
        BinaryOperator::Minus => apply_arithmetic(left, right, |a, b| a - b),
        BinaryOperator::Multiply => apply_arithmetic(left, right, |a, b| a * b),
        BinaryOperator::Divide => apply_arithmetic(left, right, |a, b| if b == 0.0 { f64::NAN } else { a / b }),
        BinaryOperator::Like => match (left, right) {
            (Value::String(s), Value::String(pattern)) => Ok(Value::Boolean(match_like(s, pattern))),
            _ => Err(MiniSqlError::Type("LIKE requires string operands".into())),
        },
    }
}

fn apply_arithmetic<F: Fn(f64, f64) -> f64>(left: &Value, right: &Value, f: F) -> Result<Value> {
    let l = match left {
        Value::Integer(i) => *i as f64,
        Value::Float(v) => *v,
        _ => return Err(MiniSqlError::Type("arithmetic requires numeric operands".into())),
    };
    let r = match right {
        Value::Integer(i) => *i as f64,
        Value::Float(v) => *v,
        _ => return Err(MiniSqlError::Type("arithmetic requires numeric operands".into())),
    };
    let result = f(l, r);
    if matches!(left, Value::Integer(_)) && matches!(right, Value::Integer(_)) && result.fract() == 0.0 {
        Ok(Value::Integer(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn match_like(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    match_like_recursive(&s, &p)
}

fn match_like_recursive(s: &[char], p: &[char]) -> bool {
    if p.is_empty() {
        return s.is_empty();
    }
    match p[0] {
        '%' => (0..=s.len()).any(|i| match_like_recursive(&s[i..], &p[1..])),
        '_' => !s.is_empty() && match_like_recursive(&s[1..], &p[1..]),
        c => !s.is_empty() && s[0].to_ascii_lowercase() == c.to_ascii_lowercase() && match_like_recursive(&s[1..], &p[1..]),
    }
}

pub fn eval_function_values(name: &str, args: &[Value]) -> Result<Value> {
    match name.to_uppercase().as_str() {
        "JSON_EXTRACT" => {
            if args.len() != 2 {
                return Err(MiniSqlError::Syntax("JSON_EXTRACT requires 2 arguments".into()));
            }
            match &args[1] {
                Value::String(key) => Ok(args[0].json_get(key.trim_start_matches("$."))),
                _ => Err(MiniSqlError::Type("JSON path must be string".into())),
            }
        }
        "COALESCE" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "IFNULL" => {
            if args.len() != 2 {
                return Err(MiniSqlError::Syntax("IFNULL requires 2 arguments".into()));
            }
            Ok(if args[0].is_null() { args[1].clone() } else { args[0].clone() })
        }
        "UPPER" => match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_string().to_uppercase())),
        },
        "LOWER" => match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_string().to_lowercase())),
        },
        _ => Err(MiniSqlError::Syntax(format!("unknown function: {}", name))),
    }
}

/// Substitute prepared-statement placeholders with concrete values.
pub fn substitute_placeholders(expr: &Expr, params: &[Value]) -> Result<Expr> {
    match expr {
        Expr::Placeholder(idx) => {
            let v = params.get(*idx).ok_or_else(|| {
                MiniSqlError::Syntax(format!(
                    "parameter index {} out of bounds ({} parameters provided)",
                    idx,
                    params.len()
                ))
            })?;
            Ok(Expr::Literal(v.clone()))
        }
        Expr::Literal(v) => Ok(Expr::Literal(v.clone())),
        Expr::Column { table, name } => Ok(Expr::Column {
            table: table.clone(),
            name: name.clone(),
        }),
        Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(substitute_placeholders(left, params)?),
            op: *op,
            right: Box::new(substitute_placeholders(right, params)?),
        }),
        Expr::Not(inner) => Ok(Expr::Not(Box::new(substitute_placeholders(inner, params)?))),
        Expr::IsNull(inner) => Ok(Expr::IsNull(Box::new(substitute_placeholders(inner, params)?))),
        Expr::IsNotNull(inner) => Ok(Expr::IsNotNull(Box::new(substitute_placeholders(inner, params)?))),
        Expr::JsonAccess { expr, key, as_text } => Ok(Expr::JsonAccess {
            expr: Box::new(substitute_placeholders(expr, params)?),
            key: key.clone(),
            as_text: *as_text,
        }),
        Expr::In { expr, values } => Ok(Expr::In {
            expr: Box::new(substitute_placeholders(expr, params)?),
            values: values
                .iter()
                .map(|v| substitute_placeholders(v, params))
                .collect::<Result<_>>()?,
        }),
        Expr::NotIn { expr, values } => Ok(Expr::NotIn {
            expr: Box::new(substitute_placeholders(expr, params)?),
            values: values
                .iter()
                .map(|v| substitute_placeholders(v, params))
                .collect::<Result<_>>()?,
        }),
        Expr::FunctionCall { name, args } => Ok(Expr::FunctionCall {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| substitute_placeholders(a, params))
                .collect::<Result<_>>()?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(cols: &[(&str, Value)]) -> Row {
        Row::new(
            Arc::new(cols.iter().map(|(c, _)| c.to_string()).collect()),
            cols.iter().map(|(_, v)| v.clone()).collect(),
        )
    }

    #[test]
    fn like_matches_wildcards() {
        let r = row(&[("name", Value::String("hello".into()))]);
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column { table: None, name: "name".into() }),
            op: BinaryOperator::Like,
            right: Box::new(Expr::Literal(Value::String("h%o".into()))),
        };
        assert!(eval_predicate(&expr, &r).unwrap());
    }

    #[test]
    fn null_in_list_is_null_when_no_match() {
        let r = row(&[("a", Value::Integer(5))]);
        let expr = Expr::In {
            expr: Box::new(Expr::Column { table: None, name: "a".into() }),
            values: vec![Expr::Literal(Value::Integer(1)), Expr::Literal(Value::Null)],
        };
        assert_eq!(eval_expr(&expr, &r).unwrap(), Value::Null);
    }

    #[test]
    fn referenced_columns_collects_both_sides() {
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column { table: None, name: "a".into() }),
            op: BinaryOperator::Equal,
            right: Box::new(Expr::Column { table: None, name: "b".into() }),
        };
        let mut cols = Vec::new();
        referenced_columns(&expr, &mut cols);
        assert_eq!(cols, vec!["a".to_string(), "b".to_string()]);
    }
}
