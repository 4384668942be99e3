//! Parallel hash join: concurrent build/probe phases synchronized by a
//! one-shot "build ready" signal.
//!
//! Grounded on `join.rs` (the teacher's single-threaded nested-loop/hash
//! join over positional rows) for the join-type semantics (Inner/Left/Right
//! merge and null-padding rules), rebuilt against named `Row`s and fanned
//! out across scoped threads for the build and probe phases per the
//! parallel hash join design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{MiniSqlError, Result};
use crate::exec::context::ExecContext;
use crate::exec::scan::partition_count;
use crate::exec::worker_pool::WorkerPool;
use crate::parser::JoinType;
use crate::types::{Row, Value};

/// FNV-1a over the string-formatted join key columns, matching the hashing
/// scheme used for the build-side hash map.
fn fnv1a_hash(parts: &[String]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for part in parts {
        for byte in part.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        hash ^= 0xff;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn key_strings(row: &Row, columns: &[String]) -> Vec<String> {
    columns.iter().map(|c| format!("{:?}", row.get(c))).collect()
}

fn keys_equal(left_row: &Row, left_key: &[String], right_row: &Row, right_key: &[String]) -> bool {
    left_key.iter().zip(right_key.iter()).all(|(lk, rk)| left_row.get(lk) == right_row.get(rk))
}

fn merge_rows(left_columns: &[String], left: Option<&Row>, right_columns: &[String], right: Option<&Row>) -> Row {
    let mut columns = Vec::with_capacity(left_columns.len() + right_columns.len());
    let mut values = Vec::with_capacity(columns.capacity());

    for c in left_columns {
        columns.push(c.clone());
        values.push(left.map(|r| r.get(c)).unwrap_or(Value::Null));
    }
    for c in right_columns {
        let name = if left_columns.iter().any(|lc| lc.eq_ignore_ascii_case(c)) {
            format!("right_{}", c)
        } else {
            c.clone()
        };
        columns.push(name);
        values.push(right.map(|r| r.get(c)).unwrap_or(Value::Null));
    }
    Row::new(Arc::new(columns), values)
}

struct BuildEntry {
    row: Row,
    matched: AtomicBool,
}

type BuildMap = std::collections::HashMap<u64, Vec<BuildEntry>>;

/// Runs a hash join between `left` and `right` on the named key columns,
/// already derived from the join condition's equality conjuncts by the
/// optimizer (see `optimizer/rules.rs`). `left_key`/`right_key` are empty
/// for `JoinType::Cross`, which ignores keys entirely.
pub fn hash_join(
    left: Vec<Row>,
    left_columns: Vec<String>,
    right: Vec<Row>,
    right_columns: Vec<String>,
    left_key: Vec<String>,
    right_key: Vec<String>,
    join_type: JoinType,
    pool: &WorkerPool,
    ctx: &ExecContext,
) -> Result<Vec<Row>> {
    if matches!(join_type, JoinType::Cross) {
        return Ok(cross_product(&left, &left_columns, &right, &right_columns));
    }
    if left_key.is_empty() || right_key.is_empty() {
        return Err(MiniSqlError::Schema(
            "hash join requires at least one equality key on each side; use CROSS JOIN for a cartesian product".into(),
        ));
    }

    let build_map = Arc::new(Mutex::new(BuildMap::new()));
    build_phase(&left, &left_key, &build_map, pool, ctx)?;
    // Build-ready: the probe phase below only starts after `build_phase`
    // returns, so the map is fully populated before any probe job reads it
    // — a join-local rendezvous rather than a generic signal, since
    // `submit_batch` already blocks until every build job completes.

    let matched_right = Arc::new((0..right.len()).map(|_| AtomicBool::new(false)).collect::<Vec<_>>());
    let output = Arc::new(Mutex::new(Vec::new()));

    probe_phase(&right, &left_key, &right_key, &build_map, &left_columns, &right_columns, Arc::clone(&output), Arc::clone(&matched_right), pool, ctx)?;

    let mut out = Arc::try_unwrap(output).unwrap().into_inner().unwrap();

    if matches!(join_type, JoinType::Left | JoinType::Full) {
        let map = build_map.lock().unwrap();
        for entries in map.values() {
            for entry in entries {
                if !entry.matched.load(Ordering::SeqCst) {
                    out.push(merge_rows(&left_columns, Some(&entry.row), &right_columns, None));
                }
            }
        }
    }
    if matches!(join_type, JoinType::Right | JoinType::Full) {
        for (i, row) in right.iter().enumerate() {
            if !matched_right[i].load(Ordering::SeqCst) {
                out.push(merge_rows(&left_columns, None, &right_columns, Some(row)));
            }
        }
    }

    Ok(out)
}

fn cross_product(left: &[Row], left_columns: &[String], right: &[Row], right_columns: &[String]) -> Vec<Row> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(merge_rows(left_columns, Some(l), right_columns, Some(r)));
        }
    }
    out
}

fn build_phase(left: &[Row], left_key: &[String], build_map: &Arc<Mutex<BuildMap>>, pool: &WorkerPool, ctx: &ExecContext) -> Result<()> {
    let partitions = partition_count(num_cpus_hint());
    let chunk = ((left.len() + partitions - 1) / partitions.max(1)).max(1);

    let jobs: Vec<_> = left
        .chunks(chunk)
        .map(|rows| {
            let rows = rows.to_vec();
            let key = left_key.to_vec();
            let map = Arc::clone(build_map);
            let ctx = ctx.clone();
            move || -> Result<()> {
                for row in rows {
                    if ctx.is_cancelled() {
                        return Err(MiniSqlError::Cancellation("hash join build cancelled".into()));
                    }
                    let hash = fnv1a_hash(&key_strings(&row, &key));
                    map.lock().unwrap().entry(hash).or_default().push(BuildEntry { row, matched: AtomicBool::new(false) });
                }
                Ok(())
            }
        })
        .collect();

    for result in pool.submit_batch(jobs) {
        result.map_err(|e| MiniSqlError::Internal(format!("hash join build task failed: {}", e)))??;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn probe_phase(
    right: &[Row],
    left_key: &[String],
    right_key: &[String],
    build_map: &Arc<Mutex<BuildMap>>,
    left_columns: &[String],
    right_columns: &[String],
    output: Arc<Mutex<Vec<Row>>>,
    matched_right: Arc<Vec<AtomicBool>>,
    pool: &WorkerPool,
    ctx: &ExecContext,
) -> Result<()> {
    let partitions = partition_count(num_cpus_hint());
    let chunk = ((right.len() + partitions - 1) / partitions.max(1)).max(1);

    let jobs: Vec<_> = right
        .chunks(chunk)
        .enumerate()
        .map(|(i, rows)| {
            let base = i * chunk;
            let rows = rows.to_vec();
            let left_key = left_key.to_vec();
            let right_key = right_key.to_vec();
            let build_map = Arc::clone(build_map);
            let left_columns = left_columns.to_vec();
            let right_columns = right_columns.to_vec();
            let output = Arc::clone(&output);
            let matched_right = Arc::clone(&matched_right);
            let ctx = ctx.clone();
            move || -> Result<()> {
                for (offset, row) in rows.iter().enumerate() {
                    if ctx.is_cancelled() {
                        return Err(MiniSqlError::Cancellation("hash join probe cancelled".into()));
                    }
                    let idx = base + offset;
                    let hash = fnv1a_hash(&key_strings(row, &right_key));
                    let map = build_map.lock().unwrap();
                    if let Some(entries) = map.get(&hash) {
                        for entry in entries {
                            if keys_equal(&entry.row, &left_key, row, &right_key) {
                                entry.matched.store(true, Ordering::SeqCst);
                                matched_right[idx].store(true, Ordering::SeqCst);
                                output.lock().unwrap().push(merge_rows(&left_columns, Some(&entry.row), &right_columns, Some(row)));
                            }
                        }
                    }
                }
                Ok(())
            }
        })
        .collect();

    for result in pool.submit_batch(jobs) {
        result.map_err(|e| MiniSqlError::Internal(format!("hash join probe task failed: {}", e)))??;
    }
    Ok(())
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        Row::new(Arc::new(columns.iter().map(|s| s.to_string()).collect()), values)
    }

    #[test]
    fn inner_join_on_equal_keys() {
        let left = vec![
            row(&["id", "name"], vec![Value::Integer(1), Value::String("A".into())]),
            row(&["id", "name"], vec![Value::Integer(2), Value::String("B".into())]),
            row(&["id", "name"], vec![Value::Integer(3), Value::String("C".into())]),
        ];
        let right = vec![
            row(&["id", "age"], vec![Value::Integer(1), Value::Integer(25)]),
            row(&["id", "age"], vec![Value::Integer(2), Value::Integer(30)]),
            row(&["id", "age"], vec![Value::Integer(4), Value::Integer(35)]),
        ];
        let pool = WorkerPool::new(4);
        let ctx = ExecContext::new();
        let out = hash_join(
            left,
            vec!["id".into(), "name".into()],
            right,
            vec!["id".into(), "age".into()],
            vec!["id".into()],
            vec!["id".into()],
            JoinType::Inner,
            &pool,
            &ctx,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn cross_join_is_cartesian_product() {
        let left = vec![row(&["a"], vec![Value::Integer(1)]), row(&["a"], vec![Value::Integer(2)])];
        let right = vec![row(&["b"], vec![Value::Integer(9)])];
        let pool = WorkerPool::new(2);
        let ctx = ExecContext::new();
        let out = hash_join(left, vec!["a".into()], right, vec!["b".into()], vec![], vec![], JoinType::Cross, &pool, &ctx).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn missing_keys_on_non_cross_join_is_a_schema_error() {
        let pool = WorkerPool::new(2);
        let ctx = ExecContext::new();
        let err = hash_join(vec![], vec![], vec![], vec![], vec![], vec![], JoinType::Inner, &pool, &ctx);
        assert!(matches!(err, Err(MiniSqlError::Schema(_))));
    }

    #[test]
    fn left_join_pads_unmatched_left_rows_with_null() {
        let left = vec![row(&["id"], vec![Value::Integer(1)]), row(&["id"], vec![Value::Integer(2)])];
        let right = vec![row(&["id", "v"], vec![Value::Integer(1), Value::Integer(100)])];
        let pool = WorkerPool::new(2);
        let ctx = ExecContext::new();
        let out = hash_join(
            left,
            vec!["id".into()],
            right,
            vec!["id".into(), "v".into()],
            vec!["id".into()],
            vec!["id".into()],
            JoinType::Left,
            &pool,
            &ctx,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        let unmatched = out.iter().find(|r| r.get("id") == Value::Integer(2)).unwrap();
        assert_eq!(unmatched.get("v"), Value::Null);
    }

    #[test]
    fn right_join_pads_unmatched_right_rows_with_null() {
        let left = vec![row(&["id", "name"], vec![Value::Integer(1), Value::String("A".into())])];
        let right = vec![
            row(&["id"], vec![Value::Integer(1)]),
            row(&["id"], vec![Value::Integer(2)]),
        ];
        let pool = WorkerPool::new(2);
        let ctx = ExecContext::new();
        let out = hash_join(left, vec!["id".into(), "name".into()], right, vec!["id".into()], vec!["id".into()], vec!["id".into()], JoinType::Right, &pool, &ctx).unwrap();
        assert_eq!(out.len(), 2);
        let unmatched = out.iter().find(|r| r.get("name") == Value::Null).unwrap();
        assert_eq!(unmatched.get("id"), Value::Integer(2));
    }
}
