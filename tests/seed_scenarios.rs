//! End-to-end scenarios run against `DB` through `Session::query`/`execute`,
//! exercising the MVCC engine, optimizer, and parallel exec runtime together.

use std::sync::Arc;

use minisql_engine::datasource::memory::MemoryTableStore;
use minisql_engine::error::MiniSqlError;
use minisql_engine::mvcc::IsolationLevel;
use minisql_engine::types::Value;
use minisql_engine::{Config, DB};

fn db_with_memory_table() -> DB {
    let db = DB::new(Config::default());
    let store = MemoryTableStore::new("default", db.txn_manager());
    db.register_data_source("default", Arc::new(store)).unwrap();
    db
}

fn setup_users(db: &DB) {
    let session = db.session("root", "default");
    session.execute("CREATE TABLE u (id INT PRIMARY KEY, age INT)").unwrap();
    session.execute("INSERT INTO u (id, age) VALUES (1, 25)").unwrap();
    session.execute("INSERT INTO u (id, age) VALUES (2, 30)").unwrap();
    session.execute("INSERT INTO u (id, age) VALUES (3, 28)").unwrap();
}

#[test]
fn repeatable_read_anti_phantom() {
    let db = db_with_memory_table();
    setup_users(&db);

    let a = db.session("alice", "default");
    a.begin_tx(IsolationLevel::RepeatableRead).unwrap();
    let first = a.query("SELECT * FROM u WHERE age > 27").unwrap();
    assert_eq!(first.rows.len(), 2);

    let b = db.session("bob", "default");
    b.begin_tx(IsolationLevel::ReadCommitted).unwrap();
    b.execute("INSERT INTO u (id, age) VALUES (4, 35)").unwrap();
    b.commit_tx().unwrap();

    let second = a.query("SELECT * FROM u WHERE age > 27").unwrap();
    assert_eq!(second.rows.len(), 2);
    a.commit_tx().unwrap();
}

#[test]
fn concurrent_write_conflict_fails_fast() {
    let db = db_with_memory_table();
    setup_users(&db);

    let a = db.session("alice", "default");
    a.begin_tx(IsolationLevel::ReadCommitted).unwrap();
    a.execute("UPDATE u SET age = 31 WHERE id = 2").unwrap();

    let b = db.session("bob", "default");
    b.begin_tx(IsolationLevel::ReadCommitted).unwrap();
    let err = b.execute("UPDATE u SET age = 32 WHERE id = 2");
    assert!(matches!(err, Err(MiniSqlError::WriteConflict(_))));
    b.rollback_tx().unwrap();

    a.commit_tx().unwrap();

    let c = db.session("carol", "default");
    c.begin_tx(IsolationLevel::ReadCommitted).unwrap();
    c.execute("UPDATE u SET age = 32 WHERE id = 2").unwrap();
    c.commit_tx().unwrap();

    let result = db.session("dan", "default").query("SELECT age FROM u WHERE id = 2").unwrap();
    assert_eq!(result.rows[0].get("age"), Value::Integer(32));
}

#[test]
fn rollback_erases_effects() {
    let db = db_with_memory_table();
    setup_users(&db);

    let session = db.session("alice", "default");
    session.begin_tx(IsolationLevel::RepeatableRead).unwrap();
    session.execute("INSERT INTO u (id, age) VALUES (10, 99)").unwrap();
    session.execute("INSERT INTO u (id, age) VALUES (11, 1)").unwrap();
    let mid = session.query("SELECT * FROM u").unwrap();
    assert_eq!(mid.rows.len(), 5);
    session.rollback_tx().unwrap();

    let after = db.session("bob", "default").query("SELECT * FROM u").unwrap();
    assert_eq!(after.rows.len(), 3);
}

#[test]
fn parallel_scan_matches_serial_scan() {
    let mut config = Config::default();
    config.worker_threads = 8;
    let db = DB::new(config);
    let store = MemoryTableStore::new("default", db.txn_manager());
    db.register_data_source("default", Arc::new(store)).unwrap();

    let session = db.session("root", "default");
    session.execute("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 1..=1000i64 {
        session.execute(&format!("INSERT INTO t (id, v) VALUES ({}, {})", i, i % 10)).unwrap();
    }

    let result = session.query("SELECT id, v FROM t ORDER BY id").unwrap();
    assert_eq!(result.rows.len(), 1000);
    for (i, row) in result.rows.iter().enumerate() {
        assert_eq!(row.get("id"), Value::Integer((i + 1) as i64));
        assert_eq!(row.get("v"), Value::Integer(((i + 1) % 10) as i64));
    }
}

#[test]
fn predicate_pushdown_and_column_pruning_reach_the_scan() {
    use minisql_engine::optimizer::{plan_select, PhysicalPlan};
    use minisql_engine::parser::Parser;

    let stmt = match Parser::parse("SELECT name FROM employees WHERE department_id = 3 LIMIT 10").unwrap() {
        minisql_engine::parser::Statement::Select(s) => s,
        _ => unreachable!(),
    };
    let plan = plan_select(&stmt, &|_| true).unwrap();

    let projection = match plan {
        PhysicalPlan::Limit { limit, child, .. } => {
            assert_eq!(limit, 10);
            *child
        }
        other => panic!("expected a Limit at the plan root, got {}", other),
    };

    match projection {
        PhysicalPlan::Projection { exprs, child } => {
            assert_eq!(exprs.len(), 1);
            match *child {
                PhysicalPlan::TableScan { table, filters, select_columns, limit, .. } => {
                    assert_eq!(table, "employees");
                    assert_eq!(filters.len(), 1);
                    assert_eq!(limit, Some(10));
                    let cols = select_columns.unwrap();
                    assert!(cols.contains(&"name".to_string()));
                    assert!(cols.contains(&"department_id".to_string()));
                }
                other => panic!("expected a pruned TableScan under the projection, got {}", other),
            }
        }
        other => panic!("expected a Projection under the Limit, got {}", other),
    }
}

#[test]
fn inner_hash_join_on_equal_keys() {
    let db = DB::new(Config::default());
    let l_store = MemoryTableStore::new("left", db.txn_manager());
    let r_store = MemoryTableStore::new("right", db.txn_manager());
    db.register_data_source("left", Arc::new(l_store)).unwrap();
    db.register_data_source("right", Arc::new(r_store)).unwrap();

    let l = db.session("root", "left");
    l.execute("CREATE TABLE l (id INT PRIMARY KEY, name TEXT)").unwrap();
    l.execute("INSERT INTO l (id, name) VALUES (1, 'A')").unwrap();
    l.execute("INSERT INTO l (id, name) VALUES (2, 'B')").unwrap();
    l.execute("INSERT INTO l (id, name) VALUES (3, 'C')").unwrap();

    let r = db.session("root", "right");
    r.execute("CREATE TABLE r (id INT PRIMARY KEY, age INT)").unwrap();
    r.execute("INSERT INTO r (id, age) VALUES (1, 25)").unwrap();
    r.execute("INSERT INTO r (id, age) VALUES (2, 30)").unwrap();
    r.execute("INSERT INTO r (id, age) VALUES (4, 35)").unwrap();

    // A single physical plan runs against one source, so a join across two
    // registered sources is driven by running each side's scan separately
    // and feeding the rows to the join operator directly.
    let left_rows = l.query("SELECT * FROM l").unwrap().rows;
    let right_rows = r.query("SELECT * FROM r").unwrap().rows;
    let left_columns = vec!["id".to_string(), "name".to_string()];
    let right_columns = vec!["id".to_string(), "age".to_string()];

    let ctx = minisql_engine::exec::context::ExecContext::new();
    let joined = minisql_engine::exec::hash_join::hash_join(
        left_rows,
        left_columns,
        right_rows,
        right_columns,
        vec!["id".to_string()],
        vec!["id".to_string()],
        minisql_engine::parser::JoinType::Inner,
        db.worker_pool(),
        &ctx,
    )
    .unwrap();

    assert_eq!(joined.len(), 2);
    let mut pairs: Vec<(Value, Value, Value)> = joined
        .iter()
        .map(|row| (row.get("id"), row.get("name"), row.get("age")))
        .collect();
    pairs.sort_by_key(|(id, _, _)| match id {
        Value::Integer(i) => *i,
        _ => unreachable!(),
    });
    assert_eq!(pairs, vec![
        (Value::Integer(1), Value::String("A".into()), Value::Integer(25)),
        (Value::Integer(2), Value::String("B".into()), Value::Integer(30)),
    ]);
}
