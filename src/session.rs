//! Session / catalog layer: routes parsed statements to data sources.
//!
//! Grounded on the teacher's `protocol::ConnectionHandler` (per-connection
//! state: current database, thread id, in-flight transaction) minus the
//! wire-protocol framing, plus `executor/mod.rs`'s dispatch-by-statement-kind
//! shape. The catalog replaces the old `EngineHandler` enum dispatch with a
//! name-keyed `SourceRegistry`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use log::{info, warn};

use crate::datasource::{Capabilities, DataSource, QueryOptions, SourceRegistry};
use crate::error::{MiniSqlError, Result};
use crate::exec::context::ExecContext;
use crate::exec::{hash_agg, hash_join, scan, WorkerPool};
use crate::expr_eval::{eval_expr, expr_name, referenced_columns};
use crate::mvcc::{IsolationLevel, Transaction, TransactionManager};
use crate::optimizer::{self, PhysicalPlan};
use crate::parser::{Expr, Parser, SelectColumn, SelectStmt, Statement};
use crate::types::{ColumnDef, DataType, GeneratedKind, GeneratedSpec, ModifyResult, QueryResult, ResultColumn, Row, TableSchema, Value};

/// A live session's entry in `SHOW PROCESSLIST`, keyed by thread id.
/// There's no wire protocol in this embeddable engine, so `host` is a fixed
/// placeholder rather than a real peer address.
struct ProcessEntry {
    user: String,
    host: &'static str,
    db: String,
    command: String,
    info: Option<String>,
    started: Instant,
}

/// Process-wide registry of data sources, one per logical database.
pub struct Catalog {
    sources: SourceRegistry,
    pub txn_manager: Arc<TransactionManager>,
    pub pool: WorkerPool,
    pub auto_downgrade: bool,
    next_thread_id: AtomicU64,
    processes: RwLock<HashMap<u64, ProcessEntry>>,
}

impl Catalog {
    pub fn new(txn_manager: Arc<TransactionManager>, pool: WorkerPool, auto_downgrade: bool) -> Arc<Self> {
        let sources: SourceRegistry = Arc::new(RwLock::new(std::collections::HashMap::new()));
        txn_manager.set_source_registry(Arc::clone(&sources));
        Arc::new(Self {
            sources,
            txn_manager,
            pool,
            auto_downgrade,
            next_thread_id: AtomicU64::new(1),
            processes: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> SourceRegistry {
        Arc::clone(&self.sources)
    }

    pub fn register(&self, name: impl Into<String>, source: Arc<dyn DataSource>) -> Result<()> {
        source.connect()?;
        self.sources.write().unwrap().insert(name.into(), source);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let removed = self.sources.write().unwrap().remove(name);
        match removed {
            Some(source) => source.close(),
            None => Err(MiniSqlError::Table(format!("no data source registered under '{}'", name))),
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.sources
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| MiniSqlError::Table(format!("unknown database '{}'", name)))
    }

    fn next_thread_id(&self) -> u64 {
        self.next_thread_id.fetch_add(1, Ordering::SeqCst)
    }

    fn register_process(&self, id: u64, user: &str, db: &str) {
        self.processes.write().unwrap().insert(
            id,
            ProcessEntry { user: user.to_string(), host: "localhost", db: db.to_string(), command: "Sleep".into(), info: None, started: Instant::now() },
        );
    }

    fn update_process(&self, id: u64, db: &str, command: &str, info: Option<String>) {
        if let Some(entry) = self.processes.write().unwrap().get_mut(&id) {
            entry.db = db.to_string();
            entry.command = command.to_string();
            entry.info = info;
        }
    }

    fn deregister_process(&self, id: u64) {
        self.processes.write().unwrap().remove(&id);
    }

    /// Snapshot of live sessions, ordered by thread id, for `SHOW PROCESSLIST`.
    fn process_list(&self) -> Vec<(u64, String, String, String, u64, String, Option<String>)> {
        let mut rows: Vec<_> = self
            .processes
            .read()
            .unwrap()
            .iter()
            .map(|(id, e)| (*id, e.user.clone(), e.host.to_string(), e.db.clone(), e.started.elapsed().as_secs(), e.command.clone(), e.info.clone()))
            .collect();
        rows.sort_by_key(|r| r.0);
        rows
    }
}

/// Outcome of a routed statement: either a row set or a write/DDL summary.
pub enum StatementOutcome {
    Query(QueryResult),
    Modify(ModifyResult),
    Ack,
}

/// One client's connection state: current database, current user, optional
/// in-flight transaction, and statement-scoped cancellation.
pub struct Session {
    catalog: Arc<Catalog>,
    database: Mutex<String>,
    pub user: String,
    pub thread_id: u64,
    txn: Mutex<Option<Arc<Transaction>>>,
    touched_sources: Mutex<HashSet<String>>,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>, user: impl Into<String>, database: impl Into<String>) -> Self {
        let thread_id = catalog.next_thread_id();
        let user = user.into();
        let database = database.into();
        catalog.register_process(thread_id, &user, &database);
        Self {
            catalog,
            database: Mutex::new(database),
            user,
            thread_id,
            txn: Mutex::new(None),
            touched_sources: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_thread_id(&mut self, id: u64) {
        self.thread_id = id;
    }

    pub fn current_database(&self) -> String {
        self.database.lock().unwrap().clone()
    }

    pub fn use_database(&self, name: &str) -> Result<()> {
        self.catalog.get(name)?;
        *self.database.lock().unwrap() = name.to_string();
        Ok(())
    }

    fn current_source(&self) -> Result<Arc<dyn DataSource>> {
        self.catalog.get(&self.current_database())
    }

    fn active_xid(&self) -> Option<u32> {
        self.txn.lock().unwrap().as_ref().map(|t| t.xid)
    }

    pub fn begin_tx(&self, level: IsolationLevel) -> Result<()> {
        let mut guard = self.txn.lock().unwrap();
        if guard.is_some() {
            return Err(MiniSqlError::TransactionState("a transaction is already active on this session".into()));
        }
        *guard = Some(self.catalog.txn_manager.begin(level)?);
        self.touched_sources.lock().unwrap().clear();
        Ok(())
    }

    pub fn commit_tx(&self) -> Result<()> {
        let txn = self
            .txn
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| MiniSqlError::TransactionState("no active transaction to commit".into()))?;
        let result = self.catalog.txn_manager.commit(&txn);
        self.finalize_touched_sources(txn.xid, result.is_ok());
        result
    }

    pub fn rollback_tx(&self) -> Result<()> {
        let txn = self
            .txn
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| MiniSqlError::TransactionState("no active transaction to roll back".into()))?;
        let result = self.catalog.txn_manager.rollback(&txn);
        self.finalize_touched_sources(txn.xid, false);
        result
    }

    fn finalize_touched_sources(&self, xid: u32, commit: bool) {
        let touched = std::mem::take(&mut *self.touched_sources.lock().unwrap());
        for name in touched {
            if let Ok(source) = self.catalog.get(&name) {
                if let Some(writable) = source.as_writable() {
                    if let Err(e) = writable.finalize_transaction(xid, commit) {
                        warn!("finalize_transaction failed for source '{}': {}", name, e);
                    }
                }
            }
        }
    }

    pub fn close(&self) {
        if self.txn.lock().unwrap().is_some() {
            let _ = self.rollback_tx();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.catalog.deregister_process(self.thread_id);
    }
}

impl Session {
    /// Checks whether a statement against `source` is legal given its
    /// capabilities and the current transaction state, returning the XID
    /// (if any) the statement should read/write under.
    fn resolve_xid(&self, source: &Arc<dyn DataSource>, needs_write: bool) -> Result<Option<u32>> {
        let caps: Capabilities = source.capabilities();
        if needs_write && !caps.writable {
            return Err(MiniSqlError::CapabilityError(format!("data source '{}' is read-only", source.name())));
        }
        if needs_write && caps.mvcc == crate::datasource::MvccCapability::None && !self.catalog.auto_downgrade {
            return Err(MiniSqlError::MVCCRequired(format!(
                "data source '{}' has no MVCC support and auto_downgrade is disabled",
                source.name()
            )));
        }
        if needs_write {
            self.touched_sources.lock().unwrap().insert(source.name().to_string());
        }
        Ok(self.active_xid())
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        match self.run(sql)? {
            StatementOutcome::Query(r) => Ok(r),
            _ => Err(MiniSqlError::Internal("statement did not produce a result set".into())),
        }
    }

    pub fn execute(&self, sql: &str) -> Result<ModifyResult> {
        match self.run(sql)? {
            StatementOutcome::Modify(r) => Ok(r),
            StatementOutcome::Ack => Ok(ModifyResult { rows_affected: 0, last_insert_id: 0 }),
            StatementOutcome::Query(r) => Ok(ModifyResult { rows_affected: r.rows.len() as u64, last_insert_id: 0 }),
        }
    }

    pub fn run(&self, sql: &str) -> Result<StatementOutcome> {
        let stmt = Parser::parse(sql)?;
        self.catalog.update_process(self.thread_id, &self.current_database(), "Query", Some(sql.to_string()));
        let result = self.dispatch(stmt);
        self.catalog.update_process(self.thread_id, &self.current_database(), "Sleep", None);
        result
    }

    fn dispatch(&self, stmt: Statement) -> Result<StatementOutcome> {
        match stmt {
            Statement::Select(select) => self.run_select(&select).map(StatementOutcome::Query),
            Statement::Insert(insert) => self.run_insert(&insert).map(StatementOutcome::Modify),
            Statement::Update(update) => self.run_update(&update).map(StatementOutcome::Modify),
            Statement::Delete(delete) => self.run_delete(&delete).map(StatementOutcome::Modify),
            Statement::Begin => {
                self.begin_tx(IsolationLevel::default())?;
                Ok(StatementOutcome::Ack)
            }
            Statement::Commit => {
                self.commit_tx()?;
                Ok(StatementOutcome::Ack)
            }
            Statement::Rollback => {
                self.rollback_tx()?;
                Ok(StatementOutcome::Ack)
            }
            Statement::ShowTables => self.run_show_tables().map(StatementOutcome::Query),
            Statement::ShowDatabases => self.run_show_databases().map(StatementOutcome::Query),
            Statement::ShowProcessList { full } => self.run_show_processlist(full).map(StatementOutcome::Query),
            Statement::UseDatabase(name) => {
                self.use_database(&name)?;
                Ok(StatementOutcome::Ack)
            }
            Statement::Describe(table) => self.run_describe(&table).map(StatementOutcome::Query),
            Statement::CreateTable(create) => self.run_create_table(&create).map(|_| StatementOutcome::Ack),
            Statement::DropTable(table) => {
                self.current_source()?.drop_table(&table)?;
                Ok(StatementOutcome::Ack)
            }
            Statement::TruncateTable(table) => {
                self.current_source()?.truncate_table(&table)?;
                Ok(StatementOutcome::Ack)
            }
            Statement::CreateIndex(_) | Statement::DropIndex(_) => {
                warn!("index DDL accepted but ignored: no source in this engine maintains secondary indexes");
                Ok(StatementOutcome::Ack)
            }
            Statement::AlterTable(_) => {
                warn!("ALTER TABLE accepted but ignored: data sources have no mutable engine/storage setting to change");
                Ok(StatementOutcome::Ack)
            }
            Statement::Checkpoint | Statement::Vacuum => Ok(StatementOutcome::Ack),
        }
    }

    fn run_select(&self, stmt: &SelectStmt) -> Result<QueryResult> {
        let mut stmt = stmt.clone();
        substitute_current_database(&mut stmt, &self.current_database());

        if stmt.from.is_none() {
            return self.run_select_without_source(&stmt);
        }

        let source = self.current_source()?;
        let xid = self.resolve_xid(&source, false)?;
        let registry_name = source.name().to_string();
        let is_filterable = move |_table: &str| -> bool {
            // Filter pushdown is decided per source, not per table; every
            // table within a filterable source accepts pushed predicates.
            let _ = &registry_name;
            true
        };
        let plan = optimizer::plan_select(&stmt, &is_filterable)?;
        let ctx = ExecContext::new();
        let rows = self.execute_physical(&plan, &source, xid, &ctx)?;
        let columns = result_columns(&stmt, &rows);
        let truncated = stmt.limit.map(|l| rows.len() as u64 >= l).unwrap_or(false);
        Ok(QueryResult { columns, total: rows.len() as i64, rows, truncated })
    }

    /// `SELECT <expr>, ...` with no FROM clause: evaluate each expression
    /// against an empty row, the same pattern `run_insert`/`run_create_table`
    /// use for literal-only expressions, treating the query as a single
    /// virtual row rather than routing it through a data source.
    fn run_select_without_source(&self, stmt: &SelectStmt) -> Result<QueryResult> {
        let empty_row = Row::new(Arc::new(vec![]), vec![]);
        let mut names = Vec::with_capacity(stmt.columns.len());
        let mut values = Vec::with_capacity(stmt.columns.len());
        for col in &stmt.columns {
            match col {
                SelectColumn::Expr { expr, alias } => {
                    names.push(alias.clone().unwrap_or_else(|| expr_name(expr)));
                    values.push(eval_expr(expr, &empty_row)?);
                }
                SelectColumn::Star | SelectColumn::QualifiedStar { .. } => {
                    return Err(MiniSqlError::Syntax("SELECT * requires a FROM clause".into()));
                }
            }
        }
        let columns = names.iter().cloned().map(|name| ResultColumn { name, r#type: DataType::Any, nullable: true }).collect();
        let row = Row::new(Arc::new(names), values);
        Ok(QueryResult { columns, rows: vec![row], total: 1, truncated: false })
    }

    fn execute_physical(&self, plan: &PhysicalPlan, source: &Arc<dyn DataSource>, xid: Option<u32>, ctx: &ExecContext) -> Result<Vec<Row>> {
        match plan {
            PhysicalPlan::TableScan { table, alias: _, filters, select_columns, limit, offset, parallel } => {
                let schema = source.get_table_info(table)?;
                let virtual_cols: Vec<&ColumnDef> = schema.columns.iter().filter(|c| c.is_virtual()).collect();
                let requested_virtual: Vec<&ColumnDef> = match select_columns {
                    Some(cols) => virtual_cols.into_iter().filter(|c| cols.iter().any(|s| s.eq_ignore_ascii_case(&c.name))).collect(),
                    None => virtual_cols,
                };

                // A VIRTUAL column has nothing in storage to fetch; swap it out for
                // the columns its expression reads so the source sees a real list.
                let fetch_columns = select_columns.as_ref().map(|cols| {
                    let mut expanded: Vec<String> = cols
                        .iter()
                        .filter(|s| !requested_virtual.iter().any(|c| c.name.eq_ignore_ascii_case(s)))
                        .cloned()
                        .collect();
                    for c in &requested_virtual {
                        for dep in &c.generated.as_ref().unwrap().depends_on {
                            if !expanded.iter().any(|e| e.eq_ignore_ascii_case(dep)) {
                                expanded.push(dep.clone());
                            }
                        }
                    }
                    expanded
                });

                let options = QueryOptions { select_columns: fetch_columns, filters: filters.clone(), limit: *limit, offset: *offset, xid };
                let mut rows = if *parallel {
                    let estimated = crate::optimizer::cost::estimate_scan_rows(*limit) as u64;
                    scan::parallel_scan(Arc::clone(source), table, &options, &self.catalog.pool, ctx, estimated, num_cpus())?
                } else {
                    source.query(table, &options)?
                };

                if !requested_virtual.is_empty() {
                    rows = rows.into_iter().map(|row| materialize_virtual(row, &requested_virtual)).collect::<Result<Vec<_>>>()?;
                    if let Some(cols) = select_columns {
                        let projected = Arc::new(cols.clone());
                        rows = rows.into_iter().map(|r| Row::new(Arc::clone(&projected), cols.iter().map(|c| r.get(c)).collect())).collect();
                    }
                }
                Ok(rows)
            }
            PhysicalPlan::Selection { predicates, child } => {
                let rows = self.execute_physical(child, source, xid, ctx)?;
                rows.into_iter()
                    .filter_map(|row| match predicates.iter().all(|p| crate::expr_eval::eval_predicate(p, &row).unwrap_or(false)) {
                        true => Some(Ok(row)),
                        false => None,
                    })
                    .collect()
            }
            PhysicalPlan::Projection { exprs, child } => {
                let rows = self.execute_physical(child, source, xid, ctx)?;
                rows.iter().map(|row| project_row(row, exprs)).collect()
            }
            PhysicalPlan::HashJoin { join_type, left_key, right_key, left, right } => {
                let left_rows = self.execute_physical(left, source, xid, ctx)?;
                let right_rows = self.execute_physical(right, source, xid, ctx)?;
                let left_columns = columns_of(&left_rows);
                let right_columns = columns_of(&right_rows);
                hash_join::hash_join(left_rows, left_columns, right_rows, right_columns, left_key.clone(), right_key.clone(), *join_type, &self.catalog.pool, ctx)
            }
            PhysicalPlan::HashAggregate { group_by, calls, child } => {
                let rows = self.execute_physical(child, source, xid, ctx)?;
                let calls: Vec<_> = calls.iter().map(|c| c.to_call()).collect();
                hash_agg::hash_aggregate(rows, group_by, &calls)
            }
            PhysicalPlan::Sort { keys, child } => {
                let mut rows = self.execute_physical(child, source, xid, ctx)?;
                sort_rows(&mut rows, keys)?;
                Ok(rows)
            }
            PhysicalPlan::Limit { offset, limit, child } => {
                let rows = self.execute_physical(child, source, xid, ctx)?;
                Ok(rows.into_iter().skip(*offset as usize).take(*limit as usize).collect())
            }
        }
    }

    fn run_insert(&self, stmt: &crate::parser::InsertStmt) -> Result<ModifyResult> {
        let source = self.current_source()?;
        let xid = self.resolve_xid(&source, true)?;
        let writable = source.as_writable().ok_or_else(|| MiniSqlError::CapabilityError(format!("data source '{}' cannot be written to", source.name())))?;
        let schema = source.get_table_info(&stmt.table_name)?;

        let columns: Vec<String> = match &stmt.columns {
            Some(cols) => {
                for col in cols {
                    if let Some(idx) = schema.find_column(col) {
                        if schema.columns[idx].generated.is_some() {
                            return Err(MiniSqlError::Column(format!(
                                "cannot insert into generated column '{}'",
                                col
                            )));
                        }
                    }
                }
                cols.clone()
            }
            None => schema.insertable_column_names().into_iter().map(String::from).collect(),
        };

        let mut total = ModifyResult { rows_affected: 0, last_insert_id: 0 };
        for value_list in &stmt.values {
            if value_list.len() != columns.len() {
                return Err(MiniSqlError::Column(format!(
                    "column count ({}) doesn't match value count ({})",
                    columns.len(),
                    value_list.len()
                )));
            }
            let empty_row = Row::new(Arc::new(vec![]), vec![]);
            let values: Result<Vec<Value>> = value_list.iter().map(|e| eval_expr(e, &empty_row)).collect();
            let mut row = Row::new(Arc::new(columns.clone()), values?);
            for c in &schema.columns {
                if c.is_stored_generated() {
                    let spec = c.generated.as_ref().unwrap();
                    let value = eval_expr(&spec.expr, &row)?;
                    let mut names = (*row.columns).clone();
                    names.push(c.name.clone());
                    let mut values = row.values;
                    values.push(value);
                    row = Row::new(Arc::new(names), values);
                }
            }
            let result = writable.insert(&stmt.table_name, row, xid)?;
            total.rows_affected += result.rows_affected;
            total.last_insert_id = result.last_insert_id;
        }
        Ok(total)
    }

    fn run_update(&self, stmt: &crate::parser::UpdateStmt) -> Result<ModifyResult> {
        let source = self.current_source()?;
        let xid = self.resolve_xid(&source, true)?;
        let writable = source.as_writable().ok_or_else(|| MiniSqlError::CapabilityError(format!("data source '{}' cannot be written to", source.name())))?;
        if let Ok(schema) = source.get_table_info(&stmt.table_name) {
            for (col, _) in &stmt.assignments {
                if let Some(idx) = schema.find_column(col) {
                    if schema.columns[idx].generated.is_some() {
                        return Err(MiniSqlError::Column(format!("cannot assign to generated column '{}'", col)));
                    }
                }
            }
        }
        let empty_row = Row::new(Arc::new(vec![]), vec![]);
        let assignments: Result<Vec<(String, Value)>> = stmt
            .assignments
            .iter()
            .map(|(col, expr)| eval_expr(expr, &empty_row).map(|v| (col.clone(), v)))
            .collect();
        let options = QueryOptions {
            select_columns: None,
            filters: stmt.where_clause.clone().into_iter().collect(),
            limit: None,
            offset: 0,
            xid,
        };
        writable.update(&stmt.table_name, &options, &assignments?, xid)
    }

    fn run_delete(&self, stmt: &crate::parser::DeleteStmt) -> Result<ModifyResult> {
        let source = self.current_source()?;
        let xid = self.resolve_xid(&source, true)?;
        let writable = source.as_writable().ok_or_else(|| MiniSqlError::CapabilityError(format!("data source '{}' cannot be written to", source.name())))?;
        let options = QueryOptions {
            select_columns: None,
            filters: stmt.where_clause.clone().into_iter().collect(),
            limit: None,
            offset: 0,
            xid,
        };
        writable.delete(&stmt.table_name, &options, xid)
    }

    fn run_show_tables(&self) -> Result<QueryResult> {
        let source = self.current_source()?;
        let tables = source.get_tables()?;
        let columns = vec![ResultColumn { name: "Tables".into(), r#type: DataType::Varchar(Some(255)), nullable: false }];
        let col_names = Arc::new(vec!["Tables".to_string()]);
        let rows: Vec<Row> = tables.into_iter().map(|t| Row::new(Arc::clone(&col_names), vec![Value::String(t)])).collect();
        let total = rows.len() as i64;
        Ok(QueryResult { columns, rows, total, truncated: false })
    }

    fn run_show_databases(&self) -> Result<QueryResult> {
        let columns = vec![ResultColumn { name: "Database".into(), r#type: DataType::Varchar(Some(255)), nullable: false }];
        let col_names = Arc::new(vec!["Database".to_string()]);
        let rows: Vec<Row> = self.catalog.list().into_iter().map(|name| Row::new(Arc::clone(&col_names), vec![Value::String(name)])).collect();
        let total = rows.len() as i64;
        Ok(QueryResult { columns, rows, total, truncated: false })
    }

    /// `full` controls whether the `Info` column (the statement text) is
    /// truncated to roughly 100 characters, matching MySQL's default
    /// `SHOW PROCESSLIST` behaviour versus `SHOW FULL PROCESSLIST`.
    fn run_show_processlist(&self, full: bool) -> Result<QueryResult> {
        let columns = vec![
            ResultColumn { name: "Id".into(), r#type: DataType::Integer, nullable: false },
            ResultColumn { name: "User".into(), r#type: DataType::Varchar(Some(32)), nullable: false },
            ResultColumn { name: "Host".into(), r#type: DataType::Varchar(Some(255)), nullable: false },
            ResultColumn { name: "db".into(), r#type: DataType::Varchar(Some(64)), nullable: true },
            ResultColumn { name: "Command".into(), r#type: DataType::Varchar(Some(16)), nullable: false },
            ResultColumn { name: "Time".into(), r#type: DataType::Integer, nullable: false },
            ResultColumn { name: "State".into(), r#type: DataType::Varchar(Some(64)), nullable: true },
            ResultColumn { name: "Info".into(), r#type: DataType::Text, nullable: true },
        ];
        let col_names = Arc::new(vec![
            "Id".to_string(), "User".to_string(), "Host".to_string(), "db".to_string(),
            "Command".to_string(), "Time".to_string(), "State".to_string(), "Info".to_string(),
        ]);
        let rows: Vec<Row> = self
            .catalog
            .process_list()
            .into_iter()
            .map(|(id, user, host, db, secs, command, info)| {
                let info = info.map(|s| if full || s.chars().count() <= 100 { s } else { format!("{}...", s.chars().take(100).collect::<String>()) });
                Row::new(
                    Arc::clone(&col_names),
                    vec![
                        Value::Integer(id as i64),
                        Value::String(user),
                        Value::String(host),
                        Value::String(db),
                        Value::String(command),
                        Value::Integer(secs as i64),
                        Value::Null,
                        info.map(Value::String).unwrap_or(Value::Null),
                    ],
                )
            })
            .collect();
        let total = rows.len() as i64;
        Ok(QueryResult { columns, rows, total, truncated: false })
    }

    fn run_describe(&self, table: &str) -> Result<QueryResult> {
        let source = self.current_source()?;
        let schema = source.get_table_info(table)?;
        let columns = vec![
            ResultColumn { name: "Field".into(), r#type: DataType::Varchar(Some(255)), nullable: false },
            ResultColumn { name: "Type".into(), r#type: DataType::Varchar(Some(64)), nullable: false },
            ResultColumn { name: "Null".into(), r#type: DataType::Varchar(Some(3)), nullable: false },
            ResultColumn { name: "Key".into(), r#type: DataType::Varchar(Some(3)), nullable: false },
            ResultColumn { name: "Default".into(), r#type: DataType::Varchar(Some(255)), nullable: true },
        ];
        let col_names = Arc::new(vec!["Field".to_string(), "Type".to_string(), "Null".to_string(), "Key".to_string(), "Default".to_string()]);
        let rows: Vec<Row> = schema
            .columns
            .iter()
            .map(|c: &ColumnDef| {
                Row::new(
                    Arc::clone(&col_names),
                    vec![
                        Value::String(c.name.clone()),
                        Value::String(c.data_type.to_string()),
                        Value::String(if c.nullable { "YES".into() } else { "NO".into() }),
                        Value::String(if c.primary_key { "PRI".into() } else { "".into() }),
                        c.default.clone().unwrap_or(Value::Null),
                    ],
                )
            })
            .collect();
        let total = rows.len() as i64;
        Ok(QueryResult { columns, rows, total, truncated: false })
    }

    fn run_create_table(&self, stmt: &crate::parser::CreateTableStmt) -> Result<()> {
        let source = self.current_source()?;
        if stmt.if_not_exists && source.get_table_info(&stmt.table_name).is_ok() {
            return Ok(());
        }
        let columns = stmt
            .columns
            .iter()
            .map(|c| {
                let empty_row = Row::new(Arc::new(vec![]), vec![]);
                let default = c.default.as_ref().and_then(|e| eval_expr(e, &empty_row).ok());
                let generated = c.generated.as_ref().map(|g| {
                    let mut depends_on = Vec::new();
                    referenced_columns(&g.expr, &mut depends_on);
                    depends_on.retain(|name| name != &c.name);
                    GeneratedSpec {
                        expr: g.expr.clone(),
                        kind: if g.stored { GeneratedKind::Stored } else { GeneratedKind::Virtual },
                        depends_on,
                    }
                });
                ColumnDef {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                    nullable: c.nullable,
                    default,
                    primary_key: c.primary_key,
                    auto_increment: c.auto_increment,
                    generated,
                }
            })
            .collect();
        let schema = TableSchema { name: stmt.table_name.clone(), db_name: self.current_database(), columns, auto_increment_counter: 1 };
        source.create_table(schema)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// `DATABASE()` needs the calling session's current database, which
/// `expr_eval` has no access to since it only ever sees a `Row`. Resolve it
/// here, before planning, by rewriting every `DATABASE()` call in the
/// statement into a literal.
fn substitute_current_database(stmt: &mut SelectStmt, db: &str) {
    for col in &mut stmt.columns {
        if let SelectColumn::Expr { expr, .. } = col {
            substitute_database_expr(expr, db);
        }
    }
    if let Some(expr) = &mut stmt.where_clause {
        substitute_database_expr(expr, db);
    }
    for expr in &mut stmt.group_by {
        substitute_database_expr(expr, db);
    }
    for clause in &mut stmt.order_by {
        substitute_database_expr(&mut clause.expr, db);
    }
}

fn substitute_database_expr(expr: &mut Expr, db: &str) {
    match expr {
        Expr::FunctionCall { name, args } if args.is_empty() && name.eq_ignore_ascii_case("database") => {
            *expr = Expr::Literal(Value::String(db.to_string()));
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                substitute_database_expr(a, db);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            substitute_database_expr(left, db);
            substitute_database_expr(right, db);
        }
        Expr::Not(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) => substitute_database_expr(inner, db),
        Expr::JsonAccess { expr, .. } => substitute_database_expr(expr, db),
        Expr::In { expr, values } | Expr::NotIn { expr, values } => {
            substitute_database_expr(expr, db);
            for v in values {
                substitute_database_expr(v, db);
            }
        }
        Expr::Literal(_) | Expr::Column { .. } | Expr::Placeholder(_) => {}
    }
}

fn columns_of(rows: &[Row]) -> Vec<String> {
    rows.first().map(|r| (*r.columns).clone()).unwrap_or_default()
}

/// Evaluate each VIRTUAL generated column's expression against the rest of
/// the row and append it, since virtual columns are never in the stored
/// tuple version the data source returns.
fn materialize_virtual(row: Row, virtual_cols: &[&ColumnDef]) -> Result<Row> {
    let mut row = row;
    for c in virtual_cols {
        let spec = c.generated.as_ref().unwrap();
        let value = eval_expr(&spec.expr, &row)?;
        let mut names = (*row.columns).clone();
        names.push(c.name.clone());
        let mut values = row.values;
        values.push(value);
        row = Row::new(Arc::new(names), values);
    }
    Ok(row)
}

fn project_row(row: &Row, exprs: &[(Expr, Option<String>)]) -> Result<Row> {
    if exprs.len() == 1 && matches!(exprs[0].0, Expr::Column { ref name, .. } if name == "*") {
        return Ok(row.clone());
    }
    let mut names = Vec::with_capacity(exprs.len());
    let mut values = Vec::with_capacity(exprs.len());
    for (expr, alias) in exprs {
        names.push(alias.clone().unwrap_or_else(|| expr_name(expr)));
        values.push(eval_expr(expr, row)?);
    }
    Ok(Row::new(Arc::new(names), values))
}

fn sort_rows(rows: &mut [Row], keys: &[(Expr, bool)]) -> Result<()> {
    let mut err = None;
    rows.sort_by(|a, b| {
        for (expr, ascending) in keys {
            let (va, vb) = match (eval_expr(expr, a), eval_expr(expr, b)) {
                (Ok(va), Ok(vb)) => (va, vb),
                (Err(e), _) | (_, Err(e)) => {
                    err.get_or_insert(e);
                    return std::cmp::Ordering::Equal;
                }
            };
            let ordering = va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn result_columns(stmt: &SelectStmt, rows: &[Row]) -> Vec<ResultColumn> {
    if let Some(row) = rows.first() {
        return row.columns.iter().map(|name| ResultColumn { name: name.clone(), r#type: DataType::Any, nullable: true }).collect();
    }
    stmt.columns
        .iter()
        .map(|col| match col {
            crate::parser::SelectColumn::Star => ResultColumn { name: "*".into(), r#type: DataType::Any, nullable: true },
            crate::parser::SelectColumn::QualifiedStar { table } => ResultColumn { name: format!("{}.*", table), r#type: DataType::Any, nullable: true },
            crate::parser::SelectColumn::Expr { expr, alias } => {
                ResultColumn { name: alias.clone().unwrap_or_else(|| expr_name(expr)), r#type: DataType::Any, nullable: true }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::memory::MemoryTableStore;
    use crate::mvcc::MvccConfig;

    fn test_catalog() -> Arc<Catalog> {
        let manager = TransactionManager::new(MvccConfig { gc_interval_seconds: 3600, ..MvccConfig::default() });
        Catalog::new(manager, WorkerPool::new(2), true)
    }

    fn with_users_table(catalog: &Arc<Catalog>) {
        let store = MemoryTableStore::new("default", Arc::clone(&catalog.txn_manager));
        catalog.register("default", Arc::new(store)).unwrap();
        let session = Session::new(Arc::clone(catalog), "root", "default");
        session
            .run_create_table(&crate::parser::CreateTableStmt {
                table_name: "users".into(),
                columns: vec![
                    crate::parser::ColumnDefAst {
                        name: "id".into(),
                        data_type: DataType::Integer,
                        nullable: false,
                        primary_key: true,
                        auto_increment: false,
                        default: None,
                        generated: None,
                    },
                    crate::parser::ColumnDefAst {
                        name: "name".into(),
                        data_type: DataType::Text,
                        nullable: true,
                        primary_key: false,
                        auto_increment: false,
                        default: None,
                        generated: None,
                    },
                ],
                if_not_exists: false,
                engine: None,
            })
            .unwrap();
    }

    #[test]
    fn insert_then_select_round_trips() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        let affected = session.execute("INSERT INTO users (id, name) VALUES (1, 'alice')").unwrap();
        assert_eq!(affected.rows_affected, 1);
        let result = session.query("SELECT * FROM users").unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn commit_without_begin_is_a_transaction_state_error() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(catalog, "root", "default");
        assert!(matches!(session.commit_tx(), Err(MiniSqlError::TransactionState(_))));
    }

    #[test]
    fn stored_generated_column_is_computed_on_insert() {
        let catalog = test_catalog();
        let store = MemoryTableStore::new("default", Arc::clone(&catalog.txn_manager));
        catalog.register("default", Arc::new(store)).unwrap();
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        session
            .execute("CREATE TABLE orders (qty INTEGER, price INTEGER, total INTEGER GENERATED ALWAYS AS (qty * price) STORED)")
            .unwrap();
        session.execute("INSERT INTO orders (qty, price) VALUES (3, 10)").unwrap();
        let result = session.query("SELECT total FROM orders").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("total"), Value::Integer(30));
    }

    #[test]
    fn inserting_into_a_generated_column_is_rejected() {
        let catalog = test_catalog();
        let store = MemoryTableStore::new("default", Arc::clone(&catalog.txn_manager));
        catalog.register("default", Arc::new(store)).unwrap();
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        session
            .execute("CREATE TABLE orders (qty INTEGER, price INTEGER, total INTEGER GENERATED ALWAYS AS (qty * price) STORED)")
            .unwrap();
        let err = session.execute("INSERT INTO orders (qty, price, total) VALUES (3, 10, 999)");
        assert!(matches!(err, Err(MiniSqlError::Column(_))));
    }

    #[test]
    fn virtual_generated_column_is_materialized_on_select() {
        let catalog = test_catalog();
        let store = MemoryTableStore::new("default", Arc::clone(&catalog.txn_manager));
        catalog.register("default", Arc::new(store)).unwrap();
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        session
            .execute("CREATE TABLE orders (qty INTEGER, price INTEGER, total INTEGER GENERATED ALWAYS AS (qty * price))")
            .unwrap();
        session.execute("INSERT INTO orders (qty, price) VALUES (3, 10)").unwrap();
        let result = session.query("SELECT total FROM orders").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("total"), Value::Integer(30));
    }

    #[test]
    fn write_against_read_only_source_is_a_capability_error() {
        let catalog = test_catalog();
        let store = crate::datasource::catalog_source::CatalogDataSource::new(catalog.registry(), "user");
        catalog.register("information_schema", Arc::new(store)).unwrap();
        let session = Session::new(catalog, "user", "information_schema");
        let err = session.execute("DELETE FROM tables WHERE name = 'x'");
        assert!(matches!(err, Err(MiniSqlError::CapabilityError(_))));
    }

    #[test]
    fn use_switches_the_current_database() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let store = MemoryTableStore::new("other", Arc::clone(&catalog.txn_manager));
        catalog.register("other", Arc::new(store)).unwrap();
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        assert_eq!(session.current_database(), "default");
        session.execute("USE other").unwrap();
        assert_eq!(session.current_database(), "other");
        assert!(matches!(session.execute("USE nonexistent"), Err(MiniSqlError::Table(_))));
    }

    #[test]
    fn show_databases_lists_registered_sources() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        let result = session.query("SHOW DATABASES").unwrap();
        let names: Vec<Value> = result.rows.iter().map(|r| r.get("Database")).collect();
        assert!(names.contains(&Value::String("default".into())));
    }

    #[test]
    fn select_database_function_returns_current_database() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        let result = session.query("SELECT DATABASE()").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].values[0], Value::String("default".into()));
    }

    #[test]
    fn show_processlist_includes_the_calling_session() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        let result = session.query("SHOW PROCESSLIST").unwrap();
        let ids: Vec<Value> = result.rows.iter().map(|r| r.get("Id")).collect();
        assert!(ids.contains(&Value::Integer(session.thread_id as i64)));
    }

    #[test]
    fn closing_a_session_removes_it_from_the_process_list() {
        let catalog = test_catalog();
        with_users_table(&catalog);
        let session = Session::new(Arc::clone(&catalog), "root", "default");
        let thread_id = session.thread_id;
        drop(session);
        let onlooker = Session::new(Arc::clone(&catalog), "root", "default");
        let result = onlooker.query("SHOW PROCESSLIST").unwrap();
        let ids: Vec<Value> = result.rows.iter().map(|r| r.get("Id")).collect();
        assert!(!ids.contains(&Value::Integer(thread_id as i64)));
    }
}
