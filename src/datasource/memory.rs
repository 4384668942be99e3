//! In-memory MVCC table store.
//!
//! Grounded on `storage.rs`'s `StorageEngine`/`TableData` (catalog +
//! per-table row map behind `RwLock`s, surrogate row IDs, primary-key
//! uniqueness checks done by scan) but rows are now per-table version
//! chains instead of a flat `HashMap<u64, Row>`, and every read/write goes
//! through a shared `TransactionManager` for visibility and conflict
//! detection. Composite secondary indexes from the teacher are dropped:
//! nothing in the expanded spec calls for index-accelerated lookups, and
//! carrying BTreeMap index maintenance through MVCC's version chains would
//! add real complexity (expire old index entries, add new ones, keep them
//! in sync with rollback) for a capability nothing exercises.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;

use crate::datasource::{Capabilities, DataSource, FilterableDataSource, MVCCDataSource, MvccCapability, QueryOptions, WritableDataSource};
use crate::error::{MiniSqlError, Result};
use crate::expr_eval::eval_predicate;
use crate::mvcc::{is_visible, Transaction, TransactionManager, TupleVersion, VersionChain, VisibilityContext, Xid};
use crate::types::{ModifyResult, Row, TableSchema, Value};

struct Table {
    schema: TableSchema,
    rows: HashMap<u64, VersionChain>,
    next_row_id: u64,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: HashMap::new(),
            next_row_id: 1,
        }
    }
}

/// An in-memory table store backed by the MVCC engine.
pub struct MemoryTableStore {
    source_name: String,
    txn_manager: Arc<TransactionManager>,
    tables: Arc<RwLock<HashMap<String, Table>>>,
    connected: AtomicBool,
}

impl MemoryTableStore {
    pub fn new(source_name: impl Into<String>, txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            source_name: source_name.into(),
            txn_manager,
            tables: Arc::new(RwLock::new(HashMap::new())),
            connected: AtomicBool::new(true),
        }
    }

    fn reading_context(&self, xid: Option<Xid>) -> Result<(crate::mvcc::Snapshot, Option<Arc<Transaction>>)> {
        match xid {
            Some(x) => {
                let txn = self.txn_manager.get(x).ok_or_else(|| {
                    MiniSqlError::TransactionState(format!("transaction {} is not active", x))
                })?;
                let snap = txn.snapshot();
                Ok((snap, Some(txn)))
            }
            None => Ok((self.txn_manager.autocommit_snapshot(), None)),
        }
    }

    fn resolve_or_begin(&self, xid: Option<Xid>) -> Result<(Arc<Transaction>, bool)> {
        match xid {
            Some(x) => {
                let txn = self.txn_manager.get(x).ok_or_else(|| {
                    MiniSqlError::TransactionState(format!("transaction {} is not active", x))
                })?;
                Ok((txn, false))
            }
            None => Ok((self.txn_manager.begin(crate::mvcc::IsolationLevel::ReadCommitted)?, true)),
        }
    }

    fn finish<T>(&self, ephemeral: bool, txn: &Transaction, result: Result<T>) -> Result<T> {
        if ephemeral {
            match &result {
                Ok(_) => self.txn_manager.commit(txn)?,
                Err(_) => {
                    let _ = self.txn_manager.rollback(txn);
                }
            }
        }
        result
    }

    /// Rows currently visible to `txn`/the autocommit reader, as `(row_id, row)` pairs.
    fn visible_rows(
        &self,
        table: &Table,
        snapshot: &crate::mvcc::Snapshot,
        reader_xid: Xid,
        reader_command: u32,
    ) -> Vec<(u64, Row)> {
        let ctx = VisibilityContext {
            commit_log: self.txn_manager.commit_log(),
            reader_xid,
            reader_command,
        };
        let mut out = Vec::new();
        for (row_id, chain) in table.rows.iter() {
            for (i, version) in chain.versions.iter().enumerate() {
                if is_visible(snapshot, &ctx, version.xmin, version.xmax, version.cmin, version.cmax, i == 0) {
                    out.push((*row_id, version.row.clone()));
                    break;
                }
            }
        }
        out.sort_by_key(|(id, _)| *id);
        out
    }

    fn check_primary_key_violation(&self, table: &Table, row: &Row, exclude_row_id: Option<u64>, snapshot: &crate::mvcc::Snapshot, reader_xid: Xid, reader_command: u32) -> Result<()> {
        let pk_indices = table.schema.primary_key_columns();
        if pk_indices.is_empty() {
            return Ok(());
        }
        let pk_names: Vec<&str> = pk_indices.iter().map(|&i| table.schema.columns[i].name.as_str()).collect();
        if pk_names.iter().any(|n| row.get(n).is_null()) {
            return Ok(());
        }
        for (row_id, existing) in self.visible_rows(table, snapshot, reader_xid, reader_command) {
            if Some(row_id) == exclude_row_id {
                continue;
            }
            if pk_names.iter().all(|n| existing.get(n) == row.get(n)) {
                return Err(MiniSqlError::Table(format!(
                    "Duplicate entry for primary key in table '{}'",
                    table.schema.name
                )));
            }
        }
        Ok(())
    }

    fn undo_insert(&self, table_name: &str, row_id: u64) -> crate::mvcc::UndoAction {
        let tables = Arc::clone(&self.tables);
        let key = table_name.to_string();
        Box::new(move || {
            if let Ok(mut tables) = tables.write() {
                if let Some(table) = tables.get_mut(&key) {
                    if let Some(chain) = table.rows.get_mut(&row_id) {
                        if !chain.versions.is_empty() {
                            chain.versions.remove(0);
                        }
                        if chain.versions.is_empty() {
                            table.rows.remove(&row_id);
                        }
                    }
                }
            }
        })
    }

    fn undo_expire(&self, table_name: &str, row_id: u64, pushed_new_version: bool) -> crate::mvcc::UndoAction {
        let tables = Arc::clone(&self.tables);
        let key = table_name.to_string();
        Box::new(move || {
            if let Ok(mut tables) = tables.write() {
                if let Some(table) = tables.get_mut(&key) {
                    if let Some(chain) = table.rows.get_mut(&row_id) {
                        if pushed_new_version && !chain.versions.is_empty() {
                            chain.versions.remove(0);
                        }
                        if let Some(prev) = chain.versions.first_mut() {
                            prev.xmax = 0;
                            prev.cmax = 0;
                            prev.expired = false;
                        }
                    }
                }
            }
        })
    }
}

impl DataSource for MemoryTableStore {
    fn name(&self) -> &str {
        &self.source_name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            writable: true,
            mvcc: MvccCapability::Full,
            filterable: true,
        }
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().unwrap().keys().cloned().collect())
    }

    fn as_writable(&self) -> Option<&dyn WritableDataSource> {
        Some(self)
    }

    fn as_mvcc(&self) -> Option<&dyn MVCCDataSource> {
        Some(self)
    }

    fn get_table_info(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| MiniSqlError::table_not_found(table))
    }

    fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>> {
        let (snapshot, txn) = self.reading_context(options.xid)?;
        let reader_xid = txn.as_ref().map(|t| t.xid).unwrap_or(0);
        let reader_command = txn.as_ref().map(|t| t.current_command()).unwrap_or(0);

        let tables = self.tables.read().unwrap();
        let t = tables.get(table).ok_or_else(|| MiniSqlError::table_not_found(table))?;

        let mut rows = Vec::new();
        for (row_id, row) in self.visible_rows(t, &snapshot, reader_xid, reader_command) {
            let mut matched = true;
            for f in &options.filters {
                if !eval_predicate(f, &row)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                if let Some(txn) = &txn {
                    txn.record_read(table, row_id);
                }
                rows.push(row);
            }
        }

        if let Some(txn) = &txn {
            if !options.filters.is_empty() {
                let filters = options.filters.clone();
                txn.register_predicate(
                    table,
                    Arc::new(move |row: &Row| filters.iter().all(|f| eval_predicate(f, row).unwrap_or(true))),
                );
            }
        }

        if let Some(cols) = &options.select_columns {
            let projected = Arc::new(cols.clone());
            rows = rows
                .into_iter()
                .map(|r| Row::new(Arc::clone(&projected), cols.iter().map(|c| r.get(c)).collect()))
                .collect();
        }

        let offset = options.offset as usize;
        rows = rows.into_iter().skip(offset).collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(&schema.name) {
            return Err(MiniSqlError::table_already_exists(&schema.name));
        }
        let name = schema.name.clone();
        tables.insert(name, Table::new(schema));
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.remove(table).ok_or_else(|| MiniSqlError::table_not_found(table))?;
        Ok(())
    }

    fn truncate_table(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let t = tables.get_mut(table).ok_or_else(|| MiniSqlError::table_not_found(table))?;
        t.rows.clear();
        t.next_row_id = 1;
        t.schema.auto_increment_counter = 1;
        Ok(())
    }
}

impl FilterableDataSource for MemoryTableStore {}

impl WritableDataSource for MemoryTableStore {
    fn insert(&self, table_name: &str, mut row: Row, xid: Option<Xid>) -> Result<ModifyResult> {
        let (txn, ephemeral) = self.resolve_or_begin(xid)?;
        let result = (|| {
            let mut tables = self.tables.write().unwrap();
            let t = tables.get_mut(table_name).ok_or_else(|| MiniSqlError::table_not_found(table_name))?;

            if let Some(ai_idx) = t.schema.auto_increment_column() {
                let ai_name = t.schema.columns[ai_idx].name.clone();
                if row.get(&ai_name).is_null() {
                    let next = t.schema.auto_increment_counter as i64;
                    let pos = row.columns.iter().position(|c| c.eq_ignore_ascii_case(&ai_name));
                    if let Some(pos) = pos {
                        row.values[pos] = Value::Integer(next);
                    }
                    t.schema.auto_increment_counter += 1;
                } else if let Value::Integer(v) = row.get(&ai_name) {
                    if v as u64 >= t.schema.auto_increment_counter {
                        t.schema.auto_increment_counter = v as u64 + 1;
                    }
                }
            }

            let snapshot = txn.snapshot();
            self.check_primary_key_violation(t, &row, None, &snapshot, txn.xid, txn.current_command())?;

            let row_id = t.next_row_id;
            t.next_row_id += 1;

            self.txn_manager.acquire_write_intent(&txn, table_name, row_id)?;

            let version = TupleVersion {
                row: row.clone(),
                xmin: txn.xid,
                xmax: 0,
                cmin: txn.current_command(),
                cmax: 0,
                expired: false,
            };
            let mut chain = VersionChain::new();
            chain.push_newest(version);
            t.rows.insert(row_id, chain);
            drop(tables);

            txn.push_undo(self.undo_insert(table_name, row_id));
            self.txn_manager.notify_write(txn.xid, table_name, &row);
            debug!("insert into {} row {}", table_name, row_id);

            Ok(ModifyResult {
                rows_affected: 1,
                last_insert_id: row_id,
            })
        })();
        self.finish(ephemeral, &txn, result)
    }

    fn update(
        &self,
        table_name: &str,
        options: &QueryOptions,
        assignments: &[(String, Value)],
        xid: Option<Xid>,
    ) -> Result<ModifyResult> {
        let (txn, ephemeral) = self.resolve_or_begin(xid)?;
        let result = (|| {
            let mut tables = self.tables.write().unwrap();
            let t = tables.get_mut(table_name).ok_or_else(|| MiniSqlError::table_not_found(table_name))?;
            let snapshot = txn.snapshot();
            let candidates = self.visible_rows(t, &snapshot, txn.xid, txn.current_command());

            let mut affected = 0u64;
            for (row_id, old_row) in candidates {
                let mut matched = true;
                for f in &options.filters {
                    if !eval_predicate(f, &old_row)? {
                        matched = false;
                        break;
                    }
                }
                if !matched {
                    continue;
                }

                self.txn_manager.acquire_write_intent(&txn, table_name, row_id)?;

                let mut new_values = old_row.values.clone();
                for (col, val) in assignments {
                    if let Some(pos) = old_row.columns.iter().position(|c| c.eq_ignore_ascii_case(col)) {
                        new_values[pos] = val.clone();
                    }
                }
                let new_row = Row::new(Arc::clone(&old_row.columns), new_values);

                self.check_primary_key_violation(t, &new_row, Some(row_id), &snapshot, txn.xid, txn.current_command())?;

                let chain = t.rows.get_mut(&row_id).expect("visible row must have a chain");
                if let Some(newest) = chain.versions.first_mut() {
                    newest.xmax = txn.xid;
                    newest.cmax = txn.current_command();
                    newest.expired = true;
                }
                chain.push_newest(TupleVersion {
                    row: new_row.clone(),
                    xmin: txn.xid,
                    xmax: 0,
                    cmin: txn.current_command(),
                    cmax: 0,
                    expired: false,
                });

                txn.push_undo(self.undo_expire(table_name, row_id, true));
                self.txn_manager.notify_write(txn.xid, table_name, &old_row);
                self.txn_manager.notify_write(txn.xid, table_name, &new_row);
                affected += 1;
            }

            Ok(ModifyResult {
                rows_affected: affected,
                last_insert_id: 0,
            })
        })();
        self.finish(ephemeral, &txn, result)
    }

    fn delete(&self, table_name: &str, options: &QueryOptions, xid: Option<Xid>) -> Result<ModifyResult> {
        let (txn, ephemeral) = self.resolve_or_begin(xid)?;
        let result = (|| {
            let mut tables = self.tables.write().unwrap();
            let t = tables.get_mut(table_name).ok_or_else(|| MiniSqlError::table_not_found(table_name))?;
            let snapshot = txn.snapshot();
            let candidates = self.visible_rows(t, &snapshot, txn.xid, txn.current_command());

            let mut affected = 0u64;
            for (row_id, old_row) in candidates {
                let mut matched = true;
                for f in &options.filters {
                    if !eval_predicate(f, &old_row)? {
                        matched = false;
                        break;
                    }
                }
                if !matched {
                    continue;
                }

                self.txn_manager.acquire_write_intent(&txn, table_name, row_id)?;

                let chain = t.rows.get_mut(&row_id).expect("visible row must have a chain");
                if let Some(newest) = chain.versions.first_mut() {
                    newest.xmax = txn.xid;
                    newest.cmax = txn.current_command();
                    newest.expired = true;
                }

                txn.push_undo(self.undo_expire(table_name, row_id, false));
                self.txn_manager.notify_write(txn.xid, table_name, &old_row);
                affected += 1;
            }

            Ok(ModifyResult {
                rows_affected: affected,
                last_insert_id: 0,
            })
        })();
        self.finish(ephemeral, &txn, result)
    }
}

impl MVCCDataSource for MemoryTableStore {
    fn transaction_manager(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.txn_manager)
    }

    fn gc_expired_versions(&self, watermark: Xid) -> usize {
        let commit_log = self.txn_manager.commit_log();
        let mut removed = 0usize;
        let mut tables = self.tables.write().unwrap();
        for table in tables.values_mut() {
            table.rows.retain(|_, chain| {
                chain.versions.retain(|v| {
                    let dead = v.expired && v.xmax != 0 && v.xmax < watermark && commit_log.is_committed(v.xmax);
                    if dead {
                        removed += 1;
                    }
                    !dead
                });
                !chain.versions.is_empty()
            });
        }
        if removed > 0 {
            debug!("gc reclaimed {} expired tuple versions in source '{}'", removed, self.source_name);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::{IsolationLevel, MvccConfig};
    use crate::types::{ColumnDef, DataType};

    fn schema(name: &str) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            db_name: "minisql".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    data_type: DataType::Integer,
                    nullable: false,
                    default: None,
                    primary_key: true,
                    auto_increment: true,
                    generated: None,
                },
                ColumnDef {
                    name: "name".into(),
                    data_type: DataType::Text,
                    nullable: true,
                    default: None,
                    primary_key: false,
                    auto_increment: false,
                    generated: None,
                },
            ],
            auto_increment_counter: 1,
        }
    }

    fn row(cols: &[&str], id: Value, name: Value) -> Row {
        Row::new(Arc::new(cols.iter().map(|s| s.to_string()).collect()), vec![id, name])
    }

    fn store() -> MemoryTableStore {
        let mgr = TransactionManager::new(MvccConfig {
            gc_interval_seconds: 3600,
            ..MvccConfig::default()
        });
        MemoryTableStore::new("mem", mgr)
    }

    #[test]
    fn autocommit_insert_then_query_sees_the_row() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        s.insert("users", row(&["id", "name"], Value::Null, Value::String("alice".into())), None).unwrap();
        let rows = s.query("users", &QueryOptions::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Value::Integer(1));
    }

    #[test]
    fn uncommitted_insert_invisible_to_other_transaction() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        let writer = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        writer.advance_command();
        s.insert("users", row(&["id", "name"], Value::Null, Value::String("bob".into())), Some(writer.xid)).unwrap();

        let reader = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        reader.advance_command();
        let rows = s.query("users", &QueryOptions { xid: Some(reader.xid), ..Default::default() }).unwrap();
        assert!(rows.is_empty());

        s.transaction_manager().commit(&writer).unwrap();
        let rows = s.query("users", &QueryOptions::default()).unwrap();
        assert_eq!(rows.len(), 1);
        s.transaction_manager().rollback(&reader).unwrap();
    }

    #[test]
    fn rollback_undoes_insert() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        let txn = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        txn.advance_command();
        s.insert("users", row(&["id", "name"], Value::Null, Value::String("carl".into())), Some(txn.xid)).unwrap();
        s.transaction_manager().rollback(&txn).unwrap();
        let rows = s.query("users", &QueryOptions::default()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn concurrent_update_of_same_row_conflicts() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        s.insert("users", row(&["id", "name"], Value::Integer(1), Value::String("a".into())), None).unwrap();

        let a = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        a.advance_command();
        let b = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        b.advance_command();

        let opts = QueryOptions { filters: vec![], xid: Some(a.xid), ..Default::default() };
        s.update("users", &opts, &[("name".into(), Value::String("a2".into()))], Some(a.xid)).unwrap();

        let opts_b = QueryOptions { filters: vec![], xid: Some(b.xid), ..Default::default() };
        let err = s.update("users", &opts_b, &[("name".into(), Value::String("b2".into()))], Some(b.xid));
        assert!(err.is_err());
        s.transaction_manager().commit(&a).unwrap();
        let _ = s.transaction_manager().rollback(&b);
    }

    #[test]
    fn primary_key_duplicate_is_rejected() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        s.insert("users", row(&["id", "name"], Value::Integer(1), Value::String("a".into())), None).unwrap();
        let err = s.insert("users", row(&["id", "name"], Value::Integer(1), Value::String("dup".into())), None);
        assert!(err.is_err());
    }

    #[test]
    fn gc_drops_expired_versions_committed_below_the_watermark() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        s.insert("users", row(&["id", "name"], Value::Integer(1), Value::String("a".into())), None).unwrap();
        s.update("users", &QueryOptions::default(), &[("name".into(), Value::String("b".into()))], None).unwrap();

        {
            let tables = s.tables.read().unwrap();
            assert_eq!(tables.get("users").unwrap().rows.get(&1).unwrap().versions.len(), 2);
        }

        let watermark = s.transaction_manager().oldest_live_xmin();
        let removed = s.gc_expired_versions(watermark);
        assert_eq!(removed, 1);

        let tables = s.tables.read().unwrap();
        let chain = tables.get("users").unwrap().rows.get(&1).unwrap();
        assert_eq!(chain.versions.len(), 1);
        assert!(!chain.versions[0].expired);
    }

    #[test]
    fn gc_leaves_expired_versions_above_the_watermark_alone() {
        let s = store();
        s.create_table(schema("users")).unwrap();
        s.insert("users", row(&["id", "name"], Value::Integer(1), Value::String("a".into())), None).unwrap();

        let writer = s.transaction_manager().begin(IsolationLevel::ReadCommitted).unwrap();
        writer.advance_command();
        s.update("users", &QueryOptions::default(), &[("name".into(), Value::String("b".into()))], Some(writer.xid)).unwrap();
        s.transaction_manager().commit(&writer).unwrap();

        // A watermark older than the update's xmax must not reclaim it: a
        // snapshot taken before the update committed could still need it.
        let removed = s.gc_expired_versions(writer.xid);
        assert_eq!(removed, 0);
    }
}
