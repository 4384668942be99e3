//! Transaction manager: XID allocation, snapshots, commit/rollback, GC.
//!
//! Holds no owning references to per-table storage; tables register their
//! own undo actions on the `Transaction` they're writing under and the
//! manager only ever touches XIDs, snapshots and the commit log itself. The
//! one exception is GC: the manager is handed a read-only `SourceRegistry`
//! handle (`set_source_registry`) purely so its background thread can ask
//! each registered `MVCCDataSource` to prune its own version chains; it
//! still owns none of that storage and never reaches into it outside a GC
//! pass.

use super::commit_log::{CommitLog, TxnStatus};
use super::snapshot::{IsolationLevel, Snapshot};
use super::xid::{Xid, XID_FIRST_NORMAL};
use crate::datasource::SourceRegistry;
use crate::error::{MiniSqlError, Result};
use crate::types::Row;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Tunables the manager needs; a subset of the engine's top-level config.
#[derive(Debug, Clone)]
pub struct MvccConfig {
    pub max_active_transactions: u32,
    pub gc_interval_seconds: u64,
    pub gc_age_seconds: u64,
    pub xid_wrap_warn_threshold: u32,
}

impl Default for MvccConfig {
    fn default() -> Self {
        Self {
            max_active_transactions: 10_000,
            gc_interval_seconds: 300,
            gc_age_seconds: 3600,
            xid_wrap_warn_threshold: 100_000,
        }
    }
}

/// An undo action queued by a data source when it mutates a version chain
/// under a transaction; run in reverse order on rollback.
pub type UndoAction = Box<dyn FnOnce() + Send>;

/// A predicate a Serializable reader evaluated, kept around so a concurrent
/// writer can tell the manager "a row you might care about just changed".
pub type PredicateCheck = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    snapshot: RwLock<Snapshot>,
    command_counter: AtomicU32,
    undo_log: Mutex<Vec<UndoAction>>,
    write_set: Mutex<HashSet<(String, u64)>>,
    read_set: Mutex<HashSet<(String, u64)>>,
    predicate_checks: Mutex<Vec<(String, PredicateCheck)>>,
    pub created_at: Instant,
    aborted_by_conflict: AtomicBool,
}

impl Transaction {
    pub fn current_command(&self) -> u32 {
        self.command_counter.load(Ordering::SeqCst)
    }

    /// Advance to the next command; called once per statement so that a
    /// statement's own writes are invisible to itself but visible to later
    /// statements in the same transaction.
    pub fn advance_command(&self) -> u32 {
        self.command_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().unwrap().clone()
    }

    fn set_snapshot(&self, snap: Snapshot) {
        *self.snapshot.write().unwrap() = snap;
    }

    pub fn push_undo(&self, action: UndoAction) {
        self.undo_log.lock().unwrap().push(action);
    }

    pub fn record_write(&self, table: &str, row_key: u64) {
        self.write_set
            .lock()
            .unwrap()
            .insert((table.to_string(), row_key));
    }

    pub fn record_read(&self, table: &str, row_key: u64) {
        if self.level == IsolationLevel::Serializable {
            self.read_set
                .lock()
                .unwrap()
                .insert((table.to_string(), row_key));
        }
    }

    pub fn register_predicate(&self, table: &str, check: PredicateCheck) {
        if self.level == IsolationLevel::Serializable {
            self.predicate_checks
                .lock()
                .unwrap()
                .push((table.to_string(), check));
        }
    }

    fn predicate_checks_for(&self, table: &str) -> Vec<PredicateCheck> {
        self.predicate_checks
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn mark_conflicted(&self) {
        self.aborted_by_conflict.store(true, Ordering::SeqCst);
    }
}

pub struct TransactionManager {
    config: MvccConfig,
    next_xid: AtomicU32,
    commit_log: CommitLog,
    live: RwLock<HashMap<Xid, Arc<Transaction>>>,
    write_intents: RwLock<HashMap<(String, u64), Xid>>,
    shutdown: Arc<AtomicBool>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
    source_registry: RwLock<Option<SourceRegistry>>,
}

impl TransactionManager {
    pub fn new(config: MvccConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            next_xid: AtomicU32::new(XID_FIRST_NORMAL),
            commit_log: CommitLog::new(),
            live: RwLock::new(HashMap::new()),
            write_intents: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            gc_handle: Mutex::new(None),
            source_registry: RwLock::new(None),
        });
        manager.spawn_gc_thread();
        manager
    }

    /// Give the GC thread a handle to the data-source registry so it can
    /// physically prune expired tuple versions alongside commit-log
    /// truncation. Called once, by the catalog that owns both.
    pub fn set_source_registry(&self, registry: SourceRegistry) {
        *self.source_registry.write().unwrap() = Some(registry);
    }

    fn spawn_gc_thread(self: &Arc<Self>) {
        let mgr = Arc::clone(self);
        let interval = Duration::from_secs(mgr.config.gc_interval_seconds.max(1));
        let handle = std::thread::Builder::new()
            .name("mvcc-gc".into())
            .spawn(move || loop {
                if mgr.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(interval);
                if mgr.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                mgr.run_gc_pass();
            })
            .expect("failed to spawn GC thread");
        *self.gc_handle.lock().unwrap() = Some(handle);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn commit_log(&self) -> &CommitLog {
        &self.commit_log
    }

    /// Lowest xmin across every live snapshot, or the next XID to be handed
    /// out if no transaction is running. Used by GC to decide what is safe
    /// to reclaim and by callers that want to size retention.
    pub fn oldest_live_xmin(&self) -> Xid {
        let live = self.live.read().unwrap();
        live.values()
            .map(|t| t.snapshot().xmin)
            .min()
            .unwrap_or_else(|| self.next_xid.load(Ordering::SeqCst))
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Arc<Transaction>> {
        {
            let live = self.live.read().unwrap();
            if live.len() as u32 >= self.config.max_active_transactions {
                return Err(MiniSqlError::ResourceExhausted(
                    "too many concurrent transactions".into(),
                ));
            }
        }

        let xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        if Xid::MAX - xid < self.config.xid_wrap_warn_threshold {
            warn!(
                "XID {} is within {} of wraparound; consider restarting the engine",
                xid, self.config.xid_wrap_warn_threshold
            );
        }

        self.commit_log.register_in_progress(xid);
        let snapshot = self.build_snapshot(xid, level);

        let txn = Arc::new(Transaction {
            xid,
            level,
            snapshot: RwLock::new(snapshot),
            command_counter: AtomicU32::new(0),
            undo_log: Mutex::new(Vec::new()),
            write_set: Mutex::new(HashSet::new()),
            read_set: Mutex::new(HashSet::new()),
            predicate_checks: Mutex::new(Vec::new()),
            created_at: Instant::now(),
            aborted_by_conflict: AtomicBool::new(false),
        });

        self.live.write().unwrap().insert(xid, Arc::clone(&txn));
        info!("txn {} begin ({:?})", xid, level);
        Ok(txn)
    }

    fn build_snapshot(&self, new_xid: Xid, level: IsolationLevel) -> Snapshot {
        let live = self.live.read().unwrap();
        let xip: HashSet<Xid> = live.keys().copied().collect();
        let xmin = xip.iter().copied().min().unwrap_or(new_xid);
        Snapshot::new(xmin, new_xid, xip, level)
    }

    /// Re-snapshot a Read Committed transaction at the start of a new statement.
    pub fn refresh_statement_snapshot(&self, txn: &Transaction) {
        if txn.level == IsolationLevel::ReadCommitted {
            let snap = self.build_snapshot(txn.xid, txn.level);
            txn.set_snapshot(snap);
        }
    }

    /// A snapshot for a statement running outside any explicit transaction:
    /// sees every row committed as of this instant, under its own throwaway
    /// XID so no live transaction's write-set collides with it.
    pub fn autocommit_snapshot(&self) -> Snapshot {
        let probe_xid = self.next_xid.load(Ordering::SeqCst);
        self.build_snapshot(probe_xid, IsolationLevel::ReadCommitted)
    }

    /// Look up a live transaction by XID, e.g. to resume a session's
    /// in-progress transaction across statements.
    pub fn get(&self, xid: Xid) -> Option<Arc<Transaction>> {
        self.live.read().unwrap().get(&xid).cloned()
    }

    /// Acquire a write intent on `table:row_key` for `txn`. Fails immediately
    /// (no waiting) if another live transaction already holds it.
    pub fn acquire_write_intent(&self, txn: &Transaction, table: &str, row_key: u64) -> Result<()> {
        let key = (table.to_string(), row_key);
        let mut intents = self.write_intents.write().unwrap();
        match intents.get(&key) {
            Some(holder) if *holder != txn.xid => Err(MiniSqlError::WriteConflict(format!(
                "Row '{}:{}' is being written by another transaction",
                table, row_key
            ))),
            _ => {
                intents.insert(key, txn.xid);
                txn.record_write(table, row_key);
                Ok(())
            }
        }
    }

    /// Notify the manager that `table` just got a new/changed row, so any
    /// live Serializable readers with a matching predicate are flagged to
    /// abort at commit. Called by a data source right after it applies a
    /// write, while the row value is in hand.
    pub fn notify_write(&self, writer_xid: Xid, table: &str, row: &Row) {
        let live = self.live.read().unwrap();
        for (xid, txn) in live.iter() {
            if *xid == writer_xid {
                continue;
            }
            if txn.level != IsolationLevel::Serializable {
                continue;
            }
            for check in txn.predicate_checks_for(table) {
                if check(row) {
                    txn.mark_conflicted();
                    break;
                }
            }
        }
    }

    fn release_intents(&self, xid: Xid, keys: &HashSet<(String, u64)>) {
        let mut intents = self.write_intents.write().unwrap();
        for key in keys {
            if intents.get(key) == Some(&xid) {
                intents.remove(key);
            }
        }
    }

    /// Commit a transaction. Fails with `SerializationFailure` if this is a
    /// Serializable transaction and a concurrent writer touched a row
    /// matching one of its predicates during its lifetime.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        if txn.level == IsolationLevel::Serializable && txn.aborted_by_conflict.load(Ordering::SeqCst) {
            self.rollback(txn)?;
            return Err(MiniSqlError::SerializationFailure(format!(
                "txn {} conflicts with a concurrently committed write",
                txn.xid
            )));
        }

        self.commit_log.set_status(txn.xid, TxnStatus::Committed);
        let write_set = txn.write_set.lock().unwrap().clone();
        self.release_intents(txn.xid, &write_set);
        self.live.write().unwrap().remove(&txn.xid);
        info!("txn {} commit", txn.xid);
        Ok(())
    }

    /// Roll back a transaction: undo actions run in reverse order, then the
    /// commit log entry flips to Aborted.
    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        let mut undo = txn.undo_log.lock().unwrap();
        while let Some(action) = undo.pop() {
            action();
        }
        drop(undo);

        self.commit_log.set_status(txn.xid, TxnStatus::Aborted);
        let write_set = txn.write_set.lock().unwrap().clone();
        self.release_intents(txn.xid, &write_set);
        self.live.write().unwrap().remove(&txn.xid);
        info!("txn {} rollback", txn.xid);
        Ok(())
    }

    fn run_gc_pass(&self) {
        let oldest_xmin = self.oldest_live_xmin();
        self.commit_log.truncate_below(oldest_xmin.saturating_sub(1).max(XID_FIRST_NORMAL));
        self.gc_expired_versions(oldest_xmin);

        let age_limit = Duration::from_secs(self.config.gc_age_seconds);
        let live = self.live.read().unwrap();
        for txn in live.values() {
            if txn.created_at.elapsed() > age_limit {
                warn!(
                    "txn {} has been open for {:?}, blocking commit-log truncation past xid {}",
                    txn.xid,
                    txn.created_at.elapsed(),
                    txn.snapshot().xmin
                );
            }
        }
    }

    /// Physically drop dead tuple versions across every registered source
    /// that keeps its own version chains. No-op until a registry has been
    /// wired in via `set_source_registry`.
    fn gc_expired_versions(&self, watermark: Xid) {
        let registry = match self.source_registry.read().unwrap().clone() {
            Some(registry) => registry,
            None => return,
        };
        let mut reclaimed = 0usize;
        for source in registry.read().unwrap().values() {
            if let Some(mvcc_source) = source.as_mvcc() {
                reclaimed += mvcc_source.gc_expired_versions(watermark);
            }
        }
        if reclaimed > 0 {
            debug!("gc pass reclaimed {} expired tuple versions below xid {}", reclaimed, watermark);
        }
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<TransactionManager> {
        TransactionManager::new(MvccConfig {
            gc_interval_seconds: 3600,
            ..MvccConfig::default()
        })
    }

    #[test]
    fn begin_commit_lifecycle() {
        let mgr = manager();
        let txn = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(mgr.commit(&txn).is_ok());
        assert!(mgr.commit_log().is_committed(txn.xid));
    }

    #[test]
    fn write_intents_conflict_across_transactions() {
        let mgr = manager();
        let a = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        let b = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        mgr.acquire_write_intent(&a, "t", 1).unwrap();
        assert!(mgr.acquire_write_intent(&b, "t", 1).is_err());
        mgr.commit(&a).unwrap();
        mgr.rollback(&b).unwrap();
    }

    #[test]
    fn rollback_runs_undo_in_reverse() {
        let mgr = manager();
        let txn = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = Arc::clone(&log);
        txn.push_undo(Box::new(move || l1.lock().unwrap().push(1)));
        let l2 = Arc::clone(&log);
        txn.push_undo(Box::new(move || l2.lock().unwrap().push(2)));
        mgr.rollback(&txn).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn too_many_transactions_fails_begin() {
        let mgr = TransactionManager::new(MvccConfig {
            max_active_transactions: 1,
            gc_interval_seconds: 3600,
            ..MvccConfig::default()
        });
        let _a = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(matches!(
            mgr.begin(IsolationLevel::ReadCommitted),
            Err(MiniSqlError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn later_snapshots_never_have_a_smaller_xmax() {
        let mgr = manager();
        let first = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        mgr.commit(&first).unwrap();
        let second = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(second.snapshot().xmax >= first.snapshot().xmax);
        mgr.commit(&second).unwrap();
        let third = mgr.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(third.snapshot().xmax >= second.snapshot().xmax);
    }
}
