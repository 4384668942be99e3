//! MiniSQL - a federated SQL execution engine.
//!
//! Parses a MySQL-compatible SQL subset, optimizes it into a physical plan,
//! and runs that plan against one or more pluggable data sources — an
//! in-memory MVCC table store, a caller-owned slice adapter, or a virtual
//! catalog source — through a worker-pool-backed parallel executor.
//!
//! Architecture:
//! ```text
//! SQL text -> lexer/parser -> optimizer (logical -> physical plan)
//!          -> exec runtime (worker pool: scan / hash join / hash aggregate)
//!          -> data sources (MVCC store, slice adapter, catalog)
//! ```

pub mod lexer;
pub mod parser;
pub mod types;
pub mod error;
pub mod mvcc;
pub mod expr_eval;
pub mod datasource;
pub mod optimizer;
pub mod exec;
pub mod session;

use std::sync::Arc;

use log::info;

use crate::datasource::DataSource;
use crate::error::Result;
use crate::exec::WorkerPool;
use crate::mvcc::{MvccConfig, TransactionManager};
use crate::session::{Catalog, Session};

/// Engine-wide tunables. Mirrors the MVCC manager's own config plus the
/// execution-runtime and diagnostics knobs the session layer consults.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_enabled: bool,
    pub cache_size: u64,
    pub cache_ttl_seconds: u64,
    pub debug_mode: bool,
    pub max_active_transactions: u32,
    pub gc_interval_seconds: u64,
    pub gc_age_seconds: u64,
    pub xid_wrap_warn_threshold: u32,
    /// When a write-capable statement targets a source without MVCC support:
    /// `true` silently runs it without a snapshot, `false` rejects it with
    /// `MVCCRequired`.
    pub auto_downgrade: bool,
    pub enable_warnings: bool,
    /// Worker pool size; defaults to the host's available parallelism.
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_size: 0,
            cache_ttl_seconds: 0,
            debug_mode: false,
            max_active_transactions: 10_000,
            gc_interval_seconds: 300,
            gc_age_seconds: 3_600,
            xid_wrap_warn_threshold: 100_000,
            auto_downgrade: true,
            enable_warnings: true,
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }
}

impl Config {
    fn mvcc_config(&self) -> MvccConfig {
        MvccConfig {
            max_active_transactions: self.max_active_transactions,
            gc_interval_seconds: self.gc_interval_seconds,
            gc_age_seconds: self.gc_age_seconds,
            xid_wrap_warn_threshold: self.xid_wrap_warn_threshold,
        }
    }
}

/// The engine handle: one shared transaction manager, worker pool, and data
/// source catalog. Cheap to clone (every field is an `Arc`); `Session`s
/// borrow it to route statements.
#[derive(Clone)]
pub struct DB {
    catalog: Arc<Catalog>,
}

impl DB {
    pub fn new(config: Config) -> Self {
        let txn_manager = TransactionManager::new(config.mvcc_config());
        let pool = WorkerPool::new(config.worker_threads.max(1));
        info!("engine started: {} worker threads, auto_downgrade={}", config.worker_threads, config.auto_downgrade);
        Self {
            catalog: Catalog::new(txn_manager, pool, config.auto_downgrade),
        }
    }

    pub fn register_data_source(&self, name: impl Into<String>, source: Arc<dyn DataSource>) -> Result<()> {
        self.catalog.register(name, source)
    }

    /// The shared transaction manager backing every registered source.
    /// Callers building an MVCC-aware source (e.g. `MemoryTableStore`) need
    /// this to wire it to the same manager the engine uses for snapshots.
    pub fn txn_manager(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.catalog.txn_manager)
    }

    /// The worker pool backing parallel scans, hash joins, and hash
    /// aggregates. Exposed for callers driving exec-runtime operators
    /// directly instead of through a `Session`.
    pub fn worker_pool(&self) -> &crate::exec::WorkerPool {
        &self.catalog.pool
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.catalog.unregister(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.catalog.list()
    }

    /// Opens a session against the given database, as `user`. The database
    /// must already be registered via `register_data_source`.
    pub fn session(&self, user: impl Into<String>, database: impl Into<String>) -> Session {
        Session::new(Arc::clone(&self.catalog), user, database)
    }

    pub fn close(&self) {
        self.catalog.txn_manager.shutdown();
        self.catalog.pool.shutdown();
    }
}
