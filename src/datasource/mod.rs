//! Capability-trait data sources.
//!
//! Replaces the `EngineType`/`EngineHandler` enum dispatch the executor used
//! to route storage calls through: a table's backing store is now an
//! `Arc<dyn DataSource>` (widened to `WritableDataSource`/`MVCCDataSource`
//! when the source supports it), looked up by name from the catalog. The
//! optimizer and session layer branch on `Capabilities`, not on a match over
//! an engine-name string.

pub mod catalog_source;
pub mod memory;
pub mod slice;

use crate::error::Result;
use crate::mvcc::Xid;
use crate::parser::Expr;
use crate::types::{ModifyResult, Row, TableSchema};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Every data source registered with a `DB`, keyed by name. Shared between
/// the session/catalog layer (statement routing) and the virtual catalog
/// source (which enumerates it to answer `information_schema` queries).
pub type SourceRegistry = Arc<RwLock<HashMap<String, Arc<dyn DataSource>>>>;

/// What a data source supports. The optimizer and session layer use this to
/// decide whether a predicate can be pushed down, whether writes are legal,
/// and whether a statement needs a transaction at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvccCapability {
    /// No snapshot isolation; every read sees the current committed state.
    None,
    /// Reads honor a caller-supplied snapshot, but writes aren't versioned.
    ReadSnapshot,
    /// Full version-chain storage: reads and writes both honor MVCC.
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub writable: bool,
    pub mvcc: MvccCapability,
    /// Source can evaluate a pushed-down predicate itself rather than
    /// requiring the caller to re-filter every row it returns.
    pub filterable: bool,
}

impl Capabilities {
    pub fn read_only() -> Self {
        Self {
            writable: false,
            mvcc: MvccCapability::None,
            filterable: false,
        }
    }
}

/// Parameters for a `DataSource::query` call. A source that reports
/// `filterable: true` is expected to apply `filters` itself; the caller
/// still re-checks them defensively unless the source is trusted to be exact.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub select_columns: Option<Vec<String>>,
    pub filters: Vec<Expr>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Transaction to read under; `None` means "read latest committed state".
    pub xid: Option<Xid>,
}

/// A queryable table of rows. Every data source implements at least this.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;
    fn connect(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn get_tables(&self) -> Result<Vec<String>>;
    fn get_table_info(&self, table: &str) -> Result<TableSchema>;
    fn query(&self, table: &str, options: &QueryOptions) -> Result<Vec<Row>>;
    fn create_table(&self, schema: TableSchema) -> Result<()>;
    fn drop_table(&self, table: &str) -> Result<()>;
    fn truncate_table(&self, table: &str) -> Result<()>;

    /// Widens to `WritableDataSource` for sources that implement it. The
    /// registry stores `Arc<dyn DataSource>`, so the session layer needs
    /// this to reach `insert`/`update`/`delete`/`finalize_transaction`
    /// without knowing the concrete type.
    fn as_writable(&self) -> Option<&dyn WritableDataSource> {
        None
    }

    /// Widens to `MVCCDataSource` for sources that keep their own version
    /// chains. The background GC thread uses this to reach table storage
    /// through the registry without knowing the concrete type.
    fn as_mvcc(&self) -> Option<&dyn MVCCDataSource> {
        None
    }
}

/// A data source that accepts writes. `row_key` identifies the logical row
/// (the primary key value serialized to a string, or a source-assigned
/// surrogate for tables without one) and is what write-intent tracking and
/// version chains are keyed on.
pub trait WritableDataSource: DataSource {
    fn insert(&self, table: &str, row: Row, xid: Option<Xid>) -> Result<ModifyResult>;
    fn update(
        &self,
        table: &str,
        options: &QueryOptions,
        assignments: &[(String, crate::types::Value)],
        xid: Option<Xid>,
    ) -> Result<ModifyResult>;
    fn delete(&self, table: &str, options: &QueryOptions, xid: Option<Xid>) -> Result<ModifyResult>;

    /// Called by the session layer when a transaction this source took part
    /// in finishes. MVCC sources ignore this (the shared `TransactionManager`
    /// already settled their visibility); non-MVCC sources that stage writes
    /// until commit (the slice adapter) use it to flush or discard them.
    fn finalize_transaction(&self, _xid: Xid, _commit: bool) -> Result<()> {
        Ok(())
    }
}

/// Marker for sources whose `query` honors `QueryOptions::filters` rather
/// than requiring the caller to scan-then-filter.
pub trait FilterableDataSource: DataSource {}

/// A data source backed by the MVCC engine: bound to a single shared
/// `TransactionManager` so snapshots taken against it compose with
/// snapshots taken against any other MVCC source in the same session.
pub trait MVCCDataSource: WritableDataSource {
    fn transaction_manager(&self) -> std::sync::Arc<crate::mvcc::TransactionManager>;

    /// Physically drop tuple versions marked expired whose deleting
    /// transaction committed before `watermark`; no live or future snapshot
    /// can still need them. Returns how many versions were removed, for the
    /// GC thread to log.
    fn gc_expired_versions(&self, watermark: Xid) -> usize;
}
