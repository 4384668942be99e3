//! Parallel execution runtime: a reusable worker pool plus the
//! domain-specific executors (partitioned scan, parallel hash join,
//! single-threaded hash aggregate) that the physical plan in `optimizer/`
//! drives.

pub mod context;
pub mod hash_agg;
pub mod hash_join;
pub mod scan;
pub mod worker_pool;

pub use context::ExecContext;
pub use worker_pool::{PoolStats, WorkerPool};
