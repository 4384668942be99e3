//! Multi-version concurrency control: XIDs, snapshots, commit log, version
//! chains and the transaction manager that ties them together.

pub mod commit_log;
pub mod snapshot;
pub mod transaction;
pub mod version;
pub mod xid;

pub use commit_log::{CommitLog, TxnStatus};
pub use snapshot::{is_visible, IsolationLevel, Snapshot, VisibilityContext};
pub use transaction::{MvccConfig, PredicateCheck, Transaction, TransactionManager, UndoAction};
pub use version::{TupleVersion, VersionChain};
pub use xid::Xid;
