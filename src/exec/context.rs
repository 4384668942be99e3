//! Cancellation token shared by a statement's worker-pool submissions.
//!
//! Grounded on the same pattern `mvcc/transaction.rs` uses for its GC
//! thread's stop flag (`AtomicBool` checked at loop/partition boundaries),
//! generalized here to a cloneable handle the session layer can also arm
//! from a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Handed to every worker-pool task spawned for one statement. Cloning
/// shares the same underlying flag; cancelling any clone cancels all of them.
#[derive(Clone, Default)]
pub struct ExecContext {
    cancelled: Arc<AtomicBool>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms cancellation after `timeout` on a detached timer thread. The
    /// context stays valid even if the caller drops their handle first.
    pub fn with_deadline(timeout: Duration) -> Self {
        let ctx = Self::new();
        let flag = Arc::clone(&ctx.cancelled);
        thread::spawn(move || {
            thread::sleep(timeout);
            flag.store(true, Ordering::SeqCst);
        });
        ctx
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
