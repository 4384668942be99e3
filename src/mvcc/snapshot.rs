//! Snapshots and tuple visibility.

use super::commit_log::{CommitLog, TxnStatus};
use super::xid::Xid;
use std::collections::HashSet;

/// Isolation level a transaction (or a single statement, for Read Committed) runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

/// A point-in-time view of which transactions were running.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Lowest XID still running when the snapshot was taken.
    pub xmin: Xid,
    /// One past the largest XID allocated when the snapshot was taken.
    pub xmax: Xid,
    /// XIDs that were running (neither committed nor aborted) at snapshot time.
    pub xip: HashSet<Xid>,
    pub level: IsolationLevel,
}

impl Snapshot {
    pub fn new(xmin: Xid, xmax: Xid, xip: HashSet<Xid>, level: IsolationLevel) -> Self {
        Self { xmin, xmax, xip, level }
    }

    /// Whether a creating/deleting XID was still in-flight as of this snapshot.
    fn in_progress_at_snapshot(&self, xid: Xid) -> bool {
        xid >= self.xmax || self.xip.contains(&xid)
    }
}

/// The inputs a visibility check needs about the tuple version's creator/deleter
/// beyond what the snapshot itself carries.
pub struct VisibilityContext<'a> {
    pub commit_log: &'a CommitLog,
    /// The reading transaction's own XID, 0 if there is none (e.g. autocommit read).
    pub reader_xid: Xid,
    /// The reading transaction's current command sequence number.
    pub reader_command: u32,
}

/// Decide whether a tuple version with the given header is visible.
///
/// `cmin`/`cmax` are only meaningful when `xmin`/`xmax` equal the reader's
/// own XID (a transaction always sees its own writes, gated by command
/// ordering so a statement never sees writes from a later command in the
/// same transaction).
pub fn is_visible(
    snapshot: &Snapshot,
    ctx: &VisibilityContext,
    xmin: Xid,
    xmax: Xid,
    cmin: u32,
    cmax: u32,
    is_newest_version: bool,
) -> bool {
    if snapshot.level == IsolationLevel::ReadUncommitted && !is_newest_version {
        return false;
    }

    // Read Uncommitted waives the creation-visibility check (a version can
    // be seen before its creator commits) but not the deletion-invisibility
    // one below: a row deleted and committed by any transaction, not just
    // the reader's own, must still disappear.
    let created_visible = snapshot.level == IsolationLevel::ReadUncommitted
        || if xmin == ctx.reader_xid && xmin != 0 {
            cmin < ctx.reader_command
        } else {
            ctx.commit_log.is_committed(xmin) && !snapshot.in_progress_at_snapshot(xmin)
        };
    if !created_visible {
        return false;
    }

    let deleted_invisible = if xmax == 0 {
        false
    } else if xmax == ctx.reader_xid {
        cmax < ctx.reader_command
    } else {
        ctx.commit_log.is_committed(xmax) && !snapshot.in_progress_at_snapshot(xmax)
    };

    !deleted_invisible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(log: &CommitLog, reader: Xid, cmd: u32) -> VisibilityContext {
        VisibilityContext {
            commit_log: log,
            reader_xid: reader,
            reader_command: cmd,
        }
    }

    #[test]
    fn committed_creator_before_snapshot_is_visible() {
        let log = CommitLog::new();
        log.register_in_progress(3);
        log.set_status(3, TxnStatus::Committed);
        let snap = Snapshot::new(4, 4, HashSet::new(), IsolationLevel::RepeatableRead);
        assert!(is_visible(&snap, &ctx(&log, 0, 0), 3, 0, 0, 0, true));
    }

    #[test]
    fn uncommitted_creator_is_not_visible_to_others() {
        let log = CommitLog::new();
        log.register_in_progress(3);
        let snap = Snapshot::new(3, 4, [3].into_iter().collect(), IsolationLevel::RepeatableRead);
        assert!(!is_visible(&snap, &ctx(&log, 5, 0), 3, 0, 0, 0, true));
    }

    #[test]
    fn own_writes_visible_after_own_command() {
        let log = CommitLog::new();
        log.register_in_progress(7);
        let snap = Snapshot::new(7, 8, [7].into_iter().collect(), IsolationLevel::RepeatableRead);
        assert!(is_visible(&snap, &ctx(&log, 7, 2), 7, 0, 1, 0, true));
        assert!(!is_visible(&snap, &ctx(&log, 7, 0), 7, 0, 1, 0, true));
    }

    #[test]
    fn read_uncommitted_sees_newest_uncommitted_version() {
        let log = CommitLog::new();
        log.register_in_progress(9);
        let snap = Snapshot::new(9, 10, [9].into_iter().collect(), IsolationLevel::ReadUncommitted);
        assert!(is_visible(&snap, &ctx(&log, 0, 0), 9, 0, 0, 0, true));
    }

    #[test]
    fn read_uncommitted_does_not_see_a_row_deleted_by_another_committed_transaction() {
        let log = CommitLog::new();
        log.register_in_progress(3);
        log.set_status(3, TxnStatus::Committed);
        let snap = Snapshot::new(9, 9, HashSet::new(), IsolationLevel::ReadUncommitted);
        assert!(!is_visible(&snap, &ctx(&log, 5, 0), 1, 3, 0, 0, true));
    }
}
