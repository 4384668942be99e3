//! Transaction identifiers.
//!
//! XIDs are a 32-bit counter. 0/1/2 are reserved so every real transaction
//! gets an XID >= FIRST_NORMAL; comparisons stay plain integer comparisons
//! since the engine never runs long enough in one process for XID
//! wraparound to matter in practice, though the counter still warns when it
//! gets close.

/// Transaction identifier.
pub type Xid = u32;

/// Never a valid transaction; used as a sentinel (e.g. tuple xmax == 0 means "not deleted").
pub const XID_INVALID: Xid = 0;
/// Reserved for the bootstrap transaction that creates built-in catalog state.
pub const XID_BOOTSTRAP: Xid = 1;
/// Reserved: versions frozen by GC are considered created by this XID, always visible.
pub const XID_FROZEN: Xid = 2;
/// First XID handed out to a real, caller-initiated transaction.
pub const XID_FIRST_NORMAL: Xid = 3;

/// True if `xid` denotes a real, non-reserved transaction.
pub fn is_normal(xid: Xid) -> bool {
    xid >= XID_FIRST_NORMAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_xids_are_not_normal() {
        assert!(!is_normal(XID_INVALID));
        assert!(!is_normal(XID_BOOTSTRAP));
        assert!(!is_normal(XID_FROZEN));
        assert!(is_normal(XID_FIRST_NORMAL));
    }
}
