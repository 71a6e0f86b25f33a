//! Logging call sites, grouped as small event types the way `vector_buffers::internal_events`
//! groups its disk-buffer events, so every call site reads as `Event { .. }.emit()` instead of
//! an inline `warn!()`/`debug!()` scattered through the dispatcher.

use crate::error::CorruptionReason;

pub struct RecordCorrupted {
    pub indexid: u32,
    pub reason: CorruptionReason,
}

impl RecordCorrupted {
    pub fn emit(&self) {
        warn!(
            indexid = self.indexid,
            reason = self.reason.message(),
            "Index sync detected corruption; record skipped, fsck will be scheduled."
        );
    }
}

pub struct ExpungeBatchApplied {
    pub indexid: u32,
    pub ranges: usize,
    pub removed: u32,
}

impl ExpungeBatchApplied {
    pub fn emit(&self) {
        debug!(
            indexid = self.indexid,
            ranges = self.ranges,
            removed = self.removed,
            "Applied expunge batch."
        );
    }
}

pub struct MapReplaced {
    pub indexid: u32,
    pub reset: bool,
}

impl MapReplaced {
    pub fn emit(&self) {
        debug!(
            indexid = self.indexid,
            reset = self.reset,
            "Published index map after sync."
        );
    }
}

pub struct FsckScheduled {
    pub indexid: u32,
    pub reason: &'static str,
}

impl FsckScheduled {
    pub fn emit(&self) {
        warn!(
            indexid = self.indexid,
            reason = self.reason,
            "Scheduling fsck after sync."
        );
    }
}
