//! Error taxonomy (§7).
//!
//! Corruption is a per-record data condition, not a control-flow event (§9 "No exceptions"):
//! it is surfaced through [`CorruptionReason`] and recorded on the sync context rather than
//! returned as an `Err`. Only sync-level failures — I/O and lost-log — are real `Result`
//! errors, matching how `vector_buffers` splits "this record is bad" from "the underlying
//! store is unusable" (see `variants/disk_v2/ledger.rs`'s `LedgerLoadCreateError`).

use snafu::Snafu;

/// Errors that can abort a call to [`crate::sync::sync_map`] outright.
#[derive(Debug, Snafu)]
pub enum SyncError {
    /// The log view reported an I/O failure. The map is left unmutated past the last
    /// successfully applied record; offsets are not advanced.
    #[snafu(display("log I/O error while syncing index {indexid}: {source}"))]
    Io {
        indexid: u32,
        source: std::io::Error,
    },

    /// The log view could not seek to the map's recorded offset. Callers typically
    /// re-initialize the index from scratch.
    #[snafu(display("lost log for index {indexid}: {reason}"))]
    LostLog { indexid: u32, reason: String },
}

/// The specific invariant a corrupted record violated (§4.E, §7).
///
/// Named precisely enough that tests can match against the spec's own language (e.g. S4's
/// "Seen counter wrong").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionReason {
    UidOrderViolation,
    SeenCounterWrong,
    DeletedCounterWrong,
    HeaderUpdateOutOfBounds,
    UnknownRecordType,
    MissingExtensionIntro,
    ModseqNotEnabled,
    MalformedRecordSize,
}

impl CorruptionReason {
    pub fn message(self) -> &'static str {
        match self {
            CorruptionReason::UidOrderViolation => "UID order violation",
            CorruptionReason::SeenCounterWrong => "Seen counter wrong",
            CorruptionReason::DeletedCounterWrong => "Deleted counter wrong",
            CorruptionReason::HeaderUpdateOutOfBounds => "header update out of bounds",
            CorruptionReason::UnknownRecordType => "unknown record type",
            CorruptionReason::MissingExtensionIntro => "extension record without active intro",
            CorruptionReason::ModseqNotEnabled => "modseq update received but modseq not enabled",
            CorruptionReason::MalformedRecordSize => "malformed record size",
        }
    }
}
