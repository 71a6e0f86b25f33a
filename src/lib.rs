//! The index sync-map applier.
//!
//! Advances a mailbox index's in-memory representation by replaying transaction records from
//! a write-ahead log (see `sync::sync_map`). File I/O, the log view's own cursor semantics,
//! and extension/keyword schemas are external collaborators, consumed only through the
//! interfaces in [`log_view`] and [`handlers`].

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
extern crate tracing;

pub mod applier;
pub mod config;
pub mod counters;
pub mod error;
pub mod expunge;
pub mod handlers;
pub mod header;
pub mod index_map;
pub mod integrity;
mod internal_events;
pub mod log_view;
pub mod modseq;
pub mod record;
pub mod record_map;
pub mod seq_range;
pub mod sync;

pub use error::{CorruptionReason, SyncError};
pub use handlers::{
    ExpungeHandler, ExpungeHandlerRegistry, ExtensionHandlerRegistry, ExtensionHeaderHandler,
    ExtensionIntroHandler, ExtensionRecordHandler,
};
pub use header::IndexHeader;
pub use index_map::{Index, IndexMap, Residence};
pub use log_view::{LogEntry, LogPos, LogView, RecordHeader, RecordType, SeekOutcome};
pub use sync::{sync_map, SyncOutcome, SyncType};
