//! Component I: handler registry (§4.E, §6 "Expunge handler interface").
//!
//! Handlers are a capability set indexed by extension id (§9 "Handlers as capability sets");
//! the core only ever calls them through the narrow traits below, never reaching into their
//! internals.

use std::collections::HashMap;

use crate::record_map::RecordMap;

/// Called once per expunged record, before compaction removes it (§4.D step 2). Sees the
/// record's own field at the offset it registered for, not a fixed interpretation the core
/// imposes (§6).
pub trait ExpungeHandler {
    fn on_expunge(&mut self, record_field: &[u8]);
}

/// Called when an `EXT_INTRO` record is applied; sets up the sync context's extension state
/// (§4.E `EXT_INTRO`).
pub trait ExtensionIntroHandler {
    /// Returns `(map_idx, record_size, ignore)` for the introduced extension.
    fn on_intro(&mut self, extension_id: u32, descriptor: &[u8]) -> (u32, u32, bool);
}

/// Called for `EXT_HDR_UPDATE`/`EXT_HDR_UPDATE32` once the offset/size header has been parsed
/// out of the payload (§4.E "Apply to extension header"). The extension header's own storage
/// is owned entirely by the callee; this crate only routes the byte range to it.
pub trait ExtensionHeaderHandler {
    fn apply_header_update(&mut self, offset: u32, bytes: &[u8]);
}

/// Called for `EXT_REC_UPDATE`/`EXT_ATOMIC_INC` once an active extension intro has been
/// confirmed (§4.E). Keyed by UID rather than sequence, since the callee owns its own
/// per-message extension storage independent of this crate's record array.
pub trait ExtensionRecordHandler {
    /// Overwrites the extension's record-sized field for `uid` with `bytes`.
    fn apply_record_update(&mut self, uid: u32, bytes: &[u8]);
    /// Adds `delta` to the extension's numeric field for `uid` (§4.E `EXT_ATOMIC_INC`).
    fn apply_atomic_inc(&mut self, uid: u32, delta: i64);
}

/// Registry of expunge handlers, keyed by `(extension_id, record_offset)` (§6).
#[derive(Default)]
pub struct ExpungeHandlerRegistry {
    handlers: HashMap<(u32, u32), Box<dyn ExpungeHandler>>,
}

impl ExpungeHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension_id: u32, record_offset: u32, handler: Box<dyn ExpungeHandler>) {
        self.handlers.insert((extension_id, record_offset), handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes every registered handler for the record at sequence `seq`, each with the raw
    /// bytes starting at its own registered `record_offset` (§4.D step 2, §6). Invocation
    /// order across distinct handlers is not guaranteed by a `HashMap`; §4.D only requires
    /// that every handler runs once per record, before mutation.
    pub fn invoke_all_for_record(&mut self, records: &RecordMap, seq: u32) {
        for (&(_extension_id, record_offset), handler) in self.handlers.iter_mut() {
            let field = records.raw_field_from(seq, record_offset as usize);
            handler.on_expunge(field);
        }
    }
}

impl std::fmt::Debug for ExpungeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpungeHandlerRegistry")
            .field("count", &self.handlers.len())
            .finish()
    }
}

/// Registry of extension header/record handlers, keyed by the `cur_ext_map_idx` an `EXT_INTRO`
/// assigned the extension (§4.E `EXT_HDR_UPDATE(32)`/`EXT_REC_UPDATE`/`EXT_ATOMIC_INC`).
#[derive(Default)]
pub struct ExtensionHandlerRegistry {
    header_handlers: HashMap<u32, Box<dyn ExtensionHeaderHandler>>,
    record_handlers: HashMap<u32, Box<dyn ExtensionRecordHandler>>,
}

impl ExtensionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_header(&mut self, map_idx: u32, handler: Box<dyn ExtensionHeaderHandler>) {
        self.header_handlers.insert(map_idx, handler);
    }

    pub fn register_record(&mut self, map_idx: u32, handler: Box<dyn ExtensionRecordHandler>) {
        self.record_handlers.insert(map_idx, handler);
    }

    pub fn header(&mut self, map_idx: u32) -> Option<&mut (dyn ExtensionHeaderHandler + 'static)> {
        self.header_handlers.get_mut(&map_idx).map(|b| b.as_mut())
    }

    pub fn record(&mut self, map_idx: u32) -> Option<&mut (dyn ExtensionRecordHandler + 'static)> {
        self.record_handlers.get_mut(&map_idx).map(|b| b.as_mut())
    }
}

impl std::fmt::Debug for ExtensionHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandlerRegistry")
            .field("header_count", &self.header_handlers.len())
            .field("record_count", &self.record_handlers.len())
            .finish()
    }
}
