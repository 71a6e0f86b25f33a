//! Component E: the record applier (§4.E).
//!
//! Decodes one transaction record by type, validates it, and mutates the map. This is the
//! tagged-dispatch state machine §9 calls for: "keep padding advancement rules in the parser,
//! not in each handler." The cursor-advancement rules (4-byte padding, record-size rounding)
//! live in [`crate::sync`], which drives this module one record at a time.

use byteorder::{ByteOrder, LittleEndian};

use crate::counters::{update_counts, update_lowwaters};
use crate::error::CorruptionReason;
use crate::expunge::apply_expunge;
use crate::handlers::{ExpungeHandlerRegistry, ExtensionHandlerRegistry};
use crate::index_map::IndexMap;
use crate::internal_events::RecordCorrupted;
use crate::log_view::{LogPos, RecordHeader, RecordType};
use crate::modseq::ModseqSub;
use crate::record::{BaseRecord, MessageFlags};
use crate::seq_range::SeqRangeSet;
use crate::sync::SyncType;

/// Sentinel for "no active extension intro" (§3 Sync context `cur_ext_map_idx`).
pub const NO_EXT_MAP_IDX: u32 = u32::MAX;

/// Transient, per-sync-call state (§3 "Sync context").
pub struct SyncContext {
    pub sync_type: SyncType,
    pub cur_ext_map_idx: u32,
    pub cur_ext_record_size: u32,
    pub cur_ext_ignore: bool,
    pub ext_intro_pos: Option<LogPos>,
    pub ext_intro_end_pos: Option<LogPos>,
    pub errors: bool,
    pub index_delete_requested: bool,
    pub ignored_modseq_changes: u64,
    /// Set by the sync driver before dispatching a record written by the same caller that is
    /// now replaying it, so `MODSEQ_UPDATE` can tell an ignored-but-own-transaction update
    /// apart from an ordinary stale one (§4.E `MODSEQ_UPDATE`).
    pub is_own_transaction: bool,
    /// Raw payload bytes of every record type this crate doesn't recognize (§3 Sync context
    /// `unknown_extensions`), retained so a caller with a newer schema can reinterpret them
    /// instead of having them silently dropped alongside the corruption flag.
    pub unknown_extensions: bytes::BytesMut,
}

impl SyncContext {
    pub fn new(sync_type: SyncType) -> Self {
        Self {
            sync_type,
            cur_ext_map_idx: NO_EXT_MAP_IDX,
            cur_ext_record_size: 0,
            cur_ext_ignore: false,
            ext_intro_pos: None,
            ext_intro_end_pos: None,
            errors: false,
            index_delete_requested: false,
            ignored_modseq_changes: 0,
            is_own_transaction: false,
            unknown_extensions: bytes::BytesMut::new(),
        }
    }

    fn corrupt(&mut self, indexid: u32, reason: CorruptionReason) {
        self.errors = true;
        RecordCorrupted { indexid, reason }.emit();
    }
}

/// Dispatches one transaction record against `map` (§4.E's table). `map` may be replaced
/// in-place by a private clone as a side effect of mutation (§4.B).
pub fn apply_record(
    ctx: &mut SyncContext,
    map: &mut IndexMap,
    modseq: &mut ModseqSub,
    handlers: &mut ExpungeHandlerRegistry,
    ext_handlers: &mut ExtensionHandlerRegistry,
    header: RecordHeader,
    payload: &[u8],
) {
    let indexid = map.header().indexid;
    match header.record_type.case() {
        RecordType::APPEND => apply_append(ctx, map, modseq, payload),
        RecordType::EXPUNGE | RecordType::EXPUNGE_GUID => {
            apply_expunge_record(ctx, map, modseq, handlers, header, payload)
        }
        RecordType::FLAG_UPDATE => apply_flag_update(ctx, map, modseq, header, payload),
        RecordType::HEADER_UPDATE => apply_header_update(ctx, map, payload),
        RecordType::EXT_INTRO => apply_ext_intro(ctx, payload),
        RecordType::EXT_RESET => apply_ext_reset(ctx),
        RecordType::EXT_HDR_UPDATE => apply_ext_hdr_update(ctx, ext_handlers, indexid, payload, false),
        RecordType::EXT_HDR_UPDATE32 => apply_ext_hdr_update(ctx, ext_handlers, indexid, payload, true),
        RecordType::EXT_REC_UPDATE => apply_ext_rec_update(ctx, ext_handlers, indexid, payload),
        RecordType::EXT_ATOMIC_INC => apply_ext_atomic_inc(ctx, ext_handlers, indexid, payload),
        RecordType::KEYWORD_UPDATE | RecordType::KEYWORD_RESET => {
            // Delegated to the keyword sub-applier, external to this crate's scope (§1).
        }
        RecordType::MODSEQ_UPDATE => apply_modseq_update(ctx, map, modseq, payload),
        RecordType::INDEX_DELETED => {
            if !header.record_type.is_external() {
                ctx.index_delete_requested = true;
            }
        }
        RecordType::INDEX_UNDELETED => {
            ctx.index_delete_requested = false;
        }
        RecordType::BOUNDARY | RecordType::ATTRIBUTE_UPDATE => {}
        _ => {
            ctx.unknown_extensions.extend_from_slice(payload);
            ctx.corrupt(indexid, CorruptionReason::UnknownRecordType);
        }
    }
}

fn apply_append(ctx: &mut SyncContext, map: &mut IndexMap, modseq: &mut ModseqSub, payload: &[u8]) {
    let record_size = map.header().record_size as usize;
    if record_size == 0 || payload.len() % record_size != 0 {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }

    // Captured before `get_atomic_map` forks away from any sharing, so counter fan-out (§4.C)
    // still has sibling observers to walk.
    let shared_before = map.record_map();
    let primary_before = map.clone();

    *map = map.get_atomic_map();
    let indexid = map.header().indexid;

    for chunk in payload.chunks(record_size) {
        let incoming = BaseRecord::decode(chunk);
        let hdr = map.header();
        if incoming.uid < hdr.next_uid {
            ctx.corrupt(indexid, CorruptionReason::UidOrderViolation);
            continue;
        }

        let record_map = map.record_map();
        let last_appended = record_map.with(|rm| rm.last_appended_uid());
        // A sibling `IndexMap` sharing this record map may already have appended these raw
        // bytes earlier in the same sync; this map's own counters haven't folded that record
        // in yet, so §4.E's APPEND row runs unconditionally for both branches below -- only
        // `fan_out_counters` (which would double-count a sibling that owns the record itself)
        // is skipped when the bytes were already there.
        let already_exists = last_appended != 0 && incoming.uid <= last_appended;
        let effective_flags = if already_exists {
            let seq = record_map
                .with(|rm| rm.seq_for_uid(incoming.uid))
                .unwrap_or(hdr.messages_count + 1);
            record_map.with(|rm| rm.get(seq).flags)
        } else {
            record_map.with_mut(|rm| rm.append_raw(chunk));
            modseq.append(hdr.messages_count + 1);
            incoming.flags
        };
        let seq = hdr.messages_count + 1;

        let count_result = map.with_header(|hdr| {
            hdr.messages_count = hdr.messages_count.max(seq);
            hdr.next_uid = hdr.next_uid.max(incoming.uid + 1);
            update_lowwaters(hdr, incoming.uid, effective_flags);
            let result = update_counts(hdr, MessageFlags::new(0), effective_flags);
            if effective_flags.has(MessageFlags::DIRTY) {
                hdr.set_have_dirty(true);
            }
            result
        });
        if let Err(reason) = count_result {
            ctx.corrupt(indexid, reason);
        } else if !already_exists {
            let fan_out_result = crate::counters::fan_out_counters(
                &shared_before,
                &primary_before,
                incoming.uid,
                MessageFlags::new(0),
                effective_flags,
            );
            if let Err(reason) = fan_out_result {
                ctx.corrupt(indexid, reason);
            }
        }
    }
}

fn apply_expunge_record(
    ctx: &mut SyncContext,
    map: &mut IndexMap,
    modseq: &mut ModseqSub,
    handlers: &mut ExpungeHandlerRegistry,
    header: RecordHeader,
    payload: &[u8],
) {
    if !header.record_type.is_external() {
        // Request-only entry; the applier only commits external transactions (§4.E EXPUNGE).
        return;
    }
    if payload.len() % 8 != 0 {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }

    *map = map.get_atomic_map();
    let record_map = map.record_map();
    let mut ranges = SeqRangeSet::new();
    for pair in payload.chunks(8) {
        let uid1 = LittleEndian::read_u32(&pair[0..4]);
        let uid2 = LittleEndian::read_u32(&pair[4..8]);
        if let Some((s, e)) = record_map.with(|rm| rm.seq_range_for_uid_range(uid1, uid2)) {
            ranges.insert(s, e);
        }
    }

    apply_expunge(map, &ranges, ctx.sync_type, handlers, modseq);
}

fn apply_flag_update(
    ctx: &mut SyncContext,
    map: &mut IndexMap,
    modseq: &mut ModseqSub,
    header: RecordHeader,
    payload: &[u8],
) {
    if payload.len() != 10 {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let uid1 = LittleEndian::read_u32(&payload[0..4]);
    let uid2 = LittleEndian::read_u32(&payload[4..8]);
    let add = payload[8];
    let remove = payload[9];

    // Captured before `get_atomic_map` forks away from any sharing, so counter fan-out (§4.C)
    // still has sibling observers to walk.
    let shared_before = map.record_map();
    let primary_before = map.clone();

    *map = map.get_atomic_map();
    let record_map = map.record_map();
    let Some((s, e)) = record_map.with(|rm| rm.seq_range_for_uid_range(uid1, uid2)) else {
        return;
    };

    if header.record_type.is_external() {
        modseq.update_flags(add | remove, s, e);
    }

    for seq in s..=e {
        let old = record_map.with(|rm| rm.get(seq));
        let new_flags = old.flags.with(add, remove);

        // Counter bookkeeping is validated before the record itself is touched: a rejected
        // transition leaves the record array exactly as it was (§4.E FLAG_UPDATE, §8 S4).
        if (add | remove) & (MessageFlags::SEEN | MessageFlags::DELETED) != 0 {
            let mut hdr = map.header();
            update_lowwaters(&mut hdr, old.uid, new_flags);
            match update_counts(&mut hdr, old.flags, new_flags) {
                Ok(()) => {
                    map.with_header(|h| *h = hdr);
                    let fan_out_result = crate::counters::fan_out_counters(
                        &shared_before,
                        &primary_before,
                        old.uid,
                        old.flags,
                        new_flags,
                    );
                    if let Err(reason) = fan_out_result {
                        ctx.corrupt(map.header().indexid, reason);
                    }
                }
                Err(reason) => {
                    ctx.corrupt(map.header().indexid, reason);
                    continue;
                }
            }
        }

        record_map.with_mut(|rm| {
            rm.set(
                seq,
                BaseRecord {
                    uid: old.uid,
                    flags: new_flags,
                },
            )
        });
    }
}

fn apply_header_update(ctx: &mut SyncContext, map: &mut IndexMap, payload: &[u8]) {
    if payload.len() < 8 {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let offset = LittleEndian::read_u32(&payload[0..4]) as usize;
    let size = LittleEndian::read_u32(&payload[4..8]) as usize;
    let bytes = &payload[8..];
    if bytes.len() < size {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }

    let base_header_size = map.header().base_header_size as usize;
    if offset + size > base_header_size {
        ctx.corrupt(map.header().indexid, CorruptionReason::HeaderUpdateOutOfBounds);
        return;
    }

    *map = map.get_atomic_map();
    let prev_next_uid = map.header().next_uid;
    let prev_tail_offset = map.header().log_file_tail_offset;

    map.update_raw_header_region(offset, &bytes[..size]);

    // Never allow next_uid to decrease (silently restore); preserve log_file_tail_offset
    // (updated only at sync end, §4.E HEADER_UPDATE).
    map.with_header(|hdr| {
        if hdr.next_uid < prev_next_uid {
            hdr.next_uid = prev_next_uid;
        }
        hdr.log_file_tail_offset = prev_tail_offset;
    });
}

fn apply_ext_intro(ctx: &mut SyncContext, payload: &[u8]) {
    // Descriptor format: {extension_id: u32, map_idx: u32, record_size: u32, ignore: u8}.
    if payload.len() < 13 {
        ctx.cur_ext_map_idx = NO_EXT_MAP_IDX;
        return;
    }
    ctx.cur_ext_map_idx = LittleEndian::read_u32(&payload[4..8]);
    ctx.cur_ext_record_size = LittleEndian::read_u32(&payload[8..12]);
    ctx.cur_ext_ignore = payload[12] != 0;
}

fn apply_ext_reset(ctx: &mut SyncContext) {
    ctx.cur_ext_map_idx = NO_EXT_MAP_IDX;
    ctx.cur_ext_record_size = 0;
    ctx.cur_ext_ignore = false;
}

/// §4.E `EXT_HDR_UPDATE`/`EXT_HDR_UPDATE32`: payload is `{offset, size, bytes}`, with the
/// offset/size pair 16-bit for the base variant and 32-bit for the `32` one (§6 wire format).
/// Routed to whichever extension header handler is registered for the most recently introduced
/// `cur_ext_map_idx`; with no active intro the update has nowhere to go and is dropped, which
/// matches this record kind carrying no "requires an active intro" clause in §4.E's table
/// (unlike `EXT_REC_UPDATE`/`EXT_ATOMIC_INC`, which do).
fn apply_ext_hdr_update(
    ctx: &mut SyncContext,
    ext_handlers: &mut ExtensionHandlerRegistry,
    indexid: u32,
    payload: &[u8],
    wide: bool,
) {
    let header_len = if wide { 8 } else { 4 };
    if payload.len() < header_len {
        ctx.corrupt(indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let (offset, size) = if wide {
        (
            LittleEndian::read_u32(&payload[0..4]),
            LittleEndian::read_u32(&payload[4..8]),
        )
    } else {
        (
            LittleEndian::read_u16(&payload[0..2]) as u32,
            LittleEndian::read_u16(&payload[2..4]) as u32,
        )
    };
    let bytes = &payload[header_len..];
    if (bytes.len() as u32) < size {
        ctx.corrupt(indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    if ctx.cur_ext_map_idx == NO_EXT_MAP_IDX {
        return;
    }
    if let Some(handler) = ext_handlers.header(ctx.cur_ext_map_idx) {
        handler.apply_header_update(offset, &bytes[..size as usize]);
    }
}

/// §4.E `EXT_REC_UPDATE`: a run of `{uid, bytes}` entries, each padded to
/// `(sizeof(uid) + cur_ext_record_size + 3) & !3` bytes (§6 "variable-length records are
/// 4-byte padded"). Requires an active intro; a documented `cur_ext_ignore` is a silent no-op.
fn apply_ext_rec_update(
    ctx: &mut SyncContext,
    ext_handlers: &mut ExtensionHandlerRegistry,
    indexid: u32,
    payload: &[u8],
) {
    if ctx.cur_ext_map_idx == NO_EXT_MAP_IDX {
        ctx.corrupt(indexid, CorruptionReason::MissingExtensionIntro);
        return;
    }
    if ctx.cur_ext_ignore {
        return;
    }
    let record_len = 4 + ctx.cur_ext_record_size as usize;
    let padded_len = (record_len + 3) & !3;
    if padded_len == 0 || payload.len() % padded_len != 0 {
        ctx.corrupt(indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let map_idx = ctx.cur_ext_map_idx;
    for chunk in payload.chunks(padded_len) {
        let uid = LittleEndian::read_u32(&chunk[0..4]);
        let bytes = &chunk[4..record_len];
        if let Some(handler) = ext_handlers.record(map_idx) {
            handler.apply_record_update(uid, bytes);
        }
    }
}

/// §4.E `EXT_ATOMIC_INC`: a run of fixed-size `{uid: u32, delta: i64}` entries. Same active-intro
/// prerequisite and `cur_ext_ignore` short-circuit as `EXT_REC_UPDATE`.
fn apply_ext_atomic_inc(
    ctx: &mut SyncContext,
    ext_handlers: &mut ExtensionHandlerRegistry,
    indexid: u32,
    payload: &[u8],
) {
    if ctx.cur_ext_map_idx == NO_EXT_MAP_IDX {
        ctx.corrupt(indexid, CorruptionReason::MissingExtensionIntro);
        return;
    }
    if ctx.cur_ext_ignore {
        return;
    }
    if payload.len() % 12 != 0 {
        ctx.corrupt(indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let map_idx = ctx.cur_ext_map_idx;
    for entry in payload.chunks(12) {
        let uid = LittleEndian::read_u32(&entry[0..4]);
        let delta = LittleEndian::read_i64(&entry[4..12]);
        if let Some(handler) = ext_handlers.record(map_idx) {
            handler.apply_atomic_inc(uid, delta);
        }
    }
}

fn apply_modseq_update(
    ctx: &mut SyncContext,
    map: &mut IndexMap,
    modseq: &mut ModseqSub,
    payload: &[u8],
) {
    if payload.len() % 16 != 0 {
        ctx.corrupt(map.header().indexid, CorruptionReason::MalformedRecordSize);
        return;
    }
    let indexid = map.header().indexid;
    if !modseq.is_enabled() {
        ctx.corrupt(indexid, CorruptionReason::ModseqNotEnabled);
        return;
    }

    let record_map = map.record_map();
    for entry in payload.chunks(16) {
        let uid = LittleEndian::read_u32(&entry[0..4]);
        let modseq_hi = LittleEndian::read_u32(&entry[4..8]);
        let modseq_lo = LittleEndian::read_u64(&entry[8..16]);
        let Some(seq) = record_map.with(|rm| rm.seq_for_uid(uid)) else {
            continue;
        };
        let value = ((modseq_hi as u64) << 32) | modseq_lo;
        match modseq.set(seq, value) {
            crate::modseq::SetOutcome::Error => {
                ctx.corrupt(indexid, CorruptionReason::ModseqNotEnabled);
            }
            crate::modseq::SetOutcome::Ignored => {
                if ctx.is_own_transaction {
                    ctx.ignored_modseq_changes += 1;
                }
            }
            crate::modseq::SetOutcome::Applied => {}
        }
    }
}
