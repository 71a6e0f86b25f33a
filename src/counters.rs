//! Component C: pure counter and lowwater maintenance (§4.C).
//!
//! `update_counts`/`update_lowwaters` mutate only the single header they're given. Fan-out
//! across every other index map sharing a record map (§4.C "applies to every index map
//! sharing the record map whose `next_uid > uid`") is handled separately by
//! [`fan_out_counters`], which `applier::apply_append`/`applier::apply_flag_update` call
//! alongside the primary map's own update.

use crate::error::CorruptionReason;
use crate::header::IndexHeader;
use crate::index_map::IndexMap;
use crate::record::MessageFlags;
use crate::record_map::SharedRecordMap;

/// Updates `seen_messages_count` / `deleted_messages_count` for a single record's flag
/// transition from `old_flags` to `new_flags`. Returns `Err` (without mutating `hdr`) if the
/// transition would violate a counter invariant (§8 S4).
pub fn update_counts(
    hdr: &mut IndexHeader,
    old_flags: MessageFlags,
    new_flags: MessageFlags,
) -> Result<(), CorruptionReason> {
    // Both transitions are validated against scratch copies before anything is written back to
    // `hdr`, so a failure on the second (DELETED) check can't leave the first (SEEN) mutation
    // committed -- the whole call is all-or-nothing, matching the contract above.
    let mut seen_count = hdr.seen_messages_count;
    let mut first_unseen = hdr.first_unseen_uid_lowwater;
    let was_seen = old_flags.has(MessageFlags::SEEN);
    let is_seen = new_flags.has(MessageFlags::SEEN);
    if was_seen && !is_seen {
        if seen_count == 0 {
            return Err(CorruptionReason::SeenCounterWrong);
        }
        seen_count -= 1;
    } else if !was_seen && is_seen {
        if seen_count >= hdr.messages_count {
            return Err(CorruptionReason::SeenCounterWrong);
        }
        seen_count += 1;
        if seen_count == hdr.messages_count {
            first_unseen = hdr.next_uid;
        }
    }

    let mut deleted_count = hdr.deleted_messages_count;
    let mut first_deleted = hdr.first_deleted_uid_lowwater;
    let was_deleted = old_flags.has(MessageFlags::DELETED);
    let is_deleted = new_flags.has(MessageFlags::DELETED);
    if !was_deleted && is_deleted {
        if deleted_count >= hdr.messages_count {
            return Err(CorruptionReason::DeletedCounterWrong);
        }
        deleted_count += 1;
    } else if was_deleted && !is_deleted {
        if deleted_count == 0 || deleted_count > hdr.messages_count {
            return Err(CorruptionReason::DeletedCounterWrong);
        }
        deleted_count -= 1;
        if deleted_count == 0 {
            first_deleted = hdr.next_uid;
        }
    }

    hdr.seen_messages_count = seen_count;
    hdr.deleted_messages_count = deleted_count;
    hdr.first_unseen_uid_lowwater = first_unseen;
    hdr.first_deleted_uid_lowwater = first_deleted;
    Ok(())
}

/// Tightens the unseen/deleted lowwaters given a single record's uid and current flags
/// (§4.C `update_lowwaters`).
pub fn update_lowwaters(hdr: &mut IndexHeader, uid: u32, flags: MessageFlags) {
    if !flags.has(MessageFlags::SEEN) && uid < hdr.first_unseen_uid_lowwater {
        hdr.first_unseen_uid_lowwater = uid;
    }
    if !flags.has(MessageFlags::DELETED) && uid < hdr.first_deleted_uid_lowwater {
        hdr.first_deleted_uid_lowwater = uid;
    }
}

/// Applies the same `old_flags -> new_flags` counter/lowwater transition to every index map
/// sharing `record_map` with `primary`, other than `primary` itself (which the caller updates
/// directly), provided the sibling has already advanced past `uid`
/// (§4.C "Counter/lowwater updates apply to every index map sharing the record map whose
/// `next_uid > uid`... fan-out kept so sibling views stay consistent").
///
/// `record_map` must be the handle as it stood *before* the caller privatized its own copy via
/// [`IndexMap::get_atomic_map`] — that call always forks away from any sharing (§4.B), so the
/// sibling observer list has to be captured ahead of it to have anyone left to fan out to.
pub fn fan_out_counters(
    record_map: &SharedRecordMap,
    primary: &IndexMap,
    uid: u32,
    old_flags: MessageFlags,
    new_flags: MessageFlags,
) -> Result<(), CorruptionReason> {
    for sibling in record_map.observers() {
        if primary.shares_inner(&sibling) {
            continue;
        }
        let mut inner = sibling.borrow_mut();
        if inner.header.next_uid <= uid {
            continue;
        }
        update_lowwaters(&mut inner.header, uid, new_flags);
        update_counts(&mut inner.header, old_flags, new_flags)?;
        let header = inner.header;
        header.write_to(&mut inner.hdr_copy_buf);
    }
    Ok(())
}
