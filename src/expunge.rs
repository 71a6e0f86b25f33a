//! Component D: the expunge engine (§4.D).
//!
//! Takes a sorted set of sequence ranges, invokes registered expunge handlers over each
//! record (when the sync is of type `FILE`), decrements flag counters as if every expunged
//! record's flags had become zero, then compacts the record array in a single pass.

use crate::handlers::ExpungeHandlerRegistry;
use crate::header::IndexHeader;
use crate::index_map::IndexMap;
use crate::modseq::ModseqSub;
use crate::record::MessageFlags;
use crate::seq_range::SeqRangeSet;
use crate::sync::SyncType;

/// Applies an expunge batch to `map` (already privatized by the caller via
/// [`IndexMap::get_atomic_map`]), per §4.D.
pub fn apply_expunge(
    map: &IndexMap,
    ranges: &SeqRangeSet,
    sync_type: SyncType,
    handlers: &mut ExpungeHandlerRegistry,
    modseq: &mut ModseqSub,
) {
    if ranges.is_empty() {
        return;
    }

    let record_map = map.record_map();

    // Step 2: run expunge handlers before mutation, only for FILE-type syncs.
    if sync_type == SyncType::File && !handlers.is_empty() {
        record_map.with(|rm| {
            for &(s, e) in ranges.ranges() {
                for seq in s..=e {
                    handlers.invoke_all_for_record(rm, seq);
                }
            }
        });
    }

    // Step 3: decrement flag counters for every expunged record, as if its flags became zero.
    map.with_header(|hdr| {
        record_map.with(|rm| {
            for &(s, e) in ranges.ranges() {
                for seq in s..=e {
                    let record = rm.get(seq);
                    decrement_counts_for_expunge(hdr, record.flags);
                }
            }
        });
    });

    // Step 4: compact and update `messages_count`; notify modseq.
    let removed = record_map.with_mut(|rm| rm.compact(ranges.ranges()));
    map.with_header(|hdr| {
        hdr.messages_count -= removed;
    });

    for &(s, e) in ranges.ranges() {
        modseq.expunge(s, e);
    }

    crate::internal_events::ExpungeBatchApplied {
        indexid: map.header().indexid,
        ranges: ranges.ranges().len(),
        removed,
    }
    .emit();
}

fn decrement_counts_for_expunge(hdr: &mut IndexHeader, flags: MessageFlags) {
    if flags.has(MessageFlags::SEEN) && hdr.seen_messages_count > 0 {
        hdr.seen_messages_count -= 1;
    }
    if flags.has(MessageFlags::DELETED) && hdr.deleted_messages_count > 0 {
        hdr.deleted_messages_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::IndexHeader;
    use crate::index_map::{IndexMap, Residence};
    use crate::record::BaseRecord;
    use crate::record_map::SharedRecordMap;

    fn setup(uids: &[u32]) -> IndexMap {
        let rm = SharedRecordMap::new(crate::record::BASE_RECORD_SIZE);
        rm.with_mut(|m| {
            for &uid in uids {
                m.append(BaseRecord {
                    uid,
                    flags: MessageFlags::new(0),
                });
            }
        });
        let mut hdr = IndexHeader::new_empty(1, crate::record::BASE_RECORD_SIZE as u32, 56);
        hdr.messages_count = uids.len() as u32;
        hdr.next_uid = uids.iter().copied().max().unwrap_or(0) + 1;
        IndexMap::new(hdr, rm, Residence::Memory)
    }

    #[test]
    fn expunge_middle_range_compacts_and_updates_count() {
        let map = setup(&[10, 11, 12, 13, 14]);
        let mut ranges = SeqRangeSet::new();
        ranges.insert(2, 4);
        let mut handlers = ExpungeHandlerRegistry::new();
        let mut modseq = ModseqSub::begin(false, 5);

        apply_expunge(&map, &ranges, SyncType::File, &mut handlers, &mut modseq);

        assert_eq!(map.header().messages_count, 2);
        let rm = map.record_map();
        rm.with(|rm| {
            assert_eq!(rm.get(1).uid, 10);
            assert_eq!(rm.get(2).uid, 14);
            assert_eq!(rm.records_count(), 2);
        });
    }
}
