//! Component G: the sync driver (§4.G). The single entry point: `sync_map`.

use crate::applier::{apply_record, SyncContext};
use crate::error::SyncError;
use crate::handlers::{ExpungeHandlerRegistry, ExtensionHandlerRegistry};
use crate::header::IndexHeader;
use crate::index_map::{self, IndexMap, Residence};
use crate::integrity;
use crate::internal_events::{FsckScheduled, MapReplaced};
use crate::log_view::{LogPos, LogView, SeekOutcome};
use crate::modseq::ModseqSub;
use crate::record_map::SharedRecordMap;

/// Which kind of sync this call represents (§3 Sync context `type`).
///
/// The published "current map" pointer on the index is only ever replaced for `File`/`Head`
/// syncs; `View` syncs mutate a view-private map and never rebind it (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    File,
    View,
    Head,
}

/// Outcome of a call to [`sync_map`] (§4.G, §7).
pub struct SyncOutcome {
    pub map: IndexMap,
    pub fsck_scheduled: bool,
    /// §4.G step 3: the log has grown far enough past the map's last rewrite that a caller
    /// should schedule a full rewrite of the index file (`rewrite_min_log_bytes`, §9
    /// "Configuration").
    pub needs_rewrite: bool,
}

/// Drives a log view from `map`'s recorded offset forward, replaying every transaction
/// record into a private copy of the map, and returns the (possibly replaced) map (§4.G).
pub fn sync_map<V: LogView>(
    map: &IndexMap,
    sync_type: SyncType,
    view: &mut V,
    modseq: &mut ModseqSub,
    handlers: &mut ExpungeHandlerRegistry,
    ext_handlers: &mut ExtensionHandlerRegistry,
    config: &crate::config::SyncConfig,
) -> Result<SyncOutcome, SyncError> {
    let indexid = map.header().indexid;
    let start_offset = match sync_type {
        SyncType::File => map.header().log_file_tail_offset,
        SyncType::View | SyncType::Head => map.header().log_file_head_offset,
    };

    let seek = view.set(map.header().log_file_seq, start_offset, view.head_file_seq(), None);
    let reset = match seek {
        SeekOutcome::Ok { reset, .. } => reset,
        SeekOutcome::NotFound => {
            return Err(SyncError::LostLog {
                indexid,
                reason: "log view could not seek to the map's recorded offset".to_string(),
            })
        }
        SeekOutcome::IoError(source) => return Err(SyncError::Io { indexid, source }),
    };

    // Step 3: rewrite threshold check (piggy-backed, does not affect correctness of replay).
    let distance = view
        .head_max_tail_offset()
        .saturating_sub(map.header().log_file_tail_offset);
    let needs_rewrite = distance as u64 > config.rewrite_min_log_bytes;

    let had_dirty = map.header().have_dirty();

    let mut working = if reset {
        let old = map.header();
        let mut fresh = IndexHeader::new_empty(old.indexid, old.record_size, old.base_header_size);
        fresh.log_file_seq = view.head_file_seq();
        fresh.log_file_tail_offset = 0;
        if old.fsckd() {
            fresh.flags.set(crate::header::HeaderFlags::FSCKD, true);
        }
        let record_map = SharedRecordMap::new(old.record_size as usize);
        IndexMap::new(fresh, record_map, Residence::Memory)
    } else {
        map.clone()
    };

    let mut ctx = SyncContext::new(sync_type);

    while let Some(entry) = view.next() {
        let recorded_pos = LogPos::new(working.header().log_file_seq, working.header().log_file_head_offset);
        if sync_type == SyncType::File && entry.prev_pos < recorded_pos {
            // Already applied; idempotent skip (§4.G step 6, §8 property 1).
            continue;
        }

        if entry.header.record_type.case() == crate::log_view::RecordType::EXT_INTRO {
            ctx.ext_intro_pos = Some(entry.prev_pos);
        }

        apply_record(
            &mut ctx,
            &mut working,
            modseq,
            handlers,
            ext_handlers,
            entry.header,
            entry.payload,
        );

        if entry.header.record_type.case() == crate::log_view::RecordType::EXT_INTRO {
            ctx.ext_intro_end_pos = Some(working_pos_after(view));
        }
    }

    if had_dirty {
        let still_dirty = record_has_dirty_flag(&working);
        working.with_header(|hdr| hdr.set_have_dirty(still_dirty));
    }

    finalize_log_offsets(&working, view, &ctx);
    index_map::replace_map(map, &working, sync_type, modseq);

    // Step 9: piggy-back the tail offset optimization.
    let head_tail = view.head_max_tail_offset();
    working.with_header(|hdr| {
        if head_tail > hdr.log_file_tail_offset {
            hdr.log_file_tail_offset = head_tail;
        }
    });

    // Step 10: mirror is kept in sync incrementally by `with_header`; nothing further to do
    // for an in-memory map. A mmap-resident map would memcpy `hdr_copy_buf` into the mapping
    // here; that I/O is outside this crate's scope (§1).

    let mut fsck_scheduled = false;
    if crate::config::debug_corruption_checks_enabled() {
        let violations = integrity::check(&working);
        if !violations.is_empty() || ctx.errors {
            FsckScheduled {
                indexid,
                reason: if ctx.errors {
                    "corruption detected during replay"
                } else {
                    "integrity check failed"
                },
            }
            .emit();
            fsck_scheduled = true;
        }
    } else if ctx.errors {
        fsck_scheduled = true;
    }

    MapReplaced { indexid, reset }.emit();

    Ok(SyncOutcome {
        map: working,
        fsck_scheduled,
        needs_rewrite,
    })
}

fn working_pos_after<V: LogView>(view: &V) -> LogPos {
    view.get_prev_pos()
}

fn record_has_dirty_flag(map: &IndexMap) -> bool {
    let hdr = map.header();
    let rm = map.record_map();
    rm.with(|rm| {
        (1..=hdr.messages_count).any(|seq| rm.get(seq).flags.has(crate::record::MessageFlags::DIRTY))
    })
}

/// §4.G step 8: finalize `log_file_head_offset`/`log_file_seq` on the map being retired,
/// including the "replay past the extension intro" rule for mid-sync `replace_map` calls.
fn finalize_log_offsets<V: LogView>(map: &IndexMap, view: &V, ctx: &SyncContext) {
    let prev_pos = view.get_prev_pos();

    if view.at_eol() {
        map.with_header(|hdr| {
            if hdr.log_file_seq != prev_pos.seq {
                hdr.log_file_seq = prev_pos.seq;
                hdr.log_file_tail_offset = 0;
            }
            hdr.log_file_head_offset = prev_pos.offset;
        });
        return;
    }

    // Mid-sync `replace_map` path: if we stopped exactly at the end of the most recent
    // `EXT_INTRO`, back the offset up to its start so a successor view re-enters the intro
    // (§4.G step 8, §8 property 8).
    let mut head_offset = prev_pos.offset;
    if let (Some(intro), Some(intro_end)) = (ctx.ext_intro_pos, ctx.ext_intro_end_pos) {
        if prev_pos == intro_end {
            head_offset = intro.offset;
        }
    }

    map.with_header(|hdr| {
        hdr.log_file_head_offset = head_offset;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_view::{LogEntry, RecordHeader, RecordType};

    struct FakeLogView {
        entries: Vec<(LogPos, RecordHeader, Vec<u8>)>,
        cursor: usize,
        head_file_seq: u32,
        head_max_tail_offset: u32,
    }

    impl FakeLogView {
        fn new(entries: Vec<(LogPos, RecordHeader, Vec<u8>)>) -> Self {
            Self {
                entries,
                cursor: 0,
                head_file_seq: 0,
                head_max_tail_offset: 0,
            }
        }
    }

    impl LogView for FakeLogView {
        fn set(&mut self, _seq: u32, _offset: u32, _max_seq: u32, _max_offset: Option<u32>) -> SeekOutcome {
            self.cursor = 0;
            SeekOutcome::Ok {
                reset: false,
                reason: None,
            }
        }

        fn next(&mut self) -> Option<LogEntry<'_>> {
            if self.cursor >= self.entries.len() {
                return None;
            }
            let (pos, header, payload) = &self.entries[self.cursor];
            self.cursor += 1;
            Some(LogEntry {
                prev_pos: *pos,
                header: *header,
                payload,
            })
        }

        fn get_prev_pos(&self) -> LogPos {
            self.entries
                .get(self.cursor.saturating_sub(1))
                .map(|(p, _, _)| LogPos::new(p.seq, p.offset + 1))
                .unwrap_or(LogPos::new(0, 0))
        }

        fn at_eol(&self) -> bool {
            self.cursor >= self.entries.len()
        }

        fn head_file_seq(&self) -> u32 {
            self.head_file_seq
        }

        fn head_max_tail_offset(&self) -> u32 {
            self.head_max_tail_offset
        }
    }

    fn append_entry(pos: u32, uids_flags: &[(u32, u8)]) -> (LogPos, RecordHeader, Vec<u8>) {
        let mut payload = Vec::new();
        for &(uid, flags) in uids_flags {
            payload.extend_from_slice(&uid.to_le_bytes());
            payload.push(flags);
            payload.push(0);
            payload.push(0);
            payload.push(0);
        }
        (
            LogPos::new(0, pos),
            RecordHeader {
                record_type: RecordType(RecordType::APPEND | RecordType::MASK_EXTERNAL),
                size: payload.len() as u32,
            },
            payload,
        )
    }

    fn flag_update_entry(pos: u32, uid1: u32, uid2: u32, add: u8, remove: u8) -> (LogPos, RecordHeader, Vec<u8>) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&uid1.to_le_bytes());
        payload.extend_from_slice(&uid2.to_le_bytes());
        payload.push(add);
        payload.push(remove);
        (
            LogPos::new(0, pos),
            RecordHeader {
                record_type: RecordType(RecordType::FLAG_UPDATE | RecordType::MASK_EXTERNAL),
                size: payload.len() as u32,
            },
            payload,
        )
    }

    fn fresh_map() -> IndexMap {
        let hdr = IndexHeader::new_empty(1, crate::record::BASE_RECORD_SIZE as u32, 56);
        let rm = SharedRecordMap::new(crate::record::BASE_RECORD_SIZE);
        IndexMap::new(hdr, rm, Residence::Memory)
    }

    #[test]
    fn s1_append_then_flag_seen() {
        let map = fresh_map();
        let mut modseq = ModseqSub::begin(false, 0);
        let mut handlers = ExpungeHandlerRegistry::new();
        let mut ext_handlers = crate::handlers::ExtensionHandlerRegistry::new();
        let config = crate::config::SyncConfig::default();

        let mut view = FakeLogView::new(vec![
            append_entry(0, &[(1, 0), (2, 0)]),
            flag_update_entry(1, 1, 2, crate::record::MessageFlags::SEEN, 0),
        ]);

        let outcome = sync_map(
            &map,
            SyncType::File,
            &mut view,
            &mut modseq,
            &mut handlers,
            &mut ext_handlers,
            &config,
        )
        .unwrap();
        let hdr = outcome.map.header();
        assert_eq!(hdr.messages_count, 2);
        assert_eq!(hdr.next_uid, 3);
        assert_eq!(hdr.seen_messages_count, 2);
        assert_eq!(hdr.deleted_messages_count, 0);
        assert_eq!(hdr.first_unseen_uid_lowwater, 3);
        assert!(!outcome.fsck_scheduled);
    }

    #[test]
    fn s3_idempotent_reapply() {
        let map = fresh_map();
        let mut modseq = ModseqSub::begin(false, 0);
        let mut handlers = ExpungeHandlerRegistry::new();
        let mut ext_handlers = crate::handlers::ExtensionHandlerRegistry::new();
        let config = crate::config::SyncConfig::default();

        let mut view = FakeLogView::new(vec![
            append_entry(0, &[(1, 0), (2, 0)]),
            flag_update_entry(1, 1, 2, crate::record::MessageFlags::SEEN, 0),
        ]);
        let first = sync_map(
            &map,
            SyncType::File,
            &mut view,
            &mut modseq,
            &mut handlers,
            &mut ext_handlers,
            &config,
        )
        .unwrap();

        // Re-run against the *same* log from the advanced offset recorded on the map.
        let mut view2 = FakeLogView::new(vec![
            append_entry(0, &[(1, 0), (2, 0)]),
            flag_update_entry(1, 1, 2, crate::record::MessageFlags::SEEN, 0),
        ]);
        let second = sync_map(
            &first.map,
            SyncType::File,
            &mut view2,
            &mut modseq,
            &mut handlers,
            &mut ext_handlers,
            &config,
        )
        .unwrap();

        assert_eq!(first.map.header().messages_count, second.map.header().messages_count);
        assert_eq!(first.map.header().seen_messages_count, second.map.header().seen_messages_count);
    }
}
