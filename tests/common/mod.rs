//! A small in-memory `LogView` test double, analogous to `vector_buffers`'s
//! `test/model/in_memory_v2.rs` fixtures: just enough to drive `sync_map` end to end without
//! touching the filesystem (§1's "treated as a byte-range provider" — out of this crate's
//! scope, so tests fake it).

use mailbox_index_sync::{LogEntry, LogPos, LogView, RecordHeader, RecordType, SeekOutcome};

pub struct FakeLogView {
    entries: Vec<(LogPos, RecordHeader, Vec<u8>)>,
    cursor: usize,
    pub head_file_seq: u32,
    pub head_max_tail_offset: u32,
}

impl FakeLogView {
    pub fn new(entries: Vec<(LogPos, RecordHeader, Vec<u8>)>) -> Self {
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

pub fn append_entry(pos: u32, uids_flags: &[(u32, u8)]) -> (LogPos, RecordHeader, Vec<u8>) {
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

pub fn expunge_entry(pos: u32, uid_ranges: &[(u32, u32)]) -> (LogPos, RecordHeader, Vec<u8>) {
    let mut payload = Vec::new();
    for &(u1, u2) in uid_ranges {
        payload.extend_from_slice(&u1.to_le_bytes());
        payload.extend_from_slice(&u2.to_le_bytes());
    }
    (
        LogPos::new(0, pos),
        RecordHeader {
            record_type: RecordType(RecordType::EXPUNGE | RecordType::MASK_EXTERNAL),
            size: payload.len() as u32,
        },
        payload,
    )
}

pub fn flag_update_entry(pos: u32, uid1: u32, uid2: u32, add: u8, remove: u8) -> (LogPos, RecordHeader, Vec<u8>) {
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

pub fn header_update_entry(pos: u32, offset: u32, bytes: &[u8]) -> (LogPos, RecordHeader, Vec<u8>) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(bytes);
    (
        LogPos::new(0, pos),
        RecordHeader {
            record_type: RecordType(RecordType::HEADER_UPDATE | RecordType::MASK_EXTERNAL),
            size: payload.len() as u32,
        },
        payload,
    )
}
