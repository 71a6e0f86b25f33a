//! Component A: the flat record array ("row store") backing an index map.
//!
//! Records are fixed-size rows, sequence number == 1-based position in the array. The record
//! map is the unit of copy-on-write sharing between index maps: several [`IndexMap`]s
//! (`super::index_map`) may point at the same `RecordMap` until one of them needs to mutate it.

use std::rc::{Rc, Weak};

use crate::record::{BaseRecord, BASE_RECORD_SIZE};

/// A contiguous sequence range, both ends inclusive, 1-based.
pub type SeqRange = (u32, u32);

/// The flat array of fixed-size message records (§4.A).
#[derive(Debug, Clone)]
pub struct RecordMap {
    buffer: Vec<u8>,
    record_size: usize,
    records_count: u32,
    last_appended_uid: u32,
}

impl RecordMap {
    pub fn new(record_size: usize) -> Self {
        assert!(record_size >= BASE_RECORD_SIZE, "record_size too small");
        Self {
            buffer: Vec::new(),
            record_size,
            records_count: 0,
            last_appended_uid: 0,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn records_count(&self) -> u32 {
        self.records_count
    }

    pub fn last_appended_uid(&self) -> u32 {
        self.last_appended_uid
    }

    /// Reads the base fields of the record at 1-based `seq`. Panics if out of range; callers
    /// are expected to bounds-check against `records_count` first.
    pub fn get(&self, seq: u32) -> BaseRecord {
        let slice = self.slice(seq);
        BaseRecord::decode(slice)
    }

    /// Overwrites the base fields of the record at 1-based `seq`, leaving extension bytes
    /// untouched.
    pub fn set(&mut self, seq: u32, record: BaseRecord) {
        let slice = self.slice_mut(seq);
        record.encode_into(slice);
    }

    fn offset(&self, seq: u32) -> usize {
        debug_assert!(seq >= 1 && seq <= self.records_count);
        (seq as usize - 1) * self.record_size
    }

    fn slice(&self, seq: u32) -> &[u8] {
        let off = self.offset(seq);
        &self.buffer[off..off + self.record_size]
    }

    fn slice_mut(&mut self, seq: u32) -> &mut [u8] {
        let off = self.offset(seq);
        &mut self.buffer[off..off + self.record_size]
    }

    /// Returns the raw bytes of the record at `seq`, starting at `offset` within the record's
    /// own byte range and running to the end of the record (§6 "Expunge handler interface":
    /// the handler sees `record_field_ptr`, the record's field at its own registered offset,
    /// not a fixed interpretation the record map imposes). `offset` is clamped to the record's
    /// length so a handler registered against a newer schema than this record's extension
    /// bytes can't panic this call.
    pub fn raw_field_from(&self, seq: u32, offset: usize) -> &[u8] {
        let record = self.slice(seq);
        let offset = offset.min(record.len());
        &record[offset..]
    }

    /// Appends a new record at the end of the array, zero-filling its extension bytes (§4.A).
    pub fn append(&mut self, record: BaseRecord) {
        let start = self.buffer.len();
        self.buffer.resize(start + self.record_size, 0);
        record.encode_into(&mut self.buffer[start..start + self.record_size]);
        self.records_count += 1;
        self.last_appended_uid = record.uid;
    }

    /// Appends a full `record_size`-byte raw record (including any extension bytes already
    /// present in the wire payload), used when an `APPEND` transaction record carries more
    /// than the base fields.
    pub fn append_raw(&mut self, raw: &[u8]) {
        debug_assert_eq!(raw.len(), self.record_size);
        self.buffer.extend_from_slice(raw);
        self.records_count += 1;
        self.last_appended_uid = BaseRecord::decode(raw).uid;
    }

    /// Finds the 1-based sequence number of the record with the given `uid`, via binary
    /// search (UIDs are strictly increasing by sequence, §3 invariant 2).
    pub fn seq_for_uid(&self, uid: u32) -> Option<u32> {
        let mut lo: u32 = 1;
        let mut hi: u32 = self.records_count;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let mid_uid = self.get(mid).uid;
            match mid_uid.cmp(&uid) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => {
                    if mid == 1 {
                        break;
                    }
                    hi = mid - 1;
                }
            }
        }
        None
    }

    /// Finds the `[seq1, seq2]` sequence range covering UID range `[uid1, uid2]`, clamping to
    /// UIDs actually present (sequences absent from the map are dropped, §4.D).
    pub fn seq_range_for_uid_range(&self, uid1: u32, uid2: u32) -> Option<(u32, u32)> {
        if uid1 > uid2 || self.records_count == 0 {
            return None;
        }
        // First sequence whose uid >= uid1.
        let mut s = None;
        for seq in 1..=self.records_count {
            if self.get(seq).uid >= uid1 {
                s = Some(seq);
                break;
            }
        }
        let s = s?;
        // Last sequence whose uid <= uid2.
        let mut e = None;
        for seq in (1..=self.records_count).rev() {
            if self.get(seq).uid <= uid2 {
                e = Some(seq);
                break;
            }
        }
        let e = e?;
        if s > e {
            return None;
        }
        Some((s, e))
    }

    /// Compacts the array in a single left-to-right pass, closing the gaps left by `ranges`
    /// (§4.A). `ranges` must be sorted, disjoint, and non-empty per-entry (`s <= e`).
    ///
    /// Returns the number of records removed.
    pub fn compact(&mut self, ranges: &[SeqRange]) -> u32 {
        if ranges.is_empty() {
            return 0;
        }

        let orig_records_count = self.records_count;
        let record_size = self.record_size;
        let mut dest: u32 = 1;
        let mut prev_end: u32 = 0;
        let mut removed: u32 = 0;

        for &(s, e) in ranges {
            debug_assert!(s <= e);
            debug_assert!(s > prev_end);
            if prev_end + 1 <= s - 1 {
                let block_start = prev_end + 1;
                let block_len = s - 1 - block_start + 1;
                self.move_block(block_start, dest, block_len, record_size);
                dest += block_len;
            }
            removed += e - s + 1;
            prev_end = e;
        }

        if prev_end + 1 <= orig_records_count {
            let block_start = prev_end + 1;
            let block_len = orig_records_count - block_start + 1;
            self.move_block(block_start, dest, block_len, record_size);
        }

        self.records_count -= removed;
        self.buffer
            .truncate(self.records_count as usize * record_size);
        removed
    }

    /// Moves `len` records starting at 1-based `src` down to 1-based `dest`. Tolerates
    /// overlapping source/destination ranges (the move is always leftward or a no-op).
    fn move_block(&mut self, src: u32, dest: u32, len: u32, record_size: usize) {
        if src == dest || len == 0 {
            return;
        }
        let src_off = (src as usize - 1) * record_size;
        let dest_off = (dest as usize - 1) * record_size;
        let byte_len = len as usize * record_size;
        self.buffer.copy_within(src_off..src_off + byte_len, dest_off);
    }
}

/// A refcounted, copy-on-write handle to a [`RecordMap`], with weak back-references to every
/// index map currently sharing it (§9: "record-map as owning a `set<weak_ref<map>>`"), used
/// for counter/lowwater fan-out (§4.C).
#[derive(Debug, Clone)]
pub struct SharedRecordMap {
    inner: Rc<std::cell::RefCell<RecordMapInner>>,
}

#[derive(Debug)]
struct RecordMapInner {
    map: RecordMap,
    observers: Vec<Weak<std::cell::RefCell<super::index_map::IndexMapInner>>>,
}

impl SharedRecordMap {
    pub fn new(record_size: usize) -> Self {
        Self {
            inner: Rc::new(std::cell::RefCell::new(RecordMapInner {
                map: RecordMap::new(record_size),
                observers: Vec::new(),
            })),
        }
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn register_observer(&self, obs: Weak<std::cell::RefCell<super::index_map::IndexMapInner>>) {
        self.inner.borrow_mut().observers.push(obs);
    }

    /// Every live index map currently sharing this record map.
    pub fn observers(&self) -> Vec<Rc<std::cell::RefCell<super::index_map::IndexMapInner>>> {
        self.inner
            .borrow()
            .observers
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn with<R>(&self, f: impl FnOnce(&RecordMap) -> R) -> R {
        f(&self.inner.borrow().map)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut RecordMap) -> R) -> R {
        f(&mut self.inner.borrow_mut().map)
    }

    /// Clones the underlying [`RecordMap`] into a fresh, unshared instance, per §4.B's
    /// `get_atomic_map`: "also fork the record map so no other map shares it". The new
    /// handle carries no observers; the caller re-registers whichever map now owns it.
    pub fn fork(&self) -> Self {
        let cloned = self.inner.borrow().map.clone();
        Self {
            inner: Rc::new(std::cell::RefCell::new(RecordMapInner {
                map: cloned,
                observers: Vec::new(),
            })),
        }
    }
}
