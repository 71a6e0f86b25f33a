//! The persistent index header (§3 Data model, §6 "Index header on disk").
//!
//! All multi-byte integers are little-endian. The header is mirrored through a
//! `hdr_copy_buf` byte buffer kept in sync with the live [`IndexHeader`] struct on every
//! mutation, so it can be written back to mmap'd storage verbatim at the end of a sync
//! (§4.G step 10).

use byteorder::{ByteOrder, LittleEndian};

/// Header flag bits (§3): `HAVE_DIRTY` and `FSCKD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(pub u32);

impl HeaderFlags {
    pub const HAVE_DIRTY: u32 = 0x01;
    pub const FSCKD: u32 = 0x02;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

pub const HEADER_LAYOUT_SIZE: usize = 4 * 14;

/// The persistent index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub indexid: u32,
    pub messages_count: u32,
    pub record_size: u32,
    pub header_size: u32,
    pub base_header_size: u32,
    pub next_uid: u32,
    pub seen_messages_count: u32,
    pub deleted_messages_count: u32,
    pub first_unseen_uid_lowwater: u32,
    pub first_deleted_uid_lowwater: u32,
    pub flags: HeaderFlags,
    pub log_file_seq: u32,
    pub log_file_head_offset: u32,
    pub log_file_tail_offset: u32,
}

impl IndexHeader {
    pub fn new_empty(indexid: u32, record_size: u32, base_header_size: u32) -> Self {
        Self {
            indexid,
            messages_count: 0,
            record_size,
            header_size: base_header_size,
            base_header_size,
            next_uid: 1,
            seen_messages_count: 0,
            deleted_messages_count: 0,
            first_unseen_uid_lowwater: 1,
            first_deleted_uid_lowwater: 1,
            flags: HeaderFlags::default(),
            log_file_seq: 0,
            log_file_head_offset: 0,
            log_file_tail_offset: 0,
        }
    }

    pub fn have_dirty(&self) -> bool {
        self.flags.contains(HeaderFlags::HAVE_DIRTY)
    }

    pub fn set_have_dirty(&mut self, on: bool) {
        self.flags.set(HeaderFlags::HAVE_DIRTY, on);
    }

    pub fn fsckd(&self) -> bool {
        self.flags.contains(HeaderFlags::FSCKD)
    }

    /// Serializes into `buf`, which must be at least `HEADER_LAYOUT_SIZE` bytes; this is the
    /// `hdr_copy_buf` mirror referenced throughout §4.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_LAYOUT_SIZE);
        let fields = [
            self.indexid,
            self.messages_count,
            self.record_size,
            self.header_size,
            self.base_header_size,
            self.next_uid,
            self.seen_messages_count,
            self.deleted_messages_count,
            self.first_unseen_uid_lowwater,
            self.first_deleted_uid_lowwater,
            self.flags.0,
            self.log_file_seq,
            self.log_file_head_offset,
        ];
        for (i, v) in fields.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *v);
        }
        LittleEndian::write_u32(
            &mut buf[fields.len() * 4..fields.len() * 4 + 4],
            self.log_file_tail_offset,
        );
    }

    pub fn read_from(buf: &[u8]) -> Self {
        assert!(buf.len() >= HEADER_LAYOUT_SIZE);
        let f = |i: usize| LittleEndian::read_u32(&buf[i * 4..i * 4 + 4]);
        Self {
            indexid: f(0),
            messages_count: f(1),
            record_size: f(2),
            header_size: f(3),
            base_header_size: f(4),
            next_uid: f(5),
            seen_messages_count: f(6),
            deleted_messages_count: f(7),
            first_unseen_uid_lowwater: f(8),
            first_deleted_uid_lowwater: f(9),
            flags: HeaderFlags(f(10)),
            log_file_seq: f(11),
            log_file_head_offset: f(12),
            log_file_tail_offset: f(13),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_buffer() {
        let mut hdr = IndexHeader::new_empty(7, 16, 16);
        hdr.messages_count = 3;
        hdr.set_have_dirty(true);
        let mut buf = [0u8; HEADER_LAYOUT_SIZE];
        hdr.write_to(&mut buf);
        let back = IndexHeader::read_from(&buf);
        assert_eq!(hdr, back);
        assert!(back.have_dirty());
    }
}
