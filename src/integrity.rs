//! Component H: debug-time integrity checker (§4.H), skipped when
//! [`crate::config::debug_corruption_checks_enabled`] is false.

use crate::index_map::IndexMap;
use crate::record::MessageFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityViolation {
    UidNotIncreasing { seq: u32 },
    UidNotBelowNextUid { seq: u32 },
    UnseenBelowLowwater { seq: u32 },
    DeletedBelowLowwater { seq: u32 },
    SeenCountMismatch { expected: u32, actual: u32 },
    DeletedCountMismatch { expected: u32, actual: u32 },
}

/// Walks `[1..messages_count]`, asserting the invariants listed in §3/§4.H. Returns every
/// violation found (empty if the map is internally consistent).
pub fn check(map: &IndexMap) -> Vec<IntegrityViolation> {
    let hdr = map.header();
    let rm = map.record_map();
    let mut violations = Vec::new();
    let mut seen = 0u32;
    let mut deleted = 0u32;
    let mut prev_uid: Option<u32> = None;

    rm.with(|rm| {
        for seq in 1..=hdr.messages_count {
            let record = rm.get(seq);
            if let Some(prev) = prev_uid {
                if record.uid <= prev {
                    violations.push(IntegrityViolation::UidNotIncreasing { seq });
                }
            }
            prev_uid = Some(record.uid);

            if record.uid >= hdr.next_uid {
                violations.push(IntegrityViolation::UidNotBelowNextUid { seq });
            }

            if record.flags.has(MessageFlags::SEEN) {
                seen += 1;
            } else if record.uid < hdr.first_unseen_uid_lowwater {
                violations.push(IntegrityViolation::UnseenBelowLowwater { seq });
            }

            if record.flags.has(MessageFlags::DELETED) {
                deleted += 1;
            } else if record.uid < hdr.first_deleted_uid_lowwater {
                violations.push(IntegrityViolation::DeletedBelowLowwater { seq });
            }
        }
    });

    if seen != hdr.seen_messages_count {
        violations.push(IntegrityViolation::SeenCountMismatch {
            expected: hdr.seen_messages_count,
            actual: seen,
        });
    }
    if deleted != hdr.deleted_messages_count {
        violations.push(IntegrityViolation::DeletedCountMismatch {
            expected: hdr.deleted_messages_count,
            actual: deleted,
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::IndexHeader;
    use crate::index_map::Residence;
    use crate::record::BaseRecord;
    use crate::record_map::SharedRecordMap;

    #[test]
    fn consistent_map_has_no_violations() {
        let rm = SharedRecordMap::new(crate::record::BASE_RECORD_SIZE);
        rm.with_mut(|m| {
            m.append(BaseRecord {
                uid: 1,
                flags: MessageFlags::new(MessageFlags::SEEN),
            });
            m.append(BaseRecord {
                uid: 2,
                flags: MessageFlags::new(0),
            });
        });
        let mut hdr = IndexHeader::new_empty(1, crate::record::BASE_RECORD_SIZE as u32, 56);
        hdr.messages_count = 2;
        hdr.next_uid = 3;
        hdr.seen_messages_count = 1;
        hdr.first_unseen_uid_lowwater = 2;
        let map = IndexMap::new(hdr, rm, Residence::Memory);
        assert!(check(&map).is_empty());
    }

    #[test]
    fn detects_count_mismatch() {
        let rm = SharedRecordMap::new(crate::record::BASE_RECORD_SIZE);
        rm.with_mut(|m| {
            m.append(BaseRecord {
                uid: 1,
                flags: MessageFlags::new(MessageFlags::SEEN),
            });
        });
        let mut hdr = IndexHeader::new_empty(1, crate::record::BASE_RECORD_SIZE as u32, 56);
        hdr.messages_count = 1;
        hdr.next_uid = 2;
        hdr.seen_messages_count = 0;
        let map = IndexMap::new(hdr, rm, Residence::Memory);
        let violations = check(&map);
        assert!(violations.contains(&IntegrityViolation::SeenCountMismatch {
            expected: 0,
            actual: 1
        }));
    }
}
