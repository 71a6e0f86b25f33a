//! A deduplicating, sorted, merged set of sequence ranges (§4.D).

use crate::record_map::SeqRange;

#[derive(Debug, Default, Clone)]
pub struct SeqRangeSet {
    ranges: Vec<SeqRange>,
}

impl SeqRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `(s, e)`, merging with any overlapping or adjacent existing ranges.
    pub fn insert(&mut self, s: u32, e: u32) {
        if s > e {
            return;
        }
        self.ranges.push((s, e));
        self.ranges.sort_unstable();

        let mut merged: Vec<SeqRange> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            if let Some(last) = merged.last_mut() {
                if s <= last.1.saturating_add(1) {
                    last.1 = last.1.max(e);
                    continue;
                }
            }
            merged.push((s, e));
        }
        self.ranges = merged;
    }

    pub fn ranges(&self) -> &[SeqRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_len(&self) -> u32 {
        self.ranges.iter().map(|&(s, e)| e - s + 1).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_and_adjacent_ranges() {
        let mut set = SeqRangeSet::new();
        set.insert(5, 7);
        set.insert(1, 3);
        set.insert(4, 4);
        set.insert(10, 12);
        assert_eq!(set.ranges(), &[(1, 7), (10, 12)]);
        assert_eq!(set.total_len(), 10);
    }

    mod properties {
        use proptest::{collection::vec as arb_vec, prelude::*};

        use super::*;

        fn arb_range() -> impl Strategy<Value = (u32, u32)> {
            (1u32..200).prop_flat_map(|s| (Just(s), s..s + 20))
        }

        proptest! {
            #[test]
            fn ranges_stay_sorted_and_disjoint(inserts in arb_vec(arb_range(), 0..50)) {
                let mut set = SeqRangeSet::new();
                for (s, e) in inserts {
                    set.insert(s, e);
                }
                for pair in set.ranges().windows(2) {
                    prop_assert!(pair[0].1 + 1 < pair[1].0);
                }
                for &(s, e) in set.ranges() {
                    prop_assert!(s <= e);
                }
            }

            #[test]
            fn every_inserted_point_is_covered(inserts in arb_vec(arb_range(), 1..50)) {
                let mut set = SeqRangeSet::new();
                for &(s, e) in &inserts {
                    set.insert(s, e);
                }
                for (s, e) in inserts {
                    for point in s..=e {
                        prop_assert!(set.ranges().iter().any(|&(rs, re)| rs <= point && point <= re));
                    }
                }
            }
        }
    }
}
