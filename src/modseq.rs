//! Component F: modseq sub-applier (§4.F).
//!
//! Tracks a per-message modseq value parallel to the record array, reshaped on
//! expunge/append exactly the way the record array itself is reshaped. Ignores updates that
//! originated in the caller's own just-committed transaction (tracked by the applier via
//! `ignored_modseq_changes`, see `applier::SyncContext`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Error,
    Ignored,
    Applied,
}

#[derive(Debug, Default)]
pub struct ModseqSub {
    enabled: bool,
    values: Vec<u64>,
    highest: u64,
}

impl ModseqSub {
    pub fn begin(enabled: bool, initial_count: u32) -> Self {
        Self {
            enabled,
            values: vec![0; initial_count as usize],
            highest: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// A new record was appended at the end of the array.
    pub fn append(&mut self, new_seq: u32) {
        self.highest += 1;
        let idx = new_seq as usize - 1;
        if idx >= self.values.len() {
            self.values.resize(idx + 1, 0);
        }
        self.values[idx] = self.highest;
    }

    /// Records in sequence range `[s, e]` were expunged; the parallel array is reshaped to
    /// match the record map's compaction.
    pub fn expunge(&mut self, s: u32, e: u32) {
        let s = s as usize - 1;
        let e = (e as usize).min(self.values.len());
        if s < e {
            self.values.drain(s..e);
        }
    }

    /// A flag-update touched `mask` on sequence range `[s, e]`; bumps the modseq for each.
    pub fn update_flags(&mut self, _mask: u8, s: u32, e: u32) {
        for seq in s..=e {
            let idx = seq as usize - 1;
            if idx < self.values.len() {
                self.highest += 1;
                self.values[idx] = self.highest;
            }
        }
    }

    /// Sets an explicit modseq value for `seq`, as decoded from a `MODSEQ_UPDATE` record.
    pub fn set(&mut self, seq: u32, modseq: u64) -> SetOutcome {
        if !self.enabled {
            return SetOutcome::Error;
        }
        let idx = seq as usize - 1;
        if idx >= self.values.len() {
            return SetOutcome::Error;
        }
        if modseq <= self.values[idx] {
            return SetOutcome::Ignored;
        }
        self.values[idx] = modseq;
        if modseq > self.highest {
            self.highest = modseq;
        }
        SetOutcome::Applied
    }

    /// Called when the map the sub-applier was tracking is replaced wholesale (§4.B
    /// `replace_map`).
    pub fn map_replaced(&mut self) {
        // The sub-applier's state lives entirely in this struct, which is recreated
        // alongside a fresh/replaced map by the sync driver; nothing to reconcile here.
    }

    pub fn get(&self, seq: u32) -> u64 {
        self.values.get(seq as usize - 1).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ignores_non_increasing_modseq() {
        let mut m = ModseqSub::begin(true, 1);
        assert_eq!(m.set(1, 5), SetOutcome::Applied);
        assert_eq!(m.set(1, 5), SetOutcome::Ignored);
        assert_eq!(m.set(1, 4), SetOutcome::Ignored);
        assert_eq!(m.set(1, 6), SetOutcome::Applied);
    }

    #[test]
    fn set_errors_when_not_enabled() {
        let mut m = ModseqSub::begin(false, 1);
        assert_eq!(m.set(1, 5), SetOutcome::Error);
    }

    #[test]
    fn expunge_shrinks_parallel_array() {
        let mut m = ModseqSub::begin(true, 5);
        for seq in 1..=5 {
            m.set(seq, seq as u64);
        }
        m.expunge(2, 4);
        assert_eq!(m.values.len(), 2);
        assert_eq!(m.get(1), 1);
        assert_eq!(m.get(2), 5);
    }
}
