//! Sequence reassembly for concurrently-recognized chunks.
//!
//! Workers complete chunks in whatever order recognition latency dictates;
//! this stage holds finished results in a sequence-indexed map and releases
//! them only in contiguous ascending order. A pending sequence whose
//! deadline passes is resolved as empty so it cannot block later sequences
//! indefinitely; a result arriving after that is reported as late and
//! discarded by the caller.
//!
//! The stage is generic over the payload so the ordering logic stays free
//! of transcript types (and trivially testable).

use std::collections::BTreeMap;
use std::time::Instant;

enum Slot<T> {
    Pending { deadline: Instant },
    Resolved(Option<T>),
}

/// Outcome of delivering a result for a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Accepted,
    /// The sequence was already resolved (usually expired); discard.
    Late,
}

pub struct ReorderStage<T> {
    next_seq: u64,
    slots: BTreeMap<u64, Slot<T>>,
}

impl<T> ReorderStage<T> {
    pub fn new(first_seq: u64) -> Self {
        Self {
            next_seq: first_seq,
            slots: BTreeMap::new(),
        }
    }

    /// Register a submitted sequence with its abandonment deadline.
    pub fn note_submitted(&mut self, seq: u64, deadline: Instant) {
        if seq >= self.next_seq {
            self.slots
                .entry(seq)
                .or_insert(Slot::Pending { deadline });
        }
    }

    /// Deliver the result for `seq`; `None` marks an empty-text result that
    /// still consumes its sequence slot.
    pub fn resolve(&mut self, seq: u64, value: Option<T>) -> Resolution {
        if seq < self.next_seq {
            return Resolution::Late;
        }
        match self.slots.get(&seq) {
            Some(Slot::Pending { .. }) | None => {
                self.slots.insert(seq, Slot::Resolved(value));
                Resolution::Accepted
            }
            Some(Slot::Resolved(_)) => Resolution::Late,
        }
    }

    /// Abandon every pending sequence whose deadline has passed. Returns
    /// how many were abandoned.
    pub fn expire_due(&mut self, now: Instant) -> usize {
        let due: Vec<u64> = self
            .slots
            .iter()
            .filter_map(|(seq, slot)| match slot {
                Slot::Pending { deadline } if *deadline <= now => Some(*seq),
                _ => None,
            })
            .collect();
        for seq in &due {
            self.slots.insert(*seq, Slot::Resolved(None));
        }
        due.len()
    }

    /// Pop every contiguously-resolved sequence starting at the release
    /// cursor. Empty slots are returned as `(seq, None)` so callers can
    /// count suppressed segments.
    pub fn release_ready(&mut self) -> Vec<(u64, Option<T>)> {
        let mut released = Vec::new();
        while let Some(Slot::Resolved(_)) = self.slots.get(&self.next_seq) {
            if let Some(Slot::Resolved(value)) = self.slots.remove(&self.next_seq) {
                released.push((self.next_seq, value));
            }
            self.next_seq += 1;
        }
        released
    }

    /// Earliest abandonment deadline among pending sequences.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Pending { deadline } => Some(*deadline),
                Slot::Resolved(_) => None,
            })
            .min()
    }

    /// True when nothing is pending or held.
    pub fn is_drained(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stage() -> ReorderStage<&'static str> {
        ReorderStage::new(0)
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn releases_only_in_contiguous_ascending_order() {
        let mut stage = stage();
        for seq in 0..3 {
            stage.note_submitted(seq, far());
        }

        // Completion order 1, 0, 2.
        assert_eq!(stage.resolve(1, Some("world")), Resolution::Accepted);
        assert!(stage.release_ready().is_empty());

        assert_eq!(stage.resolve(0, Some("hello")), Resolution::Accepted);
        let released = stage.release_ready();
        assert_eq!(released, vec![(0, Some("hello")), (1, Some("world"))]);

        assert_eq!(stage.resolve(2, Some("test")), Resolution::Accepted);
        assert_eq!(stage.release_ready(), vec![(2, Some("test"))]);
        assert!(stage.is_drained());
    }

    #[test]
    fn empty_results_consume_their_slot_without_blocking() {
        let mut stage = stage();
        for seq in 0..3 {
            stage.note_submitted(seq, far());
        }
        stage.resolve(0, None);
        stage.resolve(1, Some("after silence"));
        let released = stage.release_ready();
        assert_eq!(released, vec![(0, None), (1, Some("after silence"))]);
        // Sequence 2 still pending.
        assert!(!stage.is_drained());
    }

    #[test]
    fn expiry_abandons_overdue_sequences_and_unblocks_later_ones() {
        let mut stage = stage();
        let now = Instant::now();
        stage.note_submitted(0, now); // already due
        stage.note_submitted(1, far());
        stage.resolve(1, Some("one"));

        assert!(stage.release_ready().is_empty());
        assert_eq!(stage.expire_due(now + Duration::from_millis(1)), 1);
        assert_eq!(
            stage.release_ready(),
            vec![(0, None), (1, Some("one"))]
        );
    }

    #[test]
    fn late_results_after_expiry_are_discarded() {
        let mut stage = stage();
        let now = Instant::now();
        stage.note_submitted(0, now);
        stage.expire_due(now + Duration::from_millis(1));
        stage.release_ready();
        assert_eq!(stage.resolve(0, Some("too late")), Resolution::Late);
    }

    #[test]
    fn duplicate_resolution_is_late() {
        let mut stage = stage();
        stage.note_submitted(0, far());
        assert_eq!(stage.resolve(0, Some("first")), Resolution::Accepted);
        assert_eq!(stage.resolve(0, Some("second")), Resolution::Late);
    }

    #[test]
    fn next_deadline_tracks_the_earliest_pending() {
        let mut stage = stage();
        let near = Instant::now() + Duration::from_millis(10);
        stage.note_submitted(0, far());
        stage.note_submitted(1, near);
        assert_eq!(stage.next_deadline(), Some(near));
        stage.resolve(1, Some("done"));
        assert_ne!(stage.next_deadline(), Some(near));
    }

    #[test]
    fn random_completion_orders_always_release_sorted() {
        // Deterministic scramble over a few permutations.
        let orders: Vec<Vec<u64>> = vec![
            vec![4, 0, 3, 1, 2],
            vec![0, 1, 2, 3, 4],
            vec![4, 3, 2, 1, 0],
            vec![2, 4, 0, 1, 3],
        ];
        for order in orders {
            let mut stage: ReorderStage<u64> = ReorderStage::new(0);
            for seq in 0..5 {
                stage.note_submitted(seq, far());
            }
            let mut released = Vec::new();
            for seq in order {
                stage.resolve(seq, Some(seq));
                released.extend(stage.release_ready());
            }
            let seqs: Vec<u64> = released.iter().map(|(seq, _)| *seq).collect();
            assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        }
    }
}
