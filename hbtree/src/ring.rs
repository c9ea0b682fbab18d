//! Fixed-capacity ring of heartbeat records.
//!
//! The ring is a zero-initialized array of `buffer_depth` [`Record`]s plus a
//! write cursor. Each registration overwrites the slot under the cursor and
//! advances it; when the cursor wraps back to slot 0 the whole buffer is due
//! for a flush to the node's sink.
//!
//! # Design
//!
//! - Slots are allocated once, at node construction, and never reallocated
//! - Unwritten slots hold [`Record::default`], whose deltas are all zero;
//!   window accounting relies on this before the window first fills
//! - The slot leaving the window is always `window_size` positions behind
//!   the cursor, modulo `buffer_depth`
//! - Reads copy records out in chronological order (oldest to newest)

use crate::error::ConstructionError;
use crate::record::Record;

/// A ring buffer of heartbeat records for a single node.
///
/// # Thread Safety
///
/// The ring has a single writer, its node. It is never locked.
#[derive(Debug)]
pub struct RecordRing {
    slots: Vec<Record>,
    /// Next slot to write.
    cursor: usize,
    /// Slot holding the most recent record.
    read_index: usize,
    /// Records written since construction.
    produced: u64,
}

impl RecordRing {
    /// Allocates a ring of `depth` zeroed records.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::Allocation`] if the slots cannot be
    /// allocated.
    pub fn with_depth(depth: usize) -> Result<Self, ConstructionError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(depth)
            .map_err(|_| ConstructionError::Allocation {
                buffer_depth: depth,
            })?;
        slots.resize(depth, Record::default());

        Ok(Self {
            slots,
            cursor: 0,
            read_index: 0,
            produced: 0,
        })
    }

    /// Number of slots.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Index of the next slot to be written.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of records written so far, including overwritten ones.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Returns whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.produced == 0
    }

    /// The record about to leave a window of `window_size` records.
    ///
    /// Before the window has filled this is an unwritten, zeroed slot.
    /// `window_size` must be between 1 and the ring depth.
    #[inline]
    pub fn evicted(&self, window_size: usize) -> &Record {
        let index = if window_size > self.cursor {
            self.depth() + self.cursor - window_size
        } else {
            self.cursor - window_size
        };
        &self.slots[index]
    }

    /// Writes `record` under the cursor and advances it.
    ///
    /// Returns `true` when the cursor wrapped back to slot 0, i.e. the
    /// buffer has just been filled and is due for a flush.
    #[inline]
    pub fn push(&mut self, record: Record) -> bool {
        self.read_index = self.cursor;
        self.slots[self.cursor] = record;
        self.produced += 1;
        self.cursor = (self.cursor + 1) % self.depth();
        self.cursor == 0
    }

    /// The most recent record, or a zeroed record before the first write.
    pub fn latest(&self) -> &Record {
        &self.slots[self.read_index]
    }

    /// Every slot in index order. After a wrap this is the full cycle of
    /// records written since the previous wrap.
    pub fn slots(&self) -> &[Record] {
        &self.slots
    }

    /// Records written since the last wrap, in index order.
    pub fn pending(&self) -> &[Record] {
        &self.slots[..self.cursor]
    }

    /// The last `n` records, oldest first.
    ///
    /// Requests beyond what has been produced are clamped to what has been
    /// produced; requests beyond the ring depth return every retained record.
    pub fn history(&self, n: usize) -> Vec<Record> {
        let produced = usize::try_from(self.produced).unwrap_or(usize::MAX);
        let n = n.min(produced);
        let depth = self.depth();

        if n == 0 {
            return Vec::new();
        }

        if self.cursor >= n {
            // No wraparound needed
            return self.slots[self.cursor - n..self.cursor].to_vec();
        }

        let mut records = Vec::with_capacity(n.min(depth));
        if n >= depth {
            // Whole buffer, oldest retained record first
            records.extend_from_slice(&self.slots[self.cursor..]);
        } else {
            // Tail of the previous cycle, then the current one
            records.extend_from_slice(&self.slots[depth + self.cursor - n..]);
        }
        records.extend_from_slice(&self.slots[..self.cursor]);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BeatIds;
    use crate::window::{Delta, Totals};

    /// Record carrying `id` as its beat number, tag and work.
    fn record(id: u64) -> Record {
        let delta = Delta {
            time: 1,
            work: id,
            accuracy: 0.0,
            energy: 0.0,
        };
        Record::new(
            BeatIds {
                id,
                shared_id: id,
                user_tag: id,
            },
            i64::try_from(id).unwrap(),
            &delta,
            &Totals::default(),
            &Totals::default(),
        )
    }

    fn ring_with(depth: usize, count: u64) -> RecordRing {
        let mut ring = RecordRing::with_depth(depth).unwrap();
        for id in 0..count {
            ring.push(record(id));
        }
        ring
    }

    fn ids(records: &[Record]) -> Vec<u64> {
        records.iter().map(Record::beat_number).collect()
    }

    #[test]
    fn test_empty_ring() {
        let ring = RecordRing::with_depth(4).unwrap();

        assert!(ring.is_empty());
        assert_eq!(ring.depth(), 4);
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.produced(), 0);
        assert_eq!(*ring.latest(), Record::default());
        assert!(ring.history(3).is_empty());
        assert!(ring.pending().is_empty());
    }

    #[test]
    fn test_push_advances_and_reports_wrap() {
        let mut ring = RecordRing::with_depth(3).unwrap();

        assert!(!ring.push(record(0)));
        assert!(!ring.push(record(1)));
        assert!(ring.push(record(2))); // cursor back at 0
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.latest().beat_number(), 2);

        assert!(!ring.push(record(3)));
        assert_eq!(ring.cursor(), 1);
        assert_eq!(ring.latest().beat_number(), 3);
        assert_eq!(ring.produced(), 4);
    }

    #[test]
    fn test_evicted_slot_before_window_fills_is_zeroed() {
        let ring = ring_with(5, 2);

        // cursor = 2, window = 3 -> slot 5 + 2 - 3 = 4, never written
        assert_eq!(ring.evicted(3).delta(), Delta::default());
    }

    #[test]
    fn test_evicted_slot_trails_cursor_by_window() {
        let ring = ring_with(5, 4);

        // cursor = 4, window = 3 -> slot 1
        assert_eq!(ring.evicted(3).beat_number(), 1);
    }

    #[test]
    fn test_evicted_slot_wraps() {
        let ring = ring_with(5, 6);

        // cursor = 1, window = 3 -> slot 5 + 1 - 3 = 3, holding record 3
        assert_eq!(ring.cursor(), 1);
        assert_eq!(ring.evicted(3).beat_number(), 3);
    }

    #[test]
    fn test_evicted_slot_when_window_equals_depth() {
        let ring = ring_with(3, 4);

        // cursor = 1 -> slot 1, the record written one full cycle ago
        assert_eq!(ring.evicted(3).beat_number(), 1);
    }

    #[test]
    fn test_history_zero() {
        let ring = ring_with(4, 3);
        assert!(ring.history(0).is_empty());
    }

    #[test]
    fn test_history_more_than_produced() {
        let ring = ring_with(8, 3);
        assert_eq!(ids(&ring.history(10)), vec![0, 1, 2]);
    }

    #[test]
    fn test_history_contiguous() {
        let ring = ring_with(8, 5);
        assert_eq!(ids(&ring.history(3)), vec![2, 3, 4]);
    }

    #[test]
    fn test_history_across_wrap() {
        // depth 4, 6 produced: slots = [4, 5, 2, 3], cursor = 2
        let ring = ring_with(4, 6);
        assert_eq!(ids(&ring.history(3)), vec![3, 4, 5]);
    }

    #[test]
    fn test_history_whole_buffer() {
        let ring = ring_with(4, 6);
        assert_eq!(ids(&ring.history(4)), vec![2, 3, 4, 5]);
        assert_eq!(ids(&ring.history(5)), vec![2, 3, 4, 5]);
        assert_eq!(ids(&ring.history(100)), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_history_exactly_full_cycle() {
        // cursor back at 0 after exactly depth records
        let ring = ring_with(4, 8);
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ids(&ring.history(2)), vec![6, 7]);
        assert_eq!(ids(&ring.history(9)), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_history_more_than_produced_after_first_cycle() {
        let ring = ring_with(4, 4);
        assert_eq!(ids(&ring.history(5)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pending_and_slots() {
        let ring = ring_with(4, 6);
        assert_eq!(ids(ring.pending()), vec![4, 5]);
        assert_eq!(ids(ring.slots()), vec![4, 5, 2, 3]);
    }
}
