//! # Rollback window storage.
//!
//! [`EventBuffer`] is the plain, single-threaded ring behind the shared
//! handles. Sequences are contiguous, so slot `seq mod N` is exact and every
//! operation is O(1):
//!
//! ```text
//! capacity N = 5, after appending 1..=7
//!
//!  index:   0     1     2     3     4
//!         ┌─────┬─────┬─────┬─────┬─────┐
//!  slot:  │  5  │  6  │  7  │  3  │  4  │
//!         └─────┴─────┴─────┴─────┴─────┘
//!                        ▲     ▲
//!                      tail   head
//! ```
//!
//! ## Rules
//! - `append` accepts only `tail + 1` (any seq when empty) and never mutates on error.
//! - When full, the slot being written is exactly the head, so eviction is the overwrite.
//! - `head = tail − len + 1`.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::buffer::event::CommitEvent;
use crate::error::RelayError;

/// Capacity-bounded, sequence-keyed ring of commit events.
#[derive(Debug)]
pub struct EventBuffer {
    slots: Vec<Option<Arc<CommitEvent>>>,
    tail: Option<u64>,
    len: usize,
    total_received: u64,
    total_bytes: u64,
}

impl EventBuffer {
    /// Creates an empty buffer holding at most `capacity` events (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            tail: None,
            len: 0,
            total_received: 0,
            total_bytes: 0,
        }
    }

    /// Maximum number of retained events.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of retained events.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing was ever appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Oldest retained sequence.
    pub fn head(&self) -> Option<u64> {
        self.tail.map(|t| t - (self.len as u64).saturating_sub(1))
    }

    /// Newest retained sequence.
    #[inline]
    pub fn tail(&self) -> Option<u64> {
        self.tail
    }

    /// Events accepted since creation (including evicted ones).
    #[inline]
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Payload bytes accepted since creation.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// The only sequence `append` will accept next (`None` = any).
    pub fn next_expected(&self) -> Option<u64> {
        self.tail.map(|t| t.saturating_add(1))
    }

    /// Appends `event`, evicting the head when full.
    ///
    /// Returns the evicted event, if any. Fails with [`RelayError::SequenceGap`]
    /// (and leaves the buffer untouched) unless `event.seq == tail + 1`.
    pub fn append(
        &mut self,
        event: CommitEvent,
    ) -> Result<(Arc<CommitEvent>, Option<Arc<CommitEvent>>), RelayError> {
        if let Some(tail) = self.tail {
            let expected = tail.saturating_add(1);
            if tail == u64::MAX || event.seq != expected {
                return Err(RelayError::SequenceGap {
                    expected,
                    got: event.seq,
                });
            }
        }

        let offset = self.total_bytes + event.len() as u64;
        let event = Arc::new(event.with_stream_offset(offset));
        let idx = self.index(event.seq);

        let evicted = self.slots[idx].replace(Arc::clone(&event));
        if evicted.is_none() {
            self.len += 1;
        }

        self.tail = Some(event.seq);
        self.total_received += 1;
        self.total_bytes = offset;
        Ok((event, evicted))
    }

    /// Returns the retained event with sequence `seq`.
    pub fn get(&self, seq: u64) -> Option<&Arc<CommitEvent>> {
        let head = self.head()?;
        let tail = self.tail?;
        if seq < head || seq > tail {
            return None;
        }
        self.slots[self.index(seq)].as_ref()
    }

    /// Resolves the inclusive range of sequences a slice from `from` covers.
    ///
    /// - `from < head` → [`RelayError::CursorTooOld`]
    /// - `from > tail` (or empty buffer) → an empty range
    /// - otherwise `from..=tail`
    pub fn range_from(&self, from: u64) -> Result<RangeInclusive<u64>, RelayError> {
        let (Some(head), Some(tail)) = (self.head(), self.tail) else {
            return Ok(empty_range());
        };
        if from < head {
            return Err(RelayError::CursorTooOld { cursor: from, head });
        }
        if from > tail {
            return Ok(empty_range());
        }
        Ok(from..=tail)
    }

    #[inline]
    fn index(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }
}

#[allow(clippy::reversed_empty_ranges)]
fn empty_range() -> RangeInclusive<u64> {
    1..=0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, seqs: RangeInclusive<u64>) -> EventBuffer {
        let mut buf = EventBuffer::new(capacity);
        for seq in seqs {
            buf.append(CommitEvent::new(seq, vec![seq as u8])).unwrap();
        }
        buf
    }

    #[test]
    fn test_retains_min_of_capacity_and_count() {
        for count in 0..12u64 {
            let buf = filled(5, 1..=count);
            assert_eq!(buf.len() as u64, count.min(5));
            if count > 0 {
                assert_eq!(buf.tail(), Some(count));
                assert_eq!(buf.head(), Some(count.saturating_sub(5) + 1));
            } else {
                assert_eq!(buf.head(), None);
            }
        }
    }

    #[test]
    fn test_gap_rejected_without_mutation() {
        let mut buf = filled(5, 1..=5);
        let err = buf.append(CommitEvent::new(7, "x")).unwrap_err();
        assert_eq!(err, RelayError::SequenceGap { expected: 6, got: 7 });
        assert_eq!(buf.head(), Some(1));
        assert_eq!(buf.tail(), Some(5));
        assert_eq!(buf.total_received(), 5);

        let (_, evicted) = buf.append(CommitEvent::new(6, "x")).unwrap();
        assert_eq!(evicted.map(|e| e.seq), Some(1));
        assert_eq!(buf.head(), Some(2));
        assert_eq!(buf.tail(), Some(6));

        let (_, evicted) = buf.append(CommitEvent::new(7, "x")).unwrap();
        assert_eq!(evicted.map(|e| e.seq), Some(2));
        assert_eq!(buf.head(), Some(3));
        assert_eq!(buf.tail(), Some(7));
        assert_eq!(
            buf.range_from(2).unwrap_err(),
            RelayError::CursorTooOld { cursor: 2, head: 3 }
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut buf = filled(3, 10..=11);
        assert!(matches!(
            buf.append(CommitEvent::new(11, "dup")),
            Err(RelayError::SequenceGap { expected: 12, got: 11 })
        ));
    }

    #[test]
    fn test_first_append_accepts_any_seq() {
        let buf = filled(4, 1000..=1001);
        assert_eq!(buf.head(), Some(1000));
        assert_eq!(buf.get(1001).map(|e| e.seq), Some(1001));
        assert!(buf.get(999).is_none());
    }

    #[test]
    fn test_range_from() {
        let buf = filled(5, 1..=7);
        assert_eq!(
            buf.range_from(1),
            Err(RelayError::CursorTooOld { cursor: 1, head: 3 })
        );
        assert_eq!(buf.range_from(3), Ok(3..=7));
        assert_eq!(buf.range_from(7), Ok(7..=7));
        assert!(buf.range_from(8).unwrap().is_empty());
        assert!(EventBuffer::new(5).range_from(0).unwrap().is_empty());
    }

    #[test]
    fn test_stream_offsets_accumulate() {
        let mut buf = EventBuffer::new(2);
        buf.append(CommitEvent::new(1, vec![0u8; 10])).unwrap();
        buf.append(CommitEvent::new(2, vec![0u8; 5])).unwrap();
        let (ev, _) = buf.append(CommitEvent::new(3, vec![0u8; 1])).unwrap();
        assert_eq!(ev.stream_offset(), 16);
        assert_eq!(buf.get(2).map(|e| e.stream_offset()), Some(15));
        assert_eq!(buf.total_bytes(), 16);
    }
}
