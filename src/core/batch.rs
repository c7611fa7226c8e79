//! # Batch scheduler for one session.
//!
//! Accumulates events pulled from the buffer and decides when to hand them to
//! the session's outgoing queue. A batch flushes when either:
//! - it holds `max_events` events, or
//! - `delay` has elapsed since the previous flush.
//!
//! ```text
//!   pull ──► push ──► [pending ≤ max_events] ──► is_due? ──► drain ──► outgoing queue
//!                                 │
//!                                 └─ deadline = last_flush + delay
//! ```
//!
//! Events leave in exactly the order they were pushed; a batch never spans a
//! reordering. The batcher is session-local and never shared.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::buffer::CommitEvent;

/// One flushed batch, in sequence order.
pub type Batch = Vec<Arc<CommitEvent>>;

pub(crate) struct Batcher {
    pending: VecDeque<Arc<CommitEvent>>,
    delay: Duration,
    max_events: usize,
    last_flush: Instant,
}

impl Batcher {
    pub(crate) fn new(delay: Duration, max_events: usize, now: Instant) -> Self {
        Self {
            pending: VecDeque::new(),
            delay,
            max_events: max_events.max(1),
            last_flush: now,
        }
    }

    pub(crate) fn push(&mut self, event: Arc<CommitEvent>) {
        self.pending.push_back(event);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How many more events fit before the batch is full.
    pub(crate) fn room(&self) -> usize {
        self.max_events.saturating_sub(self.pending.len())
    }

    /// True when a non-empty batch is full or its delay has elapsed.
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.pending.len() >= self.max_events || now >= self.last_flush + self.delay
    }

    /// When the pending batch becomes due by time (`None` while empty).
    pub(crate) fn deadline(&self) -> Option<Instant> {
        (!self.pending.is_empty()).then(|| self.last_flush + self.delay)
    }

    /// Takes the pending events and restarts the delay window at `now`.
    pub(crate) fn drain(&mut self, now: Instant) -> Batch {
        self.last_flush = now;
        self.pending.drain(..).collect()
    }

    /// Drops pending events and releases their storage.
    pub(crate) fn clear(&mut self) {
        self.pending = VecDeque::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(seq: u64) -> Arc<CommitEvent> {
        Arc::new(CommitEvent::new(seq, "x"))
    }

    #[test]
    fn test_flushes_when_full() {
        let now = Instant::now();
        let mut b = Batcher::new(Duration::from_secs(60), 3, now);
        b.push(ev(1));
        b.push(ev(2));
        assert!(!b.is_due(now));
        assert_eq!(b.room(), 1);
        b.push(ev(3));
        assert!(b.is_due(now));
        assert_eq!(b.room(), 0);

        let batch = b.drain(now);
        assert_eq!(batch.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(b.is_empty());
    }

    #[test]
    fn test_flushes_after_delay() {
        let start = Instant::now();
        let delay = Duration::from_millis(50);
        let mut b = Batcher::new(delay, 100, start);
        b.push(ev(1));

        assert_eq!(b.deadline(), Some(start + delay));
        assert!(!b.is_due(start + Duration::from_millis(49)));
        assert!(b.is_due(start + delay));
    }

    #[test]
    fn test_empty_batcher_is_never_due() {
        let start = Instant::now();
        let b = Batcher::new(Duration::ZERO, 1, start);
        assert!(!b.is_due(start + Duration::from_secs(10)));
        assert_eq!(b.deadline(), None);
    }

    #[test]
    fn test_drain_restarts_delay_window() {
        let start = Instant::now();
        let delay = Duration::from_millis(50);
        let mut b = Batcher::new(delay, 100, start);
        b.push(ev(1));
        let later = start + Duration::from_millis(80);
        assert_eq!(b.drain(later).len(), 1);

        b.push(ev(2));
        assert_eq!(b.deadline(), Some(later + delay));
        assert_eq!(b.len(), 1);
        b.clear();
        assert!(b.is_empty());
    }
}
