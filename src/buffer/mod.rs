//! Event buffer: the rollback window and its single-writer / many-reader handles.
//!
//! ## Contents
//! - [`CommitEvent`] one accepted upstream record
//! - [`EventBuffer`] plain sequence-keyed ring (no synchronization)
//! - [`BufferWriter`] the only handle that can append (owned by the ingestor)
//! - [`BufferReader`] cloneable read-only handle (dispatcher, sessions, admin)
//! - [`Slice`] lazy, finite, restartable view of `seq >= from`
//!
//! ## Architecture
//! ```text
//!  Ingestor ── BufferWriter::append ──► RwLock<EventBuffer> ◄── BufferReader::slice ── sessions
//!                       │                                          ▲
//!                       └──► watch<Option<u64>> (tail) ────────────┘ wake on append
//! ```
//!
//! ## Rules
//! - **Single writer**: [`BufferWriter`] is not `Clone`; [`split`] hands out exactly one.
//! - **Short locks**: the write lock covers one append/evict; readers lock per item.
//! - **Wake-up**: every successful append publishes the new tail on a watch channel.

mod event;
mod window;

use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::RelayError;

pub use event::CommitEvent;
pub use window::EventBuffer;

struct Shared {
    window: RwLock<EventBuffer>,
    tail_tx: watch::Sender<Option<u64>>,
}

/// Creates a buffer of `capacity` events and returns its writer and a reader.
pub(crate) fn split(capacity: usize) -> (BufferWriter, BufferReader) {
    let (tail_tx, _rx) = watch::channel(None);
    let shared = Arc::new(Shared {
        window: RwLock::new(EventBuffer::new(capacity)),
        tail_tx,
    });
    (
        BufferWriter {
            shared: Arc::clone(&shared),
        },
        BufferReader { shared },
    )
}

/// Append/evict capability. Exactly one exists per buffer, owned by the
/// ingestor; it never leaves the crate.
pub(crate) struct BufferWriter {
    shared: Arc<Shared>,
}

impl BufferWriter {
    /// Appends `event`; see [`EventBuffer::append`].
    ///
    /// On success readers waiting on [`BufferReader::watch_tail`] are woken.
    pub fn append(&self, event: CommitEvent) -> Result<Arc<CommitEvent>, RelayError> {
        let (appended, _evicted) = self.shared.window.write().append(event)?;
        self.shared.tail_tx.send_replace(Some(appended.seq));
        Ok(appended)
    }

    /// Newest accepted sequence: the ingestor's last good position.
    pub fn last_good(&self) -> Option<u64> {
        self.shared.window.read().tail()
    }

    /// Returns another read-only handle.
    pub fn reader(&self) -> BufferReader {
        BufferReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Point-in-time view of buffer positions, taken under one read lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSnapshot {
    /// Oldest retained sequence.
    pub head: Option<u64>,
    /// Newest retained sequence.
    pub tail: Option<u64>,
    /// Retained events.
    pub len: usize,
    /// Window capacity.
    pub capacity: usize,
    /// Events accepted since start.
    pub total_received: u64,
    /// Payload bytes accepted since start.
    pub total_bytes: u64,
}

/// Read-only handle. Cheap to clone.
#[derive(Clone)]
pub struct BufferReader {
    shared: Arc<Shared>,
}

impl BufferReader {
    /// Oldest retained sequence.
    pub fn head(&self) -> Option<u64> {
        self.shared.window.read().head()
    }

    /// Newest retained sequence.
    pub fn tail(&self) -> Option<u64> {
        self.shared.window.read().tail()
    }

    /// Positions and counters under a single lock.
    pub fn snapshot(&self) -> BufferSnapshot {
        let w = self.shared.window.read();
        BufferSnapshot {
            head: w.head(),
            tail: w.tail(),
            len: w.len(),
            capacity: w.capacity(),
            total_received: w.total_received(),
            total_bytes: w.total_bytes(),
        }
    }

    /// Retained event with sequence `seq`.
    pub fn get(&self, seq: u64) -> Option<Arc<CommitEvent>> {
        self.shared.window.read().get(seq).cloned()
    }

    /// Stream offset just before `seq`: the byte position a reader resuming
    /// at `seq` has consumed up to.
    ///
    /// Sequences past the tail map to the current total.
    pub fn offset_before(&self, seq: u64) -> u64 {
        let w = self.shared.window.read();
        match w.get(seq) {
            Some(ev) => ev.stream_offset() - ev.len() as u64,
            None => w.total_bytes(),
        }
    }

    /// Returns the events with `seq >= from`, bounded by the tail at call time.
    ///
    /// - `from < head` → [`RelayError::CursorTooOld`]
    /// - `from > tail` → an empty slice (caller continues live)
    pub fn slice(&self, from: u64) -> Result<Slice, RelayError> {
        let range = self.shared.window.read().range_from(from)?;
        Ok(Slice {
            reader: self.clone(),
            range: range.clone(),
            next: *range.start(),
        })
    }

    /// Receiver that observes every tail change.
    pub fn watch_tail(&self) -> watch::Receiver<Option<u64>> {
        self.shared.tail_tx.subscribe()
    }
}

/// Lazy ordered view over a fixed sequence range of the buffer.
///
/// Items are read one at a time under a short read lock, so a slice never
/// blocks the writer for its whole length. If the writer evicts an entry
/// before the slice reaches it, the slice yields [`RelayError::CursorTooOld`]
/// once and then ends instead of skipping ahead.
///
/// Restart with [`Slice::restart`] or by cloning before iterating.
#[derive(Clone)]
pub struct Slice {
    reader: BufferReader,
    range: RangeInclusive<u64>,
    next: u64,
}

impl Slice {
    /// Rewinds to the first sequence of the range.
    pub fn restart(&mut self) {
        self.next = *self.range.start();
    }

    /// First sequence covered (meaningless when empty).
    pub fn start(&self) -> u64 {
        *self.range.start()
    }

    /// Last sequence covered (the tail at creation).
    pub fn end(&self) -> u64 {
        *self.range.end()
    }

    /// Items not yet yielded.
    pub fn remaining(&self) -> u64 {
        if self.range.is_empty() || self.next > *self.range.end() {
            0
        } else {
            *self.range.end() - self.next + 1
        }
    }
}

impl Iterator for Slice {
    type Item = Result<Arc<CommitEvent>, RelayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }
        let seq = self.next;
        let w = self.reader.shared.window.read();
        match w.get(seq) {
            Some(ev) => {
                self.next += 1;
                Some(Ok(Arc::clone(ev)))
            }
            None => {
                let head = w.head().unwrap_or(seq);
                self.next = *self.range.end() + 1;
                Some(Err(RelayError::CursorTooOld { cursor: seq, head }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (0, Some(n))
    }
}
