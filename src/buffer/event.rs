//! # Commit events carried through the relay.

use std::time::SystemTime;

use bytes::Bytes;

/// One accepted upstream record.
///
/// Created by the ingestor, immutable once appended, shared as
/// `Arc<CommitEvent>` between the buffer and every session that delivers it.
/// The payload is opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    /// Upstream sequence number (strictly increasing, contiguous).
    pub seq: u64,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Wall-clock time the ingestor received the record.
    pub received_at: SystemTime,
    /// Cumulative payload bytes accepted through this event (set on append).
    stream_offset: u64,
}

impl CommitEvent {
    /// Creates an event stamped with the current time.
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
            received_at: SystemTime::now(),
            stream_offset: 0,
        }
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total payload bytes the buffer had accepted once this event was appended.
    ///
    /// Differences between two offsets give the byte distance between events,
    /// which is how session lag is reported in bytes.
    #[inline]
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    #[inline]
    pub(crate) fn with_stream_offset(mut self, offset: u64) -> Self {
        self.stream_offset = offset;
        self
    }
}
