//! # Admin and liveness surface.
//!
//! - [`RelayStats`]: point-in-time view of the buffer, the ingestor and every
//!   session, serialisable to JSON for an external `/stats` endpoint.
//! - [`ReadyGate`]: readiness flag that stays "not ready" until the buffer has
//!   been primed with `min_ready_events` events since process start. Once
//!   ready it never flips back.
//!
//! ## Example
//! ```rust
//! use commit_relay::ReadyGate;
//!
//! let gate = ReadyGate::new(3);
//! assert!(!gate.is_ready());
//! assert!(!gate.observe(2));
//! assert!(gate.observe(3));
//! assert!(gate.is_ready());
//! assert!(!gate.observe(4), "only the first crossing reports a flip");
//! ```

use serde::Serialize;
use tokio::sync::watch;

use crate::core::{IngestState, SessionMode};

/// Reported while the buffer is still priming.
pub const WARMUP_PENDING_REASON: &str = "warmup_pending";

/// Per-session counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Session id.
    pub id: u64,
    /// Delivery phase.
    pub mode: SessionMode,
    /// Next sequence the session will pull (`None` while uninitialized).
    pub cursor: Option<u64>,
    /// Lag in events.
    pub lag_count: u64,
    /// Lag in payload bytes.
    pub lag_bytes: u64,
    /// Events waiting in the outgoing queue.
    pub queued: usize,
}

/// Relay-wide snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Oldest retained sequence.
    pub head: Option<u64>,
    /// Newest retained sequence.
    pub tail: Option<u64>,
    /// Retained events.
    pub occupancy: usize,
    /// Window capacity.
    pub capacity: usize,
    /// Events accepted since start.
    pub total_received: u64,
    /// Payload bytes accepted since start.
    pub total_bytes: u64,
    /// Ingestor state.
    pub ingest_state: IngestState,
    /// Readiness flag.
    pub ready: bool,
    /// Why the relay is not ready, if it isn't.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_ready_reason: Option<&'static str>,
    /// Sessions ordered by id.
    pub sessions: Vec<SessionStats>,
}

impl RelayStats {
    /// Renders the snapshot as a JSON document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Largest lag across sessions.
    pub fn max_lag(&self) -> u64 {
        self.sessions.iter().map(|s| s.lag_count).max().unwrap_or(0)
    }
}

/// Sticky readiness flag driven by the received-event count.
#[derive(Debug)]
pub struct ReadyGate {
    min_events: u64,
    tx: watch::Sender<bool>,
}

impl ReadyGate {
    /// Creates a gate; `min_events == 0` starts ready.
    pub fn new(min_events: u64) -> Self {
        let (tx, _rx) = watch::channel(min_events == 0);
        Self { min_events, tx }
    }

    /// Feeds the number of events received so far.
    ///
    /// Returns `true` only on the call that flips the gate to ready.
    pub fn observe(&self, received: u64) -> bool {
        if received < self.min_events {
            return false;
        }
        self.tx.send_if_modified(|ready| !std::mem::replace(ready, true))
    }

    /// Current readiness.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Reason for not being ready, or `None` once ready.
    pub fn reason(&self) -> Option<&'static str> {
        (!self.is_ready()).then_some(WARMUP_PENDING_REASON)
    }

    /// Resolves once the gate is ready.
    pub async fn ready(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
