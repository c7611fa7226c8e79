//! # Lifecycle events emitted by the relay.
//!
//! The [`EventKind`] enum classifies what happened across four areas:
//! - **Ingest**: upstream connection state, gaps, reconnect scheduling
//! - **Sessions**: subscriber sessions opening, going live, closing, evicted
//! - **Readiness & shutdown**: priming completed, shutdown progress
//! - **Observers**: observer overflow / panic (self-reporting of the fan-out)
//!
//! [`RelayEvent`] carries the metadata. These events describe the relay; they
//! are unrelated to the commit events being relayed.
//!
//! ## Ordering guarantees
//! Each event carries a process-wide `id` that increases monotonically; use it
//! to restore emission order when observers receive events out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use commit_relay::{EventKind, RelayEvent};
//!
//! let ev = RelayEvent::new(EventKind::ReconnectScheduled)
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(400))
//!     .with_reason("connection reset");
//!
//! assert_eq!(ev.kind, EventKind::ReconnectScheduled);
//! assert_eq!(ev.delay_ms, Some(400));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// Classification of relay lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Ingest ===
    /// Ingestor is opening an upstream connection.
    ///
    /// Sets: `attempt` (consecutive failures so far + 1), `seq` (resume position, if any)
    UpstreamConnecting,

    /// Upstream connection established; records are streaming.
    ///
    /// Sets: `seq` (resume position, if any)
    UpstreamConnected,

    /// Upstream connection lost or refused.
    ///
    /// Sets: `reason`, `seq` (last good)
    UpstreamDisconnected,

    /// Next connect attempt scheduled.
    ///
    /// Sets: `attempt`, `delay_ms`, `reason`
    ReconnectScheduled,

    /// Upstream skipped sequence numbers; ingest resyncs from last good.
    ///
    /// Sets: `seq` (first missing), `count` (missing events), `reason`
    GapDetected,

    // === Sessions ===
    /// Subscriber session created.
    ///
    /// Sets: `session`, `seq` (start cursor, if initialized)
    SessionOpened,

    /// Session caught up with the tail and switched to live delivery.
    ///
    /// Sets: `session`, `seq` (last replayed)
    SessionLive,

    /// Session evicted for lag.
    ///
    /// Sets: `session`, `count` (lag), `reason`
    SessionEvicted,

    /// Session ended (downstream dropped, unsubscribed, failed or shutdown).
    ///
    /// Sets: `session`, optional `reason`
    SessionClosed,

    /// Subscribe rejected before a session existed.
    ///
    /// Sets: `seq` (requested cursor), `reason`
    SubscribeRejected,

    // === Readiness & shutdown ===
    /// Buffer primed to the configured minimum; relay reports ready.
    ///
    /// Sets: `count` (events received)
    Ready,

    /// Shutdown requested (OS signal or explicit).
    ///
    /// Sets: `reason` (signal name, when a signal triggered it)
    ShutdownRequested,

    /// All components stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some components did not stop.
    GraceExceeded,

    // === Observers ===
    /// Observer dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (observer name and cause)
    ObserverOverflow,

    /// Observer panicked while handling an event.
    ///
    /// Sets: `reason` (observer name and panic message)
    ObserverPanicked,
}

/// Relay lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct RelayEvent {
    /// Process-wide, monotonically increasing event id.
    pub id: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Session id, for session events.
    pub session: Option<u64>,
    /// Relevant commit sequence (cursor, last good, first missing...).
    pub seq: Option<u64>,
    /// A count (missing events, lag, events received).
    pub count: Option<u64>,
    /// Attempt number (1-based).
    pub attempt: Option<u32>,
    /// Scheduled delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl RelayEvent {
    /// Creates a new event of the given kind with current timestamp and next id.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EVENT_ID.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            session: None,
            seq: None,
            count: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a session id.
    #[inline]
    pub fn with_session(mut self, id: u64) -> Self {
        self.session = Some(id);
        self
    }

    /// Attaches a sequence number.
    #[inline]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Attaches an optional sequence number.
    #[inline]
    pub fn with_seq_opt(mut self, seq: Option<u64>) -> Self {
        self.seq = seq;
        self
    }

    /// Attaches a count.
    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates an observer overflow event.
    #[inline]
    pub fn observer_overflow(observer: &'static str, cause: &'static str) -> Self {
        RelayEvent::new(EventKind::ObserverOverflow)
            .with_reason(format!("observer={observer} reason={cause}"))
    }

    /// Creates an observer panic event.
    #[inline]
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        RelayEvent::new(EventKind::ObserverPanicked)
            .with_reason(format!("observer={observer} panic={info}"))
    }
}
