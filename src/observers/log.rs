//! # LogWriter: relay events as structured `tracing` records.
//!
//! Ingest trouble (disconnects, gaps, evictions) logs at `warn`, normal
//! lifecycle at `info`, and high-volume session churn at `debug`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  relay: upstream connecting attempt=1 resume_from=None
//! WARN  relay: sequence gap detected first_missing=1043 missing=7
//! WARN  relay: reconnect scheduled attempt=2 delay_ms=212 reason="connection reset"
//! WARN  relay: session evicted session=4 lag=40001 reason="subscriber too slow: ..."
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{EventKind, RelayEvent};
use crate::observers::Observe;

/// Installs a global `tracing` subscriber: fmt output filtered by the
/// `RELAY_LOG` environment variable (default `info`).
///
/// Panics if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(crate::config::LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Observer that writes every relay event to `tracing` under target `relay`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observe for LogWriter {
    async fn on_event(&self, e: &RelayEvent) {
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::UpstreamConnecting => {
                info!(target: "relay", attempt = ?e.attempt, resume_from = ?e.seq, "upstream connecting")
            }
            EventKind::UpstreamConnected => {
                info!(target: "relay", resume_from = ?e.seq, "upstream connected")
            }
            EventKind::UpstreamDisconnected => {
                warn!(target: "relay", last_good = ?e.seq, reason, "upstream disconnected")
            }
            EventKind::ReconnectScheduled => {
                warn!(target: "relay", attempt = ?e.attempt, delay_ms = ?e.delay_ms, reason, "reconnect scheduled")
            }
            EventKind::GapDetected => {
                warn!(target: "relay", first_missing = ?e.seq, missing = ?e.count, reason, "sequence gap detected")
            }
            EventKind::SessionOpened => {
                debug!(target: "relay", session = ?e.session, cursor = ?e.seq, "session opened")
            }
            EventKind::SessionLive => {
                debug!(target: "relay", session = ?e.session, replayed_through = ?e.seq, "session live")
            }
            EventKind::SessionEvicted => {
                warn!(target: "relay", session = ?e.session, lag = ?e.count, reason, "session evicted")
            }
            EventKind::SessionClosed => {
                debug!(target: "relay", session = ?e.session, reason, "session closed")
            }
            EventKind::SubscribeRejected => {
                info!(target: "relay", cursor = ?e.seq, reason, "subscribe rejected")
            }
            EventKind::Ready => {
                info!(target: "relay", received = ?e.count, "relay ready")
            }
            EventKind::ShutdownRequested => info!(target: "relay", reason, "shutdown requested"),
            EventKind::AllStoppedWithin => info!(target: "relay", "all components stopped within grace"),
            EventKind::GraceExceeded => warn!(target: "relay", stuck = reason, "shutdown grace exceeded"),
            EventKind::ObserverOverflow => warn!(target: "relay", reason, "observer overflow"),
            EventKind::ObserverPanicked => warn!(target: "relay", reason, "observer panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
