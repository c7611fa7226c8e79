//! # Ingestor: the single writer of the event buffer.
//!
//! Keeps one upstream connection open, validates contiguity and appends every
//! accepted record. Connection loss is retried forever with backoff; a
//! sequence gap triggers a resubscribe from the ingestor's own last good
//! sequence.
//!
//! ## State machine
//! ```text
//!            ┌──────────────────── backoff sleep ◄──────────────────┐
//!            ▼                                                      │
//! Disconnected ──► Connecting ──► Streaming ──► stream error / EOF ─┤
//!                      │              │                             │
//!                      └── refused ───┼─────────────────────────────┘
//!                                     └──► GapDetected ──► resubscribe(last_good)
//! ```
//!
//! ## Rules
//! - Only the ingestor holds the [`BufferWriter`]; nothing else appends.
//! - Records with `seq <= tail` (replayed after a resubscribe) are dropped, never appended.
//! - The first gap after progress resubscribes immediately; repeated gaps
//!   without progress back off like disconnects.
//! - The failure counter resets as soon as a connection delivers an accepted record.
//! - Every retry is published as `ReconnectScheduled`.
//! - Cancellation is honoured at every await point.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admin::ReadyGate;
use crate::buffer::{BufferWriter, CommitEvent};
use crate::error::RelayError;
use crate::events::{Bus, EventKind, RelayEvent};
use crate::policies::BackoffPolicy;
use crate::upstream::{RecordStream, UpstreamRef};

/// Connection state of the ingestor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    /// No connection; waiting to (re)connect.
    #[default]
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Records are being appended.
    Streaming,
    /// Upstream skipped sequences; resubscribing from last good.
    GapDetected,
}

/// How one connection ended.
enum StreamEnd {
    Cancelled,
    Gap { expected: u64, got: u64 },
    Failed(RelayError),
}

pub(crate) struct Ingestor {
    upstream: UpstreamRef,
    writer: BufferWriter,
    backoff: BackoffPolicy,
    bus: Bus,
    state: watch::Sender<IngestState>,
    ready: Arc<ReadyGate>,
    received: u64,
    duplicates: u64,
}

impl Ingestor {
    pub(crate) fn new(
        upstream: UpstreamRef,
        writer: BufferWriter,
        backoff: BackoffPolicy,
        bus: Bus,
        state: watch::Sender<IngestState>,
        ready: Arc<ReadyGate>,
    ) -> Self {
        Self {
            upstream,
            writer,
            backoff,
            bus,
            state,
            ready,
            received: 0,
            duplicates: 0,
        }
    }

    /// Runs until `token` is cancelled.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }

            let resume = self.writer.last_good();
            self.set_state(IngestState::Connecting);
            self.bus.publish(
                RelayEvent::new(EventKind::UpstreamConnecting)
                    .with_attempt(failures.saturating_add(1))
                    .with_seq_opt(resume),
            );

            let connected = tokio::select! {
                _ = token.cancelled() => break,
                res = self.upstream.connect(resume) => res,
            };

            let outcome = match connected {
                Ok(stream) => {
                    self.set_state(IngestState::Streaming);
                    self.bus.publish(
                        RelayEvent::new(EventKind::UpstreamConnected).with_seq_opt(resume),
                    );
                    self.stream(stream, &token, &mut failures).await
                }
                Err(e) => StreamEnd::Failed(e),
            };

            let (reason, immediate) = match outcome {
                StreamEnd::Cancelled => break,
                StreamEnd::Gap { expected, got } => {
                    let missing = got.saturating_sub(expected);
                    self.set_state(IngestState::GapDetected);
                    warn!(
                        target: "relay",
                        expected, got, missing,
                        upstream = self.upstream.name(),
                        "sequence gap; resubscribing from last good"
                    );
                    let err = RelayError::SequenceGap { expected, got };
                    self.bus.publish(
                        RelayEvent::new(EventKind::GapDetected)
                            .with_seq(expected)
                            .with_count(missing)
                            .with_reason(err.to_string()),
                    );
                    (err.to_string(), failures == 0)
                }
                StreamEnd::Failed(err) => {
                    self.set_state(IngestState::Disconnected);
                    self.bus.publish(
                        RelayEvent::new(EventKind::UpstreamDisconnected)
                            .with_seq_opt(self.writer.last_good())
                            .with_reason(err.to_string()),
                    );
                    (err.to_string(), false)
                }
            };

            let delay = if immediate {
                Duration::ZERO
            } else {
                self.backoff.next(failures)
            };
            failures = failures.saturating_add(1);

            self.bus.publish(
                RelayEvent::new(EventKind::ReconnectScheduled)
                    .with_attempt(failures)
                    .with_delay(delay)
                    .with_reason(reason),
            );

            if !delay.is_zero() {
                let sleep = time::sleep(delay);
                tokio::pin!(sleep);
                tokio::select! {
                    _ = &mut sleep => {}
                    _ = token.cancelled() => break,
                }
            }
        }

        self.set_state(IngestState::Disconnected);
        info!(
            target: "relay",
            received = self.received,
            duplicates = self.duplicates,
            "ingestor stopped"
        );
    }

    /// Appends records from one connection until it ends.
    async fn stream(
        &mut self,
        mut records: RecordStream,
        token: &CancellationToken,
        failures: &mut u32,
    ) -> StreamEnd {
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return StreamEnd::Cancelled,
                item = records.next() => item,
            };

            let record = match item {
                None => return StreamEnd::Failed(RelayError::upstream("stream ended")),
                Some(Err(e)) => return StreamEnd::Failed(e),
                Some(Ok(record)) => record,
            };

            if self.writer.last_good().is_some_and(|tail| record.seq <= tail) {
                self.duplicates += 1;
                debug!(target: "relay", seq = record.seq, "dropping replayed record");
                continue;
            }

            match self.writer.append(CommitEvent::new(record.seq, record.payload)) {
                Ok(_) => {
                    *failures = 0;
                    self.received += 1;
                    if self.ready.observe(self.received) {
                        self.bus.publish(
                            RelayEvent::new(EventKind::Ready).with_count(self.received),
                        );
                    }
                }
                Err(RelayError::SequenceGap { expected, got }) => {
                    return StreamEnd::Gap { expected, got };
                }
                Err(other) => return StreamEnd::Failed(other),
            }
        }
    }

    fn set_state(&self, next: IngestState) {
        self.state.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        });
    }
}
