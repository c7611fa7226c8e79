//! # Relay: owns the buffer, the ingestor, the sessions and their shutdown.
//!
//! A [`Relay`] is built once per process by [`RelayBuilder`](crate::RelayBuilder)
//! and consumed by [`Relay::run`]. Everything a caller needs while it runs
//! (subscribing, stats, readiness, shutdown) goes through the cloneable
//! [`RelayHandle`].
//!
//! ## Architecture
//! ```text
//! run():
//!   Bus.subscribe() ──► observer listener ──► ObserverSet::emit()     (fire-and-forget)
//!
//!   tracker.spawn(Ingestor::run(child token))    single BufferWriter
//!   tracker.spawn(Monitor::run(child token))     periodic lag scan
//!   RelayHandle::subscribe() ──► tracker.spawn(Session::run)   one per subscriber
//!
//! Shutdown path:
//!   OS signal or RelayHandle::shutdown()
//!         └─► Bus.publish(ShutdownRequested)
//!         └─► token.cancel()       → ingestor, monitor, every session
//!         └─► tracker.wait() within cfg.grace:
//!                ├─ Ok       → Bus.publish(AllStoppedWithin)
//!                └─ Timeout  → Bus.publish(GraceExceeded), RuntimeError::GraceExceeded{stuck}
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use commit_relay::{Config, LogWriter, Relay, RelayError, UpstreamFn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = UpstreamFn::arc("firehose", |_last: Option<u64>| async move {
//!         Err::<commit_relay::RecordStream, _>(RelayError::upstream("not wired"))
//!     });
//!
//!     let relay = Relay::builder(Config::load()?)
//!         .with_observer(Arc::new(LogWriter::new()))
//!         .build(upstream)?;
//!     let handle = relay.handle();
//!
//!     tokio::spawn(async move {
//!         let mut sub = handle.subscribe(None)?;
//!         while let Some(batch) = sub.next_batch().await {
//!             for ev in batch? {
//!                 println!("{} ({} bytes)", ev.seq, ev.len());
//!             }
//!         }
//!         Ok::<_, RelayError>(())
//!     });
//!
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::admin::{ReadyGate, RelayStats};
use crate::buffer::{BufferReader, BufferWriter};
use crate::config::Config;
use crate::core::builder::RelayBuilder;
use crate::core::dispatcher::Dispatcher;
use crate::core::ingestor::{IngestState, Ingestor};
use crate::core::monitor::Monitor;
use crate::core::session::Subscription;
use crate::core::shutdown;
use crate::error::{RelayError, RuntimeError};
use crate::events::{Bus, EventKind, RelayEvent};
use crate::observers::{Observe, ObserverSet};
use crate::upstream::UpstreamRef;

/// The relay instance. Consumed by [`Relay::run`].
pub struct Relay {
    pub(crate) cfg: Arc<Config>,
    pub(crate) bus: Bus,
    pub(crate) upstream: UpstreamRef,
    pub(crate) observers: Vec<Arc<dyn Observe>>,
    pub(crate) handle_signals: bool,
    pub(crate) writer: BufferWriter,
    pub(crate) ingest_tx: watch::Sender<IngestState>,
    pub(crate) tracker: TaskTracker,
    pub(crate) handle: RelayHandle,
}

impl Relay {
    /// Starts building a relay with `cfg`.
    pub fn builder(cfg: Config) -> RelayBuilder {
        RelayBuilder::new(cfg)
    }

    /// Returns a handle for subscribing, stats and shutdown.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// The immutable configuration this relay runs with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Runs ingestion, the backpressure monitor and all sessions until
    /// shutdown is requested, then stops everything within `cfg.grace`.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let Relay {
            cfg,
            bus,
            upstream,
            observers,
            handle_signals,
            writer,
            ingest_tx,
            tracker,
            handle,
        } = self;

        let listener_stop = CancellationToken::new();
        let listener = spawn_observer_listener(
            bus.subscribe(),
            ObserverSet::new(observers, bus.clone()),
            listener_stop.clone(),
        );

        let token = handle.token.clone();
        let ingestor = Ingestor::new(
            upstream,
            writer,
            cfg.backoff,
            bus.clone(),
            ingest_tx,
            Arc::clone(&handle.ready),
        );
        let ingest_join = tracker.spawn(ingestor.run(token.child_token()));

        let monitor = Monitor::new(
            handle.reader.clone(),
            Arc::clone(&handle.dispatcher),
            cfg.monitor_interval,
        );
        let monitor_join = tracker.spawn(monitor.run(token.child_token()));

        let requested = match wait_for_stop(&token, handle_signals).await {
            Some(signal) => RelayEvent::new(EventKind::ShutdownRequested).with_reason(signal),
            None => RelayEvent::new(EventKind::ShutdownRequested),
        };
        bus.publish(requested);
        token.cancel();
        handle.dispatcher.close_all();
        tracker.close();

        let grace = cfg.grace;
        let result = match tokio::time::timeout(grace, tracker.wait()).await {
            Ok(()) => {
                bus.publish(RelayEvent::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = stuck_components(&ingest_join, &monitor_join, &handle.dispatcher);
                bus.publish(
                    RelayEvent::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        listener_stop.cancel();
        let _ = listener.await;
        result
    }
}

/// Waits for an OS termination signal (when enabled) or an explicit shutdown.
///
/// Returns the signal name, or `None` for [`RelayHandle::shutdown`].
async fn wait_for_stop(token: &CancellationToken, handle_signals: bool) -> Option<&'static str> {
    if !handle_signals {
        token.cancelled().await;
        return None;
    }
    tokio::select! {
        res = shutdown::wait_for_shutdown_signal() => match res {
            Ok(signal) => {
                info!(target: "relay", signal, "termination signal received");
                Some(signal)
            }
            Err(e) => {
                warn!(target: "relay", error = %e, "signal handlers unavailable; waiting for explicit shutdown");
                token.cancelled().await;
                None
            }
        },
        _ = token.cancelled() => None,
    }
}

fn stuck_components(
    ingest: &JoinHandle<()>,
    monitor: &JoinHandle<()>,
    dispatcher: &Dispatcher,
) -> Vec<String> {
    let mut stuck = Vec::new();
    if !ingest.is_finished() {
        stuck.push("ingestor".to_string());
    }
    if !monitor.is_finished() {
        stuck.push("monitor".to_string());
    }
    stuck.extend(
        dispatcher
            .session_ids()
            .into_iter()
            .map(|id| format!("session-{id}")),
    );
    stuck
}

/// Forwards bus events to the observer set until `stop`, then drains what is
/// already queued and waits for observer workers to finish.
fn spawn_observer_listener(
    mut rx: broadcast::Receiver<RelayEvent>,
    set: ObserverSet,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "relay", skipped, "observer listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => set.emit(ev),
                            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    })
}

/// Cloneable access to a running (or about to run) relay.
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) reader: BufferReader,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) ready: Arc<ReadyGate>,
    pub(crate) ingest: watch::Receiver<IngestState>,
    pub(crate) bus: Bus,
    pub(crate) token: CancellationToken,
}

impl RelayHandle {
    /// Opens a subscriber session.
    ///
    /// - `None`: live only, starting after the current tail (or at the first
    ///   event ever appended if the buffer is still empty).
    /// - `Some(cursor)`: replay from `cursor`, then live. Fails with
    ///   [`RelayError::CursorTooOld`] if `cursor` was already evicted.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn subscribe(&self, cursor: Option<u64>) -> Result<Subscription, RelayError> {
        self.dispatcher.subscribe(cursor)
    }

    /// Ends session `id`; `false` if it is not active.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.dispatcher.session_count()
    }

    /// Snapshot of buffer, ingest and session state.
    pub fn stats(&self) -> RelayStats {
        let snap = self.reader.snapshot();
        RelayStats {
            head: snap.head,
            tail: snap.tail,
            occupancy: snap.len,
            capacity: snap.capacity,
            total_received: snap.total_received,
            total_bytes: snap.total_bytes,
            ingest_state: *self.ingest.borrow(),
            ready: self.ready.is_ready(),
            not_ready_reason: self.ready.reason(),
            sessions: self.dispatcher.sessions(),
        }
    }

    /// Readiness: false until the configured number of events was received.
    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Resolves once the relay is ready.
    pub async fn ready(&self) {
        self.ready.ready().await
    }

    /// Current ingestor state.
    pub fn ingest_state(&self) -> IngestState {
        *self.ingest.borrow()
    }

    /// Resolves the next time the ingestor is streaming (immediately if it is).
    pub async fn connected(&self) {
        let mut rx = self.ingest.clone();
        let _ = rx.wait_for(|s| *s == IngestState::Streaming).await;
    }

    /// Read-only access to the rollback window.
    pub fn buffer(&self) -> BufferReader {
        self.reader.clone()
    }

    /// Receiver of relay lifecycle events published from now on.
    pub fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.bus.subscribe()
    }

    /// Requests a graceful shutdown of [`Relay::run`].
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// True once shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}
