//! # commit-relay
//!
//! **commit-relay** is the core of a single-instance event relay: it consumes
//! one strictly ordered stream of repository-commit events from an upstream
//! source and fans it out to any number of downstream subscribers, each with
//! its own delivery position and bounded replay from an in-memory rollback
//! window.
//!
//! Payloads are opaque; the relay only cares about sequence numbers.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                         ┌──────────────────┐
//!                         │ Upstream (trait) │  connect(last_good) → stream of records
//!                         └────────┬─────────┘
//!                                  ▼
//!                     ┌─────────────────────────┐
//!                     │ Ingestor (one task)     │  contiguity check, dedup, resync,
//!                     │ owns the BufferWriter   │  reconnect with BackoffPolicy
//!                     └────────────┬────────────┘
//!                                  ▼ append
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ EventBuffer: ring of N events, seq mod N    head ◄──── window ────► tail
//! │ RwLock held per append / per slot read       tail published on a watch
//! └───────┬──────────────────────┬──────────────────────┬───────────────┘
//!         ▼ slice(cursor)        ▼                      ▼
//!   ┌──────────┐           ┌──────────┐           ┌──────────┐
//!   │ Session 1│           │ Session 2│           │ Session N│   one task each:
//!   │ Batcher  │           │ Batcher  │           │ Batcher  │   replay → live,
//!   └────┬─────┘           └────┬─────┘           └────┬─────┘   flush on size/delay
//!        ▼ outbox (bounded)     ▼                      ▼
//!   Subscription           Subscription           Subscription   (downstream)
//!
//!   Monitor (one task): lag = tail − cursor > threshold → SubscriberTooSlow
//! ```
//!
//! ### Observability
//! ```text
//! Ingestor / sessions / monitor / relay ── publish(RelayEvent) ──► Bus
//!                                                                  │
//!                                            observer listener (in Relay::run)
//!                                                                  ▼
//!                                              ObserverSet ──► LogWriter, user observers
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types                                   |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Buffer**        | Bounded, sequence-keyed rollback window                      | [`EventBuffer`], [`BufferReader`], [`Slice`]|
//! | **Relay**         | Lifecycle, subscribe, stats, graceful shutdown               | [`Relay`], [`RelayBuilder`], [`RelayHandle`]|
//! | **Delivery**      | Ordered batches per subscriber                               | [`Subscription`], [`Batch`]                 |
//! | **Upstream**      | Source abstraction and framed byte-stream adapter            | [`Upstream`], [`FramedUpstream`]            |
//! | **Observers**     | Hook into relay events (logging, metrics)                    | [`Observe`], [`LogWriter`]                  |
//! | **Policies**      | Reconnect backoff with jitter                                | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed errors with stable labels                              | [`RelayError`], [`RuntimeError`]            |
//! | **Configuration** | Defaults, YAML file and `RELAY__*` environment overrides     | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging` (default): exports [`init_tracing`] which installs a
//!   `tracing-subscriber` fmt layer filtered by `RELAY_LOG`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use futures::StreamExt;
//! use commit_relay::{Config, Relay, RelayError, UpstreamFn, UpstreamRecord};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.window_capacity = 100;
//!     cfg.lag_threshold = 100;
//!     cfg.batch_delay = Duration::from_millis(1);
//!
//!     // Ten commits, then the connection stays open.
//!     let upstream = UpstreamFn::arc("demo", |last_good: Option<u64>| async move {
//!         let start = last_good.map_or(1, |s| s + 1);
//!         let records = futures::stream::iter(
//!             (start..=10).map(|seq| Ok(UpstreamRecord::new(seq, format!("commit {seq}")))),
//!         )
//!         .chain(futures::stream::pending());
//!         Ok::<_, RelayError>(records.boxed())
//!     });
//!
//!     let relay = Relay::builder(cfg).handle_signals(false).build(upstream)?;
//!     let handle = relay.handle();
//!     let running = tokio::spawn(relay.run());
//!
//!     let mut sub = handle.subscribe(None)?;
//!     let mut last = 0;
//!     while last < 10 {
//!         let batch = sub.next_batch().await.expect("session open")?;
//!         last = batch.last().map_or(last, |e| e.seq);
//!     }
//!
//!     handle.shutdown();
//!     running.await??;
//!     Ok(())
//! }
//! ```

mod admin;
mod buffer;
mod codec;
mod config;
mod core;
mod error;
mod events;
mod observers;
mod policies;
mod upstream;

// ---- Public re-exports ----

pub use admin::{ReadyGate, RelayStats, SessionStats, WARMUP_PENDING_REASON};
pub use buffer::{BufferReader, BufferSnapshot, CommitEvent, EventBuffer, Slice};
pub use codec::{Connect, DEFAULT_MAX_PAYLOAD, Frame, FrameCodec, FramedUpstream, HEADER_LEN, pump};
pub use config::{CONFIG_ENV_PREFIX, CONFIG_ENV_VAR, Config, DEFAULT_CONFIG_FILE, LOG_ENV_VAR};
pub use core::{
    Batch, IngestState, Relay, RelayBuilder, RelayHandle, SessionMode, Subscription,
};
pub use error::{ConfigError, RelayError, RuntimeError};
pub use events::{Bus, EventKind, RelayEvent};
pub use observers::{LogWriter, Observe, ObserverSet};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use upstream::{RecordStream, Upstream, UpstreamFn, UpstreamRecord, UpstreamRef};

// Optional: global tracing subscriber filtered by `RELAY_LOG`.
// Enable with: `--features logging` (on by default).
#[cfg(feature = "logging")]
pub use observers::init_tracing;
