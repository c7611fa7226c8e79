//! # Observers of relay lifecycle events.
//!
//! The [`Observe`] trait is the extension point for metrics, alerting and
//! logging. Every [`RelayEvent`](crate::RelayEvent) published on the bus is
//! fanned out to all observers through an [`ObserverSet`].
//!
//! ```text
//!   Ingestor / sessions / monitor ── publish ──► Bus ──► observer listener
//!                                                              │
//!                                                      ObserverSet::emit
//!                                              ┌───────────────┼───────────────┐
//!                                              ▼               ▼               ▼
//!                                          LogWriter     MetricsObserver   CustomObserver
//!                                          (tracing)     (user-provided)   (user logic)
//! ```
//!
//! ## Example: custom observer
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use async_trait::async_trait;
//! use commit_relay::{EventKind, Observe, RelayEvent};
//!
//! #[derive(Default)]
//! struct ReconnectCounter(AtomicU64);
//!
//! #[async_trait]
//! impl Observe for ReconnectCounter {
//!     async fn on_event(&self, event: &RelayEvent) {
//!         if event.kind == EventKind::ReconnectScheduled {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "reconnect_counter" }
//! }
//! ```

mod log;
mod observe;
mod set;

pub use log::LogWriter;
pub use observe::Observe;
pub use set::ObserverSet;
#[cfg(feature = "logging")]
pub use log::init_tracing;
