//! Relay lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`RelayEvent`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Ingestor`, session tasks, `Monitor`, `Dispatcher`, `Relay`,
//!   `ObserverSet` workers (overflow/panic).
//! - **Consumers**: the observer listener spawned by `Relay::run` (fans out to
//!   the `ObserverSet`), plus anything holding [`RelayHandle::events`](crate::RelayHandle::events).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{EventKind, RelayEvent};
