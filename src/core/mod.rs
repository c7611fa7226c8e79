//! Relay core: ingestion, sessions and lifecycle.
//!
//! The public surface of this module is [`Relay`], [`RelayBuilder`],
//! [`RelayHandle`] and the [`Subscription`] returned by subscribing.
//!
//! Internal modules:
//! - [`ingestor`]: the single buffer writer; connects, validates, resyncs;
//! - [`dispatcher`]: registry of sessions, subscribe/unsubscribe;
//! - [`session`]: one task per subscriber, replay then live delivery;
//! - [`batch`]: per-session batch scheduler;
//! - [`monitor`]: periodic lag scan and eviction;
//! - [`relay`]: lifecycle, observer listener and graceful shutdown;
//! - [`shutdown`]: OS signal handling.

mod batch;
mod builder;
mod dispatcher;
mod ingestor;
mod monitor;
mod relay;
mod session;
mod shutdown;

pub use batch::Batch;
pub use builder::RelayBuilder;
pub use ingestor::IngestState;
pub use relay::{Relay, RelayHandle};
pub use session::{SessionMode, Subscription};
