//! Upstream reconnect policies.
//!
//! The ingestor never gives up on its upstream: every lost connection is
//! retried. These knobs decide **how long** it waits between attempts.
//!
//! ## Contents
//! - [`BackoffPolicy`] how reconnect delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid reconnect storms
//!
//! ## Quick wiring
//! ```text
//! Config { backoff: BackoffPolicy, .. }
//!      └─► core::ingestor::Ingestor uses:
//!           - backoff.next(failures) to schedule the next connect attempt
//!           - failures resets once a connection delivers a record
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=30s, jitter=None.
//! - `Config::default().backoff` → first=100ms, factor=2.0, max=30s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
