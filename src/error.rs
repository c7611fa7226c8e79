//! Error types used by the relay runtime, the event buffer and subscriber sessions.
//!
//! This module defines three error enums:
//!
//! - [`RelayError`]: failures of the relay data path (ingest, replay, delivery).
//! - [`RuntimeError`]: failures of the runtime lifecycle itself (shutdown).
//! - [`ConfigError`]: configuration that could not be loaded or is invalid.
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the relay data path.
///
/// Each variant maps to one failure class of the relay:
/// - ingestion ([`RelayError::SequenceGap`], [`RelayError::UpstreamDisconnected`]),
/// - subscription ([`RelayError::CursorTooOld`]),
/// - delivery ([`RelayError::SubscriberTooSlow`], [`RelayError::ConnectionFailure`]).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Appended sequence number is not `tail + 1`.
    ///
    /// Fatal to the current ingest position: the ingestor resubscribes upstream
    /// from its last good sequence. Never retried locally.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap {
        /// The only sequence number the buffer would accept.
        expected: u64,
        /// The sequence number that was offered.
        got: u64,
    },

    /// Requested history has already been evicted from the rollback window.
    ///
    /// Caller must resync out of band before subscribing again.
    #[error("cursor {cursor} is older than retained head {head}")]
    CursorTooOld {
        /// Requested cursor.
        cursor: u64,
        /// Oldest sequence still retained.
        head: u64,
    },

    /// Session fell too far behind the buffer tail and was evicted.
    #[error("subscriber too slow: lag {lag} exceeds threshold {threshold}")]
    SubscriberTooSlow {
        /// Observed lag in events.
        lag: u64,
        /// Configured eviction threshold.
        threshold: u64,
    },

    /// Upstream connection failed or was lost; retried with backoff.
    #[error("upstream disconnected: {reason}")]
    UpstreamDisconnected {
        /// Human-readable cause.
        reason: String,
    },

    /// Downstream connection failed; the session is torn down.
    #[error("downstream connection failed: {reason}")]
    ConnectionFailure {
        /// Human-readable cause.
        reason: String,
    },
}

impl RelayError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use commit_relay::RelayError;
    ///
    /// let err = RelayError::CursorTooOld { cursor: 1, head: 2 };
    /// assert_eq!(err.as_label(), "cursor_too_old");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RelayError::SequenceGap { .. } => "sequence_gap",
            RelayError::CursorTooOld { .. } => "cursor_too_old",
            RelayError::SubscriberTooSlow { .. } => "subscriber_too_slow",
            RelayError::UpstreamDisconnected { .. } => "upstream_disconnected",
            RelayError::ConnectionFailure { .. } => "connection_failure",
        }
    }

    /// Indicates whether the relay itself retries after this error.
    ///
    /// Only [`RelayError::UpstreamDisconnected`] is retried (with backoff, without limit).
    /// Everything else needs a decision by the caller or the ingestor's resync path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::UpstreamDisconnected { .. })
    }

    /// Shorthand for [`RelayError::UpstreamDisconnected`].
    pub fn upstream(reason: impl Into<String>) -> Self {
        RelayError::UpstreamDisconnected {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RelayError::ConnectionFailure`].
    pub fn connection(reason: impl Into<String>) -> Self {
        RelayError::ConnectionFailure {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by the relay runtime lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some components were still running.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// # Errors produced while loading or validating configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "config_load",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_upstream_disconnect_is_retryable() {
        assert!(RelayError::upstream("eof").is_retryable());
        assert!(!RelayError::SequenceGap { expected: 2, got: 4 }.is_retryable());
        assert!(!RelayError::CursorTooOld { cursor: 1, head: 2 }.is_retryable());
        assert!(!RelayError::SubscriberTooSlow { lag: 9, threshold: 5 }.is_retryable());
        assert!(!RelayError::connection("reset").is_retryable());
    }

    #[test]
    fn test_display_carries_positions() {
        let err = RelayError::SequenceGap { expected: 6, got: 7 };
        assert_eq!(err.to_string(), "sequence gap: expected 6, got 7");
        assert_eq!(err.as_label(), "sequence_gap");
    }
}
