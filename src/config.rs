//! # Global relay configuration.
//!
//! [`Config`] centralizes every tunable of the relay: rollback window size,
//! batching, slow-consumer policy, readiness priming, shutdown grace and the
//! upstream reconnect backoff. It is supplied once at process start and never
//! mutated afterwards (the relay keeps it behind an `Arc`).
//!
//! Config is produced in two ways:
//! 1. **In code**: `Config::default()` and field overrides.
//! 2. **From the environment**: [`Config::load`] layers an optional YAML file
//!    and `RELAY__*` environment variables.
//!
//! ## File / environment keys
//! Durations are expressed in milliseconds:
//! ```text
//! window_capacity: 50000
//! batch_delay_ms: 50
//! batch_max_events: 256
//! lag_threshold: 50000   # defaults to window_capacity when omitted
//! session_queue_capacity: 16
//! monitor_interval_ms: 1000
//! min_ready_events: 0
//! grace_ms: 30000
//! bus_capacity: 1024
//! backoff:
//!   first_ms: 100
//!   max_ms: 30000
//!   factor: 2.0
//!   jitter: equal        # none | full | equal | decorrelated
//! ```
//! Environment overrides use `__` as separator, e.g. `RELAY__LAG_THRESHOLD=1000`
//! or `RELAY__BACKOFF__FIRST_MS=250`.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use commit_relay::Config;
//!
//! let mut cfg = Config::default();
//! cfg.window_capacity = 5;
//! cfg.lag_threshold = 5;
//! cfg.batch_delay = Duration::from_millis(10);
//! assert!(cfg.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, JitterPolicy};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "RELAY_CONFIG";
/// Default configuration file name (optional).
pub const DEFAULT_CONFIG_FILE: &str = "relay.yaml";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RELAY";
/// Environment variable for the log filter.
pub const LOG_ENV_VAR: &str = "RELAY_LOG";

/// Global configuration for the relay runtime.
///
/// ## Field semantics
/// - `window_capacity`: rollback window size `N` (min 1)
/// - `batch_delay`: flush interval of the batch scheduler (`0s` = flush on every pull)
/// - `batch_max_events`: pending size that forces an immediate flush (min 1)
/// - `lag_threshold`: sessions lagging more than this many events are evicted (`1..=N`)
/// - `session_queue_capacity`: outgoing batches buffered per session (min 1)
/// - `monitor_interval`: period of the backpressure scan
/// - `min_ready_events`: events that must be received before the relay reports ready
/// - `grace`: maximum wait for components to stop on shutdown
/// - `bus_capacity`: relay event bus ring size (min 1; clamped by the bus)
/// - `backoff`: upstream reconnect policy
#[derive(Clone, Debug)]
pub struct Config {
    /// Rollback window capacity.
    pub window_capacity: usize,
    /// Batch scheduler flush interval.
    pub batch_delay: Duration,
    /// Flush immediately once this many events are pending.
    pub batch_max_events: usize,
    /// Slow-consumer eviction threshold, in events.
    pub lag_threshold: u64,
    /// Outgoing batches buffered per session before the session stops pulling.
    pub session_queue_capacity: usize,
    /// How often the backpressure monitor scans all sessions.
    pub monitor_interval: Duration,
    /// Readiness priming threshold.
    pub min_ready_events: u64,
    /// Shutdown grace period.
    pub grace: Duration,
    /// Relay event bus capacity.
    pub bus_capacity: usize,
    /// Upstream reconnect backoff.
    pub backoff: BackoffPolicy,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `window_capacity = 50_000`
    /// - `batch_delay = 50ms`, `batch_max_events = 256`
    /// - `lag_threshold = 50_000` (equal to the window, so a replay from head is
    ///   only evicted once the window overruns it)
    /// - `session_queue_capacity = 16`
    /// - `monitor_interval = 1s`
    /// - `min_ready_events = 0` (ready immediately)
    /// - `grace = 30s`, `bus_capacity = 1024`
    /// - `backoff`: first=100ms, factor=2.0, max=30s, equal jitter
    fn default() -> Self {
        Self {
            window_capacity: 50_000,
            batch_delay: Duration::from_millis(50),
            batch_max_events: 256,
            lag_threshold: 50_000,
            session_queue_capacity: 16,
            monitor_interval: Duration::from_secs(1),
            min_ready_events: 0,
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            backoff: BackoffPolicy {
                first: Duration::from_millis(100),
                max: Duration::from_secs(30),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
        }
    }
}

impl Config {
    /// Loads configuration from the optional YAML file named by `RELAY_CONFIG`
    /// (default `relay.yaml`) overlaid with `RELAY__*` environment variables,
    /// then validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(&path).required(false))
            .add_source(
                ::config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let raw: ConfigFile = settings.try_deserialize()?;
        let cfg = Config::from(raw);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field constraints.
    ///
    /// The lag threshold is bounded by the window: a session can never be
    /// further behind than the history the buffer retains.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "window_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.lag_threshold == 0 || self.lag_threshold > self.window_capacity as u64 {
            return Err(ConfigError::Invalid {
                field: "lag_threshold",
                reason: format!(
                    "must be within 1..={} (window_capacity), got {}",
                    self.window_capacity, self.lag_threshold
                ),
            });
        }
        if self.batch_max_events == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_max_events",
                reason: "must be at least 1".into(),
            });
        }
        if self.session_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "session_queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "monitor_interval",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Serialized shape of [`Config`] (durations in milliseconds).
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConfigFile {
    window_capacity: usize,
    batch_delay_ms: u64,
    batch_max_events: usize,
    lag_threshold: Option<u64>,
    session_queue_capacity: usize,
    monitor_interval_ms: u64,
    min_ready_events: u64,
    grace_ms: u64,
    bus_capacity: usize,
    backoff: BackoffFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BackoffFile {
    first_ms: u64,
    max_ms: u64,
    factor: f64,
    jitter: JitterPolicy,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let cfg = Config::default();
        Self {
            window_capacity: cfg.window_capacity,
            batch_delay_ms: millis(cfg.batch_delay),
            batch_max_events: cfg.batch_max_events,
            lag_threshold: None,
            session_queue_capacity: cfg.session_queue_capacity,
            monitor_interval_ms: millis(cfg.monitor_interval),
            min_ready_events: cfg.min_ready_events,
            grace_ms: millis(cfg.grace),
            bus_capacity: cfg.bus_capacity,
            backoff: BackoffFile::default(),
        }
    }
}

impl Default for BackoffFile {
    fn default() -> Self {
        let b = Config::default().backoff;
        Self {
            first_ms: millis(b.first),
            max_ms: millis(b.max),
            factor: b.factor,
            jitter: b.jitter,
        }
    }
}

impl From<ConfigFile> for Config {
    fn from(raw: ConfigFile) -> Self {
        Self {
            window_capacity: raw.window_capacity,
            batch_delay: Duration::from_millis(raw.batch_delay_ms),
            batch_max_events: raw.batch_max_events,
            lag_threshold: raw
                .lag_threshold
                .unwrap_or(raw.window_capacity as u64),
            session_queue_capacity: raw.session_queue_capacity,
            monitor_interval: Duration::from_millis(raw.monitor_interval_ms),
            min_ready_events: raw.min_ready_events,
            grace: Duration::from_millis(raw.grace_ms),
            bus_capacity: raw.bus_capacity,
            backoff: BackoffPolicy {
                first: Duration::from_millis(raw.backoff.first_ms),
                max: Duration::from_millis(raw.backoff.max_ms),
                factor: raw.backoff.factor,
                jitter: raw.backoff.jitter,
            },
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_threshold_tolerates_full_window_replay() {
        let cfg = Config::default();
        assert_eq!(cfg.lag_threshold, cfg.window_capacity as u64);
    }

    #[test]
    fn test_file_threshold_follows_window_when_omitted() {
        let raw = ConfigFile {
            window_capacity: 128,
            ..ConfigFile::default()
        };
        let cfg = Config::from(raw);
        assert_eq!(cfg.lag_threshold, 128);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_lag_threshold_bounded_by_window() {
        let cfg = Config {
            window_capacity: 10,
            lag_threshold: 11,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.as_label(), "config_invalid");
        assert!(err.to_string().contains("lag_threshold"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let cfg = Config {
            window_capacity: 0,
            lag_threshold: 1,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_file_shape_converts_millis() {
        let raw = ConfigFile {
            batch_delay_ms: 5,
            grace_ms: 1500,
            backoff: BackoffFile {
                first_ms: 10,
                max_ms: 20,
                factor: 3.0,
                jitter: JitterPolicy::Full,
            },
            ..ConfigFile::default()
        };
        let cfg = Config::from(raw);
        assert_eq!(cfg.batch_delay, Duration::from_millis(5));
        assert_eq!(cfg.grace, Duration::from_millis(1500));
        assert_eq!(cfg.backoff.first, Duration::from_millis(10));
        assert_eq!(cfg.backoff.jitter, JitterPolicy::Full);
        assert_eq!(cfg.window_capacity, 50_000);
    }

    #[test]
    fn test_yaml_source_deserializes() {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(
                "window_capacity: 8\nlag_threshold: 4\nbackoff:\n  jitter: none\n",
                ::config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let raw: ConfigFile = settings.try_deserialize().unwrap();
        let cfg = Config::from(raw);
        assert_eq!(cfg.window_capacity, 8);
        assert_eq!(cfg.lag_threshold, 4);
        assert_eq!(cfg.backoff.jitter, JitterPolicy::None);
        assert!(cfg.validate().is_ok());
    }
}
