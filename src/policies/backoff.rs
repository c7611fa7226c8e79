//! # Reconnect backoff.
//!
//! [`BackoffPolicy`] controls how the ingestor spaces out reconnect attempts
//! after the upstream drops. The delay before reconnect number `n` (0-indexed,
//! counting consecutive failures) is `first × factor^n`, clamped to `max`,
//! then jittered. The base is derived from `n` alone, so jitter output never
//! feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use commit_relay::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 100ms delay, capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: JitterPolicy::None,
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before reconnect number `failures` (0-indexed).
    ///
    /// Non-finite or negative intermediate values (huge exponents, odd factors)
    /// clamp to [`BackoffPolicy::max`].
    pub fn next(&self, failures: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = failures.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let p = policy(JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(2), Duration::from_millis(400));
        assert_eq!(p.next(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_first_exceeds_max() {
        let p = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_unbounded_failures_stay_at_max() {
        // Reconnects are never abandoned, so the failure counter can grow without limit.
        let p = policy(JitterPolicy::None);
        assert_eq!(p.next(100), Duration::from_secs(30));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_equal_jitter_stays_in_upper_half() {
        let p = policy(JitterPolicy::Equal);
        for failures in 0..15 {
            let base_ms = (100.0 * 2.0f64.powi(failures as i32)).min(30_000.0);
            let delay = p.next(failures);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn test_full_jitter_never_exceeds_base() {
        let p = policy(JitterPolicy::Full);
        for failures in 5..15 {
            let base_ms = (100.0 * 2.0f64.powi(failures as i32)).min(30_000.0);
            assert!(p.next(failures) <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn test_decorrelated_respects_floor_and_cap() {
        let p = policy(JitterPolicy::Decorrelated);
        for _ in 0..100 {
            let delay = p.next(8);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_secs(30));
        }
    }
}
