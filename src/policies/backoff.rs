//! # Exponential backoff for reconnect attempts.
//!
//! The delay before attempt `n` (0-indexed) is `first × factor^n`, clamped to `max`,
//! then jittered. The base is derived from the attempt number alone, so jitter output
//! never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use bootvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(1000),
//!     max: Duration::from_secs(30),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! let schedule: Vec<u128> = (0..7).map(|n| backoff.next(n).as_millis()).collect();
//! assert_eq!(schedule, [1000, 2000, 4000, 8000, 16000, 30000, 30000]);
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0.
    pub first: Duration,
    /// Cap applied to every delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// Overflowing or non-finite intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
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

    fn exact(first_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn reconnect_schedule_doubles_then_caps() {
        let policy = exact(1000, 30_000);
        let delays: Vec<u64> = (0..9).map(|n| policy.next(n).as_millis() as u64).collect();
        assert_eq!(
            delays,
            [1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn first_larger_than_cap_is_capped() {
        let policy = exact(10_000, 5_000);
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn constant_factor_keeps_first() {
        let policy = BackoffPolicy {
            factor: 1.0,
            ..exact(500, 30_000)
        };
        for attempt in 0..10 {
            assert_eq!(policy.next(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn huge_attempt_clamps_instead_of_overflowing() {
        let policy = exact(100, 10_000);
        assert_eq!(policy.next(100), Duration::from_secs(10));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..exact(1000, 30_000)
        };
        for attempt in 0..12 {
            let base = (1000u64 << attempt.min(20)).min(30_000);
            let delay = policy.next(attempt).as_millis() as u64;
            assert!(delay >= base / 2, "attempt {attempt}: {delay} < {}", base / 2);
            assert!(delay <= base, "attempt {attempt}: {delay} > {base}");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..exact(1000, 30_000)
        };
        for attempt in 0..12 {
            assert!(policy.next(attempt) <= Duration::from_secs(30));
        }
        assert!(policy.next(0) <= Duration::from_secs(1));
    }

    #[test]
    fn decorrelated_jitter_respects_floor_and_cap() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Decorrelated,
            ..exact(100, 30_000)
        };
        for _ in 0..100 {
            let delay = policy.next(8);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_secs(30));
        }
    }
}
