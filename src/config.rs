//! # Runtime configuration.
//!
//! [`Config`] centralizes the settings of every component the orchestrator owns.
//! Each component also accepts its own section directly, so components can be used standalone.
//!
//! ## Sentinel values
//! - `health.interval = 0s` → the orchestrator does not start periodic health monitoring
//! - `tasks.timeout = 0s` → background task runs have no timeout
//! - `reconnect.handshake_timeout = 0s` → handshakes have no timeout
//! - `health.failure_threshold = 0` → treated as 1 (alert on the first failure)
//!
//! ## File format
//! Every section is optional; missing keys keep their defaults. Durations are in milliseconds.
//! ```toml
//! bus_capacity = 1024
//! grace_ms = 30000
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 60000
//! half_open_max_attempts = 3
//!
//! [reconnect]
//! base_ms = 1000
//! cap_ms = 30000
//! max_attempts = 10
//!
//! [tasks]
//! max_errors = 10
//!
//! [health]
//! failure_threshold = 3
//! history_capacity = 100
//! interval_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, JitterPolicy};

/// Global configuration for the orchestrator and its components.
///
/// ## Field semantics
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `grace`: maximum wait for background tasks to stop during shutdown
/// - `breaker`, `reconnect`, `tasks`, `health`: per-component sections
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// skip older items.
    pub bus_capacity: usize,

    /// Maximum time to wait for background tasks to stop on shutdown.
    #[serde(rename = "grace_ms", with = "millis")]
    pub grace: Duration,

    /// Default circuit breaker settings.
    pub breaker: BreakerConfig,

    /// Default reconnect settings for streaming channels.
    pub reconnect: ReconnectConfig,

    /// Defaults for background tasks.
    pub tasks: TaskDefaults,

    /// Health monitor settings.
    pub health: HealthConfig,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use bootvisor::Config;
    ///
    /// let cfg = Config::from_toml_str("[breaker]\nfailure_threshold = 3\n").unwrap();
    /// assert_eq!(cfg.breaker.failure_threshold, 3);
    /// assert_eq!(cfg.breaker.reset_timeout, Duration::from_secs(60));
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `grace = 30s`
    /// - every section at its own default
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            grace: Duration::from_secs(30),
            breaker: BreakerConfig::default(),
            reconnect: ReconnectConfig::default(),
            tasks: TaskDefaults::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting a probe through.
    #[serde(rename = "reset_timeout_ms", with = "millis")]
    pub reset_timeout: Duration,
    /// Half-open successes required to close the circuit again.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    /// `failure_threshold = 5`, `reset_timeout = 60s`, `half_open_max_attempts = 3`.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_attempts: 3,
        }
    }
}

/// Reconnect schedule for a streaming channel.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    #[serde(rename = "base_ms", with = "millis")]
    pub base: Duration,
    /// Upper bound for any reconnect delay.
    #[serde(rename = "cap_ms", with = "millis")]
    pub cap: Duration,
    /// Reconnect attempts after which the channel gives up.
    pub max_attempts: u32,
    /// Handshake timeout (`0s` = none).
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,
    /// Randomization applied on top of the exponential delay.
    #[serde(skip)]
    pub jitter: JitterPolicy,
}

impl ReconnectConfig {
    /// Exponential backoff (`factor = 2`) derived from `base` and `cap`.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.base,
            max: self.cap,
            factor: 2.0,
            jitter: self.jitter,
        }
    }

    /// Returns the handshake timeout as an `Option`.
    #[inline]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        non_zero(self.handshake_timeout)
    }
}

impl Default for ReconnectConfig {
    /// `base = 1s`, `cap = 30s`, `max_attempts = 10`, `handshake_timeout = 10s`, no jitter.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
            handshake_timeout: Duration::from_secs(10),
            jitter: JitterPolicy::None,
        }
    }
}

/// Defaults applied to background tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    /// Consecutive failures after which a task is disabled.
    pub max_errors: u32,
    /// Per-run timeout (`0s` = none).
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl TaskDefaults {
    /// Returns the per-run timeout as an `Option`.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        non_zero(self.timeout)
    }
}

impl Default for TaskDefaults {
    /// `max_errors = 10`, no timeout.
    fn default() -> Self {
        Self {
            max_errors: 10,
            timeout: Duration::ZERO,
        }
    }
}

/// Health monitor settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures of one check that raise an alert.
    pub failure_threshold: u32,
    /// Number of cycles kept in history.
    pub history_capacity: usize,
    /// Cadence used by the orchestrator (`0s` = do not monitor).
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Per-check timeout (`0s` = none).
    #[serde(rename = "check_timeout_ms", with = "millis")]
    pub check_timeout: Duration,
}

impl HealthConfig {
    /// Returns the alert threshold clamped to a minimum of 1.
    #[inline]
    pub fn failure_threshold_clamped(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Returns the monitoring interval as an `Option`.
    #[inline]
    pub fn interval(&self) -> Option<Duration> {
        non_zero(self.interval)
    }

    /// Returns the per-check timeout as an `Option`.
    #[inline]
    pub fn check_timeout(&self) -> Option<Duration> {
        non_zero(self.check_timeout)
    }
}

impl Default for HealthConfig {
    /// `failure_threshold = 3`, `history_capacity = 100`, `interval = 30s`, `check_timeout = 5s`.
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            history_capacity: 100,
            interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
        }
    }
}

#[inline]
fn non_zero(d: Duration) -> Option<Duration> {
    if d == Duration::ZERO { None } else { Some(d) }
}

/// Serde adapter: `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.bus_capacity, 1024);
        assert_eq!(cfg.breaker, BreakerConfig::default());
        assert_eq!(cfg.tasks.max_errors, 10);
        assert_eq!(cfg.health.failure_threshold, 3);
        assert_eq!(cfg.health.history_capacity, 100);
    }

    #[test]
    fn durations_are_read_as_millis() {
        let cfg = Config::from_toml_str(
            "grace_ms = 1500\n[reconnect]\nbase_ms = 250\ncap_ms = 4000\nmax_attempts = 4\n",
        )
        .unwrap();
        assert_eq!(cfg.grace, Duration::from_millis(1500));
        assert_eq!(cfg.reconnect.base, Duration::from_millis(250));
        assert_eq!(cfg.reconnect.cap, Duration::from_secs(4));
        assert_eq!(cfg.reconnect.max_attempts, 4);
        assert_eq!(cfg.reconnect.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_sentinels_disable() {
        let cfg = Config::from_toml_str("[health]\ninterval_ms = 0\n[tasks]\ntimeout_ms = 0\n")
            .unwrap();
        assert!(cfg.health.interval().is_none());
        assert!(cfg.tasks.timeout().is_none());
        assert_eq!(cfg.health.check_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn reconnect_backoff_doubles_from_base() {
        let backoff = ReconnectConfig::default().backoff();
        assert_eq!(backoff.next(0), Duration::from_secs(1));
        assert_eq!(backoff.next(3), Duration::from_secs(8));
        assert_eq!(backoff.next(5), Duration::from_secs(30));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = Config::from_toml_str("bus_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
