//! # Circuit breaker for one protected operation.
//!
//! ```text
//!            failure_count >= threshold
//!   Closed ───────────────────────────────► Open
//!     ▲                                      │ now - last_failure > reset_timeout
//!     │ half_open_successes                  ▼
//!     └──── >= half_open_max_attempts ─── HalfOpen ── any failure ──► Open
//! ```
//!
//! - **Closed**: the operation runs; success resets the failure count.
//! - **Open**: calls fail fast with [`CircuitError::Open`] without running the operation.
//! - **HalfOpen**: calls run as probes. The failure count is still at the threshold, so one
//!   failure re-opens the circuit.
//!
//! The state lock is never held while the operation runs.

use std::fmt;
use std::future::Future;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::CircuitError;
use crate::events::{Bus, Event, EventKind};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through.
    #[default]
    Closed,
    /// Calls are rejected.
    Open,
    /// Calls run as recovery probes.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Counters exposed by [`CircuitBreaker::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Current failure count.
    pub failure_count: u32,
    /// Successes since entering half-open.
    pub half_open_successes: u32,
    /// Calls that reached the breaker.
    pub total_calls: u64,
    /// Calls whose operation succeeded.
    pub succeeded: u64,
    /// Calls whose operation failed.
    pub failed: u64,
    /// Calls rejected while open.
    pub rejected: u64,
}

#[derive(Default)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    stats: BreakerStats,
}

/// Failure-count based circuit breaker.
///
/// # Example
/// ```
/// use bootvisor::{BreakerConfig, CircuitBreaker, CircuitState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new("quotes-api", BreakerConfig::default());
///
/// let price = breaker
///     .execute(|| async { Ok::<u32, std::io::Error>(42) })
///     .await
///     .unwrap();
///
/// assert_eq!(price, 42);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    bus: Option<Bus>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
            bus: None,
        }
    }

    /// Publishes state transitions to `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    ///
    /// An open breaker whose reset timeout has elapsed still reports `Open` until the
    /// next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_successes: inner.half_open_successes,
            ..inner.stats.clone()
        }
    }

    /// Forces the breaker back to `Closed` and clears the failure count.
    pub fn reset(&self) {
        let was = {
            let mut inner = self.inner.lock();
            let was = inner.state;
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.half_open_successes = 0;
            inner.last_failure = None;
            was
        };
        if was != CircuitState::Closed {
            info!(breaker = %self.name, "circuit reset");
            self.publish(EventKind::CircuitClosed, None);
        }
    }

    /// Runs `op` through the breaker.
    ///
    /// Returns [`CircuitError::Open`] without calling `op` while the circuit is open.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        match op().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let half_opened = {
            let mut inner = self.inner.lock();
            inner.stats.total_calls += 1;
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => false,
                CircuitState::Open => {
                    let expired = inner
                        .last_failure
                        .is_none_or(|at| at.elapsed() > self.config.reset_timeout);
                    if !expired {
                        inner.stats.rejected += 1;
                        debug!(breaker = %self.name, "call rejected: circuit open");
                        return Err(CircuitError::Open {
                            name: self.name.clone(),
                        });
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                }
            }
        };
        if half_opened {
            info!(breaker = %self.name, "circuit half-open: probing");
            self.publish(EventKind::CircuitHalfOpen, None);
        }
        Ok(())
    }

    fn on_success(&self) {
        let closed = {
            let mut inner = self.inner.lock();
            inner.stats.succeeded += 1;
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_attempts {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.half_open_successes = 0;
                        true
                    } else {
                        false
                    }
                }
                _ => {
                    inner.failure_count = 0;
                    false
                }
            }
        };
        if closed {
            info!(breaker = %self.name, "circuit closed");
            self.publish(EventKind::CircuitClosed, None);
        }
    }

    fn on_failure(&self) {
        let opened = {
            let mut inner = self.inner.lock();
            inner.stats.failed += 1;
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure = Some(Instant::now());
            let trip = inner.state == CircuitState::HalfOpen
                || inner.failure_count >= self.config.failure_threshold;
            if trip && inner.state != CircuitState::Open {
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                Some(inner.failure_count)
            } else {
                None
            }
        };
        if let Some(failures) = opened {
            warn!(breaker = %self.name, failures, "circuit opened");
            self.publish(EventKind::CircuitOpened, Some(failures));
        }
    }

    fn publish(&self, kind: EventKind, failures: Option<u32>) {
        if let Some(bus) = &self.bus {
            let mut ev = Event::new(kind).with_subject(self.name.as_str());
            if let Some(n) = failures {
                ev = ev.with_attempt(n);
            }
            bus.publish(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(60),
                half_open_max_attempts: 3,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        b.execute(|| async { Err::<(), _>("down") }).await
    }

    async fn pass(b: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        b.execute(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let b = breaker(3);
        for _ in 0..3 {
            assert!(matches!(fail(&b).await, Err(CircuitError::Inner("down"))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let res = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await;
        assert!(res.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(pass(&b).await.unwrap_err().is_open(), "timeout must be strictly exceeded");

        tokio::time::advance(Duration::from_millis(1)).await;
        pass(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        pass(&b).await.unwrap();
        pass(&b).await.unwrap();

        assert_eq!(b.state(), CircuitState::Closed);
        let stats = b.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let b = breaker(2);
        let _ = fail(&b).await;
        let _ = fail(&b).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        pass(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert!(matches!(fail(&b).await, Err(CircuitError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert!(pass(&b).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let b = breaker(3);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        pass(&b).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failure_count, 2);
    }

    #[tokio::test]
    async fn reset_forces_closed_and_publishes() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let b = breaker(1).with_bus(bus);

        let _ = fail(&b).await;
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        pass(&b).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::CircuitOpened);
        assert_eq!(first.attempt, Some(1));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::CircuitClosed);
    }
}
