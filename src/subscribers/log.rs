//! # LogWriter: renders events through `tracing`
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  bootvisor: service resolved service="db"
//! WARN  bootvisor: service degraded service="ocr" reason="model not found"
//! WARN  bootvisor: reconnect scheduled channel="prices" attempt=3 delay_ms=4000
//! ERROR bootvisor: task disabled task="sync" errors=10 reason="timeout"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let subject = e.subject.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::ServiceResolving => debug!(service = subject, "service resolving"),
            EventKind::ServiceResolved => info!(service = subject, "service resolved"),
            EventKind::ServiceFailed => error!(service = subject, reason, "service failed"),
            EventKind::ServiceDegraded => warn!(service = subject, reason, "service degraded"),
            EventKind::CircularDependency => {
                error!(service = subject, chain = reason, "circular dependency")
            }

            EventKind::CircuitOpened => {
                warn!(breaker = subject, failures = e.attempt, "circuit opened")
            }
            EventKind::CircuitHalfOpen => info!(breaker = subject, "circuit half-open"),
            EventKind::CircuitClosed => info!(breaker = subject, "circuit closed"),

            EventKind::ConnectionOpened => {
                info!(channel = subject, endpoint = e.endpoint.as_deref(), "connection opened")
            }
            EventKind::ConnectionLost => {
                warn!(channel = subject, endpoint = e.endpoint.as_deref(), reason, "connection lost")
            }
            EventKind::ReconnectScheduled => warn!(
                channel = subject,
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                "reconnect scheduled"
            ),
            EventKind::ConnectionExhausted => {
                error!(channel = subject, attempts = e.attempt, "reconnect attempts exhausted")
            }
            EventKind::ConnectionClosed => info!(channel = subject, "connection closed"),

            EventKind::SystemReady => info!("system ready"),
            EventKind::TaskPending => debug!(task = subject, "task pending until ready"),
            EventKind::TaskStarting => debug!(task = subject, run = e.attempt, "task starting"),
            EventKind::TaskSucceeded => debug!(task = subject, run = e.attempt, "task succeeded"),
            EventKind::TaskFailed => {
                warn!(task = subject, errors = e.attempt, reason, "task failed")
            }
            EventKind::TaskTimeout => {
                warn!(task = subject, timeout_ms = e.timeout_ms, "task timed out")
            }
            EventKind::TaskSkipped => debug!(task = subject, "tick skipped: previous run in flight"),
            EventKind::TaskDisabled => {
                error!(task = subject, errors = e.attempt, reason, "task disabled")
            }
            EventKind::TaskStopped => info!(task = subject, "task stopped"),

            EventKind::HealthCheckFailed => {
                error!(check = subject, failures = e.attempt, reason, "health check failing")
            }
            EventKind::HealthCheckRecovered => info!(check = subject, "health check recovered"),
            EventKind::HealthCycleCompleted => debug!(status = reason, "health cycle completed"),

            EventKind::SubscriberPanicked => {
                error!(subscriber = subject, info = reason, "subscriber panicked")
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = subject, reason, "subscriber overflow")
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all tasks stopped within grace"),
            EventKind::GraceExceeded => error!("shutdown grace exceeded"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
