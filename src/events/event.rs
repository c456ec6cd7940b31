//! # Runtime events emitted by the orchestrator and its components.
//!
//! [`EventKind`] groups events by the component that emits them:
//! - **Registry**: service construction (resolving, resolved, failed, degraded, cycles)
//! - **Breaker**: circuit state transitions
//! - **Connection**: channel lifecycle and reconnect scheduling
//! - **Coordinator**: readiness and background task runs
//! - **Health**: failure-streak alerts and completed cycles
//! - **Runtime**: subscriber health and shutdown
//!
//! [`Event::subject`] carries the name of the service, breaker, channel, task or
//! check the event is about.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use bootvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ReconnectScheduled)
//!     .with_subject("prices")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(4));
//!
//! assert_eq!(ev.kind, EventKind::ReconnectScheduled);
//! assert_eq!(ev.subject.as_deref(), Some("prices"));
//! assert_eq!(ev.delay_ms, Some(4000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Registry ===
    /// A factory is about to run. `subject`: service.
    ServiceResolving,
    /// A service was constructed and cached. `subject`: service.
    ServiceResolved,
    /// A critical service failed to construct. `subject`, `reason`.
    ServiceFailed,
    /// A non-critical service failed and is recorded absent. `subject`, `reason`.
    ServiceDegraded,
    /// Resolution re-entered a service on its own path. `subject`: re-entered name, `reason`: chain.
    CircularDependency,

    // === Circuit breaker ===
    /// Breaker opened. `subject`: breaker, `attempt`: failure count.
    CircuitOpened,
    /// Breaker let a probe through. `subject`: breaker.
    CircuitHalfOpen,
    /// Breaker closed after successful probes. `subject`: breaker.
    CircuitClosed,

    // === Connection ===
    /// Channel connected. `subject`: channel, `endpoint`.
    ConnectionOpened,
    /// Transport closed unexpectedly or a handshake failed. `subject`, `reason`, `endpoint`.
    ConnectionLost,
    /// Next reconnect scheduled. `subject`, `attempt`, `delay_ms`.
    ReconnectScheduled,
    /// Reconnect attempts exhausted; channel is down. `subject`, `attempt`.
    ConnectionExhausted,
    /// Channel closed on request. `subject`.
    ConnectionClosed,

    // === Coordinator ===
    /// Readiness signal raised; pending tasks released.
    SystemReady,
    /// Task registered before readiness and parked. `subject`: task.
    TaskPending,
    /// Task run starting. `subject`, `attempt`: run number.
    TaskStarting,
    /// Task run succeeded. `subject`, `attempt`.
    TaskSucceeded,
    /// Task run failed. `subject`, `attempt`: consecutive errors, `reason`.
    TaskFailed,
    /// Task run exceeded its timeout. `subject`, `timeout_ms`.
    TaskTimeout,
    /// Tick skipped because the previous run is still in flight. `subject`.
    TaskSkipped,
    /// Task reached its error limit and was disabled. `subject`, `attempt`, `reason`.
    TaskDisabled,
    /// Task stopped on request. `subject`.
    TaskStopped,

    // === Health ===
    /// One check's failure streak reached the threshold. `subject`: check, `attempt`, `reason`.
    HealthCheckFailed,
    /// A previously alerted check passed again. `subject`: check.
    HealthCheckRecovered,
    /// A monitoring cycle finished. `reason`: "healthy" | "unhealthy".
    HealthCycleCompleted,

    // === Runtime ===
    /// Subscriber panicked while handling an event. `subject`: subscriber, `reason`.
    SubscriberPanicked,
    /// Subscriber dropped an event. `subject`: subscriber, `reason`.
    SubscriberOverflow,
    /// Shutdown requested.
    ShutdownRequested,
    /// All background tasks stopped within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded during shutdown.
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the service, breaker, channel, task or check.
    pub subject: Option<Arc<str>>,
    /// Human-readable reason (errors, chains, overflow details).
    pub reason: Option<Arc<str>>,
    /// Attempt, run or failure count, depending on the kind.
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Endpoint involved in a connection event.
    pub endpoint: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subject: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            endpoint: None,
        }
    }

    /// Attaches the subject name.
    #[inline]
    pub fn with_subject(mut self, subject: impl Into<Arc<str>>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt/run/failure count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an endpoint.
    #[inline]
    pub fn with_endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_subject(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_subject(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[inline]
fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::TaskStarting);
        let b = Event::new(EventKind::TaskSucceeded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn long_durations_saturate() {
        let ev = Event::new(EventKind::TaskTimeout).with_timeout(Duration::from_secs(u64::MAX / 2));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }

    #[test]
    fn internal_events_are_flagged() {
        assert!(Event::subscriber_overflow("audit", "full").is_internal());
        assert!(!Event::new(EventKind::SystemReady).is_internal());
    }
}
