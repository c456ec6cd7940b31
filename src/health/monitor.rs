//! # Health monitor: named probes, aggregated health, failure-streak alerts.
//!
//! ```text
//! run_checks()
//!   ├─ run every probe concurrently (timeout + panic isolation per probe)
//!   ├─ per probe: failure → consecutive_failures += 1
//!   │               == threshold → HealthCheckFailed (once per streak)
//!   │             success → streak reset (HealthCheckRecovered if it had alerted)
//!   ├─ healthy = AND of all results
//!   └─ append report to bounded history (oldest evicted)
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HealthConfig;
use crate::error::BoxError;
use crate::events::{Bus, Event, EventKind};
use crate::health::check::HealthCheck;
use crate::subscribers::panic_message;

/// Result of one probe in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Probe name.
    pub name: String,
    /// Whether the probe passed.
    pub healthy: bool,
    /// Failure message.
    pub error: Option<String>,
    /// Streak length after this cycle.
    pub consecutive_failures: u32,
    /// Probe duration in milliseconds.
    pub duration_ms: u64,
}

/// One monitoring cycle; also the history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Unix timestamp of the cycle in milliseconds.
    pub timestamp_ms: u64,
    /// AND of every probe result (true when no probes are registered).
    pub healthy: bool,
    /// Per-probe results in registration order.
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Looks up one probe's result.
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

struct Probe {
    name: String,
    check: Arc<dyn HealthCheck>,
    consecutive_failures: u32,
    alerted: bool,
}

struct Inner {
    config: HealthConfig,
    probes: Mutex<Vec<Probe>>,
    history: Mutex<VecDeque<HealthReport>>,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    bus: OnceLock<Bus>,
}

/// Periodic health prober with bounded history.
///
/// Cheap to clone; clones share probes and history.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl HealthMonitor {
    /// Creates a monitor with no probes.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                probes: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
                monitor: Mutex::new(None),
                bus: OnceLock::new(),
            }),
        }
    }

    /// Publishes alerts and cycle completions to `bus`.
    pub fn with_bus(self, bus: Bus) -> Self {
        let _ = self.inner.bus.set(bus);
        self
    }

    /// Registers a probe. A probe with the same name is replaced and its streak cleared.
    pub fn register_check(&self, name: impl Into<String>, check: Arc<dyn HealthCheck>) {
        let name = name.into();
        let mut probes = self.inner.probes.lock();
        let probe = Probe {
            name: name.clone(),
            check,
            consecutive_failures: 0,
            alerted: false,
        };
        match probes.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = probe,
            None => probes.push(probe),
        }
        debug!(check = %name, "health check registered");
    }

    /// Runs every probe once and records the cycle.
    pub async fn run_checks(&self) -> HealthReport {
        let probes: Vec<(String, Arc<dyn HealthCheck>)> = self
            .inner
            .probes
            .lock()
            .iter()
            .map(|p| (p.name.clone(), p.check.clone()))
            .collect();

        let timeout = self.inner.config.check_timeout();
        let outcomes = join_all(
            probes
                .iter()
                .map(|(_, check)| probe_once(check.as_ref(), timeout)),
        )
        .await;

        let mut checks = Vec::with_capacity(probes.len());
        let mut alerts = Vec::new();
        let mut recoveries = Vec::new();
        {
            let mut registered = self.inner.probes.lock();
            for ((name, _), (outcome, elapsed)) in probes.into_iter().zip(outcomes) {
                let Some(probe) = registered.iter_mut().find(|p| p.name == name) else {
                    continue;
                };
                let error = match outcome {
                    Ok(()) => {
                        if probe.alerted {
                            recoveries.push(name.clone());
                        }
                        probe.consecutive_failures = 0;
                        probe.alerted = false;
                        None
                    }
                    Err(e) => {
                        probe.consecutive_failures = probe.consecutive_failures.saturating_add(1);
                        let msg = e.to_string();
                        let threshold = self.inner.config.failure_threshold_clamped();
                        if probe.consecutive_failures == threshold {
                            probe.alerted = true;
                            alerts.push((name.clone(), probe.consecutive_failures, msg.clone()));
                        }
                        Some(msg)
                    }
                };
                checks.push(CheckResult {
                    name,
                    healthy: error.is_none(),
                    error,
                    consecutive_failures: probe.consecutive_failures,
                    duration_ms: elapsed.as_millis() as u64,
                });
            }
        }

        for (name, failures, reason) in alerts {
            error!(check = %name, failures, reason = %reason, "health check failing");
            self.inner.publish(
                Event::new(EventKind::HealthCheckFailed)
                    .with_subject(name)
                    .with_attempt(failures)
                    .with_reason(reason),
            );
        }
        for name in recoveries {
            info!(check = %name, "health check recovered");
            self.inner
                .publish(Event::new(EventKind::HealthCheckRecovered).with_subject(name));
        }

        let report = HealthReport {
            timestamp_ms: unix_millis(),
            healthy: checks.iter().all(|c| c.healthy),
            checks,
        };
        self.inner.remember(report.clone());

        if report.healthy {
            debug!(checks = report.checks.len(), "health cycle: healthy");
        } else {
            warn!(checks = report.checks.len(), "health cycle: unhealthy");
        }
        self.inner.publish(
            Event::new(EventKind::HealthCycleCompleted)
                .with_reason(if report.healthy { "healthy" } else { "unhealthy" }),
        );
        report
    }

    /// Starts running [`run_checks`](Self::run_checks) every `interval`, the first cycle immediately.
    ///
    /// Returns `false` if monitoring is already running or `interval` is zero.
    pub fn start_monitoring(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let mut monitor = self.inner.monitor.lock();
        if monitor.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let this = self.clone();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now(), interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                select! {
                    _ = stop.cancelled() => break,
                    _ = this.run_checks() => {}
                }
            }
        });
        *monitor = Some((token, handle));
        info!(interval_ms = interval.as_millis() as u64, "health monitoring started");
        true
    }

    /// Stops periodic monitoring and waits for the loop to exit.
    pub async fn stop_monitoring(&self) {
        let running = self.inner.monitor.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            let _ = handle.await;
            info!("health monitoring stopped");
        }
    }

    /// True while periodic monitoring runs.
    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.lock().is_some()
    }

    /// Recorded cycles, oldest first.
    pub fn history(&self) -> Vec<HealthReport> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Most recent cycle.
    pub fn last_report(&self) -> Option<HealthReport> {
        self.inner.history.lock().back().cloned()
    }
}

impl Inner {
    fn publish(&self, ev: Event) {
        if let Some(bus) = self.bus.get() {
            bus.publish(ev);
        }
    }

    fn remember(&self, report: HealthReport) {
        let capacity = self.config.history_capacity.max(1);
        let mut history = self.history.lock();
        while history.len() >= capacity {
            history.pop_front();
        }
        history.push_back(report);
    }
}

async fn probe_once(
    check: &dyn HealthCheck,
    timeout: Option<Duration>,
) -> (Result<(), BoxError>, Duration) {
    let started = Instant::now();
    let guarded = std::panic::AssertUnwindSafe(check.check())
        .catch_unwind()
        .map(|res| {
            res.unwrap_or_else(|panic| {
                Err(format!("check panicked: {}", panic_message(&*panic)).into())
            })
        });

    let outcome = match timeout {
        Some(dur) => time::timeout(dur, guarded)
            .await
            .unwrap_or_else(|_| Err(format!("check timed out after {dur:?}").into())),
        None => guarded.await,
    };
    (outcome, started.elapsed())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::check::CheckFn;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn passing() -> Arc<dyn HealthCheck> {
        CheckFn::arc(|| async { Ok::<(), BoxError>(()) })
    }

    fn failing() -> Arc<dyn HealthCheck> {
        CheckFn::arc(|| async { Err::<(), BoxError>("connection refused".into()) })
    }

    fn toggled(ok: Arc<AtomicBool>) -> Arc<dyn HealthCheck> {
        CheckFn::arc(move || {
            let ok = ok.load(Ordering::SeqCst);
            async move {
                if ok {
                    Ok::<(), BoxError>(())
                } else {
                    Err("down".into())
                }
            }
        })
    }

    fn kinds(rx: &mut tokio::sync::broadcast::Receiver<Event>, kind: EventKind) -> usize {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.kind == kind)
            .count()
    }

    #[tokio::test]
    async fn one_failure_makes_system_unhealthy() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.register_check("db", passing());
        monitor.register_check("vision", failing());

        let report = monitor.run_checks().await;
        assert!(!report.healthy);
        assert!(report.check("db").unwrap().healthy);
        assert_eq!(
            report.check("vision").unwrap().error.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn no_checks_is_healthy() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        assert!(monitor.run_checks().await.healthy);
    }

    #[tokio::test]
    async fn streak_alerts_once_then_recovers() {
        let bus = Bus::new(128);
        let mut rx = bus.subscribe();
        let monitor = HealthMonitor::new(HealthConfig::default()).with_bus(bus);
        let ok = Arc::new(AtomicBool::new(false));
        monitor.register_check("cache", toggled(ok.clone()));

        for _ in 0..5 {
            monitor.run_checks().await;
        }
        assert_eq!(kinds(&mut rx, EventKind::HealthCheckFailed), 1);

        ok.store(true, Ordering::SeqCst);
        let report = monitor.run_checks().await;
        assert_eq!(report.check("cache").unwrap().consecutive_failures, 0);
        assert_eq!(kinds(&mut rx, EventKind::HealthCheckRecovered), 1);

        ok.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            monitor.run_checks().await;
        }
        assert_eq!(kinds(&mut rx, EventKind::HealthCheckFailed), 1);
    }

    #[tokio::test]
    async fn zero_threshold_alerts_on_first_failure() {
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let monitor = HealthMonitor::new(HealthConfig {
            failure_threshold: 0,
            ..HealthConfig::default()
        })
        .with_bus(bus);
        monitor.register_check("queue", failing());

        monitor.run_checks().await;
        assert_eq!(kinds(&mut rx, EventKind::HealthCheckFailed), 1);

        monitor.run_checks().await;
        assert_eq!(kinds(&mut rx, EventKind::HealthCheckFailed), 0);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let monitor = HealthMonitor::new(HealthConfig {
            history_capacity: 3,
            ..HealthConfig::default()
        });
        monitor.register_check("db", passing());

        let mut stamps = Vec::new();
        for _ in 0..5 {
            stamps.push(monitor.run_checks().await);
        }
        let history = monitor.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history, stamps[2..].to_vec());
        assert_eq!(monitor.last_report().as_ref(), stamps.last());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_check_times_out() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.register_check(
            "slow",
            CheckFn::arc(|| async {
                time::sleep(Duration::from_secs(30)).await;
                Ok::<(), BoxError>(())
            }),
        );

        let report = monitor.run_checks().await;
        let slow = report.check("slow").unwrap();
        assert!(!slow.healthy);
        assert_eq!(slow.error.as_deref(), Some("check timed out after 5s"));
    }

    #[tokio::test]
    async fn panicking_check_is_a_failure() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.register_check(
            "buggy",
            CheckFn::arc(|| async {
                if true {
                    panic!("probe bug");
                }
                Ok::<(), BoxError>(())
            }),
        );
        let report = monitor.run_checks().await;
        assert!(report.check("buggy").unwrap().error.as_deref().unwrap().contains("probe bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_runs_on_cadence_until_stopped() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        monitor.register_check(
            "count",
            CheckFn::arc(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), BoxError>(()) }
            }),
        );

        assert!(monitor.start_monitoring(Duration::from_secs(30)));
        assert!(!monitor.start_monitoring(Duration::from_secs(30)));
        time::sleep(Duration::from_secs(65)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        monitor.stop_monitoring().await;
        assert!(!monitor.is_monitoring());
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn report_serializes_for_dashboards() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.register_check("db", passing());
        let report = monitor.run_checks().await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["checks"][0]["name"], "db");
        assert_eq!(json["checks"][0]["consecutive_failures"], 0);
    }
}
