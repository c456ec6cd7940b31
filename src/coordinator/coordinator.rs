//! # Background task coordinator.
//!
//! Periodic tasks are registered at any time but stay **pending** until the readiness
//! signal ([`Coordinator::set_system_ready`]) is raised once. After that, every pending
//! task starts and later registrations start immediately.
//!
//! ## Per-task timer loop
//! ```text
//! interval tick
//!   ├─ previous run in flight? → TaskSkipped (tick dropped, never queued)
//!   └─ spawn run_once(task, child token, timeout)
//!         ├─ Ok            → consecutive_errors = 0           (TaskSucceeded)
//!         ├─ Err(Canceled) → stop in progress, not counted
//!         └─ Err(e)        → consecutive_errors += 1          (TaskFailed)
//!                             └─ >= max_errors → cancel timer (TaskDisabled)
//! ```
//!
//! ## Rules
//! - Runs of one task never overlap.
//! - A failing handler never escapes its task; it is logged, published and counted.
//! - A disabled task is a status, not an error.
//! - `stop_task` / `stop_all` cancel the timer and the in-flight run, then wait for both.
//! - After `stop_all` the coordinator is closed; registration fails with `Stopped`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TaskDefaults;
use crate::coordinator::runner::run_once;
use crate::coordinator::status::{CoordinatorStatus, TaskState, TaskStatus};
use crate::error::{CoordinatorError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{TaskRef, TaskSpec};

struct Entry {
    spec: TaskSpec,
    state: TaskState,
    running: Arc<AtomicBool>,
    consecutive_errors: u32,
    total_runs: u64,
    last_error: Option<String>,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Entry {
    fn status(&self, name: &str) -> TaskStatus {
        TaskStatus {
            name: name.to_string(),
            state: self.state,
            interval_ms: self.spec.interval().as_millis() as u64,
            running: self.running.load(Ordering::Acquire),
            consecutive_errors: self.consecutive_errors,
            max_errors: self.spec.max_errors(),
            total_runs: self.total_runs,
            last_error: self.last_error.clone(),
        }
    }
}

struct Inner {
    defaults: TaskDefaults,
    tasks: Mutex<HashMap<String, Entry>>,
    ready: AtomicBool,
    root: CancellationToken,
    bus: OnceLock<Bus>,
}

/// Holds periodic tasks until the system is ready, then runs them with error isolation.
///
/// Cheap to clone; clones share the same task table.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use bootvisor::{Coordinator, TaskDefaults, TaskError, TaskFn, TaskState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = Coordinator::new(TaskDefaults::default());
/// let sweep = TaskFn::arc("sweep", |_ctx: CancellationToken| async move { Ok::<(), TaskError>(()) });
///
/// coordinator.register(sweep, Duration::from_secs(60), true).unwrap();
/// assert_eq!(coordinator.status().task("sweep").unwrap().state, TaskState::Pending);
///
/// coordinator.set_system_ready();
/// assert_eq!(coordinator.status().task("sweep").unwrap().state, TaskState::Active);
/// coordinator.stop_all().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Creates a coordinator; `defaults` apply to tasks added with [`register`](Self::register).
    pub fn new(defaults: TaskDefaults) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults,
                tasks: Mutex::new(HashMap::new()),
                ready: AtomicBool::new(false),
                root: CancellationToken::new(),
                bus: OnceLock::new(),
            }),
        }
    }

    /// Publishes task lifecycle events to `bus`.
    pub fn with_bus(self, bus: Bus) -> Self {
        let _ = self.inner.bus.set(bus);
        self
    }

    /// Registers `task` with the configured defaults.
    pub fn register(
        &self,
        task: TaskRef,
        interval: Duration,
        run_immediately: bool,
    ) -> Result<(), CoordinatorError> {
        let spec = TaskSpec::with_defaults(task, interval, run_immediately, &self.inner.defaults);
        self.register_task(spec)
    }

    /// Registers a fully specified task.
    ///
    /// Pending until [`set_system_ready`](Self::set_system_ready); started at once afterwards.
    pub fn register_task(&self, spec: TaskSpec) -> Result<(), CoordinatorError> {
        let name = spec.name().to_string();
        if spec.interval().is_zero() {
            return Err(CoordinatorError::ZeroInterval { name });
        }

        let mut tasks = self.inner.tasks.lock();
        if self.inner.root.is_cancelled() {
            return Err(CoordinatorError::Stopped { name });
        }
        if tasks.contains_key(&name) {
            return Err(CoordinatorError::AlreadyRegistered { name });
        }

        let mut entry = Entry {
            spec,
            state: TaskState::Pending,
            running: Arc::new(AtomicBool::new(false)),
            consecutive_errors: 0,
            total_runs: 0,
            last_error: None,
            token: None,
            handle: None,
        };

        if self.inner.ready.load(Ordering::Acquire) {
            Inner::start(&self.inner, &name, &mut entry);
        } else {
            debug!(task = %name, "task pending until system ready");
            self.inner
                .publish(Event::new(EventKind::TaskPending).with_subject(name.as_str()));
        }
        tasks.insert(name, entry);
        Ok(())
    }

    /// Raises the readiness signal and starts every pending task.
    ///
    /// Effective once; returns `false` (and changes nothing) on later calls.
    pub fn set_system_ready(&self) -> bool {
        let mut tasks = self.inner.tasks.lock();
        if self.inner.ready.swap(true, Ordering::AcqRel) {
            warn!("system ready already signalled; ignoring");
            return false;
        }

        let mut started = 0usize;
        for (name, entry) in tasks.iter_mut() {
            if entry.state == TaskState::Pending {
                Inner::start(&self.inner, name, entry);
                started += 1;
            }
        }
        drop(tasks);

        info!(started, "system ready: background tasks released");
        self.inner.publish(Event::new(EventKind::SystemReady));
        true
    }

    /// True once the readiness signal was raised.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Stops one task: cancels its timer and in-flight run, then waits for both.
    pub async fn stop_task(&self, name: &str) -> Result<(), CoordinatorError> {
        let (token, handle) = {
            let mut tasks = self.inner.tasks.lock();
            let entry = tasks.get_mut(name).ok_or_else(|| CoordinatorError::NotFound {
                name: name.to_string(),
            })?;
            if entry.state != TaskState::Disabled {
                entry.state = TaskState::Stopped;
            }
            (entry.token.take(), entry.handle.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!(task = name, "task stopped");
        self.inner
            .publish(Event::new(EventKind::TaskStopped).with_subject(name));
        Ok(())
    }

    /// Stops every task and waits for all timer loops to finish.
    ///
    /// Final: later registrations fail with [`CoordinatorError::Stopped`].
    pub async fn stop_all(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = self.inner.tasks.lock();
            self.inner.root.cancel();
            tasks
                .iter_mut()
                .filter_map(|(name, entry)| {
                    if entry.state != TaskState::Disabled {
                        entry.state = TaskState::Stopped;
                    }
                    entry.token.take();
                    entry.handle.take().map(|h| (name.clone(), h))
                })
                .collect()
        };

        for (name, handle) in handles {
            let _ = handle.await;
            self.inner
                .publish(Event::new(EventKind::TaskStopped).with_subject(name.as_str()));
        }
        debug!("all background tasks stopped");
    }

    /// Names of tasks with a run currently in flight, sorted.
    pub fn running(&self) -> Vec<String> {
        let tasks = self.inner.tasks.lock();
        let mut names: Vec<String> = tasks
            .iter()
            .filter(|(_, e)| e.running.load(Ordering::Acquire))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Snapshot of every task, sorted by name.
    pub fn status(&self) -> CoordinatorStatus {
        let tasks = self.inner.tasks.lock();
        let mut all: Vec<TaskStatus> = tasks.iter().map(|(n, e)| e.status(n)).collect();
        all.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        CoordinatorStatus {
            ready: self.is_ready(),
            tasks: all,
        }
    }
}

impl Inner {
    fn publish(&self, ev: Event) {
        if let Some(bus) = self.bus.get() {
            bus.publish(ev);
        }
    }

    /// Spawns the timer loop of `entry`. Called with the task table locked.
    fn start(this: &Arc<Self>, name: &str, entry: &mut Entry) {
        let token = this.root.child_token();
        entry.state = TaskState::Active;
        entry.token = Some(token.clone());
        entry.handle = Some(tokio::spawn(Inner::tick_loop(
            this.clone(),
            name.to_string(),
            entry.spec.clone(),
            entry.running.clone(),
            token,
        )));
        debug!(task = name, interval_ms = entry.spec.interval().as_millis() as u64, "task started");
    }

    async fn tick_loop(
        this: Arc<Self>,
        name: String,
        spec: TaskSpec,
        running: Arc<AtomicBool>,
        token: CancellationToken,
    ) {
        let first = if spec.run_immediately() {
            Instant::now()
        } else {
            Instant::now() + spec.interval()
        };
        let mut ticker = time::interval_at(first, spec.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if running.swap(true, Ordering::AcqRel) {
                debug!(task = %name, "tick skipped: previous run in flight");
                this.publish(Event::new(EventKind::TaskSkipped).with_subject(name.as_str()));
                continue;
            }

            in_flight = Some(tokio::spawn(Inner::run_tick(
                this.clone(),
                name.clone(),
                spec.clone(),
                running.clone(),
                token.clone(),
            )));
        }

        if let Some(run) = in_flight {
            let _ = run.await;
        }
    }

    async fn run_tick(
        this: Arc<Self>,
        name: String,
        spec: TaskSpec,
        running: Arc<AtomicBool>,
        token: CancellationToken,
    ) {
        let run = {
            let tasks = this.tasks.lock();
            tasks.get(&name).map_or(1, |e| e.total_runs + 1)
        };
        let run = u32::try_from(run).unwrap_or(u32::MAX);

        this.publish(
            Event::new(EventKind::TaskStarting)
                .with_subject(name.as_str())
                .with_attempt(run),
        );
        let res = run_once(spec.task().as_ref(), &token, spec.timeout(), this.bus.get()).await;
        this.record(&name, &spec, &token, res);
        running.store(false, Ordering::Release);
    }

    fn record(&self, name: &str, spec: &TaskSpec, token: &CancellationToken, res: Result<(), TaskError>) {
        enum Outcome {
            Succeeded(u64),
            Failed { errors: u32, reason: String },
            Disabled { errors: u32, reason: String },
            Canceled,
        }

        let outcome = {
            let mut tasks = self.tasks.lock();
            let Some(entry) = tasks.get_mut(name) else {
                return;
            };
            match res {
                Ok(()) => {
                    entry.total_runs += 1;
                    entry.consecutive_errors = 0;
                    Outcome::Succeeded(entry.total_runs)
                }
                Err(e) if !e.counts_as_failure() => Outcome::Canceled,
                Err(e) => {
                    entry.total_runs += 1;
                    entry.consecutive_errors += 1;
                    let reason = e.to_string();
                    entry.last_error = Some(reason.clone());
                    let errors = entry.consecutive_errors;
                    if errors >= spec.max_errors() && entry.state == TaskState::Active {
                        entry.state = TaskState::Disabled;
                        entry.token = None;
                        token.cancel();
                        Outcome::Disabled { errors, reason }
                    } else {
                        Outcome::Failed { errors, reason }
                    }
                }
            }
        };

        match outcome {
            Outcome::Succeeded(runs) => {
                debug!(task = name, runs, "task run succeeded");
                self.publish(
                    Event::new(EventKind::TaskSucceeded)
                        .with_subject(name)
                        .with_attempt(u32::try_from(runs).unwrap_or(u32::MAX)),
                );
            }
            Outcome::Failed { errors, reason } => {
                warn!(task = name, errors, reason = %reason, "task run failed");
                self.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_subject(name)
                        .with_attempt(errors)
                        .with_reason(reason),
                );
            }
            Outcome::Disabled { errors, reason } => {
                warn!(task = name, errors, reason = %reason, "task run failed");
                self.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_subject(name)
                        .with_attempt(errors)
                        .with_reason(reason.as_str()),
                );
                error!(task = name, errors, "task disabled: error limit reached");
                self.publish(
                    Event::new(EventKind::TaskDisabled)
                        .with_subject(name)
                        .with_attempt(errors)
                        .with_reason(reason),
                );
            }
            Outcome::Canceled => debug!(task = name, "task run canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;
    use std::sync::atomic::AtomicU32;

    fn counting(name: &'static str, calls: Arc<AtomicU32>) -> TaskRef {
        TaskFn::arc(name, move |_ctx: CancellationToken| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TaskError>(())
            }
        })
    }

    fn failing(name: &'static str, calls: Arc<AtomicU32>) -> TaskRef {
        TaskFn::arc(name, move |_ctx: CancellationToken| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), TaskError>(TaskError::fail("upstream down"))
            }
        })
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(TaskDefaults::default())
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_wait_for_readiness() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        c.register(counting("sync", calls.clone()), Duration::from_secs(1), true)
            .unwrap();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(c.set_system_ready());
        assert!(!c.set_system_ready());
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let late = Arc::new(AtomicU32::new(0));
        c.register(counting("late", late.clone()), Duration::from_secs(1), true)
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(late.load(Ordering::SeqCst), 1);

        c.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_immediately_false_waits_one_interval() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        c.register(counting("lazy", calls.clone()), Duration::from_secs(5), false)
            .unwrap();
        c.set_system_ready();

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        c.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn error_limit_disables_task() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let c = coordinator().with_bus(bus);
        let calls = Arc::new(AtomicU32::new(0));
        c.register(failing("flaky", calls.clone()), Duration::from_secs(1), true)
            .unwrap();
        c.set_system_ready();

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        let status = c.status();
        let task = status.task("flaky").unwrap();
        assert_eq!(task.state, TaskState::Disabled);
        assert_eq!(task.consecutive_errors, 10);
        assert_eq!(task.last_error.as_deref(), Some("execution failed: upstream down"));

        let disabled = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.kind == EventKind::TaskDisabled)
            .count();
        assert_eq!(disabled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_error_streak() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let task = TaskFn::arc("recovering", move |_ctx: CancellationToken| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 5 {
                    Err(TaskError::fail("not yet"))
                } else {
                    Ok(())
                }
            }
        });
        c.register(task, Duration::from_secs(1), true).unwrap();
        c.set_system_ready();

        time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(c.status().task("recovering").unwrap().consecutive_errors, 5);

        time::sleep(Duration::from_secs(1)).await;
        let status = c.status();
        let task = status.task("recovering").unwrap();
        assert_eq!(task.consecutive_errors, 0);
        assert_eq!(task.state, TaskState::Active);
        assert_eq!(task.total_runs, 6);
        c.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let c = coordinator().with_bus(bus);
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let slow = TaskFn::arc("slow", move |_ctx: CancellationToken| {
            let (a, p) = (a.clone(), p.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(2500)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), TaskError>(())
            }
        });
        c.register(slow, Duration::from_secs(1), true).unwrap();
        c.set_system_ready();

        time::sleep(Duration::from_secs(10)).await;
        c.stop_all().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        let skipped = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.kind == EventKind::TaskSkipped)
            .count();
        assert!(skipped >= 4, "skipped only {skipped}");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_task_cancels_in_flight_run() {
        let c = coordinator();
        let task = TaskFn::arc("waiter", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err::<(), TaskError>(TaskError::Canceled)
        });
        c.register(task, Duration::from_secs(1), true).unwrap();
        c.set_system_ready();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(c.running(), vec!["waiter"]);

        c.stop_task("waiter").await.unwrap();
        let status = c.status();
        let task = status.task("waiter").unwrap();
        assert_eq!(task.state, TaskState::Stopped);
        assert!(!task.running);
        assert_eq!(task.consecutive_errors, 0);

        assert!(matches!(
            c.stop_task("ghost").await,
            Err(CoordinatorError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let c = coordinator();
        let task = TaskFn::arc("hung", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err::<(), TaskError>(TaskError::Canceled)
        });
        c.register_task(
            TaskSpec::new(task, Duration::from_secs(10), true)
                .with_timeout(Some(Duration::from_secs(1))),
        )
        .unwrap();
        c.set_system_ready();

        time::sleep(Duration::from_secs(2)).await;
        let status = c.status();
        let task = status.task("hung").unwrap();
        assert_eq!(task.consecutive_errors, 1);
        assert_eq!(task.last_error.as_deref(), Some("timed out after 1s"));
        c.stop_all().await;
    }

    #[tokio::test]
    async fn registration_is_validated() {
        let c = coordinator();
        c.register(counting("a", Arc::default()), Duration::from_secs(1), true)
            .unwrap();
        assert_eq!(
            c.register(counting("a", Arc::default()), Duration::from_secs(1), true),
            Err(CoordinatorError::AlreadyRegistered { name: "a".into() })
        );
        assert_eq!(
            c.register(counting("z", Arc::default()), Duration::ZERO, true),
            Err(CoordinatorError::ZeroInterval { name: "z".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registration_after_stop_all_is_rejected() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        c.set_system_ready();
        c.stop_all().await;

        let err = c
            .register(counting("late", calls.clone()), Duration::from_secs(1), true)
            .unwrap_err();
        assert_eq!(err, CoordinatorError::Stopped { name: "late".into() });
        assert_eq!(err.as_label(), "coordinator_stopped");
        assert!(c.status().task("late").is_none());

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
