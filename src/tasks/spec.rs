//! # Background task registration.
//!
//! [`TaskSpec`] describes how the [`Coordinator`](crate::Coordinator) runs a task:
//! the tick interval, whether the first run happens immediately, the consecutive
//! error limit and an optional per-run timeout.
//!
//! A spec can be created:
//! - **Explicitly** with [`TaskSpec::new`] (error limit 10, no timeout)
//! - **From config** with [`TaskSpec::with_defaults`]

use std::time::Duration;

use crate::config::TaskDefaults;
use crate::tasks::task::TaskRef;

/// Specification for running a task periodically.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use bootvisor::{TaskError, TaskFn, TaskSpec};
///
/// let sweep = TaskFn::arc("sweep", |_ctx: CancellationToken| async move { Ok::<(), TaskError>(()) });
///
/// let spec = TaskSpec::new(sweep, Duration::from_secs(60), true)
///     .with_max_errors(3)
///     .with_timeout(Some(Duration::from_secs(10)));
///
/// assert_eq!(spec.name(), "sweep");
/// assert_eq!(spec.max_errors(), 3);
/// ```
#[derive(Clone)]
pub struct TaskSpec {
    task: TaskRef,
    interval: Duration,
    run_immediately: bool,
    max_errors: u32,
    timeout: Option<Duration>,
}

impl TaskSpec {
    /// Creates a spec with the default error limit (10) and no timeout.
    ///
    /// ### Parameters
    /// - `task`: task to run
    /// - `interval`: time between ticks
    /// - `run_immediately`: run on start instead of waiting one interval
    pub fn new(task: TaskRef, interval: Duration, run_immediately: bool) -> Self {
        Self::with_defaults(task, interval, run_immediately, &TaskDefaults::default())
    }

    /// Creates a spec inheriting error limit and timeout from config.
    pub fn with_defaults(
        task: TaskRef,
        interval: Duration,
        run_immediately: bool,
        defaults: &TaskDefaults,
    ) -> Self {
        Self {
            task,
            interval,
            run_immediately,
            max_errors: defaults.max_errors,
            timeout: defaults.timeout(),
        }
    }

    /// Returns reference to the task.
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// Convenience: returns the task name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the first run happens on start.
    pub fn run_immediately(&self) -> bool {
        self.run_immediately
    }

    /// Consecutive failures after which the task is disabled.
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Per-run timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns a new spec with updated error limit (min 1).
    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors.max(1);
        self
    }

    /// Returns a new spec with updated timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|d| *d > Duration::ZERO);
        self
    }
}
