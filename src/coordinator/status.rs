//! Serializable coordinator snapshots for operators and dashboards.

use serde::Serialize;

/// Lifecycle state of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Registered before readiness; not running yet.
    Pending,
    /// Timer running.
    Active,
    /// Reached its error limit; timer cancelled.
    Disabled,
    /// Stopped on request.
    Stopped,
}

/// Per-task snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    /// Task name.
    pub name: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// True while a run is in flight.
    pub running: bool,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    /// Error limit.
    pub max_errors: u32,
    /// Completed runs (success or failure).
    pub total_runs: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

/// Whole-coordinator snapshot, tasks sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    /// Whether the readiness signal was raised.
    pub ready: bool,
    /// Every registered task.
    pub tasks: Vec<TaskStatus>,
}

impl CoordinatorStatus {
    /// Looks up one task.
    pub fn task(&self, name: &str) -> Option<&TaskStatus> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
