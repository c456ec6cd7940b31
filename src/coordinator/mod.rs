//! # Background task coordinator.
//!
//! - [`Coordinator`]: readiness-gated periodic task runner.
//! - [`TaskState`], [`TaskStatus`], [`CoordinatorStatus`]: serializable snapshots.

#[allow(clippy::module_inception)]
mod coordinator;
mod runner;
mod status;

pub use coordinator::Coordinator;
pub use status::{CoordinatorStatus, TaskState, TaskStatus};
