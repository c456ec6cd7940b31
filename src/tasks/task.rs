//! # Periodic task contract.
//!
//! A task is invoked once per tick by the [`Coordinator`](crate::Coordinator). Each run
//! receives a [`CancellationToken`] that fires when the task is stopped; long runs should
//! check it and return [`TaskError::Canceled`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// # One periodic unit of work.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use async_trait::async_trait;
/// use bootvisor::{Task, TaskError};
///
/// struct PruneCache;
///
/// #[async_trait]
/// impl Task for PruneCache {
///     fn name(&self) -> &str { "prune-cache" }
///
///     async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         // evict stale entries...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Executes one run.
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError>;
}

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;
