//! # One run of a background task.
//!
//! Executes a single run of a [`Task`] with an optional timeout and panic isolation.
//!
//! ```text
//! Success:     task.run() → Ok(())
//! Cancelled:   task.run() → Err(Canceled)        (stop requested, not a failure)
//! Failure:     task.run() → Err(Fail)
//! Panic:       task.run() panics → Err(Fail "panicked: ...")
//! Timeout:     timeout exceeded → cancel child → publish TaskTimeout → Err(Timeout)
//! ```
//!
//! ## Rules
//! - Derives a **child token** per run; cancelling it never affects the parent.
//! - `TaskTimeout` is published here; the coordinator publishes the run's outcome.

use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;
use crate::tasks::Task;

/// Executes a single run of `task`.
///
/// ### Timeout behavior
/// If `timeout` is `Some(dur)` and `dur > 0`, the run is wrapped in `tokio::time::timeout`;
/// on expiry the child token is cancelled and [`TaskError::Timeout`] is returned.
pub(crate) async fn run_once<T: Task + ?Sized>(
    task: &T,
    parent: &CancellationToken,
    timeout: Option<Duration>,
    bus: Option<&Bus>,
) -> Result<(), TaskError> {
    let child = parent.child_token();
    let guarded = std::panic::AssertUnwindSafe(task.run(child.clone()))
        .catch_unwind()
        .map(|res| {
            res.unwrap_or_else(|panic| {
                Err(TaskError::fail(format!("panicked: {}", panic_message(&*panic))))
            })
        });

    match timeout.filter(|d| *d > Duration::ZERO) {
        Some(dur) => match time::timeout(dur, guarded).await {
            Ok(res) => res,
            Err(_elapsed) => {
                child.cancel();
                if let Some(bus) = bus {
                    bus.publish(
                        Event::new(EventKind::TaskTimeout)
                            .with_subject(task.name())
                            .with_timeout(dur),
                    );
                }
                Err(TaskError::Timeout { timeout: dur })
            }
        },
        None => guarded.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;

    #[tokio::test]
    async fn panic_becomes_failure() {
        let task = TaskFn::new("bomb", |_ctx: CancellationToken| async move {
            if true {
                panic!("handler bug");
            }
            Ok::<(), TaskError>(())
        });
        let err = run_once(&task, &CancellationToken::new(), None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handler bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_child_only() {
        let bus = Bus::new(4);
        let mut rx = bus.subscribe();
        let parent = CancellationToken::new();
        let task = TaskFn::new("stuck", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err::<(), TaskError>(TaskError::Canceled)
        });

        let err = run_once(&task, &parent, Some(Duration::from_millis(200)), Some(&bus))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Timeout { .. }));
        assert!(!parent.is_cancelled());

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::TaskTimeout);
        assert_eq!(ev.timeout_ms, Some(200));
    }
}
