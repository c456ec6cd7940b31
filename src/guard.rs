//! # Singleton initialization guard.
//!
//! [`SingletonGuard`] is a table of one [`InitState`] record per component name. It is the
//! trip wire that turns duplicate or circular construction into a detected condition:
//!
//! ```text
//! get(name) ── Some ──────────────────────────────► reuse instance
//!     │
//!     None
//!     ▼
//! mark_initializing(name) ── false ──► already Initializing/Initialized:
//!     │                                 abort this branch (re-entry) or wait (another caller)
//!     true
//!     ▼
//! construct ── Ok ──► register(name, instance) ─► mark_initialized(name)
//!     │
//!     Err ──► reset(name) (back to Uninitialized, retry possible) ─► propagate
//! ```
//!
//! The guard is an explicitly constructed object: each orchestrator (and each test) owns
//! its own table.
//!
//! ## Rules
//! - One record per name; the map is the source of truth.
//! - The lock is never held across an `.await`.
//! - Every transition out of `Initializing` wakes callers blocked in [`SingletonGuard::wait_initialized`].
//! - A [`Claim`] dropped before completion resets its record.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::GuardError;

/// Type-erased component instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of one named component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    /// Never constructed, or the last attempt failed.
    Uninitialized,
    /// Construction in progress.
    Initializing,
    /// Constructed; the instance is cached.
    Initialized,
}

#[derive(Default)]
struct Record {
    state: Option<InitState>,
    instance: Option<Instance>,
}

impl Record {
    fn state(&self) -> InitState {
        self.state.unwrap_or(InitState::Uninitialized)
    }
}

/// Process-wide (per orchestrator) table of component initialization records.
#[derive(Default)]
pub struct SingletonGuard {
    records: Mutex<HashMap<String, Record>>,
    changed: Notify,
}

impl SingletonGuard {
    /// Creates an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached instance if `name` is initialized.
    pub fn get(&self, name: &str) -> Option<Instance> {
        let records = self.records.lock();
        records
            .get(name)
            .filter(|r| r.state() == InitState::Initialized)
            .and_then(|r| r.instance.clone())
    }

    /// Current state of `name`.
    pub fn state(&self, name: &str) -> InitState {
        self.records
            .lock()
            .get(name)
            .map_or(InitState::Uninitialized, Record::state)
    }

    /// Claims `name` for construction.
    ///
    /// Returns `false` if it is already `Initializing` or `Initialized`.
    pub fn mark_initializing(&self, name: &str) -> bool {
        let mut records = self.records.lock();
        let record = records.entry(name.to_string()).or_default();
        match record.state() {
            InitState::Uninitialized => {
                record.state = Some(InitState::Initializing);
                debug!(component = name, "initializing");
                true
            }
            InitState::Initializing | InitState::Initialized => false,
        }
    }

    /// Claims `name` like [`mark_initializing`](Self::mark_initializing), returning a [`Claim`]
    /// that resets the record when dropped before [`Claim::complete`].
    pub fn claim(&self, name: &str) -> Option<Claim<'_>> {
        self.mark_initializing(name).then(|| Claim {
            guard: self,
            name: name.to_string(),
            armed: true,
        })
    }

    /// Attaches the constructed instance to `name`'s record.
    pub fn register(&self, name: &str, instance: Instance) {
        let mut records = self.records.lock();
        records.entry(name.to_string()).or_default().instance = Some(instance);
    }

    /// Moves `name` to `Initialized`.
    ///
    /// Returns `false` (and leaves the record untouched) if no instance was registered.
    pub fn mark_initialized(&self, name: &str) -> bool {
        let done = {
            let mut records = self.records.lock();
            match records.get_mut(name) {
                Some(record) if record.instance.is_some() => {
                    record.state = Some(InitState::Initialized);
                    true
                }
                _ => false,
            }
        };
        if done {
            debug!(component = name, "initialized");
            self.changed.notify_waiters();
        }
        done
    }

    /// Resets `name` to `Uninitialized` (failure path), dropping any registered instance.
    pub fn reset(&self, name: &str) {
        {
            let mut records = self.records.lock();
            if let Some(record) = records.get_mut(name) {
                record.state = Some(InitState::Uninitialized);
                record.instance = None;
            }
        }
        debug!(component = name, "reset to uninitialized");
        self.changed.notify_waiters();
    }

    /// Waits until `name` leaves `Initializing`.
    ///
    /// Returns the instance if construction succeeded, `None` if it failed or never started.
    pub async fn wait_initialized(&self, name: &str) -> Option<Instance> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let records = self.records.lock();
                match records.get(name) {
                    Some(r) if r.state() == InitState::Initializing => {}
                    Some(r) if r.state() == InitState::Initialized => return r.instance.clone(),
                    _ => return None,
                }
            }

            notified.await;
        }
    }

    /// Sorted snapshot of every known name and its state.
    pub fn names(&self) -> Vec<(String, InitState)> {
        let records = self.records.lock();
        let mut all: Vec<(String, InitState)> = records
            .iter()
            .map(|(name, r)| (name.clone(), r.state()))
            .collect();
        all.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Runs the full guard protocol around `init` for components built outside the registry.
    ///
    /// - initialized → returns the cached instance without calling `init`;
    /// - already initializing → [`GuardError::Reentrant`], `init` is not called;
    /// - otherwise runs `init`, caching the result or resetting the record on error.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use bootvisor::SingletonGuard;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let guard = SingletonGuard::new();
    /// let a: Arc<String> = guard
    ///     .get_or_try_init("greeting", || async { Ok::<_, std::io::Error>("hi".to_string()) })
    ///     .await
    ///     .unwrap();
    /// let b: Arc<String> = guard
    ///     .get_or_try_init("greeting", || async { Ok::<_, std::io::Error>("other".to_string()) })
    ///     .await
    ///     .unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// # }
    /// ```
    pub async fn get_or_try_init<T, F, Fut, E>(
        &self,
        name: &str,
        init: F,
    ) -> Result<Arc<T>, GuardError<E>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(existing) = self.get(name) {
            return downcast(name, existing);
        }
        let Some(claim) = self.claim(name) else {
            if let Some(existing) = self.get(name) {
                return downcast(name, existing);
            }
            return Err(GuardError::Reentrant {
                name: name.to_string(),
            });
        };

        // A panicking or dropped `init` releases the claim as well.
        let value = init().await.map_err(GuardError::Init)?;
        let instance: Arc<T> = Arc::new(value);
        claim.complete(instance.clone());
        Ok(instance)
    }
}

/// Exclusive right to construct one name, obtained from [`SingletonGuard::claim`].
///
/// Dropping it without calling [`complete`](Self::complete) resets the record to
/// `Uninitialized` and wakes waiters, so an abandoned or failed construction can be retried.
#[must_use = "dropping a claim immediately releases it"]
pub struct Claim<'a> {
    guard: &'a SingletonGuard,
    name: String,
    armed: bool,
}

impl Claim<'_> {
    /// Name being constructed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `instance` and marks the name initialized.
    pub fn complete(mut self, instance: Instance) {
        self.guard.register(&self.name, instance);
        self.guard.mark_initialized(&self.name);
        self.armed = false;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.guard.reset(&self.name);
        }
    }
}

fn downcast<T, E>(name: &str, instance: Instance) -> Result<Arc<T>, GuardError<E>>
where
    T: Send + Sync + 'static,
{
    instance
        .downcast::<T>()
        .map_err(|_| GuardError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn mark_initializing_trips_on_second_claim() {
        let guard = SingletonGuard::new();
        assert!(guard.mark_initializing("db"));
        assert!(!guard.mark_initializing("db"));
        assert_eq!(guard.state("db"), InitState::Initializing);
        assert!(guard.get("db").is_none());
    }

    #[test]
    fn register_then_mark_initialized_caches_instance() {
        let guard = SingletonGuard::new();
        assert!(guard.mark_initializing("db"));
        assert!(!guard.mark_initialized("db"), "no instance registered yet");

        guard.register("db", Arc::new(7u32));
        assert!(guard.mark_initialized("db"));
        assert!(!guard.mark_initializing("db"));

        let got = guard.get("db").unwrap().downcast::<u32>().unwrap();
        assert_eq!(*got, 7);
    }

    #[test]
    fn reset_allows_retry() {
        let guard = SingletonGuard::new();
        assert!(guard.mark_initializing("cache"));
        guard.reset("cache");
        assert_eq!(guard.state("cache"), InitState::Uninitialized);
        assert!(guard.mark_initializing("cache"));
    }

    #[tokio::test]
    async fn reentrant_init_is_rejected_without_recursion() {
        let guard = Arc::new(SingletonGuard::new());
        let inner = guard.clone();

        let res: Result<Arc<u32>, GuardError<GuardError<std::io::Error>>> = guard
            .get_or_try_init("loop", || async move {
                inner
                    .get_or_try_init("loop", || async { Ok::<u32, std::io::Error>(1) })
                    .await
                    .map(|v| *v)
            })
            .await;

        match res {
            Err(GuardError::Init(GuardError::Reentrant { name })) => assert_eq!(name, "loop"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(guard.state("loop"), InitState::Uninitialized);
    }

    #[tokio::test]
    async fn failed_init_propagates_and_resets() {
        let guard = SingletonGuard::new();
        let calls = AtomicU32::new(0);

        let first: Result<Arc<u32>, _> = guard
            .get_or_try_init("flaky", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("boom")
            })
            .await;
        assert!(matches!(first, Err(GuardError::Init("boom"))));

        let second: Arc<u32> = guard
            .get_or_try_init("flaky", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, &str>(5)
            })
            .await
            .unwrap();
        assert_eq!(*second, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let guard = SingletonGuard::new();
        let _: Arc<u32> = guard
            .get_or_try_init("n", || async { Ok::<u32, &str>(1) })
            .await
            .unwrap();
        let res: Result<Arc<String>, GuardError<&str>> = guard
            .get_or_try_init("n", || async { Ok("x".to_string()) })
            .await;
        assert!(matches!(res, Err(GuardError::TypeMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_wake_on_completion() {
        let guard = Arc::new(SingletonGuard::new());
        assert!(guard.mark_initializing("slow"));

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait_initialized("slow").await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.register("slow", Arc::new("ready"));
        guard.mark_initialized("slow");

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(*got.downcast::<&str>().unwrap(), "ready");
    }

    #[tokio::test]
    async fn waiters_see_failure_as_none() {
        let guard = Arc::new(SingletonGuard::new());
        assert!(guard.mark_initializing("doomed"));

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait_initialized("doomed").await })
        };
        tokio::task::yield_now().await;
        guard.reset("doomed");

        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn dropped_claim_resets_and_completed_claim_sticks() {
        let guard = SingletonGuard::new();
        let claim = guard.claim("pool").unwrap();
        assert!(guard.claim("pool").is_none());
        drop(claim);
        assert_eq!(guard.state("pool"), InitState::Uninitialized);

        let claim = guard.claim("pool").unwrap();
        assert_eq!(claim.name(), "pool");
        claim.complete(Arc::new(3u8));
        assert_eq!(guard.state("pool"), InitState::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_init_can_be_retried() {
        let guard = SingletonGuard::new();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            guard.get_or_try_init("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<u32, &str>(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(guard.state("slow"), InitState::Uninitialized);

        let got: Arc<u32> = guard
            .get_or_try_init("slow", || async { Ok::<u32, &str>(2) })
            .await
            .unwrap();
        assert_eq!(*got, 2);
    }

    #[tokio::test]
    async fn panicking_init_releases_the_name() {
        use futures::FutureExt;

        let guard = SingletonGuard::new();
        let res = std::panic::AssertUnwindSafe(guard.get_or_try_init("bomb", || async {
            if true {
                panic!("init bug");
            }
            Ok::<u32, &str>(0)
        }))
        .catch_unwind()
        .await;
        assert!(res.is_err());
        assert_eq!(guard.state("bomb"), InitState::Uninitialized);
    }
}
