//! # Service registry: dependency-ordered lazy construction.
//!
//! The [`Registry`] holds immutable [`ServiceSpec`]s and constructs services on first
//! request, dependencies first, through the shared [`SingletonGuard`].
//!
//! ```text
//! get(name)
//!   ├─► cached in guard?                  → instance
//!   ├─► acyclic check over the declared graph (iterative)
//!   └─► resolve(name, path)
//!         ├─ name on own path?          → CircularDependency
//!         ├─ recorded absent?           → Unavailable
//!         ├─ cached in guard?           → instance
//!         ├─ claim taken elsewhere?     → wait for the other caller's outcome
//!         ├─ resolve each dependency (optional + Unavailable → None)
//!         └─ factory(deps)
//!              ├─ Ok  → register + mark_initialized       (ServiceResolved)
//!              └─ Err → critical → ConstructionFailed (ServiceFailed)
//!                       non-critical → recorded absent  (ServiceDegraded)
//!                       then the claim is released (back to Uninitialized)
//! ```
//!
//! ## Rules
//! - Each service is constructed at most once per successful resolution.
//! - `ConstructionFailed` of a critical service always propagates to the top-level caller.
//! - Other failures are contained by the first non-critical service on the path.
//! - Absent services stay absent until [`Registry::retry`].

use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::events::{Bus, Event, EventKind};
use crate::guard::{Instance, SingletonGuard};
use crate::registry::factory::Dependencies;
use crate::registry::spec::ServiceSpec;
use crate::subscribers::panic_message;

/// Dependency-ordered service container.
pub struct Registry {
    specs: RwLock<HashMap<String, Arc<ServiceSpec>>>,
    guard: Arc<SingletonGuard>,
    absent: Mutex<HashMap<String, String>>,
    bus: Option<Bus>,
}

impl Registry {
    /// Creates an empty registry over `guard`.
    pub fn new(guard: Arc<SingletonGuard>) -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
            guard,
            absent: Mutex::new(HashMap::new()),
            bus: None,
        }
    }

    /// Publishes resolution events to `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Shared singleton guard.
    pub fn guard(&self) -> &Arc<SingletonGuard> {
        &self.guard
    }

    /// Registers a descriptor. Dependencies may be registered later.
    pub fn register(&self, spec: ServiceSpec) -> Result<(), RegistryError> {
        let mut specs = self.specs.write();
        if specs.contains_key(spec.name()) {
            return Err(RegistryError::AlreadyRegistered {
                name: spec.name().to_string(),
            });
        }
        debug!(service = spec.name(), deps = spec.dependencies().len(), "service registered");
        specs.insert(spec.name().to_string(), Arc::new(spec));
        Ok(())
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.specs.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Checks the whole declared graph: every dependency registered, no cycles.
    ///
    /// Runs before any factory; `Orchestrator::start` calls it first.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let specs = self.specs.read();
        let mut names: Vec<&String> = specs.keys().collect();
        names.sort_unstable();

        for name in &names {
            if let Some(spec) = specs.get(*name) {
                for dep in spec.dependencies() {
                    if !specs.contains_key(&dep.name) {
                        return Err(RegistryError::DependencyMissing {
                            service: spec.name().to_string(),
                            dependency: dep.name.clone(),
                        });
                    }
                }
            }
        }

        let mut done = HashMap::new();
        for name in names {
            find_cycle(&specs, name, &mut done)?;
        }
        Ok(())
    }

    /// Resolves `name` and everything it depends on.
    ///
    /// Concurrent callers for the same name share one construction. Dropping the returned
    /// future mid-construction releases the name, so a later `get` builds it again.
    pub async fn get(&self, name: &str) -> Result<Instance, RegistryError> {
        if let Some(instance) = self.guard.get(name) {
            return Ok(instance);
        }
        {
            let specs = self.specs.read();
            if !specs.contains_key(name) {
                return Err(RegistryError::NotRegistered {
                    name: name.to_string(),
                });
            }
            find_cycle(&specs, name, &mut HashMap::new())?;
        }
        self.resolve(name.to_string(), &mut Vec::new()).await
    }

    /// Like [`get`](Self::get), but an absent non-critical service yields `None`.
    pub async fn get_optional(&self, name: &str) -> Result<Option<Instance>, RegistryError> {
        match self.get(name).await {
            Ok(instance) => Ok(Some(instance)),
            Err(RegistryError::Unavailable { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Typed [`get`](Self::get).
    pub async fn get_as<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, RegistryError> {
        let instance = self.get(name).await?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Clears the absent record of `name` so the next `get` runs its factory again.
    ///
    /// Returns `false` if `name` was not recorded absent.
    pub fn retry(&self, name: &str) -> bool {
        let cleared = self.absent.lock().remove(name).is_some();
        if cleared {
            info!(service = name, "absent service cleared for retry");
        }
        cleared
    }

    /// Absent non-critical services and their recorded failures, sorted by name.
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .absent
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_unstable();
        all
    }

    fn spec(&self, name: &str) -> Option<Arc<ServiceSpec>> {
        self.specs.read().get(name).cloned()
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }

    /// Resolves `name` with `path` holding the services currently being built above it.
    fn resolve<'a>(
        &'a self,
        name: String,
        path: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Instance, RegistryError>> {
        async move {
            if path.contains(&name) {
                return Err(self.cycle(path, name));
            }

            let spec = self.spec(&name).ok_or_else(|| RegistryError::NotRegistered {
                name: name.clone(),
            })?;

            let claim = loop {
                let recorded = self.absent.lock().get(&name).cloned();
                if let Some(reason) = recorded {
                    return Err(RegistryError::Unavailable { name, reason });
                }
                if let Some(instance) = self.guard.get(&name) {
                    return Ok(instance);
                }
                if let Some(claim) = self.guard.claim(&name) {
                    break claim;
                }
                debug!(service = %name, "waiting for concurrent construction");
                if let Some(instance) = self.guard.wait_initialized(&name).await {
                    return Ok(instance);
                }
                // The other attempt failed or was dropped and released its claim; a
                // non-critical failure also recorded it absent. Re-check before claiming.
            };

            path.push(name.clone());
            let deps = self.resolve_dependencies(&spec, path).await;
            path.pop();

            // Failure paths record the outcome before `claim` drops and wakes waiters.
            let deps = match deps {
                Ok(deps) => deps,
                Err(e) => return Err(self.contain(&spec, e)),
            };

            self.publish(Event::new(EventKind::ServiceResolving).with_subject(name.as_str()));
            let built = std::panic::AssertUnwindSafe(spec.factory().build(deps))
                .catch_unwind()
                .await;

            match built {
                Ok(Ok(instance)) => {
                    claim.complete(instance.clone());
                    info!(service = %name, "service resolved");
                    self.publish(Event::new(EventKind::ServiceResolved).with_subject(name.as_str()));
                    Ok(instance)
                }
                Ok(Err(e)) => Err(self.construction_failed(&spec, e.to_string())),
                Err(panic) => {
                    let msg = format!("factory panicked: {}", panic_message(&*panic));
                    Err(self.construction_failed(&spec, msg))
                }
            }
        }
        .boxed()
    }

    async fn resolve_dependencies(
        &self,
        spec: &ServiceSpec,
        path: &mut Vec<String>,
    ) -> Result<Dependencies, RegistryError> {
        let mut deps = Dependencies::new(spec.name().to_string());
        for dep in spec.dependencies() {
            if !self.contains(&dep.name) {
                return Err(RegistryError::DependencyMissing {
                    service: spec.name().to_string(),
                    dependency: dep.name.clone(),
                });
            }
            match self.resolve(dep.name.clone(), path).await {
                Ok(instance) => deps.insert(&dep.name, Some(instance)),
                Err(RegistryError::Unavailable { .. }) if dep.optional => {
                    debug!(service = spec.name(), dependency = %dep.name, "optional dependency absent");
                    deps.insert(&dep.name, None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(deps)
    }

    /// Applies `spec`'s criticality to a failure raised while resolving its dependencies.
    fn contain(&self, spec: &ServiceSpec, err: RegistryError) -> RegistryError {
        if spec.is_critical() || matches!(err, RegistryError::ConstructionFailed { .. }) {
            return err;
        }
        self.degrade(spec.name(), err.to_string())
    }

    fn construction_failed(&self, spec: &ServiceSpec, reason: String) -> RegistryError {
        if !spec.is_critical() {
            return self.degrade(spec.name(), reason);
        }
        error!(service = spec.name(), reason = %reason, "critical service failed");
        self.publish(
            Event::new(EventKind::ServiceFailed)
                .with_subject(spec.name())
                .with_reason(reason.as_str()),
        );
        RegistryError::ConstructionFailed {
            name: spec.name().to_string(),
            error: reason,
        }
    }

    fn degrade(&self, name: &str, reason: String) -> RegistryError {
        warn!(service = name, reason = %reason, "service degraded, recorded absent");
        self.absent.lock().insert(name.to_string(), reason.clone());
        self.publish(
            Event::new(EventKind::ServiceDegraded)
                .with_subject(name)
                .with_reason(reason.as_str()),
        );
        RegistryError::Unavailable {
            name: name.to_string(),
            reason,
        }
    }

    fn cycle(&self, path: &[String], name: String) -> RegistryError {
        let start = path.iter().position(|p| *p == name).unwrap_or(0);
        let mut chain = path[start..].to_vec();
        chain.push(name.clone());
        let err = RegistryError::CircularDependency { chain };
        error!(service = %name, %err, "circular dependency");
        self.publish(
            Event::new(EventKind::CircularDependency)
                .with_subject(name)
                .with_reason(err.to_string()),
        );
        err
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Iterative depth-first search from `root`; returns the first back edge as a cycle.
fn find_cycle(
    specs: &HashMap<String, Arc<ServiceSpec>>,
    root: &str,
    marks: &mut HashMap<String, Mark>,
) -> Result<(), RegistryError> {
    if marks.contains_key(root) {
        return Ok(());
    }
    let mut stack: Vec<(String, usize)> = vec![(root.to_string(), 0)];
    marks.insert(root.to_string(), Mark::Visiting);

    while let Some((node, idx)) = stack.last_mut() {
        let next = specs
            .get(node.as_str())
            .and_then(|s| s.dependencies().get(*idx))
            .map(|d| d.name.clone());
        *idx += 1;

        match next {
            None => {
                marks.insert(node.clone(), Mark::Done);
                stack.pop();
            }
            Some(dep) => match marks.get(&dep) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut chain: Vec<String> =
                        stack[start..].iter().map(|(n, _)| n.clone()).collect();
                    chain.push(dep);
                    return Err(RegistryError::CircularDependency { chain });
                }
                None => {
                    marks.insert(dep.clone(), Mark::Visiting);
                    stack.push((dep, 0));
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::registry::factory::Dependencies;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn leaf(name: &'static str, calls: Arc<AtomicU32>) -> ServiceSpec {
        ServiceSpec::from_fn(name, move |_deps: Dependencies| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(name.to_string())
            }
        })
    }

    fn failing(name: &'static str) -> ServiceSpec {
        ServiceSpec::from_fn(name, |_deps: Dependencies| async {
            Err::<(), BoxError>("model not found".into())
        })
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(SingletonGuard::new()))
    }

    #[tokio::test]
    async fn dependencies_are_built_first_and_cached() {
        let reg = registry();
        let calls = Arc::new(AtomicU32::new(0));
        reg.register(
            ServiceSpec::from_fn("b", |deps: Dependencies| async move {
                let a = deps.require::<String>("a")?;
                Ok::<_, BoxError>(format!("b({a})"))
            })
            .with_dependency("a"),
        )
        .unwrap();
        reg.register(leaf("a", calls.clone())).unwrap();

        let b = reg.get_as::<String>("b").await.unwrap();
        assert_eq!(*b, "b(a)");
        let _ = reg.get("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let reg = registry();
        reg.register(leaf("a", Arc::default())).unwrap();
        assert!(matches!(
            reg.register(leaf("a", Arc::default())),
            Err(RegistryError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn missing_dependency_is_reported() {
        let reg = registry();
        reg.register(leaf("b", Arc::default()).with_dependency("ghost"))
            .unwrap();

        match reg.validate() {
            Err(RegistryError::DependencyMissing { service, dependency }) => {
                assert_eq!(service, "b");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            reg.get("b").await,
            Err(RegistryError::DependencyMissing { .. })
        ));
        assert!(matches!(
            reg.get("nobody").await,
            Err(RegistryError::NotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn cycle_is_detected_before_any_factory_runs() {
        let reg = registry();
        let calls = Arc::new(AtomicU32::new(0));
        reg.register(leaf("a", calls.clone()).with_dependency("b")).unwrap();
        reg.register(leaf("b", calls.clone()).with_dependency("a")).unwrap();
        reg.register(leaf("c", calls.clone())).unwrap();

        match reg.get("a").await {
            Err(RegistryError::CircularDependency { chain }) => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            reg.validate(),
            Err(RegistryError::CircularDependency { .. })
        ));
        // siblings are unaffected
        assert!(reg.get("c").await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn long_chain_cycle_check_is_iterative() {
        let mut specs = HashMap::new();
        let n = 10_000;
        for i in 0..n {
            let spec = leaf("x", Arc::default()).with_dependency(format!("s{}", (i + 1) % n));
            specs.insert(format!("s{i}"), Arc::new(spec));
        }
        let err = find_cycle(&specs, "s0", &mut HashMap::new()).unwrap_err();
        match err {
            RegistryError::CircularDependency { chain } => assert_eq!(chain.len(), n + 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn optional_non_critical_failure_degrades() {
        let reg = registry();
        reg.register(failing("ocr").with_critical(false)).unwrap();
        reg.register(
            ServiceSpec::from_fn("api", |deps: Dependencies| async move {
                Ok::<_, BoxError>(deps.is_present("ocr"))
            })
            .with_optional_dependency("ocr"),
        )
        .unwrap();

        let has_ocr = reg.get_as::<bool>("api").await.unwrap();
        assert!(!*has_ocr);
        assert_eq!(reg.failures(), vec![("ocr".to_string(), "model not found".to_string())]);
        assert!(reg.get_optional("ocr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn required_non_critical_failure_fails_critical_dependent() {
        let reg = registry();
        reg.register(failing("ocr").with_critical(false)).unwrap();
        reg.register(leaf("api", Arc::default()).with_dependency("ocr"))
            .unwrap();

        assert!(matches!(
            reg.get("api").await,
            Err(RegistryError::Unavailable { name, .. }) if name == "ocr"
        ));
    }

    #[tokio::test]
    async fn critical_failure_propagates_through_non_critical_parent() {
        let reg = registry();
        reg.register(failing("db")).unwrap();
        reg.register(
            leaf("report", Arc::default())
                .with_dependency("db")
                .with_critical(false),
        )
        .unwrap();

        assert!(matches!(
            reg.get("report").await,
            Err(RegistryError::ConstructionFailed { name, .. }) if name == "db"
        ));
        assert!(reg.failures().is_empty());
    }

    #[tokio::test]
    async fn retry_reruns_factory() {
        let reg = registry();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        reg.register(
            ServiceSpec::from_fn("flaky", move |_deps: Dependencies| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err::<u32, BoxError>("first attempt fails".into())
                    } else {
                        Ok(n)
                    }
                }
            })
            .with_critical(false),
        )
        .unwrap();

        assert!(reg.get_optional("flaky").await.unwrap().is_none());
        assert!(reg.get_optional("flaky").await.unwrap().is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        assert!(reg.retry("flaky"));
        assert!(!reg.retry("flaky"));
        assert_eq!(*reg.get_as::<u32>("flaky").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn panicking_factory_is_a_construction_failure() {
        let reg = registry();
        reg.register(ServiceSpec::from_fn("bomb", |_deps: Dependencies| async {
            if true {
                panic!("kaboom");
            }
            Ok::<u8, BoxError>(0)
        }))
        .unwrap();

        match reg.get("bomb").await {
            Err(RegistryError::ConstructionFailed { error, .. }) => {
                assert!(error.contains("kaboom"))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(reg.guard().state("bomb"), crate::guard::InitState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_construction() {
        let reg = Arc::new(registry());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        reg.register(ServiceSpec::from_fn("slow", move |_deps: Dependencies| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, BoxError>(String::from("ready"))
            }
        }))
        .unwrap();

        let (a, b) = tokio::join!(reg.get_as::<String>("slow"), reg.get_as::<String>("slow"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_get_releases_the_name_for_a_retry() {
        let reg = registry();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        reg.register(leaf("config", Arc::default())).unwrap();
        reg.register(
            ServiceSpec::from_fn("slow", move |_deps: Dependencies| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, BoxError>(String::from("ready"))
                }
            })
            .with_dependency("config"),
        )
        .unwrap();

        let abandoned = tokio::time::timeout(Duration::from_secs(1), reg.get("slow")).await;
        assert!(abandoned.is_err());
        assert_eq!(reg.guard.state("slow"), crate::guard::InitState::Uninitialized);
        assert_eq!(reg.guard.state("config"), crate::guard::InitState::Initialized);

        let slow = tokio::time::timeout(Duration::from_secs(10), reg.get_as::<String>("slow"))
            .await
            .expect("retry must not wait on the abandoned attempt")
            .unwrap();
        assert_eq!(*slow, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn events_are_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let reg = registry().with_bus(bus);
        reg.register(failing("ocr").with_critical(false)).unwrap();
        reg.register(leaf("db", Arc::default())).unwrap();

        reg.get("db").await.unwrap();
        let _ = reg.get_optional("ocr").await;

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ServiceResolving,
                EventKind::ServiceResolved,
                EventKind::ServiceResolving,
                EventKind::ServiceDegraded,
            ]
        );
    }
}
