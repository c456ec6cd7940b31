//! # bootvisor
//!
//! **Bootvisor** brings a set of interdependent in-process services up in the right order,
//! keeps them resilient while they run, and takes them down gracefully.
//!
//! It is a building block for long-running processes whose components depend on each other
//! (a database pool, an RPC client, a message stream, a few periodic maintenance jobs).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ServiceSpec  │   │ ServiceSpec  │   │   TaskSpec   │
//!     │ (db, crit.)  │   │ (cache, opt.)│   │ (background) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                     │
//! │  - Registry      (ordered, lazy, cycle-checked construction)      │
//! │  - SingletonGuard(one instance per name, reentrancy detection)    │
//! │  - Coordinator   (periodic tasks gated on system readiness)       │
//! │  - HealthMonitor (named probes, streaks, alerts, history)         │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        │                  │                  │               │
//!        │   CircuitBreaker │ ConnectionManager│               │
//!        │   (per remote)   │ (per stream)     │               │
//!        ▼                  ▼                  ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                 (capacity: Config::bus_capacity)                  │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                            (per-sub queues)
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                     worker1    worker2    workerN
//! ```
//!
//! ### Lifecycle
//! ```text
//! register services, tasks, checks
//!   └─► Orchestrator::start(roots)
//!         ├─► Registry::validate()          (missing deps, cycles)
//!         ├─► Registry::get(root)           (dependencies first, each built once)
//!         │     ├─ critical failure     ─► Err(RuntimeError::Startup)
//!         │     └─ non-critical failure ─► ServiceDegraded, dependents see None
//!         ├─► Coordinator::set_system_ready()  (pending tasks start)
//!         └─► HealthMonitor::start_monitoring()
//!
//!   signal (SIGINT / SIGTERM / SIGQUIT / Ctrl-C)
//!   └─► Orchestrator::shutdown()
//!         ├─► stop health monitoring
//!         └─► stop all tasks within grace ─► AllStoppedWithin | GraceExceeded
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                     |
//! |-------------------|---------------------------------------------------------------|----------------------------------------|
//! | **Services**      | Declarative dependencies, optional deps, critical flag.       | [`ServiceSpec`], [`Registry`]          |
//! | **Singletons**    | One instance per name, concurrent callers share construction. | [`SingletonGuard`], [`InitState`]      |
//! | **Remote calls**  | Fail fast while a dependency is down.                         | [`CircuitBreaker`], [`CircuitState`]   |
//! | **Streams**       | Capped exponential reconnect across endpoints.                | [`ConnectionManager`], [`Connector`]   |
//! | **Background**    | Periodic tasks deferred until the system is ready.            | [`Coordinator`], [`TaskFn`]            |
//! | **Health**        | Named probes, failure streaks, alert/recovery, history.       | [`HealthMonitor`], [`HealthReport`]    |
//! | **Observability** | Every transition is an [`Event`] fanned out to subscribers.   | [`Subscribe`], [`Bus`]                 |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ```rust
//! use std::sync::Arc;
//! use bootvisor::{
//!     BoxError, Config, Dependencies, OrchestratorBuilder, ServiceSpec, Subscribe,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!     let orch = OrchestratorBuilder::new(Config::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     orch.registry().register(ServiceSpec::from_fn("config", |_deps: Dependencies| async {
//!         Ok::<_, BoxError>(String::from("prod"))
//!     }))?;
//!     orch.registry().register(
//!         ServiceSpec::from_fn("api", |deps: Dependencies| async move {
//!             let env = deps.require::<String>("config")?;
//!             Ok::<_, BoxError>(format!("api@{env}"))
//!         })
//!         .with_dependency("config"),
//!     )?;
//!
//!     orch.start(&["api"]).await?;
//!     let api = orch.registry().get_as::<String>("api").await?;
//!     assert_eq!(api.as_str(), "api@prod");
//!
//!     orch.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod breaker;
mod config;
mod connection;
mod coordinator;
mod core;
mod error;
mod events;
mod guard;
mod health;
mod policies;
mod registry;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use config::{BreakerConfig, Config, HealthConfig, ReconnectConfig, TaskDefaults};
pub use connection::{
    ChannelEvent, ConnectionManager, ConnectionState, ConnectionStatus, Connector, EndpointSource,
    Link, RoundRobinEndpoints,
};
pub use coordinator::{Coordinator, CoordinatorStatus, TaskState, TaskStatus};
pub use core::{Orchestrator, OrchestratorBuilder, wait_for_shutdown_signal};
pub use error::{
    BoxError, CircuitError, ConfigError, ConnectionError, CoordinatorError, GuardError,
    RegistryError, RuntimeError, TaskError,
};
pub use events::{Bus, Event, EventKind};
pub use guard::{Claim, InitState, Instance, SingletonGuard};
pub use health::{CheckFn, CheckResult, HealthCheck, HealthMonitor, HealthReport};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use registry::{Dependencies, Dependency, Factory, FactoryFn, Registry, ServiceSpec};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Task, TaskFn, TaskRef, TaskSpec};

// Optional: expose a simple built-in logger subscriber (demo/reference).
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
