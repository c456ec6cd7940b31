//! # Orchestrator: startup ordering, readiness and graceful shutdown.
//!
//! The [`Orchestrator`] owns the event bus, the [`SubscriberSet`] and one instance of each
//! lifecycle component. It is built by [`OrchestratorBuilder`](crate::OrchestratorBuilder).
//!
//! ## High-level architecture
//! ```text
//! start(roots):
//!   Registry::validate()            missing deps / cycles, before any factory runs
//!   Registry::get(root) for each    dependencies first, each service built once
//!       critical failure ──────────► Err(RuntimeError::Startup)
//!   Coordinator::set_system_ready() pending background tasks released (SystemReady)
//!   HealthMonitor::start_monitoring(config.health.interval)   unless interval = 0
//!
//! Event flow:
//!   Registry / Coordinator / HealthMonitor / breakers / connections
//!        ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet::emit(&Event)
//!
//! shutdown():
//!   Bus.publish(ShutdownRequested)
//!   HealthMonitor::stop_monitoring()
//!   Coordinator::stop_all() within config.grace:
//!       ├─ Ok       → Bus.publish(AllStoppedWithin)
//!       └─ timeout  → Bus.publish(GraceExceeded) → Err(RuntimeError::GraceExceeded)
//!
//! run(roots) = start(roots) → wait_for_shutdown_signal() → shutdown()
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use bootvisor::{
//!     BoxError, Config, Dependencies, OrchestratorBuilder, ServiceSpec, TaskError, TaskFn,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orch = OrchestratorBuilder::new(Config::default()).build();
//!
//!     orch.registry().register(ServiceSpec::from_fn("db", |_deps: Dependencies| async {
//!         Ok::<_, BoxError>(String::from("pool"))
//!     }))?;
//!     orch.coordinator().register(
//!         TaskFn::arc("vacuum", |_ctx: CancellationToken| async { Ok::<(), TaskError>(()) }),
//!         Duration::from_secs(3600),
//!         false,
//!     )?;
//!
//!     orch.start(&["db"]).await?;
//!     assert!(orch.coordinator().is_ready());
//!     orch.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::time;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::connection::{ConnectionManager, Connector, EndpointSource};
use crate::coordinator::Coordinator;
use crate::core::shutdown;
use crate::error::{RegistryError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::guard::SingletonGuard;
use crate::health::HealthMonitor;
use crate::registry::Registry;
use crate::subscribers::SubscriberSet;

/// Owns the lifecycle components and drives startup and shutdown.
pub struct Orchestrator {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Registry,
    coordinator: Coordinator,
    health: HealthMonitor,
}

impl Orchestrator {
    pub(crate) fn new_internal(cfg: Config, bus: Bus, subs: Arc<SubscriberSet>) -> Self {
        let guard = Arc::new(SingletonGuard::new());
        Self {
            registry: Registry::new(guard).with_bus(bus.clone()),
            coordinator: Coordinator::new(cfg.tasks).with_bus(bus.clone()),
            health: HealthMonitor::new(cfg.health).with_bus(bus.clone()),
            cfg,
            bus,
            subs,
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus shared by every component.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Service registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Singleton guard backing the registry.
    pub fn guard(&self) -> &Arc<SingletonGuard> {
        self.registry.guard()
    }

    /// Background task coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Health monitor.
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Circuit breaker configured from `config.breaker`, publishing to the bus.
    pub fn breaker(&self, name: impl Into<String>) -> CircuitBreaker {
        CircuitBreaker::new(name, self.cfg.breaker).with_bus(self.bus.clone())
    }

    /// Reconnecting channel configured from `config.reconnect`, publishing to the bus.
    pub fn connection(
        &self,
        channel: impl Into<String>,
        connector: Arc<dyn Connector>,
        endpoints: Arc<dyn EndpointSource>,
    ) -> ConnectionManager {
        ConnectionManager::new(channel, connector, endpoints, self.cfg.reconnect)
            .with_bus(self.bus.clone())
    }

    /// Resolves `roots`, then releases background tasks and starts health monitoring.
    ///
    /// A critical construction failure aborts startup; background tasks stay pending.
    /// A non-critical root that fails is left absent and startup continues.
    pub async fn start(&self, roots: &[&str]) -> Result<(), RuntimeError> {
        self.registry.validate()?;

        for root in roots {
            match self.registry.get(root).await {
                Ok(_) => {}
                Err(RegistryError::Unavailable { name, reason }) => {
                    warn!(root = %root, service = %name, reason = %reason, "root resolved degraded");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(roots = roots.len(), "service graph resolved");

        self.coordinator.set_system_ready();

        if let Some(interval) = self.cfg.health.interval() {
            self.health.start_monitoring(interval);
        }
        Ok(())
    }

    /// Stops health monitoring and all background tasks within `config.grace`.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        info!("shutdown requested");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.health.stop_monitoring().await;

        let grace = self.cfg.grace;
        match time::timeout(grace, self.coordinator.stop_all()).await {
            Ok(()) => {
                info!("all tasks stopped within grace");
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                let stuck = self.coordinator.running();
                warn!(grace_ms = grace.as_millis() as u64, ?stuck, "shutdown grace exceeded");
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Starts, waits for a termination signal, then shuts down gracefully.
    pub async fn run(&self, roots: &[&str]) -> Result<(), RuntimeError> {
        self.start(roots).await?;
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
