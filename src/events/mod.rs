//! Runtime events: types and broadcast bus.
//!
//! Every component can publish lifecycle [`Event`]s to a shared [`Bus`]; the
//! orchestrator forwards them to user subscribers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Registry`, `CircuitBreaker`, `ConnectionManager`,
//!   `Coordinator`, `HealthMonitor`, `Orchestrator`, `SubscriberSet` workers.
//! - **Consumers**: `Orchestrator::subscriber_listener()` (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
