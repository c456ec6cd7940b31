//! Runtime core: startup, readiness and shutdown.
//!
//! The public API from this module is [`Orchestrator`] and its [`OrchestratorBuilder`].
//!
//! Internal modules:
//! - [`orchestrator`]: resolves the service graph, raises readiness, drives shutdown;
//! - [`builder`]: wires bus, subscribers and components together;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod orchestrator;
mod shutdown;

pub use builder::OrchestratorBuilder;
pub use orchestrator::Orchestrator;
pub use shutdown::wait_for_shutdown_signal;
