//! # Health monitoring.
//!
//! - [`HealthCheck`] / [`CheckFn`]: named probes.
//! - [`HealthMonitor`]: runs probes, tracks failure streaks, keeps a bounded history.
//! - [`HealthReport`] / [`CheckResult`]: serializable cycle results.

mod check;
mod monitor;

pub use check::{CheckFn, HealthCheck};
pub use monitor::{CheckResult, HealthMonitor, HealthReport};
