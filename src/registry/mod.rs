//! # Service registry.
//!
//! - [`ServiceSpec`] / [`Dependency`]: immutable service descriptors.
//! - [`Factory`] / [`FactoryFn`]: how an instance is built.
//! - [`Dependencies`]: resolved dependencies handed to a factory.
//! - [`Registry`]: ordered, lazy, cycle-checked construction.

mod factory;
#[allow(clippy::module_inception)]
mod registry;
mod spec;

pub use factory::{Dependencies, Factory, FactoryFn};
pub use registry::Registry;
pub use spec::{Dependency, ServiceSpec};
