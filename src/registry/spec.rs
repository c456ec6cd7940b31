//! # Service descriptors.
//!
//! [`ServiceSpec`] is immutable once registered: name, factory, declared dependencies
//! and the criticality flag.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use crate::error::BoxError;
use crate::registry::factory::{Dependencies, Factory, FactoryFn};

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name of the required service.
    pub name: String,
    /// If true, an absent non-critical service resolves to `None` instead of an error.
    pub optional: bool,
}

impl Dependency {
    /// Required dependency.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    /// Optional dependency.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// Registration descriptor for one service.
///
/// ## Example
/// ```rust
/// use bootvisor::{Dependencies, ServiceSpec};
///
/// let spec = ServiceSpec::from_fn("api", |deps: Dependencies| async move {
///     let db = deps.require::<String>("db")?;
///     Ok::<_, bootvisor::RegistryError>(format!("api over {db}"))
/// })
/// .with_dependency("db")
/// .with_optional_dependency("cache");
///
/// assert_eq!(spec.name(), "api");
/// assert!(spec.is_critical());
/// assert_eq!(spec.dependencies().len(), 2);
/// ```
#[derive(Clone)]
pub struct ServiceSpec {
    name: Cow<'static, str>,
    factory: Arc<dyn Factory>,
    dependencies: Vec<Dependency>,
    critical: bool,
}

impl ServiceSpec {
    /// Creates a critical service with no dependencies.
    pub fn new(name: impl Into<Cow<'static, str>>, factory: Arc<dyn Factory>) -> Self {
        Self {
            name: name.into(),
            factory,
            dependencies: Vec::new(),
            critical: true,
        }
    }

    /// Creates a critical service from an async closure.
    pub fn from_fn<F, Fut, T, E>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::new(name, Arc::new(FactoryFn::new(f)))
    }

    /// Adds a required dependency.
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::required(name));
        self
    }

    /// Adds an optional dependency.
    pub fn with_optional_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::optional(name));
        self
    }

    /// Sets criticality. Non-critical failures degrade instead of aborting startup.
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Whether a construction failure aborts resolution.
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn factory(&self) -> &Arc<dyn Factory> {
        &self.factory
    }
}
