//! # Service factories and the resolved-dependency view handed to them.
//!
//! A [`Factory`] builds one service instance from its already-resolved [`Dependencies`].
//! [`FactoryFn`] adapts an async closure returning any `T: Send + Sync + 'static`.

use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BoxError, RegistryError};
use crate::guard::Instance;

/// Builds one service instance.
///
/// Called at most once per successful construction; the registry caches the result.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Constructs the instance from resolved dependencies.
    async fn build(&self, deps: Dependencies) -> Result<Instance, BoxError>;
}

/// Function-backed factory.
pub struct FactoryFn<F, T> {
    f: F,
    _out: PhantomData<fn() -> T>,
}

impl<F, T> FactoryFn<F, T> {
    /// Wraps an async closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _out: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, T, E> Factory for FactoryFn<F, T>
where
    F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    async fn build(&self, deps: Dependencies) -> Result<Instance, BoxError> {
        let value = (self.f)(deps).await.map_err(Into::into)?;
        Ok(Arc::new(value) as Instance)
    }
}

/// Resolved dependencies of the service being constructed.
///
/// Optional dependencies whose service is absent are present as keys with no instance.
pub struct Dependencies {
    service: Cow<'static, str>,
    resolved: HashMap<String, Option<Instance>>,
}

impl Dependencies {
    pub(crate) fn new(service: impl Into<Cow<'static, str>>) -> Self {
        Self {
            service: service.into(),
            resolved: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: &str, instance: Option<Instance>) {
        self.resolved.insert(name.to_string(), instance);
    }

    /// Name of the service being constructed.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// True if `name` was declared and resolved to an instance.
    pub fn is_present(&self, name: &str) -> bool {
        matches!(self.resolved.get(name), Some(Some(_)))
    }

    /// Type-erased instance of `name`.
    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.resolved.get(name).cloned().flatten()
    }

    /// Typed instance of `name`; `None` if absent or of another type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.instance(name).and_then(|i| i.downcast::<T>().ok())
    }

    /// Typed instance of `name`, or an error suitable for `?` inside a factory.
    pub fn require<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        let instance = self
            .instance(name)
            .ok_or_else(|| RegistryError::DependencyMissing {
                service: self.service.to_string(),
                dependency: name.to_string(),
            })?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }
}
