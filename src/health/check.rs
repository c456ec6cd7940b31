//! Health probe contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;

/// One named probe. `Ok` means healthy.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Runs the probe once.
    async fn check(&self) -> Result<(), BoxError>;
}

/// Closure-backed probe.
///
/// ```
/// use bootvisor::CheckFn;
///
/// let disk = CheckFn::arc(|| async { Ok::<(), std::io::Error>(()) });
/// # let _ = disk;
/// ```
pub struct CheckFn<F> {
    f: F,
}

impl<F> CheckFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` into a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut, E> HealthCheck for CheckFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn check(&self) -> Result<(), BoxError> {
        (self.f)().await.map_err(Into::into)
    }
}
