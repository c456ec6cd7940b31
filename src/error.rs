//! Error types used by the bootvisor runtime and its components.
//!
//! Each component owns one error enum:
//!
//! - [`RegistryError`]: service graph resolution (missing deps, cycles, factory failures).
//! - [`GuardError`]: the singleton guard's `get_or_try_init` protocol.
//! - [`CircuitError`]: an operation rejected by, or failed through, a circuit breaker.
//! - [`ConnectionError`]: streaming channel state and transport failures.
//! - [`TaskError`]: outcome of one background task run.
//! - [`CoordinatorError`]: task registration and control.
//! - [`RuntimeError`]: orchestrator startup/shutdown.
//! - [`ConfigError`]: configuration file loading.
//!
//! All of them provide `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by service factories and health checks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced while resolving the service graph.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// A declared dependency has no registered factory.
    #[error("service '{service}' depends on '{dependency}', which is not registered")]
    DependencyMissing {
        /// Service declaring the dependency.
        service: String,
        /// Name that could not be found.
        dependency: String,
    },

    /// Resolution re-entered a service that is already being constructed on the same path.
    #[error("circular dependency: {}", chain.join(" -> "))]
    CircularDependency {
        /// Resolution path, ending with the re-entered name.
        chain: Vec<String>,
    },

    /// A service with this name was already registered.
    #[error("service '{name}' is already registered")]
    AlreadyRegistered {
        /// Duplicate name.
        name: String,
    },

    /// No service with this name is registered.
    #[error("service '{name}' is not registered")]
    NotRegistered {
        /// Requested name.
        name: String,
    },

    /// A factory returned an error.
    #[error("service '{name}' failed to construct: {error}")]
    ConstructionFailed {
        /// Service whose factory failed.
        name: String,
        /// Factory error message.
        error: String,
    },

    /// A non-critical service failed earlier and is recorded as absent.
    #[error("service '{name}' is unavailable: {reason}")]
    Unavailable {
        /// Absent service.
        name: String,
        /// Recorded failure.
        reason: String,
    },

    /// The constructed instance is not of the requested type.
    #[error("service '{name}' is not a {expected}")]
    TypeMismatch {
        /// Service name.
        name: String,
        /// Requested type name.
        expected: &'static str,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use bootvisor::RegistryError;
    ///
    /// let err = RegistryError::CircularDependency { chain: vec!["a".into(), "b".into(), "a".into()] };
    /// assert_eq!(err.as_label(), "registry_circular_dependency");
    /// assert_eq!(err.to_string(), "circular dependency: a -> b -> a");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::DependencyMissing { .. } => "registry_dependency_missing",
            RegistryError::CircularDependency { .. } => "registry_circular_dependency",
            RegistryError::AlreadyRegistered { .. } => "registry_already_registered",
            RegistryError::NotRegistered { .. } => "registry_not_registered",
            RegistryError::ConstructionFailed { .. } => "registry_construction_failed",
            RegistryError::Unavailable { .. } => "registry_unavailable",
            RegistryError::TypeMismatch { .. } => "registry_type_mismatch",
        }
    }
}

/// # Errors produced by [`SingletonGuard::get_or_try_init`](crate::SingletonGuard::get_or_try_init).
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// The name is already being initialized: the caller re-entered its own construction.
    #[error("re-entrant initialization of '{name}'")]
    Reentrant {
        /// Name whose initialization was re-entered.
        name: String,
    },

    /// The cached instance is not of the requested type.
    #[error("'{name}' is not a {expected}")]
    TypeMismatch {
        /// Component name.
        name: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// The initializer itself failed; the record was reset so a later retry is possible.
    #[error(transparent)]
    Init(E),
}

/// # Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
///
/// `Open` means "try again later", never a domain error.
#[derive(Error, Debug)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("circuit '{name}' is open")]
    Open {
        /// Breaker name.
        name: String,
    },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// True if the call was rejected without running the operation.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// Returns the operation's error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// # Errors produced by a reconnecting channel.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// `send` was called while the channel is not connected.
    #[error("channel '{channel}' is not connected")]
    NotConnected {
        /// Channel name.
        channel: String,
    },

    /// The endpoint source had nothing to offer.
    #[error("no endpoint available for channel '{channel}'")]
    NoEndpoint {
        /// Channel name.
        channel: String,
    },

    /// The connector failed to establish a transport.
    #[error("handshake with {endpoint} failed: {error}")]
    Handshake {
        /// Endpoint that was tried.
        endpoint: String,
        /// Connector error message.
        error: String,
    },

    /// The handshake did not complete in time.
    #[error("handshake with {endpoint} timed out after {timeout:?}")]
    HandshakeTimeout {
        /// Endpoint that was tried.
        endpoint: String,
        /// Configured handshake timeout.
        timeout: Duration,
    },

    /// The transport refused the outbound message.
    #[error("send on channel '{channel}' failed: transport closed")]
    SendFailed {
        /// Channel name.
        channel: String,
    },

    /// Reconnect attempts are exhausted; the channel is down for good.
    #[error("channel '{channel}' exhausted {attempts} reconnect attempts")]
    Exhausted {
        /// Channel name.
        channel: String,
        /// Attempts made.
        attempts: u32,
    },
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::NotConnected { .. } => "connection_not_connected",
            ConnectionError::NoEndpoint { .. } => "connection_no_endpoint",
            ConnectionError::Handshake { .. } => "connection_handshake",
            ConnectionError::HandshakeTimeout { .. } => "connection_handshake_timeout",
            ConnectionError::SendFailed { .. } => "connection_send_failed",
            ConnectionError::Exhausted { .. } => "connection_exhausted",
        }
    }
}

/// # Errors produced by one run of a background task.
///
/// Every variant except `Canceled` counts towards the task's consecutive error streak.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Run exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Run failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Run observed cancellation and exited early.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use bootvisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// True for outcomes that count as a failed run.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, TaskError::Canceled)
    }
}

/// # Errors produced by the background task coordinator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A task with this name is already registered.
    #[error("task '{name}' is already registered")]
    AlreadyRegistered {
        /// Duplicate name.
        name: String,
    },

    /// No task with this name.
    #[error("task '{name}' not found")]
    NotFound {
        /// Requested name.
        name: String,
    },

    /// Interval must be non-zero.
    #[error("task '{name}' has a zero interval")]
    ZeroInterval {
        /// Offending task.
        name: String,
    },

    /// `stop_all` already ran; the coordinator accepts no more tasks.
    #[error("task '{name}' rejected: coordinator is stopped")]
    Stopped {
        /// Rejected task.
        name: String,
    },
}

impl CoordinatorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoordinatorError::AlreadyRegistered { .. } => "coordinator_already_registered",
            CoordinatorError::NotFound { .. } => "coordinator_not_found",
            CoordinatorError::ZeroInterval { .. } => "coordinator_zero_interval",
            CoordinatorError::Stopped { .. } => "coordinator_stopped",
        }
    }
}

/// # Errors produced by the orchestrator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A critical service failed; startup aborted.
    #[error("startup aborted: {0}")]
    Startup(#[from] RegistryError),

    /// Shutdown grace period was exceeded; some tasks remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of tasks that did not stop in time.
        stuck: Vec<String>,
    },

    /// Installing the OS signal handlers failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use bootvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Startup(_) => "runtime_startup_failed",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`Config`](crate::Config).
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
