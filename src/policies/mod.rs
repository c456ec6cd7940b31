//! Delay policies shared by the retrying components.
//!
//! ## Contents
//! - [`BackoffPolicy`] how a retry delay grows with the attempt number (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied on top, to spread simultaneous retries
//!
//! ## Wiring
//! ```text
//! ReconnectConfig { base, cap, max_attempts, jitter }
//!      └─► ReconnectConfig::backoff() ─► BackoffPolicy { first: base, max: cap, factor: 2.0 }
//!           └─► connection::ConnectionManager schedules attempt N after backoff.next(N)
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=30s, jitter=None.
//! - `JitterPolicy::None` keeps delays exact; `Equal` is a good choice when many
//!   channels share one upstream.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
