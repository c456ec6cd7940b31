//! # Event subscribers.
//!
//! A [`Subscribe`] implementation receives every [`Event`](crate::Event) published on the
//! orchestrator's bus through its own bounded queue, so a slow subscriber never blocks
//! a publisher or another subscriber.
//!
//! ```text
//! Bus ──► subscriber_listener ──► SubscriberSet::emit(&Event)
//!                                     ├──► [queue] ─► worker ─► LogWriter::on_event
//!                                     ├──► [queue] ─► worker ─► dashboard feed
//!                                     └──► [queue] ─► worker ─► alerting
//! ```
//!
//! ## Implementing a subscriber
//! ```rust
//! use async_trait::async_trait;
//! use bootvisor::{Event, EventKind, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::HealthCheckFailed {
//!             // page the on-call operator
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "pager"
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
