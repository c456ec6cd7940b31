//! # Reconnecting streaming connections.
//!
//! - [`ConnectionManager`]: one channel, reconnecting with capped exponential backoff.
//! - [`Connector`] / [`Link`]: the transport seam supplied by the caller.
//! - [`EndpointSource`] / [`RoundRobinEndpoints`]: where each attempt connects to.

mod endpoint;
mod link;
mod manager;

pub use endpoint::{EndpointSource, RoundRobinEndpoints};
pub use link::{Connector, Link};
pub use manager::{ChannelEvent, ConnectionManager, ConnectionState, ConnectionStatus};
