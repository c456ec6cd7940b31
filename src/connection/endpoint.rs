//! Endpoint rotation sources.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Supplies the endpoint for each (re)connect attempt of a channel.
pub trait EndpointSource: Send + Sync + 'static {
    /// Next endpoint to try, or `None` if nothing is available right now.
    fn next_endpoint(&self, channel: &str) -> Option<String>;
}

/// Cycles through a fixed endpoint list.
///
/// ```
/// use bootvisor::{EndpointSource, RoundRobinEndpoints};
///
/// let eps = RoundRobinEndpoints::new(["wss://a", "wss://b"]);
/// assert_eq!(eps.next_endpoint("prices").as_deref(), Some("wss://a"));
/// assert_eq!(eps.next_endpoint("prices").as_deref(), Some("wss://b"));
/// assert_eq!(eps.next_endpoint("prices").as_deref(), Some("wss://a"));
/// ```
#[derive(Debug, Default)]
pub struct RoundRobinEndpoints {
    endpoints: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinEndpoints {
    /// Creates a rotation over `endpoints`.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of endpoints in the rotation.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True if the rotation is empty.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl EndpointSource for RoundRobinEndpoints {
    fn next_endpoint(&self, _channel: &str) -> Option<String> {
        if self.endpoints.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints.get(i).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rotation_yields_nothing() {
        let eps = RoundRobinEndpoints::new(Vec::<String>::new());
        assert!(eps.is_empty());
        assert!(eps.next_endpoint("any").is_none());
    }
}
