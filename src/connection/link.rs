//! Transport seam: a [`Connector`] turns an endpoint into a [`Link`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// One established transport.
///
/// The connection manager writes to `outbound` and reads `inbound`; `inbound`
/// returning `None` means the transport closed.
#[derive(Debug)]
pub struct Link {
    /// Frames to the remote side.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Frames from the remote side.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

impl Link {
    /// Bundles both halves.
    pub fn new(outbound: mpsc::Sender<Vec<u8>>, inbound: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { outbound, inbound }
    }
}

/// Performs the handshake with one endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Link, ConnectionError>;
}
