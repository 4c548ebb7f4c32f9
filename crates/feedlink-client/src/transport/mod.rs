//! Connection establishment.
//!
//! A [`Connector`] turns an [`Identity`] into a [`Link`]: a pair of text
//! frame channels backed by one physical duplex connection. The transport
//! session owns the link and never looks past these channels, so the
//! WebSocket connector and the in-memory connector are interchangeable.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use feedlink_core::{Identity, Result};

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use websocket::WebSocketConnector;

/// One established connection, as seen by the session.
///
/// The link is dead once `inbound` yields `None`. Dropping both halves
/// closes the underlying connection.
#[derive(Debug)]
pub struct Link {
    /// Text frames to send, buffered up to the connector's capacity.
    pub outbound: mpsc::Sender<String>,
    /// Text frames received, in wire order.
    pub inbound: mpsc::Receiver<String>,
}

/// Opens authenticated connections for a transport session.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection for `identity`.
    ///
    /// `outbound_capacity` bounds the frames that may queue for the writer.
    async fn connect(&self, identity: &Identity, outbound_capacity: usize) -> Result<Link>;
}
