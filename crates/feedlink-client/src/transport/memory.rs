//! In-process connector for tests and embedding.
//!
//! Each successful [`Connector::connect`] hands a [`MemoryPeer`] to the
//! paired [`MemoryServer`], which plays the backend: it reads the client's
//! frames and writes acks and events back. Dropping the peer drops the link.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use feedlink_core::protocol::{self, AckError, ClientFrame, RequestId, ServerFrame};
use feedlink_core::{ChannelKey, Identity, LiveError, Result};

use super::{Connector, Link};

/// Connector whose connections terminate in a [`MemoryServer`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicU32>,
    attempts: Arc<AtomicUsize>,
}

/// Accepting end of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    identity: Identity,
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl MemoryConnector {
    /// Create a connector and the server that receives its connections.
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            refusals: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryServer { accept_rx })
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, identity: &Identity, outbound_capacity: usize) -> Result<Link> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LiveError::Connect("connection refused".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let peer = MemoryPeer {
            identity: identity.clone(),
            from_client: outbound_rx,
            to_client: inbound_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| LiveError::Connect("memory server dropped".into()))?;

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl MemoryServer {
    /// Wait for the next connection. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already-established connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl MemoryPeer {
    /// Identity the client connected with.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Next frame from the client. `None` once the client closed the link.
    ///
    /// Frames that fail to decode are skipped.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        loop {
            let text = self.from_client.recv().await?;
            if let Ok(frame) = protocol::decode(&text) {
                return Some(frame);
            }
        }
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        loop {
            let text = self.from_client.try_recv().ok()?;
            if let Ok(frame) = protocol::decode(&text) {
                return Some(frame);
            }
        }
    }

    /// Send a frame to the client. `false` once the client is gone.
    pub async fn send(&self, frame: &ServerFrame) -> bool {
        let Ok(text) = protocol::encode(frame) else {
            return false;
        };
        self.send_raw(text).await
    }

    /// Send raw text, bypassing frame encoding.
    pub async fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).await.is_ok()
    }

    /// Acknowledge a request with a payload.
    pub async fn ack(&self, id: RequestId, data: Value) -> bool {
        self.send(&ServerFrame::Ack {
            id,
            data,
            error: None,
        })
        .await
    }

    /// Acknowledge a request with an error body.
    pub async fn reject(&self, id: RequestId, code: &str, message: &str) -> bool {
        self.send(&ServerFrame::Ack {
            id,
            data: Value::Null,
            error: Some(AckError {
                code: code.to_owned(),
                message: message.to_owned(),
            }),
        })
        .await
    }

    /// Deliver an event on a channel key.
    pub async fn event(&self, channel: &ChannelKey, data: Value) -> bool {
        self.send(&ServerFrame::Event {
            channel: channel.as_str().to_owned(),
            data,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn connect_hands_peer_to_server() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut link = connector
            .connect(&Identity::new("tok", "ws_1"), 8)
            .await
            .unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.identity().scope().as_str(), "ws_1");

        link.outbound
            .send(r#"{"kind":"notice","event":"$probe","data":null}"#.into())
            .await
            .unwrap();
        assert_matches!(peer.recv().await, Some(ClientFrame::Notice { event, .. }) if event == "$probe");

        assert!(peer.ack(1, json!({"cursor": "c1"})).await);
        let text = link.inbound.recv().await.unwrap();
        assert_matches!(
            protocol::decode::<ServerFrame>(&text).unwrap(),
            ServerFrame::Ack { id: 1, .. }
        );
    }

    #[tokio::test]
    async fn refused_attempts_are_counted() {
        let (connector, mut server) = MemoryConnector::pair();
        connector.refuse_next(2);
        let identity = Identity::new("tok", "ws_1");
        assert!(connector.connect(&identity, 8).await.is_err());
        assert!(connector.connect(&identity, 8).await.is_err());
        assert!(connector.connect(&identity, 8).await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert!(server.try_accept().is_some());
        assert!(server.try_accept().is_none());
    }

    #[tokio::test]
    async fn dropping_peer_ends_inbound() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut link = connector
            .connect(&Identity::new("tok", "ws_1"), 8)
            .await
            .unwrap();
        drop(server.accept().await.unwrap());
        assert!(link.inbound.recv().await.is_none());
    }
}
