//! WebSocket connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, warn};

use feedlink_core::{Identity, LiveError, Result, ScopeId};

use super::{Connector, Link};

/// Connects to `<base_url>/<scope>` with a bearer `Authorization` header.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    /// Create a connector for a base URL such as `wss://live.example.com/ws`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Full connection URL for a scope.
    pub fn endpoint(&self, scope: &ScopeId) -> String {
        format!("{}/{scope}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, identity: &Identity, outbound_capacity: usize) -> Result<Link> {
        let url = self.endpoint(identity.scope());
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        if identity.is_authenticated() {
            let value = HeaderValue::from_str(&identity.bearer())
                .map_err(|e| LiveError::Connect(format!("invalid credential header: {e}")))?;
            let _ = request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        debug!(%url, "websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(outbound_capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let _reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by server");
                        break;
                    }
                    Ok(Message::Binary(_)) => {
                        warn!("ignoring binary websocket frame");
                    }
                    // ping/pong are answered by tungstenite
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            writer.abort();
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
