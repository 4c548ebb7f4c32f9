//! Wire-format frames for the multiplexed connection.
//!
//! Every text frame is a JSON object tagged by `kind`:
//!
//! - client → server: `request` (expects an `ack` with the same `id`) and
//!   `notice` (fire-and-forget)
//! - server → client: `ack` and `event` (tagged with a channel key)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LiveError, Result};
use crate::ids::{Cursor, FeedName};

/// Request opening a subscription; acked with a cursor.
pub const SUBSCRIBE_EVENT: &str = "$subscribe";
/// Notice releasing a subscription; never acked.
pub const UNSUBSCRIBE_EVENT: &str = "$unsubscribe";

/// Correlation id of a request, unique per connection.
pub type RequestId = u64;

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Request expecting an acknowledgment.
    Request {
        /// Correlation id echoed by the ack.
        id: RequestId,
        /// Request name (e.g. `$subscribe`).
        event: String,
        /// Request payload.
        #[serde(default)]
        data: Value,
    },
    /// Fire-and-forget notice.
    Notice {
        /// Notice name (e.g. `$unsubscribe`).
        event: String,
        /// Notice payload.
        #[serde(default)]
        data: Value,
    },
}

/// Frame sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledgment of a client request.
    Ack {
        /// Id of the request being acknowledged.
        id: RequestId,
        /// Ack payload (absent on error).
        #[serde(default)]
        data: Value,
        /// Error body when the server rejected the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
    },
    /// Event delivery for one subscription instance.
    Event {
        /// Channel key `name#cursor`.
        channel: String,
        /// Feed-defined payload.
        #[serde(default)]
        data: Value,
    },
}

/// Error body inside a rejected ack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Payload of a `$subscribe` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Feed to subscribe to.
    pub name: FeedName,
}

/// Payload of a successful `$subscribe` ack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeAck {
    /// Cursor issued for this subscription.
    pub cursor: Cursor,
}

impl SubscribeAck {
    /// Extract the cursor from an ack payload.
    ///
    /// Accepts `{"cursor": "..."}` as well as a bare string, which is how
    /// older backends acknowledge the handshake.
    pub fn cursor_from_payload(payload: &Value) -> Result<Cursor> {
        let raw = match payload {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("cursor").and_then(Value::as_str).ok_or_else(|| {
                LiveError::MalformedAck {
                    event: SUBSCRIBE_EVENT.into(),
                    reason: "missing `cursor` field".into(),
                }
            })?,
            other => {
                return Err(LiveError::MalformedAck {
                    event: SUBSCRIBE_EVENT.into(),
                    reason: format!("unexpected payload {other}"),
                });
            }
        };
        Cursor::parse(raw)
    }
}

/// Payload of an `$unsubscribe` notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeNotice {
    /// Feed being released.
    pub name: FeedName,
    /// Cursor issued by the matching subscribe ack.
    pub cursor: Cursor,
}

/// Encode a frame as a JSON text frame.
pub fn encode<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a JSON text frame.
pub fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}
