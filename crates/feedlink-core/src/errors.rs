//! Error taxonomy for the subscription layer.
//!
//! [`LiveError`] covers every failure a caller of the session or registry
//! can observe. Events whose channel key matches no live handle are not
//! errors at all: they are dropped by policy and never reach this type.

use thiserror::Error;

/// Errors surfaced by the transport session, correlator, and registry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LiveError {
    /// A send was attempted while the session had no open connection.
    #[error("not connected")]
    NotConnected,

    /// The connection closed before the matching acknowledgment arrived.
    #[error("session closed before acknowledgment")]
    SessionClosed,

    /// A generic request exceeded the configured request timeout.
    #[error("request `{event}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Request event name (e.g. `$subscribe`).
        event: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The server acknowledged the request with an error body.
    #[error("server rejected `{event}`: [{code}] {message}")]
    Rejected {
        /// Request event name.
        event: String,
        /// Machine-readable error code from the server.
        code: String,
        /// Human-readable message from the server.
        message: String,
    },

    /// The acknowledgment payload did not have the expected shape.
    #[error("malformed acknowledgment for `{event}`: {reason}")]
    MalformedAck {
        /// Request event name.
        event: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// A feed name was empty or contained the channel separator.
    #[error("invalid feed name `{0}`")]
    InvalidFeedName(String),

    /// A channel key could not be split into name and cursor.
    #[error("invalid channel key `{0}`")]
    InvalidChannelKey(String),

    /// The connector failed to establish a connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LiveError {
    /// Whether the failure is tied to connection state and may clear up once
    /// the session reconnects.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::SessionClosed | Self::Timeout { .. } | Self::Connect(_)
        )
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type for subscription-layer operations.
pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display() {
        assert_eq!(LiveError::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn rejected_display_includes_code() {
        let err = LiveError::Rejected {
            event: "$subscribe".into(),
            code: "UNKNOWN_FEED".into(),
            message: "no such feed".into(),
        };
        assert_eq!(
            err.to_string(),
            "server rejected `$subscribe`: [UNKNOWN_FEED] no such feed"
        );
    }

    #[test]
    fn timeout_display() {
        let err = LiveError::Timeout {
            event: "$ping".into(),
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn transient_classification() {
        assert!(LiveError::NotConnected.is_transient());
        assert!(LiveError::SessionClosed.is_transient());
        assert!(LiveError::Connect("refused".into()).is_transient());
        assert!(!LiveError::InvalidFeedName(String::new()).is_transient());
        assert!(
            !LiveError::MalformedAck {
                event: "$subscribe".into(),
                reason: "missing cursor".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn json_error_converts_to_protocol() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: LiveError = json_err.into();
        assert!(matches!(err, LiveError::Protocol(_)));
    }
}
