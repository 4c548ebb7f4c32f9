//! Branded ID newtypes.
//!
//! Every identifier on the subscription path is a distinct newtype around
//! `String`, so a cursor can never be passed where a feed name is expected.
//! [`FeedName`] is validated on construction because it takes part in the
//! channel key; the remaining IDs are opaque.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::CHANNEL_SEPARATOR;
use crate::errors::{LiveError, Result};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

opaque_id! {
    /// Server-issued identifier for one subscribe handshake.
    ///
    /// Unique to a single subscribe call and never reused.
    Cursor
}

opaque_id! {
    /// Scope the session is bound to (a workspace id in the connection path).
    ScopeId
}

opaque_id! {
    /// Client-side identifier for one physical connection, used in logs.
    ConnectionId
}

impl ConnectionId {
    /// Create a new time-ordered connection ID (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    /// Validate a cursor received from the server.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(LiveError::MalformedAck {
                event: crate::protocol::SUBSCRIBE_EVENT.into(),
                reason: "empty cursor".into(),
            });
        }
        Ok(Self(raw))
    }
}

/// Name of a logical, server-known data source (e.g. `onServerStatusUpdate`).
///
/// Never empty and never contains [`CHANNEL_SEPARATOR`], which keeps
/// channel keys unambiguous.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FeedName(String);

impl FeedName {
    /// Validate and wrap a feed name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(CHANNEL_SEPARATOR) {
            return Err(LiveError::InvalidFeedName(name));
        }
        Ok(Self(name))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FeedName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::ops::Deref for FeedName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FeedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for FeedName {
    type Error = LiveError;
    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for FeedName {
    type Error = LiveError;
    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn feed_name_accepts_plain_identifier() {
        let name = FeedName::new("onMonitorReceiveNewData").unwrap();
        assert_eq!(name.as_str(), "onMonitorReceiveNewData");
        assert_eq!(name.to_string(), "onMonitorReceiveNewData");
    }

    #[test]
    fn feed_name_rejects_empty() {
        assert_matches!(FeedName::new(""), Err(LiveError::InvalidFeedName(_)));
    }

    #[test]
    fn feed_name_rejects_separator() {
        assert_matches!(
            FeedName::new("device#heartbeat"),
            Err(LiveError::InvalidFeedName(n)) if n == "device#heartbeat"
        );
    }

    #[test]
    fn feed_name_deserialize_validates() {
        let ok: FeedName = serde_json::from_str("\"device-heartbeat\"").unwrap();
        assert_eq!(&*ok, "device-heartbeat");
        assert!(serde_json::from_str::<FeedName>("\"a#b\"").is_err());
    }

    #[test]
    fn cursor_parse_rejects_empty() {
        assert_matches!(Cursor::parse(""), Err(LiveError::MalformedAck { .. }));
        assert_eq!(Cursor::parse("c1").unwrap().as_str(), "c1");
    }

    #[test]
    fn cursor_is_transparent_in_json() {
        let cursor = Cursor::from("abc");
        assert_eq!(serde_json::to_string(&cursor).unwrap(), "\"abc\"");
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn scope_conversions() {
        let scope = ScopeId::from("ws_1");
        let raw: String = scope.clone().into();
        assert_eq!(raw, "ws_1");
        assert_eq!(scope.into_inner(), "ws_1");
    }
}
