//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial and missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for a feedlink connection.
///
/// ```json
/// {
///   "server": { "url": "wss://live.example.com/ws" },
///   "reconnect": { "maxDelayMs": 30000 },
///   "subscriptions": { "resubscribeOnReconnect": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSettings {
    /// Where to connect.
    pub server: ServerSettings,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectSettings,
    /// Generic request handling.
    pub requests: RequestSettings,
    /// Subscription registry policy.
    pub subscriptions: SubscriptionSettings,
    /// Connection buffering.
    pub connection: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl LinkSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reconnect;
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within 0.0..=1.0, got {}",
                r.jitter_factor
            )));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.baseDelayMs ({}) exceeds reconnect.maxDelayMs ({})",
                r.base_delay_ms, r.max_delay_ms
            )));
        }
        if self.connection.outbound_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.outboundCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Server endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base WebSocket URL; the scope is appended as the last path segment.
    pub url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:12345/ws".to_string(),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether to reconnect after the link drops.
    pub enabled: bool,
    /// Delay before the first reconnect attempt.
    pub base_delay_ms: u64,
    /// Upper bound on any reconnect delay.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay.
    pub jitter_factor: f64,
    /// Consecutive failed attempts before giving up. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_factor: 0.5,
            max_attempts: None,
        }
    }
}

/// Generic request settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestSettings {
    /// Ack timeout for generic requests. `0` waits forever.
    pub timeout_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Subscription registry settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSettings {
    /// Re-issue `$subscribe` for live handles after a reconnect instead of
    /// releasing them.
    pub resubscribe_on_reconnect: bool,
}

/// Connection buffering settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Frames that may queue for the socket writer before sends are refused.
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let s = LinkSettings::default();
        assert_eq!(s.server.url, "ws://127.0.0.1:12345/ws");
        assert!(s.reconnect.enabled);
        assert_eq!(s.reconnect.base_delay_ms, 1000);
        assert_eq!(s.reconnect.max_delay_ms, 10_000);
        assert!((s.reconnect.jitter_factor - 0.5).abs() < f64::EPSILON);
        assert!(s.reconnect.max_attempts.is_none());
        assert_eq!(s.requests.timeout_ms, 30_000);
        assert!(!s.subscriptions.resubscribe_on_reconnect);
        assert_eq!(s.connection.outbound_capacity, 1024);
        assert_eq!(s.logging.level, "warn");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(LinkSettings::default()).unwrap();
        assert_eq!(v["reconnect"]["baseDelayMs"], 1000);
        assert_eq!(v["subscriptions"]["resubscribeOnReconnect"], false);
        assert_eq!(v["connection"]["outboundCapacity"], 1024);
        assert!(v["reconnect"].get("maxAttempts").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LinkSettings =
            serde_json::from_value(json!({"reconnect": {"maxAttempts": 3}})).unwrap();
        assert_eq!(s.reconnect.max_attempts, Some(3));
        assert_eq!(s.reconnect.base_delay_ms, 1000);
        assert_eq!(s.server, ServerSettings::default());
    }

    #[test]
    fn validate_rejects_bad_jitter() {
        let mut s = LinkSettings::default();
        s.reconnect.jitter_factor = 1.5;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut s = LinkSettings::default();
        s.reconnect.base_delay_ms = 20_000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut s = LinkSettings::default();
        s.connection.outbound_capacity = 0;
        assert!(s.validate().is_err());
    }
}
