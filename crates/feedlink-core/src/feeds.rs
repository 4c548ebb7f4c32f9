//! Typed feed catalog.
//!
//! A [`Feed`] ties a server-known feed name to the payload type its events
//! carry, so a callback registered for one feed can only ever be handed
//! that feed's payload shape. The catalog below covers the dashboard feeds
//! the backend publishes; applications may implement [`Feed`] for their own.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::ids::FeedName;

/// A named live feed and the payload type of its events.
pub trait Feed: Send + Sync + 'static {
    /// Wire name of the feed.
    const NAME: &'static str;

    /// Payload carried by each event.
    type Payload: DeserializeOwned + Send + 'static;

    /// Validated feed name.
    fn feed_name() -> Result<FeedName> {
        FeedName::new(Self::NAME)
    }
}

macro_rules! feed {
    ($(#[$meta:meta])* $ty:ident => $name:literal, $payload:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $ty;

        impl Feed for $ty {
            const NAME: &'static str = $name;
            type Payload = $payload;
        }
    };
}

/// One monitor probe result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorData {
    /// Monitor that produced the value.
    pub monitor_id: String,
    /// Measured value (latency in ms, or a negative sentinel when down).
    pub value: i64,
    /// Creation timestamp as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Completion notice for a website audit job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LighthouseWorkCompleted {
    /// Website the audit ran against.
    pub website_id: String,
}

feed! {
    /// Map of reporting servers to their latest status report.
    ServerStatusUpdate => "onServerStatusUpdate", HashMap<String, Value>
}

feed! {
    /// New monitor probe data.
    MonitorReceiveNewData => "onMonitorReceiveNewData", MonitorData
}

feed! {
    /// New event posted to a feed channel.
    ReceiveFeedEvent => "onReceiveFeedEvent", Value
}

feed! {
    /// Feed state created or resolved.
    ReceiveFeedState => "onReceiveFeedState", Value
}

feed! {
    /// Request captured by the webhook playground.
    ReceivePlaygroundWebhookRequest => "onReceivePlaygroundWebhookRequest", Value
}

feed! {
    /// Website audit finished.
    LighthouseCompleted => "onLighthouseWorkCompleted", LighthouseWorkCompleted
}

feed! {
    /// Survey classification batch finished.
    SurveyClassifyCompleted => "onSurveyClassifyWorkCompleted", Value
}

feed! {
    /// Survey translation batch finished.
    SurveyTranslationCompleted => "onSurveyTranslationWorkCompleted", Value
}
