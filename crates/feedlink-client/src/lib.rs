//! # feedlink-client
//!
//! Many independent live feeds over one connection:
//!
//! - **Transport**: [`Connector`] seam with WebSocket and in-memory links
//! - **Correlator**: request ids matched to acks, futures or inline continuations
//! - **Session**: one connection per identity, reconnect with backoff
//! - **Registry**: `$subscribe` handshakes, channel-key routing, race-safe release
//! - **Adapters**: [`LatestValue`] and [`AccumulatingList`]
//! - **Client**: [`LiveClient`], the context object owning the current session

#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod correlator;
pub mod registry;
pub mod session;
pub mod transport;

pub use adapters::{AccumulatingList, LatestValue, ListOptions};
pub use client::LiveClient;
pub use correlator::{Correlator, PendingAck};
pub use registry::{HandleId, ResubscribePolicy, Subscription, SubscriptionRegistry};
pub use session::{Liveness, SessionOptions, TransportSession};
pub use transport::{Connector, Link, MemoryConnector, WebSocketConnector};
