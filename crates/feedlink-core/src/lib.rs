//! # feedlink-core
//!
//! Foundation types shared by every feedlink crate:
//!
//! - **Branded IDs**: `FeedName`, `Cursor`, `ScopeId`, `ConnectionId`
//! - **Channel keys**: the `name#cursor` routing tag and its codec
//! - **Wire frames**: `ClientFrame` / `ServerFrame` and the `$subscribe` handshake payloads
//! - **Identity**: bearer credential plus scope
//! - **Feeds**: the `Feed` trait mapping a feed name to its payload type
//! - **Errors**: `LiveError` via `thiserror`
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod channel;
pub mod errors;
pub mod feeds;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod retry;

pub use channel::{CHANNEL_SEPARATOR, ChannelKey};
pub use errors::{LiveError, Result};
pub use feeds::Feed;
pub use identity::Identity;
pub use ids::{ConnectionId, Cursor, FeedName, ScopeId};
