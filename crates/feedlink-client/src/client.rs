//! Application-level entry point.
//!
//! [`LiveClient`] is the context object an application passes around in
//! place of a global socket. It owns the current [`TransportSession`] and
//! replaces it wholesale when the identity changes, so nothing bound to the
//! old credential or scope survives the switch.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use feedlink_core::{Feed, FeedName, Identity, LiveError, Result};
use feedlink_settings::LinkSettings;

use crate::adapters::{AccumulatingList, LatestValue, ListOptions};
use crate::registry::Subscription;
use crate::session::{Liveness, SessionOptions, TransportSession};
use crate::transport::{Connector, WebSocketConnector};

/// Owns at most one live session at a time.
pub struct LiveClient {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    session: RwLock<Option<Arc<TransportSession>>>,
}

impl LiveClient {
    /// Create a client that connects through `connector`.
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        Self {
            connector,
            options,
            session: RwLock::new(None),
        }
    }

    /// Create a WebSocket client from loaded settings.
    pub fn from_settings(settings: &LinkSettings) -> Self {
        Self::new(
            Arc::new(WebSocketConnector::new(settings.server.url.clone())),
            SessionOptions::from(settings),
        )
    }

    /// Open a session for `identity`, closing any session for another one.
    ///
    /// Returns the existing session when it already belongs to `identity`
    /// and has not closed. Must be called within a tokio runtime.
    pub fn open(&self, identity: Identity) -> Arc<TransportSession> {
        let mut slot = self.session.write();
        let reusable = slot
            .as_ref()
            .filter(|current| current.identity() == &identity && current.liveness() != Liveness::Closed);
        if let Some(current) = reusable {
            return Arc::clone(current);
        }
        if let Some(previous) = slot.take() {
            info!(session_id = %previous.id(), "identity changed, closing previous session");
            previous.close();
        }
        let session = TransportSession::open(identity, self.options.clone(), Arc::clone(&self.connector));
        *slot = Some(Arc::clone(&session));
        session
    }

    /// Close the current session, if any.
    pub fn close(&self) {
        if let Some(session) = self.session.write().take() {
            session.close();
        }
    }

    /// The current session.
    pub fn session(&self) -> Result<Arc<TransportSession>> {
        self.session.read().clone().ok_or(LiveError::NotConnected)
    }

    /// Whether the current session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.read().as_ref().is_some_and(|s| s.is_open())
    }

    /// Subscribe to `name` on the current session.
    pub fn subscribe<F>(&self, name: FeedName, on_data: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Ok(self.session()?.registry().subscribe(name, on_data))
    }

    /// Subscribe to a typed feed on the current session.
    pub fn subscribe_feed<F, C>(&self, on_data: C) -> Result<Subscription>
    where
        F: Feed,
        C: Fn(F::Payload) + Send + Sync + 'static,
    {
        self.session()?.registry().subscribe_feed::<F, C>(on_data)
    }

    /// Track the latest value of `name`, starting at `default`.
    pub fn latest_value<T>(&self, name: FeedName, default: T) -> Result<LatestValue<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Ok(LatestValue::new(self.session()?.registry(), name, default))
    }

    /// Accumulate payloads of `name`.
    ///
    /// Unless `options` sets a ready flag, the list is ready only when the
    /// session identity carries a credential.
    pub fn accumulating_list<T>(
        &self,
        name: FeedName,
        options: ListOptions<T>,
    ) -> Result<AccumulatingList<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let session = self.session()?;
        let options = match options.ready_flag() {
            Some(_) => options,
            None => options.ready(session.identity().is_authenticated()),
        };
        Ok(AccumulatingList::new(session.registry(), name, options))
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("options", &self.options)
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}
