//! Subscription registry.
//!
//! Turns feed names into live subscriptions. Each [`subscribe`] call sends
//! its own `$subscribe` handshake, receives its own cursor, and gets its own
//! dispatch entry under the `name#cursor` channel key; nothing is shared
//! between two subscribers of the same feed.
//!
//! A handle moves through three states:
//!
//! - **Requesting**: handshake sent, no cursor yet
//! - **Bound**: cursor received, events are routed to the callback
//! - **Parked**: waiting for the link to open before (re)issuing the handshake
//!
//! Releasing a handle removes it. If that happens while it is still
//! Requesting, the ack continuation finds no entry and releases the cursor
//! on the server as soon as it arrives, so a fast mount/unmount never leaves
//! a cursor or a dispatch entry behind.
//!
//! [`subscribe`]: SubscriptionRegistry::subscribe

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use feedlink_core::protocol::{
    SUBSCRIBE_EVENT, SubscribeAck, SubscribeRequest, UNSUBSCRIBE_EVENT, UnsubscribeNotice,
};
use feedlink_core::{ChannelKey, Cursor, Feed, FeedName, LiveError, Result};

use crate::session::TransportSession;

/// Callback receiving raw event payloads for one subscription.
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

/// What happens to live handles when the link drops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResubscribePolicy {
    /// Release every handle locally; their cursors died with the link.
    /// Consumers re-subscribe themselves.
    #[default]
    Manual,
    /// Park every handle and re-issue its handshake when the link reopens,
    /// keeping the callback.
    Automatic,
}

/// Registry-unique handle id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

enum HandleState {
    Requesting { attempt: u64 },
    Bound { cursor: Cursor },
    Parked,
}

struct HandleEntry {
    name: FeedName,
    state: HandleState,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    handles: HashMap<HandleId, HandleEntry>,
    routes: HashMap<ChannelKey, HandleId>,
    closed: bool,
}

impl Inner {
    fn is_requesting(&self, id: HandleId, attempt: u64) -> bool {
        matches!(
            self.handles.get(&id),
            Some(HandleEntry { state: HandleState::Requesting { attempt: a }, .. }) if *a == attempt
        )
    }

    fn unroute(&mut self, entry: &HandleEntry) {
        if let HandleState::Bound { cursor } = &entry.state {
            let _ = self.routes.remove(&ChannelKey::new(&entry.name, cursor));
        }
    }
}

/// Binds inbound events to subscriber callbacks for one session.
pub struct SubscriptionRegistry {
    session: Weak<TransportSession>,
    this: Weak<SubscriptionRegistry>,
    policy: ResubscribePolicy,
    next_handle: AtomicU64,
    next_attempt: AtomicU64,
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(session: Weak<TransportSession>, policy: ResubscribePolicy) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            session,
            this: this.clone(),
            policy,
            next_handle: AtomicU64::new(0),
            next_attempt: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Reconnect policy in effect.
    pub fn policy(&self) -> ResubscribePolicy {
        self.policy
    }

    /// Subscribe to `name`, calling `on_data` with every payload delivered
    /// for this subscription.
    ///
    /// Returns immediately. If the session is not open yet, the handshake
    /// is sent as soon as it is. Dropping the returned [`Subscription`]
    /// releases it.
    pub fn subscribe<F>(&self, name: FeedName, on_data: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                debug!(feed = %name, handle = %id, "session closed, subscription inert");
                return Subscription::new(id, name, Weak::new());
            }
            let _ = inner.handles.insert(
                id,
                HandleEntry {
                    name: name.clone(),
                    state: HandleState::Parked,
                    callback: Arc::new(on_data),
                },
            );
        }
        self.issue(id);
        Subscription::new(id, name, self.this.clone())
    }

    /// Subscribe to a typed feed.
    ///
    /// Payloads that do not decode as `F::Payload` are logged and skipped.
    pub fn subscribe_feed<F, C>(&self, on_data: C) -> Result<Subscription>
    where
        F: Feed,
        C: Fn(F::Payload) + Send + Sync + 'static,
    {
        let name = F::feed_name()?;
        let feed = name.clone();
        Ok(self.subscribe(name, move |value| {
            match serde_json::from_value::<F::Payload>(value) {
                Ok(payload) => on_data(payload),
                Err(err) => warn!(feed = %feed, error = %err, "undecodable payload, skipping"),
            }
        }))
    }

    /// Route an inbound event to the handle bound under `channel`.
    ///
    /// Returns `false` when nothing is bound there; such events are dropped.
    /// The callback is invoked after the registry lock is released, so on a
    /// multi-threaded runtime a delivery already in flight can still reach
    /// a callback whose subscription was released from another thread.
    pub fn dispatch(&self, channel: &str, payload: Value) -> bool {
        let callback = {
            let inner = self.inner.lock();
            inner
                .routes
                .get(channel)
                .and_then(|id| inner.handles.get(id))
                .map(|entry| Arc::clone(&entry.callback))
        };
        if let Some(callback) = callback {
            callback(payload);
            true
        } else {
            trace!(channel, "no bound handle, dropping event");
            false
        }
    }

    /// Number of live handles in any state.
    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Number of handles bound to a cursor.
    pub fn bound_count(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Whether a handle is bound under `channel`.
    pub fn is_bound(&self, channel: &str) -> bool {
        self.inner.lock().routes.contains_key(channel)
    }

    /// Whether `id` is still held by the registry.
    pub fn contains(&self, id: HandleId) -> bool {
        self.inner.lock().handles.contains_key(&id)
    }

    /// Cursor currently bound to `id`, if any.
    pub fn cursor_of(&self, id: HandleId) -> Option<Cursor> {
        match &self.inner.lock().handles.get(&id)?.state {
            HandleState::Bound { cursor } => Some(cursor.clone()),
            _ => None,
        }
    }

    pub(crate) fn link_opened(&self) {
        let parked: Vec<HandleId> = {
            let inner = self.inner.lock();
            inner
                .handles
                .iter()
                .filter(|(_, entry)| matches!(entry.state, HandleState::Parked))
                .map(|(id, _)| *id)
                .collect()
        };
        if !parked.is_empty() {
            debug!(count = parked.len(), "issuing parked subscriptions");
        }
        for id in parked {
            self.issue(id);
        }
    }

    pub(crate) fn link_lost(&self) {
        let released: Vec<HandleEntry> = {
            let mut inner = self.inner.lock();
            inner.routes.clear();
            match self.policy {
                ResubscribePolicy::Manual => {
                    let live: Vec<HandleId> = inner
                        .handles
                        .iter()
                        .filter(|(_, entry)| !matches!(entry.state, HandleState::Parked))
                        .map(|(id, _)| *id)
                        .collect();
                    live.iter()
                        .filter_map(|id| inner.handles.remove(id))
                        .collect()
                }
                ResubscribePolicy::Automatic => {
                    for entry in inner.handles.values_mut() {
                        entry.state = HandleState::Parked;
                    }
                    Vec::new()
                }
            }
        };
        if !released.is_empty() {
            debug!(count = released.len(), "link lost, handles released");
        }
    }

    pub(crate) fn session_closed(&self) {
        let (handles, routes) = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            (
                std::mem::take(&mut inner.handles),
                std::mem::take(&mut inner.routes),
            )
        };
        debug!(handles = handles.len(), bound = routes.len(), "registry cleared");
    }

    /// Release a handle. Returns `false` if it was already gone.
    fn release(&self, id: HandleId) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.handles.remove(&id) else {
                return false;
            };
            inner.unroute(&entry);
            entry
        };
        match &entry.state {
            HandleState::Bound { cursor } => self.send_release(&entry.name, cursor),
            HandleState::Requesting { .. } => {
                debug!(feed = %entry.name, handle = %id, "released before ack, cursor released on arrival");
            }
            HandleState::Parked => {}
        }
        true
    }

    /// Send the handshake for a Parked handle.
    fn issue(&self, id: HandleId) {
        self.issue_attempt(id, true);
    }

    fn issue_attempt(&self, id: HandleId, retry: bool) {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let name = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.handles.get_mut(&id) else {
                return;
            };
            if !matches!(entry.state, HandleState::Parked) {
                return;
            }
            entry.state = HandleState::Requesting { attempt };
            entry.name.clone()
        };

        let request = SubscribeRequest { name: name.clone() };
        let sent = match self.session.upgrade() {
            Some(session) => serde_json::to_value(&request)
                .map_err(LiveError::from)
                .and_then(|payload| {
                    let this = self.this.clone();
                    let feed = name.clone();
                    session.send_request_with(
                        SUBSCRIBE_EVENT,
                        payload,
                        Box::new(move |ack| {
                            if let Some(registry) = this.upgrade() {
                                registry.on_ack(id, attempt, &feed, ack);
                            }
                        }),
                    )
                }),
            None => Err(LiveError::SessionClosed),
        };

        match sent {
            Ok(request_id) => debug!(feed = %name, handle = %id, request_id, "subscribe requested"),
            Err(err) => {
                {
                    let mut inner = self.inner.lock();
                    if !inner.is_requesting(id, attempt) {
                        return;
                    }
                    if let Some(entry) = inner.handles.get_mut(&id) {
                        entry.state = HandleState::Parked;
                    }
                }
                // the link may have opened after the send was refused but
                // before the handle was parked again
                if retry && self.session.upgrade().is_some_and(|s| s.is_open()) {
                    self.issue_attempt(id, false);
                    return;
                }
                debug!(feed = %name, handle = %id, error = %err, "subscribe deferred until connected");
            }
        }
    }

    fn on_ack(&self, id: HandleId, attempt: u64, name: &FeedName, ack: Result<Value>) {
        let outcome = ack.and_then(|payload| SubscribeAck::cursor_from_payload(&payload));
        match outcome {
            Ok(cursor) => self.bind(id, attempt, name, cursor),
            Err(err) => self.handshake_failed(id, attempt, name, &err),
        }
    }

    fn bind(&self, id: HandleId, attempt: u64, name: &FeedName, cursor: Cursor) {
        let key = ChannelKey::new(name, &cursor);
        let mut inner = self.inner.lock();
        if !inner.is_requesting(id, attempt) {
            drop(inner);
            debug!(feed = %name, %cursor, handle = %id, "ack for released handle, releasing cursor");
            self.send_release(name, &cursor);
            return;
        }
        if inner.routes.contains_key(&key) {
            let stale = inner.handles.remove(&id);
            drop(inner);
            drop(stale);
            warn!(channel = %key, handle = %id, "cursor already bound to another handle, dropping handle");
            return;
        }
        if let Some(entry) = inner.handles.get_mut(&id) {
            entry.state = HandleState::Bound {
                cursor: cursor.clone(),
            };
        }
        let _ = inner.routes.insert(key, id);
        drop(inner);
        debug!(feed = %name, %cursor, handle = %id, "subscription bound");
    }

    fn handshake_failed(&self, id: HandleId, attempt: u64, name: &FeedName, err: &LiveError) {
        let removed = {
            let mut inner = self.inner.lock();
            if !inner.is_requesting(id, attempt) {
                return;
            }
            if *err == LiveError::SessionClosed && self.policy == ResubscribePolicy::Automatic {
                if let Some(entry) = inner.handles.get_mut(&id) {
                    entry.state = HandleState::Parked;
                }
                None
            } else {
                inner.handles.remove(&id)
            }
        };
        match removed {
            None => debug!(feed = %name, handle = %id, "link lost during handshake, parked"),
            Some(_) if err.is_transient() => {
                debug!(feed = %name, handle = %id, error = %err, "handshake interrupted, released");
            }
            Some(_) => warn!(feed = %name, handle = %id, error = %err, "subscribe failed"),
        }
    }

    fn send_release(&self, name: &FeedName, cursor: &Cursor) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let notice = UnsubscribeNotice {
            name: name.clone(),
            cursor: cursor.clone(),
        };
        let payload = match serde_json::to_value(&notice) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(feed = %name, %cursor, error = %err, "failed to encode unsubscribe");
                return;
            }
        };
        let sent = session.send_notice(UNSUBSCRIBE_EVENT, payload);
        if sent {
            debug!(feed = %name, %cursor, "unsubscribe sent");
        } else {
            debug!(feed = %name, %cursor, "unsubscribe not sent, link unavailable");
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("policy", &self.policy)
            .field("handles", &inner.handles.len())
            .field("bound", &inner.routes.len())
            .finish()
    }
}

/// Guard for one subscription. Dropping it releases the subscription.
#[derive(Debug)]
pub struct Subscription {
    id: HandleId,
    name: FeedName,
    registry: Weak<SubscriptionRegistry>,
    released: AtomicBool,
}

impl Subscription {
    fn new(id: HandleId, name: FeedName, registry: Weak<SubscriptionRegistry>) -> Self {
        Self {
            id,
            name,
            registry,
            released: AtomicBool::new(false),
        }
    }

    /// Registry handle id.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Feed this subscription is for.
    pub fn name(&self) -> &FeedName {
        &self.name
    }

    /// Whether the registry still holds this subscription.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
            && self
                .registry
                .upgrade()
                .is_some_and(|registry| registry.contains(self.id))
    }

    /// Release the subscription. Safe to call any number of times; the
    /// server is asked to release the cursor at most once.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.release(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
