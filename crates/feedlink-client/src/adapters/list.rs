//! Accumulating-list adapter with a filter and a ready gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use feedlink_core::{Feed, FeedName, Result};

use crate::registry::{Subscription, SubscriptionRegistry};

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Options for an [`AccumulatingList`].
pub struct ListOptions<T> {
    filter: Option<Filter<T>>,
    ready: Option<bool>,
}

impl<T> ListOptions<T> {
    /// Accept every payload; ready unless told otherwise.
    pub fn new() -> Self {
        Self {
            filter: None,
            ready: None,
        }
    }

    /// Append only payloads for which `filter` returns `true`.
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Precondition checked at mount time. When `false`, no subscription
    /// is made.
    #[must_use]
    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Ready flag, if one was set.
    pub fn ready_flag(&self) -> Option<bool> {
        self.ready
    }
}

impl<T> Default for ListOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ListOptions<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            ready: self.ready,
        }
    }
}

impl<T> std::fmt::Debug for ListOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListOptions")
            .field("filter", &self.filter.is_some())
            .field("ready", &self.ready)
            .finish()
    }
}

/// Ordered, append-only list of payloads delivered on a feed.
pub struct AccumulatingList<T> {
    registry: Arc<SubscriptionRegistry>,
    state: Arc<watch::Sender<Vec<T>>>,
    options: ListOptions<T>,
    mounts: Arc<AtomicU64>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T> AccumulatingList<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount on `name`. Subscribes unless the ready flag is `false`.
    pub fn new(registry: &Arc<SubscriptionRegistry>, name: FeedName, options: ListOptions<T>) -> Self {
        let (state, _) = watch::channel(Vec::new());
        let list = Self {
            registry: Arc::clone(registry),
            state: Arc::new(state),
            options,
            mounts: Arc::new(AtomicU64::new(0)),
            subscription: Mutex::new(None),
        };
        list.mount(name);
        list
    }

    /// Mount on the typed feed `F`.
    pub fn for_feed<F>(registry: &Arc<SubscriptionRegistry>, options: ListOptions<T>) -> Result<Self>
    where
        F: Feed<Payload = T>,
    {
        Ok(Self::new(registry, F::feed_name()?, options))
    }

    /// Snapshot of the accumulated items.
    pub fn items(&self) -> Vec<T> {
        self.state.borrow().clone()
    }

    /// Number of accumulated items.
    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    /// Whether nothing has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Observe list changes.
    pub fn watch(&self) -> watch::Receiver<Vec<T>> {
        self.state.subscribe()
    }

    /// Whether the list holds a live subscription.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().as_ref().is_some_and(Subscription::is_active)
    }

    /// Switch to another feed, releasing the current subscription first.
    ///
    /// Items accumulated so far are kept. Passing the current name
    /// subscribes again if the subscription was lost.
    pub fn set_name(&self, name: FeedName) {
        let current = self
            .subscription
            .lock()
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| s.name().clone());
        if current.as_ref() == Some(&name) {
            return;
        }
        self.mount(name);
    }

    /// Subscribe again to the last feed if its subscription was lost.
    ///
    /// Returns `false` when the subscription is still live or the list
    /// never subscribed.
    pub fn remount(&self) -> bool {
        let lost = self
            .subscription
            .lock()
            .as_ref()
            .filter(|s| !s.is_active())
            .map(|s| s.name().clone());
        match lost {
            Some(name) => {
                self.mount(name);
                true
            }
            None => false,
        }
    }

    fn mount(&self, name: FeedName) {
        let previous = self.subscription.lock().take();
        // retire the previous callback under the watch lock before releasing
        let _ = self.state.send_if_modified(|_| {
            let _ = self.mounts.fetch_add(1, Ordering::AcqRel);
            false
        });
        drop(previous);

        if self.options.ready == Some(false) {
            warn!(feed = %name, "not ready, skipping subscribe");
            return;
        }

        let mount = self.mounts.load(Ordering::Acquire);
        let mounts = Arc::clone(&self.mounts);
        let state = Arc::clone(&self.state);
        let filter = self.options.filter.clone();
        let feed = name.clone();
        let subscription = self.registry.subscribe(name, move |payload: Value| {
            let item = match serde_json::from_value::<T>(payload) {
                Ok(item) => item,
                Err(err) => {
                    warn!(feed = %feed, error = %err, "undecodable payload, skipping");
                    return;
                }
            };
            if filter.as_ref().is_none_or(|accept| accept(&item)) {
                let _ = state.send_if_modified(|items| {
                    if mounts.load(Ordering::Acquire) != mount {
                        return false;
                    }
                    items.push(item);
                    true
                });
            }
        });
        *self.subscription.lock() = Some(subscription);
    }
}

impl<T> std::fmt::Debug for AccumulatingList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulatingList")
            .field("len", &self.state.borrow().len())
            .field("options", &self.options)
            .field("subscription", &*self.subscription.lock())
            .finish()
    }
}
