//! Latest-value adapter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use feedlink_core::{Feed, FeedName, Result};

use crate::registry::{Subscription, SubscriptionRegistry};

/// Holds the latest payload delivered on a feed.
///
/// Starts at `default`; each delivery replaces the value wholesale, and a
/// `null` payload resets it to `default`. Payloads that do not decode as
/// `T` leave the value untouched.
pub struct LatestValue<T> {
    registry: Arc<SubscriptionRegistry>,
    state: Arc<watch::Sender<T>>,
    default: T,
    mounts: Arc<AtomicU64>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T> LatestValue<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Subscribe to `name` with an initial `default` value.
    pub fn new(registry: &Arc<SubscriptionRegistry>, name: FeedName, default: T) -> Self {
        let (state, _) = watch::channel(default.clone());
        let latest = Self {
            registry: Arc::clone(registry),
            state: Arc::new(state),
            default,
            mounts: Arc::new(AtomicU64::new(0)),
            subscription: Mutex::new(None),
        };
        latest.mount(name);
        latest
    }

    /// Subscribe to the typed feed `F`.
    pub fn for_feed<F>(registry: &Arc<SubscriptionRegistry>, default: T) -> Result<Self>
    where
        F: Feed<Payload = T>,
    {
        Ok(Self::new(registry, F::feed_name()?, default))
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.state.borrow().clone()
    }

    /// Observe value changes.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    /// Feed currently subscribed to, if the subscription is still live.
    pub fn name(&self) -> Option<FeedName> {
        self.subscription
            .lock()
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| s.name().clone())
    }

    /// Switch to another feed, releasing the current subscription first.
    ///
    /// The held value carries over until the new feed delivers. Passing the
    /// current name subscribes again if the subscription was lost.
    pub fn set_name(&self, name: FeedName) {
        if self.name().as_ref() == Some(&name) {
            return;
        }
        self.mount(name);
    }

    /// Subscribe again to the last feed if its subscription was lost, as
    /// happens to every handle on link loss under the manual policy.
    ///
    /// Returns `false` when the subscription is still live.
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

        let mount = self.mounts.load(Ordering::Acquire);
        let mounts = Arc::clone(&self.mounts);
        let state = Arc::clone(&self.state);
        let default = self.default.clone();
        let feed = name.clone();
        let subscription = self.registry.subscribe(name, move |payload: Value| {
            let next = if payload.is_null() {
                default.clone()
            } else {
                match serde_json::from_value::<T>(payload) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(feed = %feed, error = %err, "undecodable payload, keeping previous value");
                        return;
                    }
                }
            };
            let _ = state.send_if_modified(|value| {
                if mounts.load(Ordering::Acquire) != mount {
                    return false;
                }
                *value = next;
                true
            });
        });
        *self.subscription.lock() = Some(subscription);
    }
}

impl<T> std::fmt::Debug for LatestValue<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestValue")
            .field("value", &*self.state.borrow())
            .field("subscription", &*self.subscription.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::adapters::testing::{
        connected, expect_subscribe, expect_unsubscribe, feed, key, wait_bound,
    };
    use feedlink_core::feeds::ServerStatusUpdate;
    use serde_json::json;

    #[tokio::test]
    async fn replaces_value_and_resets_on_null() {
        let (session, mut peer, _server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("counter"), 0_i64);
        let mut rx = latest.watch();
        assert_eq!(latest.get(), 0);

        let id = expect_subscribe(&mut peer, "counter").await;
        assert!(peer.ack(id, json!({"cursor": "c1"})).await);
        let channel = key("counter", "c1");

        assert!(peer.event(&channel, json!(5)).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 5);

        assert!(peer.event(&channel, Value::Null).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 0);

        assert!(peer.event(&channel, json!(7)).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 7);
        assert_eq!(latest.get(), 7);
    }

    #[tokio::test]
    async fn undecodable_payload_keeps_value() {
        let (session, mut peer, _server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("counter"), 1_i64);
        let mut rx = latest.watch();
        let id = expect_subscribe(&mut peer, "counter").await;
        assert!(peer.ack(id, json!({"cursor": "c1"})).await);
        let channel = key("counter", "c1");

        assert!(peer.event(&channel, json!("not a number")).await);
        assert!(peer.event(&channel, json!(9)).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 9);
    }

    #[tokio::test]
    async fn rename_releases_previous_subscription_first() {
        let (session, mut peer, _server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("a"), 0_i64);
        let id = expect_subscribe(&mut peer, "a").await;
        assert!(peer.ack(id, json!({"cursor": "ca"})).await);
        let registry = Arc::clone(session.registry());
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while registry.bound_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        latest.set_name(feed("b"));
        let notice = expect_unsubscribe(&mut peer).await;
        assert_eq!(notice, json!({"name": "a", "cursor": "ca"}));
        let _ = expect_subscribe(&mut peer, "b").await;
        assert_eq!(latest.name(), Some(feed("b")));
        assert_eq!(session.registry().handle_count(), 1);
    }

    #[tokio::test]
    async fn drop_releases_subscription() {
        let (session, mut peer, _server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("a"), 0_i64);
        let id = expect_subscribe(&mut peer, "a").await;
        drop(latest);
        assert_eq!(session.registry().handle_count(), 0);
        assert!(peer.ack(id, json!({"cursor": "ca"})).await);
        let notice = expect_unsubscribe(&mut peer).await;
        assert_eq!(notice["cursor"], "ca");
    }

    #[tokio::test(start_paused = true)]
    async fn same_name_subscribes_again_after_link_loss() {
        let (session, mut peer, mut server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("a"), 0_i64);
        let mut rx = latest.watch();
        let id = expect_subscribe(&mut peer, "a").await;
        assert!(peer.ack(id, json!({"cursor": "c1"})).await);
        wait_bound(session.registry(), 1).await;

        drop(peer);
        let mut peer = server.accept().await.unwrap();
        session.wait_open().await.unwrap();
        assert_eq!(latest.name(), None);

        latest.set_name(feed("a"));
        let id = expect_subscribe(&mut peer, "a").await;
        assert!(peer.ack(id, json!({"cursor": "c2"})).await);
        assert!(peer.event(&key("a", "c2"), json!(4)).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 4);
        assert_eq!(latest.name(), Some(feed("a")));
        assert!(!latest.remount());
    }

    #[tokio::test]
    async fn rename_ignores_deliveries_for_previous_feed() {
        let (session, mut peer, _server) = connected().await;
        let latest = LatestValue::new(session.registry(), feed("a"), 0_i64);
        let mut rx = latest.watch();
        let id = expect_subscribe(&mut peer, "a").await;
        assert!(peer.ack(id, json!({"cursor": "ca"})).await);
        wait_bound(session.registry(), 1).await;

        latest.set_name(feed("b"));
        let _ = expect_unsubscribe(&mut peer).await;
        let id = expect_subscribe(&mut peer, "b").await;
        assert!(!session.registry().dispatch(key("a", "ca").as_str(), json!(99)));
        assert_eq!(latest.get(), 0);

        assert!(peer.ack(id, json!({"cursor": "cb"})).await);
        assert!(peer.event(&key("b", "cb"), json!(3)).await);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
    }

    #[tokio::test]
    async fn mount_after_session_drop_is_inert() {
        let (session, _peer, _server) = connected().await;
        let registry = Arc::clone(session.registry());
        drop(session);

        let latest = LatestValue::new(&registry, feed("x"), 0_i64);
        assert_eq!(latest.name(), None);
        assert_eq!(registry.handle_count(), 0);
    }

    #[tokio::test]
    async fn typed_feed_decodes_payload() {
        let (session, mut peer, _server) = connected().await;
        let latest =
            LatestValue::for_feed::<ServerStatusUpdate>(session.registry(), HashMap::new()).unwrap();
        let mut rx = latest.watch();
        let id = expect_subscribe(&mut peer, "onServerStatusUpdate").await;
        assert!(peer.ack(id, json!({"cursor": "c1"})).await);
        assert!(
            peer.event(
                &key("onServerStatusUpdate", "c1"),
                json!({"srv-1": {"hostname": "a"}})
            )
            .await
        );
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()["srv-1"]["hostname"], "a");
    }
}
