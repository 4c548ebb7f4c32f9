//! Consumer adapters over the registry.
//!
//! - [`LatestValue`]: keeps only the most recent payload
//! - [`AccumulatingList`]: appends every payload that passes a filter
//!
//! Both expose their state through a `tokio::sync::watch` channel, hold one
//! subscription at a time, and release it when dropped or when the feed
//! name changes.

mod latest;
mod list;

pub use latest::LatestValue;
pub use list::{AccumulatingList, ListOptions};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;

    use feedlink_core::protocol::{ClientFrame, RequestId, SUBSCRIBE_EVENT, UNSUBSCRIBE_EVENT};
    use feedlink_core::{ChannelKey, Cursor, FeedName, Identity};

    use crate::registry::SubscriptionRegistry;
    use crate::session::{SessionOptions, TransportSession};
    use crate::transport::{MemoryConnector, MemoryPeer, MemoryServer};

    pub(crate) fn feed(name: &str) -> FeedName {
        FeedName::new(name).unwrap()
    }

    pub(crate) fn key(name: &str, cursor: &str) -> ChannelKey {
        ChannelKey::new(&feed(name), &Cursor::from(cursor))
    }

    pub(crate) async fn connected() -> (Arc<TransportSession>, MemoryPeer, MemoryServer) {
        let (connector, mut server) = MemoryConnector::pair();
        let session = TransportSession::open(
            Identity::new("tok", "ws_1"),
            SessionOptions::default(),
            Arc::new(connector),
        );
        let peer = server.accept().await.unwrap();
        session.wait_open().await.unwrap();
        (session, peer, server)
    }

    pub(crate) async fn expect_subscribe(peer: &mut MemoryPeer, name: &str) -> RequestId {
        match peer.recv().await {
            Some(ClientFrame::Request { id, event, data }) if event == SUBSCRIBE_EVENT => {
                assert_eq!(data["name"], name);
                id
            }
            other => panic!("expected $subscribe, got {other:?}"),
        }
    }

    pub(crate) async fn expect_unsubscribe(peer: &mut MemoryPeer) -> Value {
        match peer.recv().await {
            Some(ClientFrame::Notice { event, data }) if event == UNSUBSCRIBE_EVENT => data,
            other => panic!("expected $unsubscribe, got {other:?}"),
        }
    }

    pub(crate) async fn wait_bound(registry: &SubscriptionRegistry, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.bound_count() != count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }
}
