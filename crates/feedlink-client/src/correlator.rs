//! Request/ack correlation.
//!
//! Every request gets a fresh id from a per-session counter. The first ack
//! carrying that id resolves the pending entry; later acks for the same id
//! find nothing and are ignored. An entry is resolved through either a
//! oneshot future ([`PendingAck`]) or a continuation that runs inline on the
//! task that processes the ack, before the next inbound frame.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use feedlink_core::protocol::{AckError, RequestId};
use feedlink_core::{LiveError, Result};

/// Continuation invoked with the outcome of a request.
pub type Continuation = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

enum Responder {
    Future(oneshot::Sender<Result<Value>>),
    Inline(Continuation),
}

impl Responder {
    fn respond(self, outcome: Result<Value>) {
        match self {
            // receiver gone means the caller stopped waiting
            Self::Future(tx) => {
                let _ = tx.send(outcome);
            }
            Self::Inline(continuation) => continuation(outcome),
        }
    }
}

struct Pending {
    event: String,
    responder: Responder,
}

/// Table of in-flight requests for one session.
#[derive(Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Pending>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a request resolved through a future.
    pub fn register(&self, event: &str) -> (RequestId, PendingAck) {
        let id = self.allocate();
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(
            id,
            Pending {
                event: event.to_owned(),
                responder: Responder::Future(tx),
            },
        );
        (id, PendingAck { id, rx })
    }

    /// Register a request resolved by running `continuation`.
    pub fn register_inline(&self, event: &str, continuation: Continuation) -> RequestId {
        let id = self.allocate();
        let _ = self.pending.lock().insert(
            id,
            Pending {
                event: event.to_owned(),
                responder: Responder::Inline(continuation),
            },
        );
        id
    }

    /// Resolve the entry for `id` from an ack. Returns `false` when no entry
    /// was pending (unknown id or already resolved).
    ///
    /// An error body resolves as [`LiveError::Rejected`].
    pub fn resolve(&self, id: RequestId, data: Value, error: Option<AckError>) -> bool {
        let Some(pending) = self.pending.lock().remove(&id) else {
            return false;
        };
        let outcome = match error {
            None => Ok(data),
            Some(AckError { code, message }) => Err(LiveError::Rejected {
                event: pending.event,
                code,
                message,
            }),
        };
        pending.responder.respond(outcome);
        true
    }

    /// Drop the entry for `id` without resolving it.
    pub fn forget(&self, id: RequestId) -> bool {
        let removed = self.pending.lock().remove(&id);
        removed.is_some()
    }

    /// Fail every pending entry with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: &LiveError) -> usize {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            pending.responder.respond(Err(error.clone()));
        }
        count
    }

    /// Number of requests still awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Future resolving with the ack payload of one request.
///
/// Fails with [`LiveError::SessionClosed`] if the entry is dropped without a
/// reply.
#[derive(Debug)]
pub struct PendingAck {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingAck {
    /// Correlation id of the request.
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingAck {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(LiveError::SessionClosed)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn ids_are_fresh() {
        let c = Correlator::new();
        let (a, _ra) = c.register("$ping");
        let (b, _rb) = c.register("$ping");
        let d = c.register_inline("$subscribe", Box::new(|_| {}));
        assert_ne!(a, b);
        assert_ne!(b, d);
        assert_eq!(c.pending_count(), 3);
    }

    #[tokio::test]
    async fn ack_resolves_future() {
        let c = Correlator::new();
        let (id, ack) = c.register("$subscribe");
        assert!(c.resolve(id, json!({"cursor": "c1"}), None));
        assert_eq!(ack.await.unwrap(), json!({"cursor": "c1"}));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_ack_is_ignored() {
        let c = Correlator::new();
        let (id, ack) = c.register("$subscribe");
        assert!(c.resolve(id, json!("first"), None));
        assert!(!c.resolve(id, json!("second"), None));
        assert_eq!(ack.await.unwrap(), json!("first"));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let c = Correlator::new();
        assert!(!c.resolve(42, Value::Null, None));
    }

    #[tokio::test]
    async fn error_body_becomes_rejected() {
        let c = Correlator::new();
        let (id, ack) = c.register("$subscribe");
        let error = AckError {
            code: "UNKNOWN_FEED".into(),
            message: "no such feed".into(),
        };
        assert!(c.resolve(id, Value::Null, Some(error)));
        assert_matches!(
            ack.await,
            Err(LiveError::Rejected { event, code, .. }) if event == "$subscribe" && code == "UNKNOWN_FEED"
        );
    }

    #[test]
    fn inline_continuation_runs_during_resolve() {
        let c = Correlator::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let id = c.register_inline(
            "$subscribe",
            Box::new(move |outcome| *sink.lock() = Some(outcome)),
        );
        assert!(c.resolve(id, json!({"cursor": "c9"}), None));
        assert_eq!(*seen.lock(), Some(Ok(json!({"cursor": "c9"}))));
    }

    #[tokio::test]
    async fn fail_all_fails_every_entry() {
        let c = Correlator::new();
        let (_, ack) = c.register("$ping");
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _ = c.register_inline(
            "$subscribe",
            Box::new(move |outcome| *sink.lock() = Some(outcome)),
        );
        assert_eq!(c.fail_all(&LiveError::SessionClosed), 2);
        assert_eq!(ack.await, Err(LiveError::SessionClosed));
        assert_eq!(*seen.lock(), Some(Err(LiveError::SessionClosed)));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn continuation_may_register_new_requests() {
        let c = Arc::new(Correlator::new());
        let inner = Arc::clone(&c);
        let id = c.register_inline(
            "$subscribe",
            Box::new(move |_| {
                let _ = inner.register_inline("$subscribe", Box::new(|_| {}));
            }),
        );
        assert!(c.resolve(id, Value::Null, None));
        assert_eq!(c.pending_count(), 1);
    }

    #[tokio::test]
    async fn forgotten_entry_resolves_closed() {
        let c = Correlator::new();
        let (id, ack) = c.register("$ping");
        assert!(c.forget(id));
        assert!(!c.forget(id));
        assert_eq!(ack.await, Err(LiveError::SessionClosed));
    }
}
