//! Transport session: one duplex connection per identity.
//!
//! The session owns the physical link, drives it from a single background
//! task, and reconnects with bounded exponential backoff when it drops.
//! Inbound acks go to the [`Correlator`]; inbound events are handed to the
//! session's [`SubscriptionRegistry`] without interpreting the channel key.
//! Frames are processed one at a time in wire order, so an ack continuation
//! always finishes before the next frame is looked at.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use feedlink_core::protocol::{self, ClientFrame, RequestId, ServerFrame};
use feedlink_core::retry::Backoff;
use feedlink_core::{ConnectionId, Identity, LiveError, Result};
use feedlink_settings::LinkSettings;

use crate::correlator::{Continuation, Correlator, PendingAck};
use crate::registry::{ResubscribePolicy, SubscriptionRegistry};
use crate::transport::Connector;

/// Connection state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// Establishing (or re-establishing) the connection.
    Connecting,
    /// Connected; requests and notices can be sent.
    Open,
    /// Closed for good. A new session is needed.
    Closed,
}

/// Behavior knobs for a [`TransportSession`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Reconnect delay policy.
    pub backoff: Backoff,
    /// Whether to reconnect after the link drops or a connect fails.
    pub reconnect: bool,
    /// Consecutive failed connects before the session closes.
    pub max_attempts: Option<u32>,
    /// Ack timeout for [`TransportSession::request`]. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// What the registry does with live handles when the link drops.
    pub resubscribe: ResubscribePolicy,
    /// Frames that may queue for the writer before sends are refused.
    pub outbound_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&LinkSettings::default())
    }
}

impl From<&LinkSettings> for SessionOptions {
    fn from(settings: &LinkSettings) -> Self {
        let reconnect = &settings.reconnect;
        Self {
            backoff: Backoff {
                base_delay_ms: reconnect.base_delay_ms,
                max_delay_ms: reconnect.max_delay_ms,
                jitter_factor: reconnect.jitter_factor,
            },
            reconnect: reconnect.enabled,
            max_attempts: reconnect.max_attempts,
            request_timeout: (settings.requests.timeout_ms > 0)
                .then(|| Duration::from_millis(settings.requests.timeout_ms)),
            resubscribe: if settings.subscriptions.resubscribe_on_reconnect {
                ResubscribePolicy::Automatic
            } else {
                ResubscribePolicy::Manual
            },
            outbound_capacity: settings.connection.outbound_capacity,
        }
    }
}

/// One logical connection to the backend for a single identity.
pub struct TransportSession {
    id: ConnectionId,
    identity: Identity,
    options: SessionOptions,
    liveness: watch::Sender<Liveness>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    correlator: Correlator,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
    dropped_frames: AtomicU64,
}

impl TransportSession {
    /// Start a session for `identity` and return immediately.
    ///
    /// The session begins in [`Liveness::Connecting`]; the connection is
    /// established by a background task, so this must be called from within
    /// a tokio runtime. Dropping the last handle stops the task.
    pub fn open(
        identity: Identity,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let (liveness, _) = watch::channel(Liveness::Connecting);
        let cancel = CancellationToken::new();
        let session = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            id: ConnectionId::new(),
            identity,
            registry: SubscriptionRegistry::new(weak.clone(), options.resubscribe),
            options,
            liveness,
            outbound: Mutex::new(None),
            correlator: Correlator::new(),
            cancel: cancel.clone(),
            dropped_frames: AtomicU64::new(0),
        });

        let span = info_span!(
            "session",
            session_id = %session.id,
            scope = %session.identity.scope(),
        );
        let driver = Driver {
            session: Arc::downgrade(&session),
            connector,
            cancel,
            identity: session.identity.clone(),
            options: session.options.clone(),
        };
        let _ = tokio::spawn(driver.run().instrument(span));
        session
    }

    /// Client-side id of this session, used in logs.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity the session was opened for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Options the session was opened with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The registry bound to this session.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Current connection state.
    pub fn liveness(&self) -> Liveness {
        *self.liveness.borrow()
    }

    /// Whether requests can currently be sent.
    pub fn is_open(&self) -> bool {
        self.liveness() == Liveness::Open
    }

    /// Observe connection state changes.
    pub fn watch_liveness(&self) -> watch::Receiver<Liveness> {
        self.liveness.subscribe()
    }

    /// Wait until the session is open.
    ///
    /// Fails with [`LiveError::SessionClosed`] if the session closes first.
    pub async fn wait_open(&self) -> Result<()> {
        let mut rx = self.liveness.subscribe();
        let reached = rx
            .wait_for(|state| *state != Liveness::Connecting)
            .await
            .map(|state| *state);
        match reached {
            Ok(Liveness::Open) => Ok(()),
            _ => Err(LiveError::SessionClosed),
        }
    }

    /// Requests still awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Frames refused because the outbound queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Send a request and return a future for its ack payload.
    ///
    /// Fails with [`LiveError::NotConnected`] right away when the session is
    /// not open or the outbound queue is full.
    pub fn send_request(&self, event: &str, payload: Value) -> Result<PendingAck> {
        let slot = self.outbound.lock();
        let Some(tx) = slot.as_ref() else {
            return Err(LiveError::NotConnected);
        };
        let (id, ack) = self.correlator.register(event);
        self.transmit(tx, id, event, payload)?;
        Ok(ack)
    }

    /// Send a request whose ack is handed to `continuation`.
    ///
    /// The continuation runs on the connection task as soon as the ack is
    /// read, before any later frame is processed. If the link drops first it
    /// runs with [`LiveError::SessionClosed`]. When this returns an error the
    /// continuation is dropped without being called.
    pub fn send_request_with(
        &self,
        event: &str,
        payload: Value,
        continuation: Continuation,
    ) -> Result<RequestId> {
        let slot = self.outbound.lock();
        let Some(tx) = slot.as_ref() else {
            return Err(LiveError::NotConnected);
        };
        let id = self.correlator.register_inline(event, continuation);
        self.transmit(tx, id, event, payload)?;
        Ok(id)
    }

    /// Send a request and wait for its ack, honoring the request timeout.
    ///
    /// An error ack surfaces as [`LiveError::Rejected`]. On timeout the
    /// pending entry is forgotten, so a late ack is ignored.
    pub async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        let ack = self.send_request(event, payload)?;
        let Some(limit) = self.options.request_timeout else {
            return ack.await;
        };
        let id = ack.id();
        if let Ok(outcome) = tokio::time::timeout(limit, ack).await {
            outcome
        } else {
            let _ = self.correlator.forget(id);
            warn!(request_id = id, event, "request timed out");
            Err(LiveError::Timeout {
                event: event.to_owned(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    /// Fire-and-forget notice. Returns `false` when it could not be queued.
    pub fn send_notice(&self, event: &str, payload: Value) -> bool {
        let frame = ClientFrame::Notice {
            event: event.to_owned(),
            data: payload,
        };
        let text = match protocol::encode(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(event, error = %err, "failed to encode notice");
                return false;
            }
        };

        let slot = self.outbound.lock();
        let Some(tx) = slot.as_ref() else {
            debug!(event, "not connected, notice dropped");
            return false;
        };
        match tx.try_send(text) {
            Ok(()) => {
                debug!(event, "notice sent");
                true
            }
            Err(err) => {
                let _ = self.refused(err);
                false
            }
        }
    }

    /// Close the session for good.
    ///
    /// Pending requests fail with [`LiveError::SessionClosed`] and every
    /// handle in the registry is discarded. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.mark_closed();
    }

    fn transmit(
        &self,
        tx: &mpsc::Sender<String>,
        id: RequestId,
        event: &str,
        payload: Value,
    ) -> Result<()> {
        let frame = ClientFrame::Request {
            id,
            event: event.to_owned(),
            data: payload,
        };
        let sent = protocol::encode(&frame)
            .and_then(|text| tx.try_send(text).map_err(|err| self.refused(err)));
        if let Err(err) = sent {
            let _ = self.correlator.forget(id);
            return Err(err);
        }
        debug!(request_id = id, event, "request sent");
        Ok(())
    }

    fn refused(&self, err: TrySendError<String>) -> LiveError {
        if let TrySendError::Full(_) = err {
            let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "outbound queue full, frame refused");
        }
        LiveError::NotConnected
    }

    fn handle_frame(&self, text: &str) {
        match protocol::decode::<ServerFrame>(text) {
            Ok(ServerFrame::Ack { id, data, error }) => {
                if !self.correlator.resolve(id, data, error) {
                    debug!(request_id = id, "ack for unknown or settled request, ignoring");
                }
            }
            Ok(ServerFrame::Event { channel, data }) => {
                let _ = self.registry.dispatch(&channel, data);
            }
            Err(err) => warn!(error = %err, "undecodable frame, skipping"),
        }
    }

    fn link_opened(&self, outbound: mpsc::Sender<String>) -> bool {
        {
            let mut slot = self.outbound.lock();
            if self.cancel.is_cancelled() {
                return false;
            }
            *slot = Some(outbound);
        }
        let _ = self.liveness.send_if_modified(|state| {
            if *state == Liveness::Closed {
                return false;
            }
            *state = Liveness::Open;
            true
        });
        info!("connected");
        self.registry.link_opened();
        true
    }

    fn link_lost(&self) {
        let _ = self.outbound.lock().take();
        let _ = self.liveness.send_if_modified(|state| {
            if *state != Liveness::Open {
                return false;
            }
            *state = Liveness::Connecting;
            true
        });
        let failed = self.correlator.fail_all(&LiveError::SessionClosed);
        self.registry.link_lost();
        warn!(failed_requests = failed, "link lost");
    }

    fn mark_closed(&self) {
        let _ = self.outbound.lock().take();
        if self.liveness.send_replace(Liveness::Closed) == Liveness::Closed {
            return;
        }
        self.registry.session_closed();
        let failed = self.correlator.fail_all(&LiveError::SessionClosed);
        info!(failed_requests = failed, "session closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // the registry may outlive the session through adapters
        self.cancel.cancel();
        self.mark_closed();
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("liveness", &self.liveness())
            .finish_non_exhaustive()
    }
}

enum LinkEnd {
    Lost,
    Cancelled,
}

/// Background task owning the connect / read / reconnect loop.
struct Driver {
    session: Weak<TransportSession>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    identity: Identity,
    options: SessionOptions,
}

impl Driver {
    async fn run(self) {
        let mut failures: u32 = 0;
        loop {
            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.identity, self.options.outbound_capacity) => result,
            };

            match connected {
                Ok(link) => {
                    failures = 0;
                    let Some(session) = self.session.upgrade() else {
                        break;
                    };
                    if !session.link_opened(link.outbound) {
                        break;
                    }
                    drop(session);

                    if let LinkEnd::Cancelled = self.pump(link.inbound).await {
                        break;
                    }
                    let Some(session) = self.session.upgrade() else {
                        break;
                    };
                    if !self.options.reconnect {
                        warn!("link lost, reconnect disabled");
                        break;
                    }
                    session.link_lost();
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    if !self.options.reconnect {
                        warn!(error = %err, "connect failed, reconnect disabled");
                        break;
                    }
                    if self.options.max_attempts.is_some_and(|max| failures >= max) {
                        warn!(error = %err, attempts = failures, "connect failed, giving up");
                        break;
                    }
                    warn!(error = %err, attempt = failures, "connect failed");
                }
            }

            let delay = self.options.backoff.delay(failures, rand::random::<f64>());
            debug!(?delay, attempt = failures, "reconnecting after delay");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(session) = self.session.upgrade() {
            session.mark_closed();
        }
    }

    async fn pump(&self, mut inbound: mpsc::Receiver<String>) -> LinkEnd {
        loop {
            let text = tokio::select! {
                () = self.cancel.cancelled() => return LinkEnd::Cancelled,
                frame = inbound.recv() => match frame {
                    Some(text) => text,
                    None => return LinkEnd::Lost,
                },
            };
            let Some(session) = self.session.upgrade() else {
                return LinkEnd::Cancelled;
            };
            session.handle_frame(&text);
        }
    }
}
