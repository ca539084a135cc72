//! One live session per capability server.
//!
//! A session owns its transport. A reader task routes responses to the
//! pending-request table by correlation id and broadcasts every inbound
//! message to stream subscribers. Each pending request is resolved exactly
//! once: by its response, by its deadline, or by session teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubgate_core::{
    CapabilitySnapshot, GatewayConfig, GatewayError, SessionState, SessionStatus, TransportKind,
};
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::handshake::HandshakeInfo;
use crate::protocol::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, METHOD_NOT_FOUND,
};
use crate::transport::Transport;

/// Consecutive request timeouts after which a session is marked Degraded.
pub const DEGRADE_AFTER_TIMEOUTS: u32 = 3;

type Completion = Result<JsonRpcResponse, GatewayError>;

#[derive(Debug)]
struct PendingRequest {
    slot: oneshot::Sender<Completion>,
    method: String,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    handshake: Option<Arc<HandshakeInfo>>,
}

#[derive(Debug)]
pub struct Session {
    server_id: String,
    kind: TransportKind,
    transport: Arc<Transport>,
    request_timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    inner: Mutex<Inner>,
    request_count: AtomicU64,
    consecutive_timeouts: AtomicU32,
    events: broadcast::Sender<Value>,
    terminated: CancellationToken,
    closing: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap an open transport and start reading from it.
    ///
    /// The session starts in `Connecting`; the handshake moves it to `Ready`.
    pub fn new(server_id: impl Into<String>, transport: Transport, config: &GatewayConfig) -> Arc<Self> {
        let now = Instant::now();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let transport = Arc::new(transport);
        let session = Arc::new(Self {
            server_id: server_id.into(),
            kind: transport.kind(),
            transport: Arc::clone(&transport),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            inner: Mutex::new(Inner {
                state: SessionState::Connecting,
                error: None,
                connected_at: None,
                last_activity: now,
                last_activity_at: Utc::now(),
                handshake: None,
            }),
            request_count: AtomicU64::new(0),
            consecutive_timeouts: AtomicU32::new(0),
            events,
            terminated: CancellationToken::new(),
            closing: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(Arc::downgrade(&session), transport));
        if let Ok(mut reader) = session.reader.lock() {
            *reader = Some(handle);
        }
        session
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn process_id(&self) -> Option<u32> {
        self.transport.process_id()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    fn with_pending<R>(&self, f: impl FnOnce(&mut HashMap<u64, PendingRequest>) -> R) -> R {
        let mut guard = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn state(&self) -> SessionState {
        self.with_inner(|inner| inner.state)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Last recorded failure reason.
    pub fn error(&self) -> Option<String> {
        self.with_inner(|inner| inner.error.clone())
    }

    /// Result of the completed handshake, if any.
    pub fn handshake(&self) -> Option<Arc<HandshakeInfo>> {
        self.with_inner(|inner| inner.handshake.clone())
    }

    pub fn capabilities(&self) -> Option<CapabilitySnapshot> {
        self.handshake().map(|info| info.capabilities.clone())
    }

    /// Publish the handshake result and move to `Ready`.
    pub(crate) fn mark_ready(&self, info: HandshakeInfo) {
        self.with_inner(|inner| {
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Ready;
            inner.error = None;
            inner.connected_at = Some(Utc::now());
            inner.handshake = Some(Arc::new(info));
        });
        self.touch();
    }

    /// Move to `Degraded` unless already closed. Returns whether the state changed.
    pub fn mark_degraded(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.with_inner(|inner| match inner.state {
            SessionState::Closed | SessionState::Degraded => false,
            _ => {
                inner.state = SessionState::Degraded;
                inner.error = Some(reason);
                true
            }
        })
    }

    fn touch(&self) {
        self.with_inner(|inner| {
            inner.last_activity = Instant::now();
            inner.last_activity_at = Utc::now();
        });
    }

    pub fn last_activity(&self) -> Instant {
        self.with_inner(|inner| inner.last_activity)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub fn outstanding(&self) -> usize {
        self.with_pending(|pending| pending.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Idle sessions have no outstanding requests, no stream subscribers, and
    /// no activity for at least `threshold`.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.outstanding() == 0 && self.subscriber_count() == 0 && self.idle_for() >= threshold
    }

    /// Whether capacity eviction may reclaim this session.
    pub fn is_evictable(&self) -> bool {
        self.outstanding() == 0 && self.subscriber_count() == 0
    }

    pub fn status(&self) -> SessionStatus {
        let (state, error, connected_at, last_activity, handshake) = self.with_inner(|inner| {
            (
                inner.state,
                inner.error.clone(),
                inner.connected_at,
                inner.last_activity_at,
                inner.handshake.clone(),
            )
        });
        SessionStatus {
            server_id: self.server_id.clone(),
            state,
            connected_at,
            last_activity: Some(last_activity),
            error,
            protocol_version: handshake.as_ref().map(|h| h.protocol_version.clone()),
            server_info: handshake.and_then(|h| h.server_info.clone()),
            request_count: self.request_count.load(Ordering::Relaxed),
            outstanding: self.outstanding(),
        }
    }

    /// Send a request and return its result, mapping JSON-RPC errors to
    /// `Protocol`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let response = self.exchange(method, params, timeout, true).await?;
        response.into_result().map_err(protocol_error)
    }

    /// Forward a caller's request, returning the response verbatim under the
    /// caller's id.
    pub async fn forward(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, GatewayError> {
        let JsonRpcRequest { id, method, params, .. } = request;
        let mut response = self
            .exchange(&method, params, self.request_timeout, true)
            .await?;
        response.id = Some(id);
        Ok(response)
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        self.ensure_open()?;
        self.touch();
        let message = JsonRpcNotification::new(method, params).into();
        self.transport.send(&message).await.map_err(Into::into)
    }

    /// Lightweight liveness check. Does not count as activity.
    ///
    /// A JSON-RPC error reply still proves the server is alive.
    pub async fn probe(&self, timeout: Duration) -> Result<(), GatewayError> {
        let method = match self.handshake() {
            Some(info) if info.declared.tools => "tools/list",
            _ => "ping",
        };
        self.exchange(method, None, timeout, false).await.map(|_| ())
    }

    fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.terminated.is_cancelled() {
            let reason = self.error().unwrap_or_else(|| "session closed".to_string());
            return Err(GatewayError::ConnectionClosed(reason));
        }
        Ok(())
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        touch: bool,
    ) -> Result<JsonRpcResponse, GatewayError> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let (slot, mut rx) = oneshot::channel();
        self.with_pending(|pending| {
            pending.insert(
                id,
                PendingRequest {
                    slot,
                    method: method.to_string(),
                },
            );
        });
        if touch {
            self.touch();
            self.request_count.fetch_add(1, Ordering::Relaxed);
        }

        // Teardown may have started between the check above and the insert.
        if self.terminated.is_cancelled() {
            return self.settle(id, rx, GatewayError::closed("session closed")).await;
        }

        let message: JsonRpcMessage = JsonRpcRequest::new(id, method, params).into();
        match tokio::time::timeout_at(deadline, self.transport.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.settle(id, rx, e.into()).await,
            Err(_) => return self.expire(id, rx, timeout).await,
        }

        let completion = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(GatewayError::closed("session dropped")),
            Err(_) => return self.expire(id, rx, timeout).await,
        };

        if completion.is_ok() {
            self.consecutive_timeouts.store(0, Ordering::Relaxed);
            if touch {
                self.touch();
            }
        }
        completion
    }

    /// Resolve a request locally with `err`, unless something else resolved
    /// it first, in which case that result wins.
    async fn settle(
        &self,
        id: u64,
        rx: oneshot::Receiver<Completion>,
        err: GatewayError,
    ) -> Completion {
        if self.with_pending(|pending| pending.remove(&id)).is_some() {
            return Err(err);
        }
        rx.await
            .unwrap_or_else(|_| Err(GatewayError::closed("session dropped")))
    }

    async fn expire(
        &self,
        id: u64,
        rx: oneshot::Receiver<Completion>,
        timeout: Duration,
    ) -> Completion {
        let result = self.settle(id, rx, GatewayError::Timeout(timeout)).await;
        if matches!(result, Err(GatewayError::Timeout(_))) {
            let count = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(server_id = %self.server_id, request_id = id, count, "request timed out");
            if count >= DEGRADE_AFTER_TIMEOUTS
                && self.mark_degraded(format!("{count} consecutive request timeouts"))
            {
                tracing::warn!(server_id = %self.server_id, count, "session degraded after repeated timeouts");
            }
        }
        result
    }

    fn complete(&self, response: JsonRpcResponse) {
        let id = match response.id {
            Some(JsonRpcId::Number(n)) => u64::try_from(n).ok(),
            Some(JsonRpcId::String(ref s)) => s.parse().ok(),
            None => None,
        };
        let Some(id) = id else {
            tracing::debug!(server_id = %self.server_id, "response without a usable id");
            return;
        };
        match self.with_pending(|pending| pending.remove(&id)) {
            Some(pending) => {
                tracing::trace!(server_id = %self.server_id, request_id = id, method = %pending.method, "response received");
                let _ = pending.slot.send(Ok(response));
            }
            None => {
                tracing::debug!(server_id = %self.server_id, request_id = id, "late or unknown response dropped");
            }
        }
    }

    fn fail_pending(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> =
            self.with_pending(|pending| pending.drain().map(|(_, p)| p).collect());
        let count = drained.len();
        for pending in drained {
            let _ = pending
                .slot
                .send(Err(GatewayError::closed(reason.to_string())));
        }
        count
    }

    async fn dispatch(&self, message: JsonRpcMessage) {
        let _ = self.events.send(message.to_value());

        match message {
            JsonRpcMessage::Response(response) => self.complete(response),
            JsonRpcMessage::Request(request) => {
                let reply = if request.method == "ping" {
                    JsonRpcResponse::success(Some(request.id), json!({}))
                } else {
                    JsonRpcResponse::failure(
                        Some(request.id),
                        JsonRpcError::new(
                            METHOD_NOT_FOUND,
                            format!("Method not found: {}", request.method),
                        ),
                    )
                };
                if let Err(e) = self.transport.send(&reply.into()).await {
                    tracing::debug!(server_id = %self.server_id, error = %e, "failed to answer server request");
                }
            }
            JsonRpcMessage::Notification(_) => {}
        }
    }

    /// The transport failed underneath us.
    fn transport_lost(&self, reason: &str) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        self.mark_degraded(reason);
        let failed = self.fail_pending(reason);
        self.terminated.cancel();
        tracing::warn!(server_id = %self.server_id, reason, failed, "session transport lost");
    }

    /// Tear the session down. Runs once; later calls return immediately.
    ///
    /// Outstanding requests fail with `ConnectionClosed` and the transport is
    /// closed (terminating a subprocess server).
    pub async fn close(&self, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.with_inner(|inner| {
            inner.state = SessionState::Closed;
            if inner.error.is_none() {
                inner.error = Some(reason.to_string());
            }
        });
        self.terminated.cancel();
        let failed = self.fail_pending(reason);
        let reader = self.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(reader) = reader {
            reader.abort();
        }
        self.transport.close().await;
        tracing::debug!(server_id = %self.server_id, reason, failed, "session closed");
    }

    /// Receive every message this session reads from now on.
    pub fn subscribe(self: &Arc<Self>) -> SessionSubscription {
        SessionSubscription {
            receiver: self.events.subscribe(),
            terminated: self.terminated.clone(),
            session: Arc::downgrade(self),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(reader) = reader.take() {
                reader.abort();
            }
        }
    }
}

fn protocol_error(error: JsonRpcError) -> GatewayError {
    GatewayError::Protocol {
        code: error.code,
        message: error.message,
        data: error.data,
    }
}

async fn read_loop(session: Weak<Session>, transport: Arc<Transport>) {
    loop {
        let received = transport.receive().await;
        let Some(session) = session.upgrade() else {
            return;
        };
        match received {
            Ok(message) => session.dispatch(message).await,
            Err(e) => {
                session.transport_lost(&e.to_string());
                return;
            }
        }
    }
}

/// A stream consumer's view of a session.
///
/// Holding one keeps the session from idle eviction. Dropping it detaches
/// only this consumer.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<Value>,
    terminated: CancellationToken,
    session: Weak<Session>,
}

impl SessionSubscription {
    pub async fn recv(&mut self) -> Result<Value, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Cancelled when the session's transport fails or the session closes.
    pub fn terminated(&self) -> &CancellationToken {
        &self.terminated
    }

    pub fn reason(&self) -> String {
        self.session
            .upgrade()
            .and_then(|s| s.error())
            .unwrap_or_else(|| "session closed".to_string())
    }
}
