//! Transport-agnostic proxy operations.
//!
//! `Gateway` turns caller intents (forward this message, call this tool,
//! stream this server) into session traffic. The HTTP adapter is a thin
//! layer over it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubgate_core::{CapabilitySnapshot, GatewayError, GatewayHealth, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::manager::ConnectionManager;
use crate::protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse};
use crate::session::SessionSubscription;

/// Interval between keep-alive events on an idle stream.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const STREAM_BUFFER: usize = 64;

/// Outcome of forwarding one caller message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyReply {
    /// The server's response, under the caller's id.
    Response(JsonRpcResponse),
    /// The message was a notification; nothing comes back.
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    pub tool: String,
    pub content: Vec<Value>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub contents: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessages {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Connected,
    Message,
    Ping,
    Error,
}

impl StreamEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Message => "message",
            Self::Ping => "ping",
            Self::Error => "error",
        }
    }
}

/// One event on a server's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub server_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    fn new(kind: StreamEventKind, server_id: &str, data: Value) -> Self {
        Self {
            kind,
            server_id: server_id.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(server_id: &str) -> Self {
        Self::new(StreamEventKind::Connected, server_id, json!({"status": "connected"}))
    }

    pub fn message(server_id: &str, message: Value) -> Self {
        Self::new(StreamEventKind::Message, server_id, message)
    }

    pub fn ping(server_id: &str) -> Self {
        Self::new(StreamEventKind::Ping, server_id, Value::Null)
    }

    pub fn error(server_id: &str, message: &str) -> Self {
        Self::new(StreamEventKind::Error, server_id, json!({"error": message}))
    }

    /// An error event ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, StreamEventKind::Error)
    }
}

#[derive(Debug, Clone)]
pub struct Gateway {
    manager: Arc<ConnectionManager>,
    keepalive: Duration,
}

impl Gateway {
    pub const fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Forward one caller message and wait for the matching response.
    ///
    /// JSON-RPC error responses are returned as responses, not as errors.
    pub async fn forward_message(
        &self,
        server_id: &str,
        message: Value,
    ) -> Result<ProxyReply, GatewayError> {
        let Value::Object(mut message) = message else {
            return Err(GatewayError::InvalidRequest(
                "message must be a JSON object".into(),
            ));
        };
        let method = match message.remove("method") {
            Some(Value::String(method)) if !method.is_empty() => method,
            _ => {
                return Err(GatewayError::InvalidRequest(
                    "message must include a method".into(),
                ));
            }
        };
        let params = message.remove("params");

        let id = match message.remove("id") {
            None | Some(Value::Null) => None,
            Some(id) => Some(serde_json::from_value::<JsonRpcId>(id).map_err(|_| {
                GatewayError::InvalidRequest("id must be a number or a string".into())
            })?),
        };

        let session = self.manager.acquire(server_id).await?;
        match id {
            None => {
                session.notify(&method, params).await?;
                Ok(ProxyReply::Accepted)
            }
            Some(id) => {
                let response = session
                    .forward(JsonRpcRequest::new(id, method, params))
                    .await?;
                Ok(ProxyReply::Response(response))
            }
        }
    }

    /// Call a tool. A JSON-RPC error becomes an `is_error` result.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResponse, GatewayError> {
        let session = self.manager.acquire(server_id).await?;
        let params = json!({"name": tool, "arguments": arguments});

        match session.request("tools/call", Some(params)).await {
            Ok(mut result) => Ok(ToolCallResponse {
                tool: tool.to_string(),
                content: match result.get_mut("content").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                is_error: result
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                structured_content: result.get_mut("structuredContent").map(Value::take),
            }),
            Err(GatewayError::Protocol { message, .. }) => Ok(ToolCallResponse {
                tool: tool.to_string(),
                content: vec![json!({"type": "text", "text": message})],
                is_error: true,
                structured_content: None,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
    ) -> Result<ResourceContents, GatewayError> {
        let session = self.manager.acquire(server_id).await?;
        let mut result = session
            .request("resources/read", Some(json!({"uri": uri})))
            .await?;

        let contents = match result.get_mut("contents").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let mime_type = contents
            .first()
            .and_then(|c| c.get("mimeType"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                session
                    .capabilities()
                    .and_then(|caps| caps.resource(uri).and_then(|r| r.mime_type.clone()))
            });

        Ok(ResourceContents {
            uri: uri.to_string(),
            contents,
            mime_type,
        })
    }

    pub async fn get_prompt(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<PromptMessages, GatewayError> {
        let session = self.manager.acquire(server_id).await?;
        let mut result = session
            .request(
                "prompts/get",
                Some(json!({"name": name, "arguments": arguments})),
            )
            .await?;

        Ok(PromptMessages {
            name: name.to_string(),
            description: result
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            messages: match result.get_mut("messages").map(Value::take) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
        })
    }

    /// Capability snapshot of the live session, connecting if needed.
    pub async fn capabilities(&self, server_id: &str) -> Result<CapabilitySnapshot, GatewayError> {
        let session = self.manager.acquire(server_id).await?;
        session
            .capabilities()
            .ok_or_else(|| GatewayError::handshake("session has no capability snapshot"))
    }

    /// Stream every message the server's session receives.
    ///
    /// The first event is `connected`. The stream ends after an `error`
    /// event when the session fails, or silently when `cancel` fires or the
    /// receiver is dropped. Ending a stream never affects the session.
    pub async fn subscribe(
        &self,
        server_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, GatewayError> {
        let session = self.manager.acquire(server_id).await?;
        let subscription = session.subscribe();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(forward_stream(
            server_id.to_string(),
            subscription,
            tx,
            cancel,
            self.keepalive,
        ));
        Ok(rx)
    }

    /// Never creates a session.
    pub async fn status(&self, server_id: &str) -> SessionStatus {
        self.manager.status(server_id).await
    }

    pub async fn health(&self) -> GatewayHealth {
        self.manager.health().await
    }
}

async fn forward_stream(
    server_id: String,
    mut subscription: SessionSubscription,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    keepalive: Duration,
) {
    if tx.send(StreamEvent::connected(&server_id)).await.is_err() {
        return;
    }
    let terminated = subscription.terminated().clone();
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            received = subscription.recv() => match received {
                Ok(message) => {
                    if tx.send(StreamEvent::message(&server_id, message)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(server_id = %server_id, skipped, "stream subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    let _ = tx.send(StreamEvent::error(&server_id, "session closed")).await;
                    break;
                }
            },
            () = terminated.cancelled() => {
                let reason = subscription.reason();
                let _ = tx.send(StreamEvent::error(&server_id, &reason)).await;
                break;
            }
            _ = ticker.tick() => {
                if tx.send(StreamEvent::ping(&server_id)).await.is_err() {
                    break;
                }
            }
        }
    }
    drop(subscription);
    tracing::debug!(server_id = %server_id, "stream forwarding ended");
}
