//! Transport adapters.
//!
//! The set of transports is fixed by the protocol, so `Transport` is a closed
//! enum rather than a trait object. Every variant offers the same contract:
//! `send` a framed message, `receive` the next inbound message, `close`.
//!
//! `receive` has a single consumer (the session reader task); `send` may be
//! called concurrently.

mod lines;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod http;
mod shutdown;
mod sse;
mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use hubgate_core::{GatewayConfig, GatewayError, ServerRegistration, TransportConfig, TransportKind};
use thiserror::Error;

use crate::protocol::JsonRpcMessage;

pub use http::HttpTransport;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryTransport;
pub use shutdown::shutdown_child;
pub use sse::{SseDecoder, SseEvent, SseTransport};
pub use stdio::StdioTransport;

/// Largest inbound frame (one line, or one event-stream event) a transport
/// will buffer. Longer frames are dropped.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Errors raised by transport adapters.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Transport closed: {0}")]
    Closed(String),
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed(reason) => Self::ConnectionClosed(reason),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Knobs shared by all adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Deadline for establishing the channel (SSE endpoint announcement).
    pub connect_timeout: Duration,
    /// SIGTERM-to-SIGKILL grace period for subprocess servers.
    pub shutdown_grace: Duration,
}

impl TransportOptions {
    pub const fn from_config(config: &GatewayConfig) -> Self {
        Self {
            connect_timeout: config.handshake_timeout,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// An open channel to one capability server.
#[derive(Debug)]
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
    #[cfg(any(test, feature = "test-utils"))]
    Memory(MemoryTransport),
}

impl Transport {
    /// Open the transport described by `config`.
    pub async fn open(
        server_id: &str,
        config: &TransportConfig,
        client: &reqwest::Client,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        match config {
            TransportConfig::Stdio { command, args, env } => {
                StdioTransport::spawn(server_id, command, args, env, options.shutdown_grace)
                    .map(Self::Stdio)
            }
            TransportConfig::Http { url, headers } => {
                HttpTransport::new(client.clone(), url, headers).map(Self::Http)
            }
            TransportConfig::Sse { url, headers } => {
                SseTransport::connect(client.clone(), url, headers, options.connect_timeout)
                    .await
                    .map(Self::Sse)
            }
        }
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        match self {
            Self::Stdio(t) => t.send(message).await,
            Self::Http(t) => t.send(message).await,
            Self::Sse(t) => t.send(message).await,
            #[cfg(any(test, feature = "test-utils"))]
            Self::Memory(t) => t.send(message).await,
        }
    }

    /// Next inbound message, in arrival order.
    ///
    /// Fails with `Closed` once the remote end is gone.
    pub async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        match self {
            Self::Stdio(t) => t.receive().await,
            Self::Http(t) => t.receive().await,
            Self::Sse(t) => t.receive().await,
            #[cfg(any(test, feature = "test-utils"))]
            Self::Memory(t) => t.receive().await,
        }
    }

    /// Release the channel. Idempotent.
    pub async fn close(&self) {
        match self {
            Self::Stdio(t) => t.close().await,
            Self::Http(t) => t.close().await,
            Self::Sse(t) => t.close(),
            #[cfg(any(test, feature = "test-utils"))]
            Self::Memory(t) => t.close(),
        }
    }

    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::Sse(_) => TransportKind::Sse,
            #[cfg(any(test, feature = "test-utils"))]
            Self::Memory(_) => TransportKind::Stdio,
        }
    }

    /// OS process id for subprocess transports.
    pub fn process_id(&self) -> Option<u32> {
        match self {
            Self::Stdio(t) => t.process_id(),
            _ => None,
        }
    }
}

/// Opens transports for registrations.
///
/// The connection manager goes through this seam so tests can substitute
/// in-process servers.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, registration: &ServerRegistration) -> Result<Transport, TransportError>;
}

/// Opens the transport each registration asks for.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    client: reqwest::Client,
    options: TransportOptions,
}

impl DefaultTransportFactory {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(TransportOptions::from_config(config))
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, registration: &ServerRegistration) -> Result<Transport, TransportError> {
        registration
            .transport
            .validate()
            .map_err(TransportError::InvalidConfig)?;
        Transport::open(
            &registration.id,
            &registration.transport,
            &self.client,
            self.options,
        )
        .await
    }
}
