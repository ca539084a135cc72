//! Gateway error taxonomy.
//!
//! Every failure the connection layer surfaces maps to one of these variants.
//! Each carries a stable code so clients can branch without parsing messages.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::registry::RegistryError;

/// Errors surfaced by the connection layer.
///
/// `Clone` so that every caller waiting on the same in-flight session
/// creation receives the same failure.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No registration exists for the requested id.
    #[error("MCP server not registered: {0}")]
    ServerNotRegistered(String),

    /// Spawn or connect failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unsupported initialize/discovery exchange.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// No response arrived before the deadline.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The capability server answered with a JSON-RPC error.
    #[error("Protocol error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The session was torn down while the request was outstanding.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The session cap is reached and no idle session could be evicted.
    #[error("Session limit reached ({0} sessions)")]
    CapacityExhausted(usize),

    /// The caller sent something the gateway cannot forward.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Registry store failure other than not-found.
    #[error("Registry error: {0}")]
    Registry(String),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ServerNotRegistered(_) => "SERVER_NOT_REGISTERED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Handshake(_) => "HANDSHAKE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::ConnectionClosed(_) => "CONNECTION_CLOSED",
            Self::CapacityExhausted(_) => "CAPACITY_EXHAUSTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Registry(_) => "REGISTRY_ERROR",
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::ServerNotRegistered(id),
            other => Self::Registry(other.to_string()),
        }
    }
}
