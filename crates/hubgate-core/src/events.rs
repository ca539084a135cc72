//! Gateway lifecycle events.
//!
//! Emitted by the connection manager through `GatewayEventEmitter` and
//! streamed to web clients by the HTTP adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CapabilitySnapshot, TransportKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A session completed its handshake.
    SessionOpened {
        server_id: String,
        transport: TransportKind,
        protocol_version: String,
        at: DateTime<Utc>,
    },
    /// A fresh capability snapshot is available.
    CapabilitiesDiscovered {
        server_id: String,
        capabilities: CapabilitySnapshot,
    },
    /// A session failed a liveness check or lost its transport.
    SessionDegraded { server_id: String, reason: String },
    /// A degraded session was replaced by a new one.
    SessionReconnected { server_id: String },
    /// A session was torn down.
    SessionClosed { server_id: String, reason: String },
}

impl GatewayEvent {
    pub fn session_opened(
        server_id: impl Into<String>,
        transport: TransportKind,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self::SessionOpened {
            server_id: server_id.into(),
            transport,
            protocol_version: protocol_version.into(),
            at: Utc::now(),
        }
    }

    pub fn capabilities_discovered(
        server_id: impl Into<String>,
        capabilities: CapabilitySnapshot,
    ) -> Self {
        Self::CapabilitiesDiscovered {
            server_id: server_id.into(),
            capabilities,
        }
    }

    pub fn session_degraded(server_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SessionDegraded {
            server_id: server_id.into(),
            reason: reason.into(),
        }
    }

    pub fn session_reconnected(server_id: impl Into<String>) -> Self {
        Self::SessionReconnected {
            server_id: server_id.into(),
        }
    }

    pub fn session_closed(server_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SessionClosed {
            server_id: server_id.into(),
            reason: reason.into(),
        }
    }

    /// Server the event refers to.
    pub fn server_id(&self) -> &str {
        match self {
            Self::SessionOpened { server_id, .. }
            | Self::CapabilitiesDiscovered { server_id, .. }
            | Self::SessionDegraded { server_id, .. }
            | Self::SessionReconnected { server_id }
            | Self::SessionClosed { server_id, .. } => server_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(GatewayEvent::session_closed("s1", "idle")).unwrap();
        assert_eq!(json["type"], "session_closed");
        assert_eq!(json["server_id"], "s1");
        assert_eq!(json["reason"], "idle");
    }

    #[test]
    fn server_id_accessor() {
        let event = GatewayEvent::session_reconnected("abc");
        assert_eq!(event.server_id(), "abc");
    }
}
