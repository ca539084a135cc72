//! Session state and the read-only status/health views built from it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport open, handshake in progress
    Connecting,
    /// Handshake complete, serving requests
    Ready,
    /// Liveness check or transport failed; awaiting reconnection
    Degraded,
    /// Torn down
    Closed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one server's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub server_id: String,
    pub state: SessionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Value>,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub outstanding: usize,
}

impl SessionStatus {
    /// Status for a server with no live session.
    pub fn closed(server_id: impl Into<String>, error: Option<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: SessionState::Closed,
            connected_at: None,
            last_activity: None,
            error,
            protocol_version: None,
            server_info: None,
            request_count: 0,
            outstanding: 0,
        }
    }
}

/// Overall gateway verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate over all live sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub total: usize,
    pub active: usize,
    pub failed: usize,
    pub servers: BTreeMap<String, SessionStatus>,
}

impl GatewayHealth {
    pub fn from_statuses(statuses: impl IntoIterator<Item = SessionStatus>) -> Self {
        let servers: BTreeMap<String, SessionStatus> = statuses
            .into_iter()
            .map(|s| (s.server_id.clone(), s))
            .collect();

        let total = servers.len();
        let active = servers
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .count();
        let failed = servers
            .values()
            .filter(|s| s.state == SessionState::Degraded)
            .count();

        let status = if failed == 0 {
            HealthStatus::Healthy
        } else if failed == total {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            total,
            active,
            failed,
            servers,
        }
    }
}
