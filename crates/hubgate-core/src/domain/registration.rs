//! Capability server registrations.
//!
//! A registration is owned by the registry store. The gateway only reads it
//! to decide which transport to open and how.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::CapabilitySnapshot;

/// Native transport of a capability server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned subprocess speaking line-delimited JSON-RPC on stdin/stdout
    #[default]
    Stdio,
    /// Plain HTTP endpoint, one POST per message
    Http,
    /// Persistent server-sent-event stream plus a companion POST endpoint
    Sse,
}

impl TransportKind {
    /// Stable lowercase name, as stored and as accepted on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            other => Err(format!("Unknown transport type: {other}")),
        }
    }
}

/// Transport-specific connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Launch `command` with `args` and `env`, talk over its stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// POST each message to `url`.
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Open an event stream at `url`; the server announces where to POST.
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    /// Create a subprocess configuration with no extra environment.
    #[must_use]
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Create an HTTP configuration with no extra headers.
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Create an SSE configuration with no extra headers.
    #[must_use]
    pub fn sse(url: impl Into<String>) -> Self {
        Self::Sse {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::Sse { .. } => TransportKind::Sse,
        }
    }

    /// Check that required fields are present and well-formed.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Stdio { command, env, .. } => {
                if command.trim().is_empty() {
                    return Err("Stdio server command cannot be empty".to_string());
                }
                if let Some(key) = env.keys().find(|k| k.is_empty() || k.contains('=')) {
                    return Err(format!("Invalid environment variable name: {key:?}"));
                }
                Ok(())
            }
            Self::Http { url, .. } | Self::Sse { url, .. } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| format!("Invalid {} server url {url:?}: {e}", self.kind()))?;
                match parsed.scheme() {
                    "http" | "https" => Ok(()),
                    scheme => Err(format!("Unsupported url scheme: {scheme}")),
                }
            }
        }
    }
}

/// Lifecycle status recorded by the registry for a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Last verification succeeded
    #[default]
    Active,
    /// Never verified
    Inactive,
    /// Last verification failed
    Error,
}

impl RegistrationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            other => Err(format!("Unknown registration status: {other}")),
        }
    }
}

/// A registered capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRegistration {
    /// Opaque identifier assigned at registration; never changes.
    pub id: String,

    /// Optional human-readable description.
    pub description: Option<String>,

    /// How to reach the server.
    #[serde(rename = "config")]
    pub transport: TransportConfig,

    /// Last capability snapshot cached by the registry.
    #[serde(default)]
    pub capabilities: CapabilitySnapshot,

    pub status: RegistrationStatus,

    pub created_at: DateTime<Utc>,

    pub last_verified: Option<DateTime<Utc>>,
}

impl ServerRegistration {
    pub const fn kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

/// A registration that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServerRegistration {
    pub description: Option<String>,
    pub transport: TransportConfig,
}

impl NewServerRegistration {
    #[must_use]
    pub const fn new(transport: TransportConfig) -> Self {
        Self {
            description: None,
            transport,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Materialize into a stored registration with the given id.
    pub fn into_registration(self, id: impl Into<String>) -> ServerRegistration {
        ServerRegistration {
            id: id.into(),
            description: self.description,
            transport: self.transport,
            capabilities: CapabilitySnapshot::default(),
            status: RegistrationStatus::Inactive,
            created_at: Utc::now(),
            last_verified: None,
        }
    }
}
