//! Request and response bodies for the HTTP surface.

use std::collections::BTreeMap;

use hubgate_core::{
    CapabilityKind, CapabilitySnapshot, NewServerRegistration, RegistrationStatus, RegistryFilter,
    SearchQuery, ServerRegistration, TransportConfig, TransportKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Body of `POST /gateway/{id}/tools/{name}`.
#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

/// Body of `POST /gateway/{id}/resources/read`.
#[derive(Debug, Deserialize)]
pub struct ResourceReadBody {
    pub uri: String,
}

/// Body of `POST /gateway/{id}/prompts/get`.
#[derive(Debug, Deserialize)]
pub struct PromptGetBody {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Flat registration body; which fields apply depends on `type`.
#[derive(Debug, Deserialize)]
pub struct RegisterServerRequest {
    #[serde(rename = "type")]
    pub server_type: TransportKind,
    pub description: Option<String>,

    // stdio
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    // http / sse
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RegisterServerRequest {
    /// Build a validated registration.
    pub fn into_registration(self) -> Result<NewServerRegistration, String> {
        let transport = match self.server_type {
            TransportKind::Stdio => TransportConfig::Stdio {
                command: self
                    .command
                    .ok_or_else(|| "command is required for stdio type".to_string())?,
                args: self.args,
                env: self.env,
            },
            TransportKind::Http | TransportKind::Sse => {
                let url = self
                    .url
                    .ok_or_else(|| "url is required for http and sse types".to_string())?;
                if self.server_type == TransportKind::Http {
                    TransportConfig::Http {
                        url,
                        headers: self.headers,
                    }
                } else {
                    TransportConfig::Sse {
                        url,
                        headers: self.headers,
                    }
                }
            }
        };
        transport.validate()?;

        let registration = NewServerRegistration::new(transport);
        Ok(match self.description {
            Some(description) => registration.with_description(description),
            None => registration,
        })
    }
}

/// A stored registration as returned by the registry routes.
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    #[serde(rename = "type")]
    pub server_type: TransportKind,
    #[serde(flatten)]
    pub registration: ServerRegistration,
}

impl From<ServerRegistration> for ServerResponse {
    fn from(registration: ServerRegistration) -> Self {
        Self {
            server_type: registration.kind(),
            registration,
        }
    }
}

/// Query string of `GET /mcp/servers`.
#[derive(Debug, Default, Deserialize)]
pub struct ListServersParams {
    pub server_type: Option<String>,
    pub status: Option<String>,
}

impl ListServersParams {
    pub fn into_filter(self) -> Result<RegistryFilter, String> {
        Ok(RegistryFilter {
            server_type: self
                .server_type
                .map(|t| t.parse::<TransportKind>())
                .transpose()?,
            status: self
                .status
                .map(|s| s.parse::<RegistrationStatus>())
                .transpose()?,
        })
    }
}

/// Query string of `GET /mcp/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub capability_type: Option<String>,
    pub server_type: Option<String>,
    pub limit: Option<usize>,
}

impl SearchParams {
    pub fn into_query(self) -> Result<SearchQuery, String> {
        let query = SearchQuery {
            query: self.query,
            capability_type: self
                .capability_type
                .map(|c| c.parse::<CapabilityKind>())
                .transpose()?,
            server_type: self
                .server_type
                .map(|t| t.parse::<TransportKind>())
                .transpose()?,
            limit: self.limit,
        };
        query.validate()?;
        Ok(query)
    }
}

/// Result of `POST /mcp/servers/{id}/verify`.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub server_id: String,
    pub status: RegistrationStatus,
    pub message: String,
    pub capabilities: CapabilitySnapshot,
}
