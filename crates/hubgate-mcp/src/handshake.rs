//! Initialize and discovery sequence.
//!
//! `initialize` → `notifications/initialized` → one list call per declared
//! capability group. The snapshot is returned only when every step
//! succeeded, so a partial capability set is never published.

use std::time::Duration;

use hubgate_core::{
    CapabilitySnapshot, GatewayError, PromptCapability, ResourceCapability, ToolCapability,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::protocol::{PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
use crate::session::Session;

/// Client identity sent in `initialize`.
pub const CLIENT_NAME: &str = "hubgate";

/// Upper bound on `nextCursor` pages followed per list call.
pub const MAX_LIST_PAGES: usize = 100;

/// Capability groups the server declared in its `initialize` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclaredGroups {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

impl DeclaredGroups {
    fn from_capabilities(capabilities: &Value) -> Self {
        let declared = |group: &str| capabilities.get(group).is_some_and(|v| !v.is_null());
        Self {
            tools: declared("tools"),
            resources: declared("resources"),
            prompts: declared("prompts"),
        }
    }
}

/// Outcome of one completed handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeInfo {
    pub protocol_version: String,
    pub server_info: Option<Value>,
    pub declared: DeclaredGroups,
    pub capabilities: CapabilitySnapshot,
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
    })
}

/// Transport failures stay transport failures; everything else that goes
/// wrong during the handshake is a handshake failure.
fn step_error(step: &str, err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Transport(_) => err,
        GatewayError::ConnectionClosed(reason) => {
            GatewayError::transport(format!("connection lost during {step}: {reason}"))
        }
        other => GatewayError::handshake(format!("{step} failed: {other}")),
    }
}

/// Validate an `initialize` result.
pub fn parse_initialize(result: &Value) -> Result<(String, Option<Value>, DeclaredGroups), GatewayError> {
    let Some(object) = result.as_object() else {
        return Err(GatewayError::handshake("initialize result is not an object"));
    };
    let version = object
        .get("protocolVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::handshake("initialize result lacks protocolVersion"))?;
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        return Err(GatewayError::handshake(format!(
            "unsupported protocol version {version}"
        )));
    }
    let declared = match object.get("capabilities") {
        None | Some(Value::Null) => DeclaredGroups::default(),
        Some(caps @ Value::Object(_)) => DeclaredGroups::from_capabilities(caps),
        Some(_) => {
            return Err(GatewayError::handshake(
                "initialize capabilities is not an object",
            ));
        }
    };
    Ok((
        version.to_string(),
        object.get("serverInfo").cloned(),
        declared,
    ))
}

/// Run the full sequence on a freshly opened session.
///
/// `timeout` bounds each request individually.
pub async fn run(session: &Session, timeout: Duration) -> Result<HandshakeInfo, GatewayError> {
    let result = session
        .request_with_timeout("initialize", Some(initialize_params()), timeout)
        .await
        .map_err(|e| step_error("initialize", e))?;
    let (protocol_version, server_info, declared) = parse_initialize(&result)?;

    session
        .notify("notifications/initialized", None)
        .await
        .map_err(|e| step_error("initialized notification", e))?;

    let mut capabilities = CapabilitySnapshot::default();
    if declared.tools {
        capabilities.tools = list_all::<ToolCapability>(session, "tools/list", "tools", timeout).await?;
    }
    if declared.resources {
        capabilities.resources =
            list_all::<ResourceCapability>(session, "resources/list", "resources", timeout).await?;
    }
    if declared.prompts {
        capabilities.prompts =
            list_all::<PromptCapability>(session, "prompts/list", "prompts", timeout).await?;
    }

    tracing::debug!(
        server_id = %session.server_id(),
        protocol_version = %protocol_version,
        tools = capabilities.tools.len(),
        resources = capabilities.resources.len(),
        prompts = capabilities.prompts.len(),
        "handshake completed"
    );

    Ok(HandshakeInfo {
        protocol_version,
        server_info,
        declared,
        capabilities,
    })
}

async fn list_all<T: DeserializeOwned>(
    session: &Session,
    method: &str,
    key: &str,
    timeout: Duration,
) -> Result<Vec<T>, GatewayError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let mut result = session
            .request_with_timeout(method, params, timeout)
            .await
            .map_err(|e| step_error(method, e))?;

        let page = result
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| GatewayError::handshake(format!("{method} result lacks {key}")))?;
        let page: Vec<T> = serde_json::from_value(page)
            .map_err(|e| GatewayError::handshake(format!("malformed {method} result: {e}")))?;
        items.extend(page);

        match result.get("nextCursor").and_then(Value::as_str) {
            Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
            _ => return Ok(items),
        }
    }

    Err(GatewayError::handshake(format!(
        "{method} exceeded {MAX_LIST_PAGES} pages"
    )))
}
