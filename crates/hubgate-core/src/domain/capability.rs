//! Capability descriptors discovered from a server.
//!
//! Field names follow the protocol's camelCase so snapshots can be passed
//! through to clients unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of capability a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl std::str::FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(Self::Tool),
            "resource" => Ok(Self::Resource),
            "prompt" => Ok(Self::Prompt),
            other => Err(format!("Unknown capability type: {other}")),
        }
    }
}

/// A callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// A readable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapability {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One declared prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCapability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Everything one completed handshake discovered.
///
/// Snapshots are replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    #[serde(default)]
    pub tools: Vec<ToolCapability>,
    #[serde(default)]
    pub resources: Vec<ResourceCapability>,
    #[serde(default)]
    pub prompts: Vec<PromptCapability>,
}

impl CapabilitySnapshot {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolCapability> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceCapability> {
        self.resources.iter().find(|r| r.uri == uri)
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptCapability> {
        self.prompts.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_uses_protocol_field_names() {
        let tool = ToolCapability::new("echo")
            .with_description("Echo back the input message")
            .with_input_schema(json!({"type": "object"}));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn resource_parses_mime_type() {
        let resource: ResourceCapability = serde_json::from_value(json!({
            "uri": "file://config.json",
            "name": "Configuration",
            "mimeType": "application/json"
        }))
        .unwrap();
        assert_eq!(resource.mime_type.as_deref(), Some("application/json"));
        assert!(resource.description.is_none());
    }

    #[test]
    fn prompt_arguments_default_to_optional() {
        let prompt: PromptCapability = serde_json::from_value(json!({
            "name": "summarize",
            "arguments": [{"name": "text"}]
        }))
        .unwrap();
        assert!(!prompt.arguments[0].required);
    }

    #[test]
    fn snapshot_lookups() {
        let snapshot = CapabilitySnapshot {
            tools: vec![ToolCapability::new("echo")],
            ..Default::default()
        };
        assert!(snapshot.tool("echo").is_some());
        assert!(snapshot.tool("missing").is_none());
        assert!(!snapshot.is_empty());
        assert!(CapabilitySnapshot::default().is_empty());
    }
}
