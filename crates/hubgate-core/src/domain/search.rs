//! Capability search over cached registry snapshots.

use serde::{Deserialize, Serialize};

use super::capability::{CapabilityKind, PromptCapability, ResourceCapability, ToolCapability};
use super::registration::{RegistrationStatus, ServerRegistration, TransportConfig, TransportKind};

pub const DEFAULT_SEARCH_LIMIT: usize = 100;
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Search filters. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring matched against names, descriptions and URIs.
    pub query: Option<String>,
    pub capability_type: Option<CapabilityKind>,
    pub server_type: Option<TransportKind>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn validate(&self) -> Result<(), String> {
        match self.limit {
            Some(limit) if !(1..=MAX_SEARCH_LIMIT).contains(&limit) => Err(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}, got {limit}"
            )),
            _ => Ok(()),
        }
    }

    fn wants(&self, kind: CapabilityKind) -> bool {
        self.capability_type.is_none_or(|k| k == kind)
    }
}

/// One server with the capabilities that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub server_id: String,
    pub server_type: TransportKind,
    pub server_description: Option<String>,
    pub server_config: TransportConfig,
    pub matched_tools: Vec<ToolCapability>,
    pub matched_resources: Vec<ResourceCapability>,
    pub matched_prompts: Vec<PromptCapability>,
}

impl SearchResult {
    fn has_matches(&self) -> bool {
        !(self.matched_tools.is_empty()
            && self.matched_resources.is_empty()
            && self.matched_prompts.is_empty())
    }
}

/// True when no needle is given or any text contains it.
fn matches(needle: Option<&str>, texts: &[Option<&str>]) -> bool {
    needle.is_none_or(|n| {
        texts
            .iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(n))
    })
}

/// Match `query` against the cached snapshots of every active registration.
///
/// Results keep registry order and are truncated to the query limit.
pub fn search_capabilities(
    registrations: &[ServerRegistration],
    query: &SearchQuery,
) -> Vec<SearchResult> {
    let needle = query
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

    let needle = needle.as_deref();

    registrations
        .iter()
        .filter(|reg| reg.status == RegistrationStatus::Active)
        .filter(|reg| query.server_type.is_none_or(|t| t == reg.kind()))
        .map(|reg| {
            let caps = &reg.capabilities;
            let matched_tools = if query.wants(CapabilityKind::Tool) {
                caps.tools
                    .iter()
                    .filter(|t| matches(needle, &[Some(&t.name), t.description.as_deref()]))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            let matched_resources = if query.wants(CapabilityKind::Resource) {
                caps.resources
                    .iter()
                    .filter(|r| {
                        matches(
                            needle,
                            &[Some(&r.name), r.description.as_deref(), Some(&r.uri)],
                        )
                    })
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            let matched_prompts = if query.wants(CapabilityKind::Prompt) {
                caps.prompts
                    .iter()
                    .filter(|p| matches(needle, &[Some(&p.name), p.description.as_deref()]))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };

            SearchResult {
                server_id: reg.id.clone(),
                server_type: reg.kind(),
                server_description: reg.description.clone(),
                server_config: reg.transport.clone(),
                matched_tools,
                matched_resources,
                matched_prompts,
            }
        })
        .filter(SearchResult::has_matches)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapabilitySnapshot, NewServerRegistration};

    fn registration(id: &str, transport: TransportConfig) -> ServerRegistration {
        let mut reg = NewServerRegistration::new(transport).into_registration(id);
        reg.status = RegistrationStatus::Active;
        reg.capabilities = CapabilitySnapshot {
            tools: vec![
                ToolCapability::new("echo").with_description("Echo back the input message"),
                ToolCapability::new("add").with_description("Add two numbers together"),
            ],
            resources: vec![ResourceCapability {
                uri: "file://config.json".into(),
                name: "Configuration".into(),
                description: None,
                mime_type: Some("application/json".into()),
            }],
            prompts: vec![PromptCapability {
                name: "summarize".into(),
                description: Some("Summarize a given text".into()),
                arguments: vec![],
            }],
        };
        reg
    }

    #[test]
    fn matches_names_and_descriptions_case_insensitively() {
        let regs = vec![registration("a", TransportConfig::stdio("srv", vec![]))];
        let query = SearchQuery {
            query: Some("ECHO".into()),
            ..Default::default()
        };
        let results = search_capabilities(&regs, &query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matched_tools.len(), 1);
        assert!(results[0].matched_resources.is_empty());
    }

    #[test]
    fn resource_uri_is_searchable() {
        let regs = vec![registration("a", TransportConfig::stdio("srv", vec![]))];
        let query = SearchQuery {
            query: Some("config.json".into()),
            ..Default::default()
        };
        let results = search_capabilities(&regs, &query);
        assert_eq!(results[0].matched_resources.len(), 1);
    }

    #[test]
    fn capability_and_server_type_filters() {
        let regs = vec![
            registration("a", TransportConfig::stdio("srv", vec![])),
            registration("b", TransportConfig::http("http://localhost/mcp")),
        ];
        let query = SearchQuery {
            capability_type: Some(CapabilityKind::Prompt),
            server_type: Some(TransportKind::Http),
            ..Default::default()
        };
        let results = search_capabilities(&regs, &query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].server_id, "b");
        assert!(results[0].matched_tools.is_empty());
        assert_eq!(results[0].matched_prompts.len(), 1);
    }

    #[test]
    fn inactive_servers_and_misses_are_excluded() {
        let mut inactive = registration("a", TransportConfig::stdio("srv", vec![]));
        inactive.status = RegistrationStatus::Error;
        let regs = vec![inactive, registration("b", TransportConfig::stdio("srv", vec![]))];
        let query = SearchQuery {
            query: Some("nothing-matches-this".into()),
            ..Default::default()
        };
        assert!(search_capabilities(&regs, &query).is_empty());

        let all = search_capabilities(&regs, &SearchQuery::default());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].server_id, "b");
    }

    #[test]
    fn limit_is_validated_and_applied() {
        let regs = vec![
            registration("a", TransportConfig::stdio("srv", vec![])),
            registration("b", TransportConfig::stdio("srv", vec![])),
        ];
        let query = SearchQuery {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(search_capabilities(&regs, &query).len(), 1);
        assert!(
            SearchQuery {
                limit: Some(0),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }
}
