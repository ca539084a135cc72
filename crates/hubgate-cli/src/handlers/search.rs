//! Search command handler.

use anyhow::Result;
use hubgate_core::{
    RegistrationStatus, RegistryFilter, SearchQuery, SearchResult, search_capabilities,
};

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, truncate_string};

/// Match cached capabilities of active servers; nothing is contacted.
pub async fn execute(ctx: &CliContext, query: SearchQuery) -> Result<Vec<SearchResult>> {
    query.validate().map_err(anyhow::Error::msg)?;

    let registrations = ctx
        .registry
        .list(RegistryFilter {
            server_type: query.server_type,
            status: Some(RegistrationStatus::Active),
        })
        .await?;
    let results = search_capabilities(&registrations, &query);

    if results.is_empty() {
        println!("No matching capabilities.");
        return Ok(results);
    }

    for result in &results {
        println!(
            "{} ({}) {}",
            result.server_id,
            result.server_type,
            result.server_description.as_deref().unwrap_or("")
        );
        print_separator(80);
        for tool in &result.matched_tools {
            println!("  tool      {}", tool.name);
        }
        for resource in &result.matched_resources {
            println!("  resource  {}", truncate_string(&resource.uri, 60));
        }
        for prompt in &result.matched_prompts {
            println!("  prompt    {}", prompt.name);
        }
        println!();
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubgate_core::{
        CapabilityKind, CapabilitySnapshot, GatewayConfig, InMemoryRegistry, NewServerRegistration,
        ToolCapability, TransportConfig,
    };
    use hubgate_mcp::echo::EchoServer;
    use hubgate_mcp::testing::EchoTransportFactory;
    use std::sync::Arc;

    fn context() -> CliContext {
        let mut active = NewServerRegistration::new(TransportConfig::stdio("weather", vec![]))
            .into_registration("weather");
        active.status = RegistrationStatus::Active;
        active.capabilities = CapabilitySnapshot {
            tools: vec![ToolCapability::new("get_forecast").with_description("Weather forecast")],
            ..CapabilitySnapshot::default()
        };
        let mut errored = active.clone();
        errored.id = "stale".to_string();
        errored.status = RegistrationStatus::Error;

        CliContext::new(
            Arc::new(InMemoryRegistry::with_registrations(vec![active, errored])),
            Arc::new(EchoTransportFactory::new(EchoServer::new())),
            GatewayConfig::default(),
        )
    }

    #[tokio::test]
    async fn only_active_servers_match() {
        let ctx = context();
        let results = execute(
            &ctx,
            SearchQuery {
                query: Some("FORECAST".to_string()),
                ..SearchQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].server_id, "weather");
    }

    #[tokio::test]
    async fn capability_type_filter() {
        let ctx = context();
        let results = execute(
            &ctx,
            SearchQuery {
                capability_type: Some(CapabilityKind::Prompt),
                ..SearchQuery::default()
            },
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn invalid_limit_is_rejected() {
        let ctx = context();
        let query = SearchQuery {
            limit: Some(0),
            ..SearchQuery::default()
        };
        assert!(execute(&ctx, query).await.is_err());
    }
}
