//! Verify command handler.

use anyhow::Result;
use hubgate_core::CapabilitySnapshot;

use crate::bootstrap::CliContext;
use crate::presentation::truncate_string;

/// Re-run discovery for one server and print what it exposes.
///
/// The registry records the new status either way.
pub async fn execute(ctx: &CliContext, id: &str) -> Result<CapabilitySnapshot> {
    let capabilities = ctx
        .manager
        .verify(id)
        .await
        .map_err(|e| anyhow::anyhow!("Server verification failed: {e}"))?;

    println!("Server {id} is reachable and responding.\n");
    print_group(
        "Tools",
        capabilities
            .tools
            .iter()
            .map(|t| (t.name.as_str(), t.description.as_deref())),
    );
    print_group(
        "Resources",
        capabilities
            .resources
            .iter()
            .map(|r| (r.uri.as_str(), r.description.as_deref())),
    );
    print_group(
        "Prompts",
        capabilities
            .prompts
            .iter()
            .map(|p| (p.name.as_str(), p.description.as_deref())),
    );

    Ok(capabilities)
}

fn print_group<'a>(title: &str, items: impl ExactSizeIterator<Item = (&'a str, Option<&'a str>)>) {
    println!("{title} ({}):", items.len());
    for (name, description) in items {
        match description {
            Some(d) => println!("  {name:<30} {}", truncate_string(d, 60)),
            None => println!("  {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubgate_core::{
        GatewayConfig, InMemoryRegistry, NewServerRegistration, RegistrationStatus, RegistryStore,
        TransportConfig,
    };
    use hubgate_mcp::echo::EchoServer;
    use hubgate_mcp::testing::EchoTransportFactory;
    use std::sync::Arc;

    #[tokio::test]
    async fn verify_records_status() {
        let registry = Arc::new(InMemoryRegistry::with_registrations(vec![
            NewServerRegistration::new(TransportConfig::stdio("echo", vec![]))
                .into_registration("echo"),
        ]));
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let ctx = CliContext::new(registry.clone(), factory.clone(), GatewayConfig::default());

        let capabilities = execute(&ctx, "echo").await.unwrap();
        assert!(capabilities.tool("echo").is_some());
        let stored = registry.get_registration("echo").await.unwrap();
        assert_eq!(stored.status, RegistrationStatus::Active);

        factory.fail_next_opens(1);
        assert!(execute(&ctx, "echo").await.is_err());
        let stored = registry.get_registration("echo").await.unwrap();
        assert_eq!(stored.status, RegistrationStatus::Error);

        assert!(execute(&ctx, "missing").await.is_err());
    }
}
