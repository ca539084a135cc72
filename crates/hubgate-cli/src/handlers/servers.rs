//! `servers` subcommand handlers: list, add, remove.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use hubgate_core::{
    NewServerRegistration, RegistryError, RegistryFilter, ServerRegistration, TransportConfig,
    TransportKind,
};

use crate::bootstrap::CliContext;
use crate::presentation::{format_optional, print_separator, truncate_string};

/// Arguments of `servers add`.
#[derive(Debug, Clone)]
pub struct AddArgs {
    pub server_type: TransportKind,
    pub description: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub url: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl AddArgs {
    pub fn into_registration(self) -> Result<NewServerRegistration> {
        let transport = match self.server_type {
            TransportKind::Stdio => {
                let Some(command) = self.command else {
                    bail!("--command is required for stdio servers");
                };
                TransportConfig::Stdio {
                    command,
                    args: self.args,
                    env: self.env.into_iter().collect::<BTreeMap<_, _>>(),
                }
            }
            kind @ (TransportKind::Http | TransportKind::Sse) => {
                let Some(url) = self.url else {
                    bail!("--url is required for {kind} servers");
                };
                let headers = self.headers.into_iter().collect::<BTreeMap<_, _>>();
                if kind == TransportKind::Http {
                    TransportConfig::Http { url, headers }
                } else {
                    TransportConfig::Sse { url, headers }
                }
            }
        };
        transport.validate().map_err(anyhow::Error::msg)?;

        let mut registration = NewServerRegistration::new(transport);
        registration.description = self.description;
        Ok(registration)
    }
}

/// Print registrations newest first.
pub async fn list(ctx: &CliContext, filter: RegistryFilter) -> Result<Vec<ServerRegistration>> {
    let servers = ctx.registry.list(filter).await?;

    if servers.is_empty() {
        println!("No MCP servers registered.");
        println!("Use 'hubgate servers add' to register one.");
        return Ok(servers);
    }

    println!("Found {} server(s):\n", servers.len());
    println!(
        "{:<36} {:<6} {:<9} {:<6} {:<20} Target",
        "ID", "Type", "Status", "Tools", "Last verified"
    );
    print_separator(110);

    for server in &servers {
        let verified = server
            .last_verified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<36} {:<6} {:<9} {:<6} {:<20} {}",
            server.id,
            server.kind(),
            server.status.as_str(),
            server.capabilities.tools.len(),
            format_optional(verified.as_ref(), "never"),
            truncate_string(&target(&server.transport), 40),
        );
    }

    Ok(servers)
}

/// Store a registration, then discover its capabilities.
///
/// The registration is kept with status `error` when discovery fails.
pub async fn add(ctx: &CliContext, args: AddArgs) -> Result<ServerRegistration> {
    let new = args.into_registration()?;
    let stored = ctx.registry.insert(new).await?;
    println!("Registered {} server {}", stored.kind(), stored.id);

    match ctx.manager.verify(&stored.id).await {
        Ok(capabilities) => println!(
            "Discovered {} tool(s), {} resource(s), {} prompt(s)",
            capabilities.tools.len(),
            capabilities.resources.len(),
            capabilities.prompts.len()
        ),
        Err(e) => {
            tracing::warn!(server_id = %stored.id, error = %e, "discovery failed");
            println!("Discovery failed: {e}");
            println!("Run 'hubgate verify {}' once the server is reachable.", stored.id);
        }
    }

    Ok(ctx.registry.get_registration(&stored.id).await?)
}

/// Delete a registration. Returns `false` when nothing matched.
pub async fn remove(ctx: &CliContext, id: &str) -> Result<bool> {
    match ctx.registry.delete(id).await {
        Ok(()) => {
            ctx.manager.invalidate(id, "registration deleted").await;
            println!("Removed server {id}");
            Ok(true)
        }
        Err(RegistryError::NotFound(_)) => {
            println!("No server found with id: '{id}'");
            println!("Use 'hubgate servers list' to see registered servers.");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn target(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Stdio { command, args, .. } if args.is_empty() => command.clone(),
        TransportConfig::Stdio { command, args, .. } => format!("{command} {}", args.join(" ")),
        TransportConfig::Http { url, .. } | TransportConfig::Sse { url, .. } => url.clone(),
    }
}
