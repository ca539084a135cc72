//! CLI entry point - the composition root.
//!
//! Parses arguments, installs logging, and routes each command to its
//! handler. Handlers receive a bootstrapped `CliContext`.

use clap::{CommandFactory, Parser};
use hubgate_cli::handlers::{self, servers::AddArgs, serve::ServeArgs};
use hubgate_cli::{Cli, CliConfig, Commands, ServersCommand, bootstrap};
use hubgate_core::{GatewayConfig, RegistryFilter, SearchQuery};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env-backed flags see it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = |gateway: GatewayConfig| CliConfig {
        database_path: cli.database.clone(),
        gateway,
    };

    match command {
        Commands::Serve {
            host,
            port,
            cors_origins,
            gateway,
        } => {
            handlers::serve::execute(ServeArgs {
                host,
                port,
                cors_origins,
                database_path: cli.database.clone(),
                gateway: gateway.into_config()?,
            })
            .await?;
        }
        Commands::Servers { command } => match command {
            ServersCommand::List {
                server_type,
                status,
            } => {
                let ctx = bootstrap(config(GatewayConfig::default())).await?;
                handlers::servers::list(&ctx, RegistryFilter { server_type, status }).await?;
            }
            ServersCommand::Add {
                server_type,
                description,
                command,
                args,
                env,
                url,
                headers,
                gateway,
            } => {
                let ctx = bootstrap(config(gateway.into_config()?)).await?;
                let args = AddArgs {
                    server_type,
                    description,
                    command,
                    args,
                    env,
                    url,
                    headers,
                };
                handlers::servers::add(&ctx, args).await?;
            }
            ServersCommand::Remove { id } => {
                let ctx = bootstrap(config(GatewayConfig::default())).await?;
                handlers::servers::remove(&ctx, &id).await?;
            }
        },
        Commands::Verify { id, gateway } => {
            let ctx = bootstrap(config(gateway.into_config()?)).await?;
            handlers::verify::execute(&ctx, &id).await?;
        }
        Commands::Search {
            query,
            capability_type,
            server_type,
            limit,
        } => {
            let ctx = bootstrap(config(GatewayConfig::default())).await?;
            let query = SearchQuery {
                query,
                capability_type,
                server_type,
                limit,
            };
            handlers::search::execute(&ctx, query).await?;
        }
        Commands::Paths => {
            handlers::paths::execute(&config(GatewayConfig::default()))?;
        }
    }

    Ok(())
}
