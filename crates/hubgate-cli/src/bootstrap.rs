//! CLI bootstrap - the composition root.
//!
//! Opens the registry database and wires a connection manager over the
//! default transport factory. Command handlers only see [`CliContext`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use hubgate_core::{GatewayConfig, RegistryStore, database_path};
use hubgate_db::{SqliteRegistry, setup_database};
use hubgate_mcp::{ConnectionManager, DefaultTransportFactory, TransportFactory};

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Registry database; the platform data directory when `None`.
    pub database_path: Option<PathBuf>,
    pub gateway: GatewayConfig,
}

impl CliConfig {
    /// Database path after applying the platform default.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(database_path()?),
        }
    }
}

/// Everything command handlers need.
pub struct CliContext {
    pub registry: Arc<dyn RegistryStore>,
    pub manager: Arc<ConnectionManager>,
}

impl CliContext {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        factory: Arc<dyn TransportFactory>,
        config: GatewayConfig,
    ) -> Self {
        let manager = ConnectionManager::new(Arc::clone(&registry), factory, config);
        Self {
            registry,
            manager: Arc::new(manager),
        }
    }
}

pub async fn bootstrap(config: CliConfig) -> Result<CliContext> {
    let db_path = config.resolved_database_path()?;
    tracing::debug!(database_path = %db_path.display(), "opening registry");

    let pool = setup_database(&db_path).await?;
    let registry: Arc<dyn RegistryStore> = Arc::new(SqliteRegistry::new(pool));
    let factory: Arc<dyn TransportFactory> =
        Arc::new(DefaultTransportFactory::from_config(&config.gateway));

    Ok(CliContext::new(registry, factory, config.gateway))
}
