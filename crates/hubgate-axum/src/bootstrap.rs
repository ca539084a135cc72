//! Axum server bootstrap - the composition root.
//!
//! The only place where the registry store, transport factory, connection
//! manager and sweep supervisor are wired together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use hubgate_core::{GatewayConfig, GatewayEventEmitter, RegistryStore, database_path};
use hubgate_db::{SqliteRegistry, setup_database};
use hubgate_mcp::{
    ConnectionManager, DefaultTransportFactory, Gateway, SweepSupervisor, TransportFactory,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::sse::SseBroadcaster;

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration for the Axum adapter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Registry database; the platform data directory when `None`.
    pub database_path: Option<PathBuf>,
    pub cors: CorsConfig,
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: None,
            cors: CorsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

/// Everything the handlers need.
pub struct AxumContext {
    pub gateway: Gateway,
    pub registry: Arc<dyn RegistryStore>,
    pub sse: Arc<SseBroadcaster>,
}

impl AxumContext {
    /// Wire a connection manager over `registry` and `factory`, publishing
    /// lifecycle events to a fresh broadcaster.
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        factory: Arc<dyn TransportFactory>,
        config: GatewayConfig,
    ) -> Self {
        let sse = Arc::new(SseBroadcaster::with_defaults());
        let manager = ConnectionManager::new(Arc::clone(&registry), factory, config)
            .with_emitter(Arc::clone(&sse) as Arc<dyn GatewayEventEmitter>);
        Self {
            gateway: Gateway::new(Arc::new(manager)),
            registry,
            sse,
        }
    }

    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        self.gateway.manager()
    }
}

/// Open the registry database and build the context.
pub async fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    config
        .gateway
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid gateway configuration: {e}"))?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => database_path()?,
    };
    info!(
        target: "hubgate.paths",
        database_path = %db_path.display(),
        "Axum bootstrap resolved paths"
    );

    let pool = setup_database(&db_path).await?;
    let registry: Arc<dyn RegistryStore> = Arc::new(SqliteRegistry::new(pool));
    let factory: Arc<dyn TransportFactory> =
        Arc::new(DefaultTransportFactory::from_config(&config.gateway));

    Ok(AxumContext::new(registry, factory, config.gateway.clone()))
}

/// Serve until Ctrl-C or SIGTERM, then stop the sweep and close every session.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let ctx = Arc::new(bootstrap(&config).await?);
    let manager = Arc::clone(ctx.manager());
    let supervisor = SweepSupervisor::start(Arc::clone(&manager));

    let app = crate::routes::create_router(ctx, &config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("hubgate gateway listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    supervisor.stop().await;
    let closed = manager.shutdown().await;
    info!(closed, "gateway stopped");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
