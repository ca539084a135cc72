//! Serve command handler.

use std::path::PathBuf;

use anyhow::Result;
use hubgate_axum::{CorsConfig, ServerConfig, start_server};
use hubgate_core::GatewayConfig;

pub struct ServeArgs {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub database_path: Option<PathBuf>,
    pub gateway: GatewayConfig,
}

impl ServeArgs {
    pub fn into_server_config(self) -> ServerConfig {
        let cors = if self.cors_origins.is_empty() {
            CorsConfig::AllowAll
        } else {
            CorsConfig::AllowOrigins(self.cors_origins)
        };
        ServerConfig {
            host: self.host,
            port: self.port,
            database_path: self.database_path,
            cors,
            gateway: self.gateway,
        }
    }
}

/// Run the gateway until Ctrl-C or SIGTERM.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.into_server_config();

    println!();
    println!("  hubgate gateway starting...");
    println!();
    println!("  API:     http://{}:{}", config.host, config.port);
    println!("  Events:  http://{}:{}/gateway/events", config.host, config.port);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    start_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(origins: Vec<String>) -> ServeArgs {
        ServeArgs {
            host: "0.0.0.0".to_string(),
            port: 9000,
            cors_origins: origins,
            database_path: Some(PathBuf::from("/tmp/hubgate.db")),
            gateway: GatewayConfig::default(),
        }
    }

    #[test]
    fn empty_origin_list_allows_all() {
        let config = args(vec![]).into_server_config();
        assert!(matches!(config.cors, CorsConfig::AllowAll));
        assert_eq!(config.port, 9000);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/hubgate.db")));
    }

    #[test]
    fn explicit_origins_are_kept() {
        let config = args(vec!["http://localhost:3000".to_string()]).into_server_config();
        match config.cors {
            CorsConfig::AllowOrigins(origins) => assert_eq!(origins, vec!["http://localhost:3000"]),
            CorsConfig::AllowAll => panic!("expected explicit origins"),
        }
    }
}
