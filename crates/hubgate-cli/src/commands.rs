//! Subcommands and their arguments.

use std::time::Duration;

use clap::{Args, Subcommand};
use hubgate_core::config::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, DEFAULT_SWEEP_INTERVAL,
};
use hubgate_core::{CapabilityKind, GatewayConfig, RegistrationStatus, TransportKind};

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to bind
        #[arg(long, env = "HUBGATE_HOST", default_value = hubgate_axum::bootstrap::DEFAULT_HOST)]
        host: String,
        /// Port to listen on
        #[arg(short, long, env = "HUBGATE_PORT", default_value_t = hubgate_axum::bootstrap::DEFAULT_PORT)]
        port: u16,
        /// Allowed CORS origins (comma-separated); all origins when omitted
        #[arg(long = "cors-origin", env = "HUBGATE_CORS_ORIGINS", value_delimiter = ',')]
        cors_origins: Vec<String>,
        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Manage registered servers
    Servers {
        #[command(subcommand)]
        command: ServersCommand,
    },

    /// Re-run discovery for a registered server
    Verify {
        /// Registration id
        id: String,
        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Search cached capabilities of active servers
    Search {
        /// Case-insensitive text to look for in names, descriptions and URIs
        query: Option<String>,
        /// Restrict to one capability type: tool, resource or prompt
        #[arg(short = 't', long = "type")]
        capability_type: Option<CapabilityKind>,
        /// Restrict to one transport: stdio, http or sse
        #[arg(long)]
        server_type: Option<TransportKind>,
        /// Maximum number of servers to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show resolved paths
    Paths,
}

#[derive(Debug, Subcommand)]
pub enum ServersCommand {
    /// List registrations, newest first
    List {
        /// Only servers using this transport
        #[arg(long = "type")]
        server_type: Option<TransportKind>,
        /// Only servers with this status
        #[arg(long)]
        status: Option<RegistrationStatus>,
    },

    /// Register a server and discover its capabilities
    Add {
        /// Transport: stdio, http or sse
        #[arg(long = "type")]
        server_type: TransportKind,
        #[arg(short, long)]
        description: Option<String>,
        /// Command to launch (stdio)
        #[arg(long, required_if_eq("server_type", "stdio"))]
        command: Option<String>,
        /// Argument passed to the command; repeat for several
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable for the command, as KEY=VALUE
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Endpoint (http, sse)
        #[arg(long)]
        url: Option<String>,
        /// Header sent with every request, as KEY=VALUE
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Delete a registration
    Remove {
        /// Registration id
        id: String,
    },
}

/// Connection-layer timeouts and limits, all in seconds.
#[derive(Debug, Clone, Args)]
pub struct GatewayArgs {
    #[arg(long, env = "HUBGATE_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout: u64,
    #[arg(long, env = "HUBGATE_HANDSHAKE_TIMEOUT_SECS", default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
    pub handshake_timeout: u64,
    #[arg(long, env = "HUBGATE_IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub idle_timeout: u64,
    #[arg(long, env = "HUBGATE_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    pub sweep_interval: u64,
    #[arg(long, env = "HUBGATE_PROBE_TIMEOUT_SECS", default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
    pub probe_timeout: u64,
    #[arg(long, env = "HUBGATE_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,
    #[arg(long, env = "HUBGATE_SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_SHUTDOWN_GRACE.as_secs())]
    pub shutdown_grace: u64,
}

impl GatewayArgs {
    pub fn into_config(self) -> anyhow::Result<GatewayConfig> {
        let config = GatewayConfig::default()
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .with_idle_timeout(Duration::from_secs(self.idle_timeout))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_probe_timeout(Duration::from_secs(self.probe_timeout))
            .with_max_sessions(self.max_sessions)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace));
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid gateway configuration: {e}"))?;
        Ok(config)
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("hubgate").chain(args.iter().copied()))
            .unwrap()
            .command
            .unwrap()
    }

    #[test]
    fn key_val_parsing() {
        assert_eq!(
            parse_key_val("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn add_stdio_server() {
        let Commands::Servers {
            command: ServersCommand::Add { server_type, command, args, env, .. },
        } = parse(&[
            "servers", "add", "--type", "stdio", "--command", "npx", "--arg", "-y", "--arg",
            "server-fs", "--env", "ROOT=/tmp",
        ])
        else {
            panic!("expected servers add");
        };
        assert_eq!(server_type, TransportKind::Stdio);
        assert_eq!(command.as_deref(), Some("npx"));
        assert_eq!(args, vec!["-y", "server-fs"]);
        assert_eq!(env, vec![("ROOT".to_string(), "/tmp".to_string())]);
    }

    #[test]
    fn stdio_requires_command() {
        let result = Cli::try_parse_from(["hubgate", "servers", "add", "--type", "stdio"]);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let result = Cli::try_parse_from(["hubgate", "servers", "add", "--type", "ftp"]);
        assert!(result.is_err());
    }

    #[test]
    fn gateway_args_map_to_config() {
        let Commands::Serve { port, gateway, cors_origins, .. } =
            parse(&["serve", "--port", "9000", "--idle-timeout", "60", "--max-sessions", "4"])
        else {
            panic!("expected serve");
        };
        assert_eq!(port, 9000);
        assert!(cors_origins.is_empty());

        let config = gateway.into_config().unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let Commands::Verify { gateway, .. } = parse(&["verify", "abc", "--request-timeout", "0"])
        else {
            panic!("expected verify");
        };
        assert!(gateway.into_config().is_err());
    }

    #[test]
    fn search_filters() {
        let Commands::Search { query, capability_type, limit, .. } =
            parse(&["search", "weather", "--type", "tool", "--limit", "5"])
        else {
            panic!("expected search");
        };
        assert_eq!(query.as_deref(), Some("weather"));
        assert_eq!(capability_type, Some(CapabilityKind::Tool));
        assert_eq!(limit, Some(5));
    }
}
