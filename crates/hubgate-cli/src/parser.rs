//! Root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Gateway for MCP capability servers.
#[derive(Debug, Parser)]
#[command(name = "hubgate")]
#[command(about = "Register MCP servers and proxy requests to them")]
#[command(version)]
pub struct Cli {
    /// Registry database to use instead of the platform data directory
    #[arg(long = "database", env = "HUBGATE_DB_PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
