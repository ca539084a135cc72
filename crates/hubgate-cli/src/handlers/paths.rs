//! Paths command handler.

use anyhow::Result;
use hubgate_core::data_root;

use crate::bootstrap::CliConfig;

pub fn execute(config: &CliConfig) -> Result<()> {
    println!("Data directory: {}", data_root()?.display());
    println!("Database:       {}", config.resolved_database_path()?.display());
    Ok(())
}
