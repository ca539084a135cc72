//! Filesystem locations used by the gateway.

use std::env;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "HUBGATE_DATA_DIR";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Could not determine the local data directory")]
    NoDataDir,

    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Root directory for gateway state.
///
/// Resolution order:
/// 1. `HUBGATE_DATA_DIR`
/// 2. `<local data dir>/hubgate`
pub fn data_root() -> Result<PathBuf, PathError> {
    let root = match env::var(DATA_DIR_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::data_local_dir()
            .ok_or(PathError::NoDataDir)?
            .join("hubgate"),
    };

    fs::create_dir_all(&root).map_err(|e| PathError::CreateFailed {
        path: root.clone(),
        reason: e.to_string(),
    })?;

    Ok(root)
}

/// Default location of the registry database.
pub fn database_path() -> Result<PathBuf, PathError> {
    Ok(data_root()?.join("hubgate.db"))
}
