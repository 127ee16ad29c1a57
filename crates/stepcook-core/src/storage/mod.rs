mod config;
pub mod database;
pub mod migrations;

pub use config::{EngineConfig, FacadeConfig, StorageConfig, SyncConfig, TimerConfig};
pub use database::{SessionDb, SessionFilter};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/stepcook[-dev]/` based on STEPCOOK_ENV.
///
/// Set STEPCOOK_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("STEPCOOK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("stepcook-dev")
    } else {
        base_dir.join("stepcook")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
