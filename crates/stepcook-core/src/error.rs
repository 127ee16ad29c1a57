//! Core error types for stepcook-core.
//!
//! The four domain errors (`InvalidState`, `InvalidInput`, `VersionConflict`,
//! `NotFound`) are all recoverable: a rejected command or a stale write never
//! mutates state. Infrastructure failures wrap their underlying errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Core error type for stepcook-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Operation is not legal in the current state.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    /// Malformed recipe or command arguments.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A write carried a `sync_version` not newer than the stored one.
    #[error("Version conflict for session {session_id}: attempted v{attempted}, stored v{stored}")]
    VersionConflict {
        session_id: String,
        attempted: u64,
        stored: u64,
    },

    /// Unknown session id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote sync errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session's command queue has shut down.
    #[error("Session command channel closed")]
    ChannelClosed,
}

impl CoreError {
    pub(crate) fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        CoreError::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Whether the error leaves the caller free to retry or continue.
    ///
    /// Everything except storage, IO and a closed command channel.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::Database(_) | CoreError::Io(_) | CoreError::ChannelClosed
        )
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// The connection mutex was poisoned by a panicking writer
    #[error("Database connection poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked
                    || err.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
