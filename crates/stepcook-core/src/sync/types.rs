//! Core types for remote session synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::CookingSession;

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Remote unreachable, disabled or slow; continue with the local copy.
    Offline,
    /// Both copies carry the same version.
    InSync,
    /// The local snapshot was pushed.
    Pushed { sync_version: u64 },
    /// The remote snapshot was newer and replaced the local one.
    Pulled(CookingSession),
}

impl ReconcileOutcome {
    pub fn is_offline(&self) -> bool {
        matches!(self, ReconcileOutcome::Offline)
    }
}

/// Current sync status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last reconcile that reached the remote store.
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Number of sessions waiting to be pushed.
    pub pending_count: usize,
    /// Last known connectivity.
    pub online: bool,
    /// Whether a remote store is configured at all.
    pub remote_configured: bool,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote rejected v{attempted}: it holds v{stored}")]
    Conflict { attempted: u64, stored: u64 },

    #[error("Remote store unavailable")]
    Unavailable,

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}
