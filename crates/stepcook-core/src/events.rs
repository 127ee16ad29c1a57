use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every accepted transition produces one or more events.
/// Presentation layers subscribe to them for notifications and sounds;
/// the state stream remains the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
        recipe_id: String,
        at: DateTime<Utc>,
    },
    TimerStarted {
        step_index: usize,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        step_index: usize,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        step_index: usize,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// The step's countdown reached zero. The step still waits for an
    /// explicit confirmation.
    TimerExpired {
        step_index: usize,
        at: DateTime<Utc>,
    },
    /// A running, paused or expired timer was discarded.
    TimerCancelled {
        step_index: usize,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    StepAdvanced {
        from_step: usize,
        to_step: usize,
        /// True when the step was confirmed while its timer was still running.
        early: bool,
        at: DateTime<Utc>,
    },
    StepJumped {
        from_step: usize,
        to_step: usize,
        at: DateTime<Utc>,
    },
    SessionPaused {
        at: DateTime<Utc>,
    },
    SessionResumed {
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        at: DateTime<Utc>,
    },
    SessionAbandoned {
        session_id: String,
        step_index: usize,
        at: DateTime<Utc>,
    },
    /// A newer snapshot from the remote store replaced local state.
    RemoteRefresh {
        session_id: String,
        sync_version: u64,
        at: DateTime<Utc>,
    },
}
