//! Session snapshot types.
//!
//! A [`CookingSession`] is the unit of persistence and sync: it is stored and
//! exchanged whole, never merged field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recipe::Recipe;
use crate::timer::TimerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(SessionStatus::NotStarted),
            "in_progress" => Some(SessionStatus::InProgress),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookingSession {
    pub session_id: String,
    pub recipe_id: String,
    pub current_step_index: usize,
    pub timer: TimerState,
    pub status: SessionStatus,
    pub last_mutated_at: DateTime<Utc>,
    /// Incremented on every committed local mutation; the sole conflict key
    /// against the remote copy.
    pub sync_version: u64,
}

impl CookingSession {
    /// A fresh session at step 0 with a newly generated id.
    pub fn new(recipe_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            recipe_id: recipe_id.into(),
            current_step_index: 0,
            timer: TimerState::Idle,
            status: SessionStatus::NotStarted,
            last_mutated_at: at,
            sync_version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Equal in everything except `sync_version`.
    pub fn same_state(&self, other: &CookingSession) -> bool {
        self.session_id == other.session_id
            && self.recipe_id == other.recipe_id
            && self.current_step_index == other.current_step_index
            && self.timer == other.timer
            && self.status == other.status
            && self.last_mutated_at == other.last_mutated_at
    }

    /// 0.0 .. 100.0 progress through the recipe's steps.
    pub fn progress_pct(&self, recipe: &Recipe) -> f64 {
        if recipe.is_empty() {
            return 0.0;
        }
        if self.status == SessionStatus::Completed {
            return 100.0;
        }
        (self.current_step_index as f64 / recipe.len() as f64 * 100.0).min(100.0)
    }
}
