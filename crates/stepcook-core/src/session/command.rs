use serde::{Deserialize, Serialize};

/// User commands accepted by a cooking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start,
    /// Finish the current step. While the step's timer is still running this
    /// is an explicit early confirmation and cancels the timer.
    ConfirmStep,
    PauseSession,
    ResumeSession,
    AbandonSession,
    /// Navigate to a step without starting its timer.
    GoToStep { index: usize },
    /// Start (or restart after expiry) the current step's timer.
    StartStepTimer,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::ConfirmStep => "confirm step",
            Command::PauseSession => "pause session",
            Command::ResumeSession => "resume session",
            Command::AbandonSession => "abandon session",
            Command::GoToStep { .. } => "go to step",
            Command::StartStepTimer => "start step timer",
        }
    }
}
