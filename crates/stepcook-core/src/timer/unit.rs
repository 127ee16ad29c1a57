//! Countdown timer primitive.
//!
//! The unit is a wall-clock-based state machine with no internal thread. The
//! owner calls [`TimerUnit::tick`] at whatever cadence it likes; ticks only
//! observe the clock, they never accumulate time themselves.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running <-> Paused
//!           |
//!           v
//!        Expired -> Running (start again)
//! any non-Idle --cancel--> Idle
//! ```
//!
//! Remaining time is tracked in milliseconds so repeated pause/resume cycles
//! never round away sub-second remainders.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    /// `remaining_ms` is the remainder as of `started_at_ms`; it is rebased
    /// on every resume.
    Running { remaining_ms: u64, started_at_ms: u64 },
    Paused { remaining_ms: u64 },
    Expired,
}

impl TimerState {
    pub fn is_running(&self) -> bool {
        matches!(self, TimerState::Running { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, TimerState::Idle)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TimerState::Expired)
    }

    /// Remaining milliseconds at `now_ms`, derived from the wall clock.
    pub fn remaining_ms_at(&self, now_ms: u64) -> Option<u64> {
        match *self {
            TimerState::Idle => None,
            TimerState::Running {
                remaining_ms,
                started_at_ms,
            } => Some(remaining_ms.saturating_sub(now_ms.saturating_sub(started_at_ms))),
            TimerState::Paused { remaining_ms } => Some(remaining_ms),
            TimerState::Expired => Some(0),
        }
    }

    /// Remaining whole seconds at `now_ms`, rounded up so a timer with
    /// 200ms left still shows 1.
    pub fn remaining_seconds_at(&self, now_ms: u64) -> Option<u64> {
        self.remaining_ms_at(now_ms).map(|ms| ms.div_ceil(1000))
    }

    fn name(&self) -> &'static str {
        match self {
            TimerState::Idle => "idle",
            TimerState::Running { .. } => "running",
            TimerState::Paused { .. } => "paused",
            TimerState::Expired => "expired",
        }
    }
}

/// Result of observing a running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Remaining(u64),
    /// Emitted exactly once per `start`.
    Expired,
}

#[derive(Debug, Clone)]
pub struct TimerUnit {
    state: TimerState,
    clock: Arc<dyn Clock>,
}

impl TimerUnit {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_state(TimerState::Idle, clock)
    }

    /// Rehydrate from a persisted state. A `Running` timer keeps its original
    /// start reference, so time spent while the process was gone is counted.
    pub fn from_state(state: TimerState, clock: Arc<dyn Clock>) -> Self {
        Self { state, clock }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn remaining_ms(&self) -> Option<u64> {
        self.state.remaining_ms_at(self.clock.now_ms())
    }

    pub fn remaining_seconds(&self) -> Option<u64> {
        self.state.remaining_seconds_at(self.clock.now_ms())
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, duration_seconds: u64) -> Result<()> {
        match self.state {
            TimerState::Idle | TimerState::Expired => {
                if duration_seconds == 0 {
                    return Err(CoreError::InvalidInput(
                        "timer duration must be positive".into(),
                    ));
                }
                self.state = TimerState::Running {
                    remaining_ms: duration_seconds.saturating_mul(1000),
                    started_at_ms: self.clock.now_ms(),
                };
                Ok(())
            }
            other => Err(CoreError::invalid_state("start timer", other.name())),
        }
    }

    /// Captures the remainder at the instant of pause.
    pub fn pause(&mut self) -> Result<u64> {
        match self.state {
            TimerState::Running { .. } => {
                let remaining_ms = self.remaining_ms().unwrap_or(0);
                self.state = TimerState::Paused { remaining_ms };
                Ok(remaining_ms)
            }
            other => Err(CoreError::invalid_state("pause timer", other.name())),
        }
    }

    /// Rebases the start reference to now.
    pub fn resume(&mut self) -> Result<u64> {
        match self.state {
            TimerState::Paused { remaining_ms } => {
                self.state = TimerState::Running {
                    remaining_ms,
                    started_at_ms: self.clock.now_ms(),
                };
                Ok(remaining_ms)
            }
            other => Err(CoreError::invalid_state("resume timer", other.name())),
        }
    }

    /// Discards remaining time. Returns the state that was cancelled.
    pub fn cancel(&mut self) -> Result<TimerState> {
        match self.state {
            TimerState::Idle => Err(CoreError::invalid_state("cancel timer", "idle")),
            previous => {
                self.state = TimerState::Idle;
                Ok(previous)
            }
        }
    }

    /// Observe the clock. Returns `None` unless the timer is running.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if !self.state.is_running() {
            return None;
        }
        let remaining_ms = self.remaining_ms().unwrap_or(0);
        if remaining_ms == 0 {
            self.state = TimerState::Expired;
            return Some(TickOutcome::Expired);
        }
        Some(TickOutcome::Remaining(remaining_ms.div_ceil(1000)))
    }
}
