//! Session state machine.
//!
//! Owns the step cursor, the session status and the single [`TimerUnit`] for
//! the current step. Commands are validated before anything is touched, so a
//! rejected command leaves the session exactly as it was.
//!
//! ## State Transitions
//!
//! ```text
//! NotStarted -> InProgress <-> Paused
//!                   |
//!                   v
//!               Completed
//! NotStarted | InProgress | Paused -> Abandoned
//! ```
//!
//! Every accepted command bumps `sync_version` by exactly one. Timer ticks
//! are observations, not commands: they may move the timer to `Expired` but
//! never bump the version.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::command::Command;
use super::model::{CookingSession, SessionStatus};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::SessionEvent;
use crate::recipe::{Recipe, RecipeStep};
use crate::timer::{TickOutcome, TimerState, TimerUnit};

/// Outcome of an accepted command.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: CookingSession,
    pub events: Vec<SessionEvent>,
}

/// Outcome of observing the clock.
#[derive(Debug, Clone, PartialEq)]
pub enum TickUpdate {
    Remaining(u64),
    Expired(SessionEvent),
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    recipe: Arc<Recipe>,
    session: CookingSession,
    timer: TimerUnit,
    clock: Arc<dyn Clock>,
}

impl SessionMachine {
    /// Create a brand-new session for `recipe`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the recipe fails validation.
    pub fn new(recipe: Arc<Recipe>, clock: Arc<dyn Clock>) -> Result<Self> {
        recipe.validate()?;
        let session = CookingSession::new(recipe.id.clone(), clock.now_utc());
        let timer = TimerUnit::new(clock.clone());
        info!(session_id = %session.session_id, recipe_id = %recipe.id, "created cooking session");
        Ok(Self {
            recipe,
            session,
            timer,
            clock,
        })
    }

    /// Continue a persisted session.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the snapshot does not belong to `recipe` or
    /// points past its last step.
    pub fn restore(
        recipe: Arc<Recipe>,
        snapshot: CookingSession,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        recipe.validate()?;
        check_snapshot(&recipe, &snapshot)?;
        let timer = TimerUnit::from_state(snapshot.timer, clock.clone());
        debug!(
            session_id = %snapshot.session_id,
            sync_version = snapshot.sync_version,
            "restored cooking session"
        );
        Ok(Self {
            recipe,
            session: snapshot,
            timer,
            clock,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session(&self) -> CookingSession {
        let mut snapshot = self.session.clone();
        snapshot.timer = self.timer.state();
        snapshot
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn sync_version(&self) -> u64 {
        self.session.sync_version
    }

    pub fn current_step(&self) -> Option<&RecipeStep> {
        self.recipe.step(self.session.current_step_index)
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    /// Remaining seconds on the active timer, recomputed from the clock.
    pub fn remaining_seconds(&self) -> Option<u64> {
        self.timer.remaining_seconds()
    }

    pub fn is_terminal(&self) -> bool {
        self.session.status.is_terminal()
    }

    /// Whether the tick source should be running for this session.
    pub fn needs_ticks(&self) -> bool {
        self.session.status == SessionStatus::InProgress && self.timer.state().is_running()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply a user command.
    ///
    /// # Errors
    /// `InvalidState` when the command is not legal in the current status,
    /// `InvalidInput` for out-of-range arguments. State is unchanged on error.
    pub fn apply(&mut self, command: Command) -> Result<Transition> {
        let status = self.session.status;
        if status.is_terminal() {
            warn!(
                session_id = %self.session.session_id,
                command = command.name(),
                status = status.as_str(),
                "rejected command on terminal session"
            );
            return Err(CoreError::invalid_state(command.name(), status.as_str()));
        }

        let now = self.clock.now_utc();
        let result = match command {
            Command::Start => self.start(now),
            Command::ConfirmStep => self.confirm_step(now),
            Command::PauseSession => self.pause(now),
            Command::ResumeSession => self.resume(now),
            Command::AbandonSession => self.abandon(now),
            Command::GoToStep { index } => self.go_to_step(index, now),
            Command::StartStepTimer => self.start_step_timer(now),
        };

        let events = match result {
            Ok(events) => events,
            Err(err) => {
                warn!(
                    session_id = %self.session.session_id,
                    command = command.name(),
                    error = %err,
                    "rejected command"
                );
                return Err(err);
            }
        };

        self.commit(now);
        debug!(
            session_id = %self.session.session_id,
            command = command.name(),
            status = self.session.status.as_str(),
            step = self.session.current_step_index,
            sync_version = self.session.sync_version,
            "applied command"
        );
        Ok(Transition {
            session: self.session(),
            events,
        })
    }

    /// Observe the clock for the active timer. Only a running timer in an
    /// in-progress session produces an update.
    pub fn tick(&mut self) -> Option<TickUpdate> {
        if self.session.status != SessionStatus::InProgress {
            return None;
        }
        match self.timer.tick()? {
            TickOutcome::Remaining(secs) => Some(TickUpdate::Remaining(secs)),
            TickOutcome::Expired => {
                self.session.timer = self.timer.state();
                let step_index = self.session.current_step_index;
                info!(session_id = %self.session.session_id, step_index, "step timer expired");
                Some(TickUpdate::Expired(SessionEvent::TimerExpired {
                    step_index,
                    at: self.clock.now_utc(),
                }))
            }
        }
    }

    /// Whether `snapshot` may replace this session: same session, same
    /// recipe, a valid step, and this session has not finished yet.
    ///
    /// # Errors
    /// `InvalidState` once the session is terminal, `InvalidInput` for a
    /// snapshot that does not fit.
    pub fn check_refresh(&self, snapshot: &CookingSession) -> Result<()> {
        if self.is_terminal() {
            return Err(CoreError::invalid_state(
                "apply remote snapshot",
                self.session.status.as_str(),
            ));
        }
        if snapshot.session_id != self.session.session_id {
            return Err(CoreError::InvalidInput(format!(
                "snapshot {} does not belong to session {}",
                snapshot.session_id, self.session.session_id
            )));
        }
        check_snapshot(&self.recipe, snapshot)
    }

    /// Replace local state with an authoritative snapshot (e.g. one pulled
    /// from the remote store). The whole snapshot wins, timer included.
    pub fn replace_snapshot(&mut self, snapshot: CookingSession) -> Result<()> {
        self.check_refresh(&snapshot)?;
        self.timer = TimerUnit::from_state(snapshot.timer, self.clock.clone());
        self.session = snapshot;
        Ok(())
    }

    /// Take a higher version the store re-stamped onto this same state.
    pub fn adopt_version(&mut self, sync_version: u64) {
        self.session.sync_version = self.session.sync_version.max(sync_version);
    }

    // ── Handlers ─────────────────────────────────────────────────────

    fn start(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        self.require(Command::Start, &[SessionStatus::NotStarted])?;
        self.session.current_step_index = 0;
        self.session.status = SessionStatus::InProgress;
        let mut events = vec![SessionEvent::SessionStarted {
            session_id: self.session.session_id.clone(),
            recipe_id: self.recipe.id.clone(),
            at: now,
        }];
        events.extend(self.start_timer_if_timed(now)?);
        Ok(events)
    }

    fn confirm_step(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        self.require(Command::ConfirmStep, &[SessionStatus::InProgress])?;
        let from_step = self.session.current_step_index;
        let early = self.timer.remaining_ms().is_some_and(|ms| ms > 0)
            && self.timer.state().is_running();

        let mut events = Vec::new();
        events.extend(self.discard_timer(now));

        if from_step >= self.recipe.last_index() {
            self.session.status = SessionStatus::Completed;
            events.push(SessionEvent::SessionCompleted {
                session_id: self.session.session_id.clone(),
                at: now,
            });
            info!(session_id = %self.session.session_id, "cooking session completed");
            return Ok(events);
        }

        self.session.current_step_index = from_step + 1;
        events.push(SessionEvent::StepAdvanced {
            from_step,
            to_step: from_step + 1,
            early,
            at: now,
        });
        events.extend(self.start_timer_if_timed(now)?);
        Ok(events)
    }

    fn pause(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        self.require(Command::PauseSession, &[SessionStatus::InProgress])?;
        let mut events = Vec::new();
        if self.timer.state().is_running() {
            let remaining_ms = self.timer.pause()?;
            events.push(SessionEvent::TimerPaused {
                step_index: self.session.current_step_index,
                remaining_ms,
                at: now,
            });
        }
        self.session.status = SessionStatus::Paused;
        events.push(SessionEvent::SessionPaused { at: now });
        Ok(events)
    }

    fn resume(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        self.require(Command::ResumeSession, &[SessionStatus::Paused])?;
        let mut events = Vec::new();
        if matches!(self.timer.state(), TimerState::Paused { .. }) {
            let remaining_ms = self.timer.resume()?;
            events.push(SessionEvent::TimerResumed {
                step_index: self.session.current_step_index,
                remaining_ms,
                at: now,
            });
        }
        self.session.status = SessionStatus::InProgress;
        events.push(SessionEvent::SessionResumed { at: now });
        Ok(events)
    }

    fn abandon(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        let mut events: Vec<SessionEvent> = self.discard_timer(now).into_iter().collect();
        self.session.status = SessionStatus::Abandoned;
        events.push(SessionEvent::SessionAbandoned {
            session_id: self.session.session_id.clone(),
            step_index: self.session.current_step_index,
            at: now,
        });
        info!(session_id = %self.session.session_id, "cooking session abandoned");
        Ok(events)
    }

    fn go_to_step(&mut self, index: usize, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        let command = Command::GoToStep { index };
        self.require(command, &[SessionStatus::InProgress, SessionStatus::Paused])?;
        if index >= self.recipe.len() {
            return Err(CoreError::InvalidInput(format!(
                "step {index} out of range for recipe {} ({} steps)",
                self.recipe.id,
                self.recipe.len()
            )));
        }

        let from_step = self.session.current_step_index;
        let mut events = Vec::new();
        if index != from_step {
            events.extend(self.discard_timer(now));
            self.session.current_step_index = index;
        }
        events.push(SessionEvent::StepJumped {
            from_step,
            to_step: index,
            at: now,
        });
        Ok(events)
    }

    fn start_step_timer(&mut self, now: DateTime<Utc>) -> Result<Vec<SessionEvent>> {
        self.require(Command::StartStepTimer, &[SessionStatus::InProgress])?;
        let step_index = self.session.current_step_index;
        let duration = self
            .current_step()
            .and_then(|s| s.duration_seconds)
            .ok_or_else(|| CoreError::InvalidInput(format!("step {step_index} has no timer")))?;
        self.timer.start(duration)?;
        Ok(vec![SessionEvent::TimerStarted {
            step_index,
            duration_secs: duration,
            at: now,
        }])
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn require(&self, command: Command, allowed: &[SessionStatus]) -> Result<()> {
        if allowed.contains(&self.session.status) {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                command.name(),
                self.session.status.as_str(),
            ))
        }
    }

    fn start_timer_if_timed(&mut self, now: DateTime<Utc>) -> Result<Option<SessionEvent>> {
        let step_index = self.session.current_step_index;
        let Some(duration) = self.current_step().and_then(|s| s.duration_seconds) else {
            return Ok(None);
        };
        self.timer.start(duration)?;
        Ok(Some(SessionEvent::TimerStarted {
            step_index,
            duration_secs: duration,
            at: now,
        }))
    }

    /// Cancel whatever timer is active. Idle timers produce no event.
    fn discard_timer(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let remaining_ms = self.timer.remaining_ms()?;
        self.timer.cancel().ok()?;
        Some(SessionEvent::TimerCancelled {
            step_index: self.session.current_step_index,
            remaining_ms,
            at: now,
        })
    }

    fn commit(&mut self, now: DateTime<Utc>) {
        self.session.timer = self.timer.state();
        self.session.last_mutated_at = now;
        self.session.sync_version += 1;
    }
}

/// Whether `snapshot` is a session of `recipe` at a step it has.
pub(crate) fn check_snapshot(recipe: &Recipe, snapshot: &CookingSession) -> Result<()> {
    if snapshot.recipe_id != recipe.id {
        return Err(CoreError::InvalidInput(format!(
            "session {} belongs to recipe {}, not {}",
            snapshot.session_id, snapshot.recipe_id, recipe.id
        )));
    }
    if snapshot.current_step_index >= recipe.len() {
        return Err(CoreError::InvalidInput(format!(
            "session {} is at step {} but recipe {} has {} steps",
            snapshot.session_id,
            snapshot.current_step_index,
            recipe.id,
            recipe.len()
        )));
    }
    Ok(())
}
