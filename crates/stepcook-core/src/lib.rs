//! # Stepcook Core Library
//!
//! This library provides the cooking-session engine behind Stepcook: it
//! walks a cook through the ordered steps of a recipe, runs a countdown for
//! each timed step, and keeps the session durable across app restarts and
//! in sync with a remote copy when a network is available.
//!
//! ## Architecture
//!
//! - **Timer Unit**: A wall-clock countdown for the current step. Remaining
//!   time is always recomputed from the clock, never accumulated from ticks
//! - **Session Machine**: Validates and applies user commands, owns the step
//!   cursor and the timer, and bumps `sync_version` once per accepted command
//! - **Session Store**: SQLite snapshots plus version-based reconciliation
//!   with a remote document store
//! - **Session Facade**: A single-writer actor exposing state, tick and event
//!   streams to the presentation layer
//!
//! ## Key Components
//!
//! - [`SessionFacade`]: Entry point for a running session
//! - [`SessionMachine`]: Synchronous session state machine
//! - [`SessionStore`]: Local persistence and remote reconciliation
//! - [`EngineConfig`]: Engine configuration (TOML)
//! - [`RemoteSessionStore`]: Trait for remote session backends

pub mod clock;
pub mod error;
pub mod events;
pub mod facade;
pub mod logging;
pub mod recipe;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, Result};
pub use events::SessionEvent;
pub use facade::SessionFacade;
pub use recipe::{Recipe, RecipeStep};
pub use session::{Command, CookingSession, SessionMachine, SessionStatus, TickUpdate, Transition};
pub use storage::{EngineConfig, SessionDb, SessionFilter};
pub use store::SessionStore;
pub use sync::{
    HttpRemoteStore, MemoryRemoteStore, ReconcileOutcome, RemoteSessionStore, SyncError,
    SyncStatus,
};
pub use timer::{TimerState, TimerUnit};
