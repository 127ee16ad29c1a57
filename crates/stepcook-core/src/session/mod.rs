mod command;
mod machine;
mod model;

pub use command::Command;
pub(crate) use machine::check_snapshot;
pub use machine::{SessionMachine, TickUpdate, Transition};
pub use model::{CookingSession, SessionStatus};
