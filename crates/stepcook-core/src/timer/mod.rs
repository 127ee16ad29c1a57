mod unit;

pub use unit::{TickOutcome, TimerState, TimerUnit};
