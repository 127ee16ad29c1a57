//! Property-based tests for the session machine and timer unit.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use stepcook_core::timer::{TickOutcome, TimerUnit};
use stepcook_core::{Command, CoreError, ManualClock, Recipe, SessionMachine, SessionStatus};

fn recipe() -> Arc<Recipe> {
    Arc::new(
        Recipe::from_instructions(
            "bread",
            [
                ("Mix", None),
                ("Knead", Some(600)),
                ("Proof", Some(3600)),
                ("Shape", None),
                ("Bake", Some(2400)),
            ],
        )
        .unwrap(),
    )
}

/// Every command except abandon.
fn progress_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Start),
        Just(Command::ConfirmStep),
        Just(Command::PauseSession),
        Just(Command::ResumeSession),
        Just(Command::StartStepTimer),
        (0usize..7).prop_map(|index| Command::GoToStep { index }),
    ]
}

fn command() -> impl Strategy<Value = Command> {
    // Abandon stays rare so sequences get a chance to go deep.
    prop_oneof![
        12 => progress_command(),
        1 => Just(Command::AbandonSession),
    ]
}

proptest! {
    #[test]
    fn test_sync_version_counts_accepted_commands(
        commands in prop::collection::vec((command(), 0u64..120_000), 0..60),
    ) {
        let clock = ManualClock::new(0);
        let mut machine = SessionMachine::new(recipe(), Arc::new(clock.clone())).unwrap();
        let mut accepted = 0u64;
        let mut last_version = machine.sync_version();

        for (command, wait_ms) in commands {
            clock.advance(Duration::from_millis(wait_ms));
            machine.tick();
            let before = machine.session();
            match machine.apply(command) {
                Ok(transition) => {
                    accepted += 1;
                    prop_assert!(transition.session.sync_version > last_version);
                    last_version = transition.session.sync_version;
                }
                Err(_) => prop_assert_eq!(machine.session(), before),
            }
            prop_assert_eq!(machine.sync_version(), accepted);
        }
    }

    #[test]
    fn test_abandon_makes_every_later_command_fail(
        prefix in prop::collection::vec(progress_command(), 0..20),
        suffix in prop::collection::vec(command(), 1..10),
    ) {
        let clock = ManualClock::new(0);
        let mut machine = SessionMachine::new(recipe(), Arc::new(clock.clone())).unwrap();
        for command in prefix {
            let _ = machine.apply(command);
        }
        prop_assume!(!machine.is_terminal());

        machine.apply(Command::AbandonSession).unwrap();
        prop_assert_eq!(machine.status(), SessionStatus::Abandoned);
        prop_assert!(!machine.timer_state().is_running());

        let version = machine.sync_version();
        for command in suffix {
            let rejected = matches!(machine.apply(command), Err(CoreError::InvalidState { .. }));
            prop_assert!(rejected);
        }
        prop_assert_eq!(machine.sync_version(), version);
    }

    #[test]
    fn test_confirm_on_last_step_completes(
        jump_timer in any::<bool>(),
        elapsed_ms in 0u64..5_000_000,
    ) {
        let clock = ManualClock::new(0);
        let mut machine = SessionMachine::new(recipe(), Arc::new(clock.clone())).unwrap();
        machine.apply(Command::Start).unwrap();
        machine.apply(Command::GoToStep { index: 4 }).unwrap();
        if jump_timer {
            machine.apply(Command::StartStepTimer).unwrap();
        }
        clock.advance(Duration::from_millis(elapsed_ms));
        machine.tick();

        let transition = machine.apply(Command::ConfirmStep).unwrap();
        prop_assert_eq!(transition.session.status, SessionStatus::Completed);
        prop_assert!(!transition.session.timer.is_running());
    }

    #[test]
    fn test_pausing_shifts_expiry_by_paused_time(
        duration_secs in 1u64..600,
        segments in prop::collection::vec((1u64..10_000, 0u64..100_000), 0..10),
    ) {
        let clock = ManualClock::new(1_000);
        let mut timer = TimerUnit::new(Arc::new(clock.clone()));
        timer.start(duration_secs).unwrap();

        let total_ms = duration_secs * 1_000;
        let mut ran_ms = 0u64;
        let mut paused_ms = 0u64;
        for (run, pause) in segments {
            // Stay strictly before expiry.
            if ran_ms + run >= total_ms {
                break;
            }
            clock.advance(Duration::from_millis(run));
            ran_ms += run;
            prop_assert_eq!(timer.pause().unwrap(), total_ms - ran_ms);
            clock.advance(Duration::from_millis(pause));
            paused_ms += pause;
            timer.resume().unwrap();
        }

        // Expiry lands at start + duration + paused time.
        let expected_expiry = 1_000 + total_ms + paused_ms;
        clock.set_ms(expected_expiry - 1);
        prop_assert_eq!(timer.tick(), Some(TickOutcome::Remaining(1)));
        clock.set_ms(expected_expiry);
        prop_assert_eq!(timer.tick(), Some(TickOutcome::Expired));
        prop_assert_eq!(timer.tick(), None);
    }
}
