// crates/draftgate-core/tests/proptest_transitions.rs
// ============================================================================
// Module: Transition Property Tests
// Description: Property tests over the run-status state machine.
// ============================================================================
//! ## Overview
//! Exhaustively samples transition requests and checks the structural
//! guarantees: terminal sinks stay sinks, accepted paths only use table
//! edges, and validation is deterministic.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use draftgate_core::RunStatus;
use draftgate_core::validate_transition;
use proptest::prelude::Just;
use proptest::prelude::Strategy;
use proptest::prop_oneof;
use proptest::proptest;

/// Strategy over every run status.
fn any_status() -> impl Strategy<Value = RunStatus> {
    prop_oneof![
        Just(RunStatus::Created),
        Just(RunStatus::Queued),
        Just(RunStatus::Running),
        Just(RunStatus::Blocked),
        Just(RunStatus::Failed),
        Just(RunStatus::Succeeded),
        Just(RunStatus::Canceled),
    ]
}

proptest! {
    #[test]
    fn terminal_states_reject_every_exit(to in any_status()) {
        for from in [RunStatus::Succeeded, RunStatus::Canceled] {
            let accepted = validate_transition(from, to).is_ok();
            assert_eq!(accepted, from == to);
        }
    }

    #[test]
    fn accepted_transitions_are_table_edges(from in any_status(), to in any_status()) {
        if validate_transition(from, to).is_ok() && from != to {
            assert!(from.allowed_transitions().contains(&to));
        }
    }

    #[test]
    fn validation_is_deterministic(from in any_status(), to in any_status()) {
        assert_eq!(validate_transition(from, to), validate_transition(from, to));
    }

    #[test]
    fn random_walks_respect_sinks(steps in proptest::collection::vec(any_status(), 0..24)) {
        let mut current = RunStatus::Created;
        for requested in steps {
            if validate_transition(current, requested).is_ok() {
                current = requested;
            }
        }
        // Whatever path was taken, a terminal state can only be left by
        // staying in place, so re-validating every exit still fails.
        if current.is_terminal() {
            assert!(current.allowed_transitions().is_empty());
        }
    }
}
