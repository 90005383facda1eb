// crates/draftgate-core/tests/state_machine.rs
// ============================================================================
// Module: State Machine Tests
// Description: Tests for the run-status transition table.
// ============================================================================
//! ## Overview
//! Validates the allowed-transition table, same-state idempotency, and the
//! terminal sinks.

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
use draftgate_core::TransitionError;
use draftgate_core::validate_transition;

/// Every status for table-driven checks.
const ALL: [RunStatus; 7] = [
    RunStatus::Created,
    RunStatus::Queued,
    RunStatus::Running,
    RunStatus::Blocked,
    RunStatus::Failed,
    RunStatus::Succeeded,
    RunStatus::Canceled,
];

#[test]
fn same_state_is_always_accepted() {
    for status in ALL {
        assert!(validate_transition(status, status).is_ok(), "{status} -> {status}");
    }
}

#[test]
fn happy_path_transitions_are_allowed() {
    let path = [
        (RunStatus::Created, RunStatus::Queued),
        (RunStatus::Queued, RunStatus::Running),
        (RunStatus::Running, RunStatus::Succeeded),
    ];
    for (from, to) in path {
        assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
    }
}

#[test]
fn failed_reenters_queued_only() {
    assert!(validate_transition(RunStatus::Failed, RunStatus::Queued).is_ok());
    for to in ALL {
        if to == RunStatus::Queued || to == RunStatus::Failed {
            continue;
        }
        assert_eq!(
            validate_transition(RunStatus::Failed, to),
            Err(TransitionError::Illegal {
                from: RunStatus::Failed,
                to,
            })
        );
    }
}

#[test]
fn terminal_states_are_sinks() {
    for from in [RunStatus::Succeeded, RunStatus::Canceled] {
        assert!(from.is_terminal());
        for to in ALL {
            if from == to {
                continue;
            }
            assert!(validate_transition(from, to).is_err(), "{from} -> {to} must be illegal");
        }
    }
}

#[test]
fn blocked_is_reachable_and_recoverable() {
    assert!(validate_transition(RunStatus::Running, RunStatus::Blocked).is_ok());
    assert!(validate_transition(RunStatus::Blocked, RunStatus::Running).is_ok());
    assert!(validate_transition(RunStatus::Blocked, RunStatus::Failed).is_ok());
    assert!(validate_transition(RunStatus::Blocked, RunStatus::Canceled).is_ok());
    assert!(validate_transition(RunStatus::Blocked, RunStatus::Succeeded).is_err());
}

#[test]
fn created_cannot_jump_to_running() {
    assert_eq!(
        validate_transition(RunStatus::Created, RunStatus::Running),
        Err(TransitionError::Illegal {
            from: RunStatus::Created,
            to: RunStatus::Running,
        })
    );
}

#[test]
fn cancellation_is_reachable_from_every_non_terminal_state_except_failed() {
    for from in [RunStatus::Created, RunStatus::Queued, RunStatus::Running, RunStatus::Blocked] {
        assert!(validate_transition(from, RunStatus::Canceled).is_ok(), "{from} -> canceled");
    }
    assert!(validate_transition(RunStatus::Failed, RunStatus::Canceled).is_err());
}

#[test]
fn labels_round_trip() {
    for status in ALL {
        assert_eq!(RunStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(RunStatus::parse("paused"), None);
}
