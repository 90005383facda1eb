// crates/draftgate-pipeline/tests/pipeline_flow.rs
// ============================================================================
// Module: Pipeline Flow Tests
// Description: End-to-end coordinator tests over stubbed clients.
// ============================================================================
//! ## Overview
//! Drives whole runs through the coordinator and worker with scripted
//! clients: the happy path with ordered events and one artifact, citation
//! enforcement, cooperative cancellation, the single repair round, and the
//! evaluation-failed escalation.

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

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Scenario;
use common::fixture;
use draftgate_core::RunEvent;
use draftgate_core::RunStatus;
use draftgate_core::event_types;
use draftgate_core::validate_transition;
use draftgate_pipeline::NoopTelemetry;
use draftgate_pipeline::Worker;

/// Loads every event of a run.
fn events_of(fx: &common::Fixture) -> Vec<RunEvent> {
    fx.store.list_run_events(&fx.tenant, &fx.run_id, None, 10_000).unwrap()
}

/// Index of the first event matching a type/stage pair.
fn index_of(events: &[RunEvent], event_type: &str, stage: Option<&str>) -> Option<usize> {
    events.iter().position(|event| {
        event.event_type == event_type
            && stage.is_none_or(|wanted| {
                event.stage.map(|stage| stage.as_str()) == Some(wanted)
            })
    })
}

#[test]
fn happy_path_succeeds_with_ordered_events_and_one_artifact() {
    let fx = fixture(Scenario::HappyPath);
    fx.coordinator.execute_run(&fx.tenant, &fx.run_id).unwrap();

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_some());

    let events = events_of(&fx);
    // Event numbers are dense and strictly increasing from 1.
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.event_number, i64::try_from(index).unwrap() + 1);
    }

    // State events describe a legal path through the transition table.
    let mut status = RunStatus::Queued;
    for event in events.iter().filter(|event| event.event_type == event_types::STATE) {
        if let (Some(from), Some(to)) = (
            event.payload.get("from").and_then(|v| v.as_str()).and_then(RunStatus::parse),
            event.payload.get("to").and_then(|v| v.as_str()).and_then(RunStatus::parse),
        ) {
            assert_eq!(from, status, "state events must chain");
            validate_transition(from, to).unwrap();
            status = to;
        }
    }
    assert_eq!(status, RunStatus::Succeeded);

    // Stage ordering: every stage_start precedes its stage_finish, and the
    // stages run in pipeline order.
    for stage in ["retrieve", "outline", "evidence_pack", "draft", "evaluate", "export"] {
        let start = index_of(&events, event_types::STAGE_START, Some(stage))
            .unwrap_or_else(|| panic!("missing stage_start for {stage}"));
        let finish = index_of(&events, event_types::STAGE_FINISH, Some(stage))
            .unwrap_or_else(|| panic!("missing stage_finish for {stage}"));
        assert!(start < finish, "{stage} start must precede finish");
    }
    let retrieve_start = index_of(&events, event_types::STAGE_START, Some("retrieve")).unwrap();
    let export_start = index_of(&events, event_types::STAGE_START, Some("export")).unwrap();
    assert!(retrieve_start < export_start);
    assert!(events.iter().any(|event| event.event_type == "run.succeeded"));

    // Exactly one artifact of type report_md, with footnotes substituted.
    let artifacts = fx
        .store
        .with_session(|session| session.list_artifacts(&fx.tenant, &fx.run_id, 10))
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].artifact_type, "report_md");
    let markdown = artifacts[0]
        .metadata
        .get("markdown")
        .and_then(|value| value.as_str())
        .unwrap();
    assert!(markdown.starts_with("# Research Report: effects of sleep on memory"));
    assert!(!markdown.contains("[CITE:"), "citation tokens must become footnotes");
    assert!(markdown.contains("## References"));
}

#[test]
fn worker_claims_and_completes_the_job() {
    let fx = fixture(Scenario::HappyPath);
    let worker = Worker::new(
        fx.store.clone(),
        fx.coordinator,
        Arc::new(NoopTelemetry),
        Duration::from_millis(10),
    );
    assert!(worker.run_once().unwrap(), "one job should be claimed");
    assert!(!worker.run_once().unwrap(), "queue should be drained");

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    let open = fx
        .store
        .with_session(|session| session.count_open_jobs(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(open, 0, "job must be terminal after completion");
}

#[test]
fn out_of_pack_citation_fails_the_run_with_no_draft_rows() {
    let fx = fixture(Scenario::BadCitation);
    let result = fx.coordinator.execute_run(&fx.tenant, &fx.run_id);
    assert!(result.is_err());

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_code.as_deref(), Some("worker_error"));
    assert!(
        run.failure_reason.as_deref().unwrap_or("").contains("deadbeefdeadbeef"),
        "failure reason names the offending snippet id"
    );

    let drafts = fx
        .store
        .with_session(|session| session.load_draft_sections(&fx.tenant, &fx.run_id))
        .unwrap();
    assert!(drafts.is_empty(), "failed draft stage must leave no rows");

    let events = events_of(&fx);
    let error_event = events
        .iter()
        .find(|event| event.event_type == event_types::ERROR)
        .expect("error event present");
    assert!(
        error_event
            .payload
            .get("error")
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .contains("deadbeefdeadbeef")
    );
}

#[test]
fn cancel_requested_mid_run_cancels_at_the_next_boundary() {
    let fx = fixture(Scenario::CancelDuringOutline);
    fx.coordinator.execute_run(&fx.tenant, &fx.run_id).unwrap();

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert!(run.cancel_requested_at.is_some());
    assert!(run.finished_at.is_some());

    let events = events_of(&fx);
    // The outline stage that was in flight completed; nothing ran after it.
    assert!(index_of(&events, event_types::STAGE_FINISH, Some("outline")).is_some());
    assert!(index_of(&events, event_types::STAGE_START, Some("evidence_pack")).is_none());
    assert!(index_of(&events, event_types::STAGE_START, Some("export")).is_none());
    assert!(events.iter().any(|event| event.message == "Cancel requested"));
}

#[test]
fn failing_section_is_repaired_once_and_run_succeeds() {
    let fx = fixture(Scenario::RepairOnce);
    fx.coordinator.execute_run(&fx.tenant, &fx.run_id).unwrap();

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    let events = events_of(&fx);
    let repair_starts = events
        .iter()
        .filter(|event| {
            event.event_type == event_types::STAGE_START
                && event.stage.map(|stage| stage.as_str()) == Some("repair")
        })
        .count();
    assert_eq!(repair_starts, 1, "repair runs exactly once");
    let evaluate_starts = events
        .iter()
        .filter(|event| {
            event.event_type == event_types::STAGE_START
                && event.stage.map(|stage| stage.as_str()) == Some("evaluate")
        })
        .count();
    assert_eq!(evaluate_starts, 2, "evaluation runs again after repair");

    // The repaired sentence landed; untouched sentences survived.
    let drafts = fx
        .store
        .with_session(|session| session.load_draft_sections(&fx.tenant, &fx.run_id))
        .unwrap();
    let mechanisms = drafts.get("mechanisms").expect("repaired section persisted");
    assert!(mechanisms.text.contains("suggests a modest effect"));
    assert!(mechanisms.text.contains("surveys the collected evidence in plain terms"));
}

#[test]
fn second_failing_evaluation_escalates_to_evaluation_failed() {
    let fx = fixture(Scenario::NeverPasses);
    let result = fx.coordinator.execute_run(&fx.tenant, &fx.run_id);
    assert!(result.is_err());

    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_code.as_deref(), Some("evaluation_failed"));
    assert!(run.failure_reason.as_deref().unwrap_or("").contains("failed evaluation"));
}

#[test]
fn retry_after_failure_requeues_and_second_run_completes() {
    let fx = fixture(Scenario::BadCitation);
    assert!(fx.coordinator.execute_run(&fx.tenant, &fx.run_id).is_err());

    let retried = fx
        .store
        .with_session(|session| {
            let run = session.retry_run(&fx.tenant, &fx.run_id)?;
            session.enqueue_run_job(&fx.tenant, &fx.run_id, "research.run")?;
            Ok(run)
        })
        .unwrap();
    assert_eq!(retried.status, RunStatus::Queued);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.failure_reason.is_none());

    // The retried run is executable again; with the same scripted failure it
    // fails the same way, which is what from-scratch re-execution means.
    assert!(fx.coordinator.execute_run(&fx.tenant, &fx.run_id).is_err());
    let run = fx
        .store
        .with_session(|session| session.get_run_required(&fx.tenant, &fx.run_id))
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}
