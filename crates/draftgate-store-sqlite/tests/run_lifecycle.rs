// crates/draftgate-store-sqlite/tests/run_lifecycle.rs
// ============================================================================
// Module: Run Lifecycle Tests
// Description: Tests for atomic transitions, cancellation, and retry.
// ============================================================================
//! ## Overview
//! Validates that run transitions respect the state machine, emit `state`
//! events with `{from, to}` payloads, and keep the project denormalization
//! current.

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

use draftgate_core::Project;
use draftgate_core::Run;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_core::event_types;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;
use draftgate_store_sqlite::StoreError;
use draftgate_store_sqlite::TransitionUpdate;

/// Opens a store and seeds one project and one queued run.
fn seed() -> (tempfile::TempDir, SqliteStore, TenantId, Project, Run) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    let tenant = TenantId::new("t1");
    let (project, run) = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "demo", None)?;
            let run = session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id.clone(),
                    status: RunStatus::Queued,
                    current_stage: Some(Stage::Retrieve),
                    question: "effects of sleep on memory".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: Some("c1".to_string()),
                    budgets: serde_json::json!({}),
                    usage: serde_json::json!({}),
                },
            )?;
            Ok((project, run))
        })
        .unwrap();
    (dir, store, tenant, project, run)
}

#[test]
fn transition_updates_row_and_emits_state_event() {
    let (_dir, store, tenant, _project, run) = seed();
    let update = TransitionUpdate {
        stage: Some(Stage::Retrieve),
        started_at: Some(Timestamp::now()),
        ..TransitionUpdate::default()
    };
    let updated = store
        .with_session(|session| {
            session.transition_run_status(&tenant, &run.id, RunStatus::Running, &update)
        })
        .unwrap();
    assert_eq!(updated.status, RunStatus::Running);
    assert!(updated.started_at.is_some());

    let events = store.list_run_events(&tenant, &run.id, None, 100).unwrap();
    let state_event = events
        .iter()
        .find(|event| event.event_type == event_types::STATE)
        .expect("state event present");
    assert_eq!(state_event.payload.get("from").and_then(|v| v.as_str()), Some("queued"));
    assert_eq!(state_event.payload.get("to").and_then(|v| v.as_str()), Some("running"));
}

#[test]
fn illegal_transition_is_rejected_and_row_unchanged() {
    let (_dir, store, tenant, _project, run) = seed();
    let result = store.with_session(|session| {
        session.transition_run_status(
            &tenant,
            &run.id,
            RunStatus::Succeeded,
            &TransitionUpdate::default(),
        )
    });
    assert!(matches!(result, Err(StoreError::Transition(_))));
    let after = store
        .with_session(|session| session.get_run_required(&tenant, &run.id))
        .unwrap();
    assert_eq!(after.status, RunStatus::Queued);
}

#[test]
fn transition_touches_project_denormalization() {
    let (_dir, store, tenant, project, run) = seed();
    store
        .with_session(|session| {
            session.transition_run_status(
                &tenant,
                &run.id,
                RunStatus::Running,
                &TransitionUpdate::default(),
            )
        })
        .unwrap();
    let refreshed = store
        .with_session(|session| session.get_project(&tenant, &project.id))
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.last_run_id, Some(run.id.clone()));
    assert_eq!(refreshed.last_run_status, Some(RunStatus::Running));
    assert!(refreshed.last_activity_at.is_some());
}

#[test]
fn cancel_on_queued_run_cancels_immediately() {
    let (_dir, store, tenant, _project, run) = seed();
    let canceled = store
        .with_session(|session| session.request_cancel(&tenant, &run.id, false))
        .unwrap();
    assert_eq!(canceled.status, RunStatus::Canceled);
    assert!(canceled.cancel_requested_at.is_some());
    assert!(canceled.finished_at.is_some());

    let events = store.list_run_events(&tenant, &run.id, None, 100).unwrap();
    assert!(events.iter().any(|event| event.message == "Cancel requested"));
}

#[test]
fn cancel_on_running_run_only_sets_flag() {
    let (_dir, store, tenant, _project, run) = seed();
    store
        .with_session(|session| {
            session.transition_run_status(
                &tenant,
                &run.id,
                RunStatus::Running,
                &TransitionUpdate::default(),
            )
        })
        .unwrap();
    let after = store
        .with_session(|session| session.request_cancel(&tenant, &run.id, false))
        .unwrap();
    assert_eq!(after.status, RunStatus::Running);
    assert!(after.cancel_requested_at.is_some());
    let flagged = store
        .with_session(|session| session.check_cancel_requested(&tenant, &run.id))
        .unwrap();
    assert!(flagged);
}

#[test]
fn cancel_on_terminal_run_is_a_no_op() {
    let (_dir, store, tenant, _project, run) = seed();
    store
        .with_session(|session| session.request_cancel(&tenant, &run.id, false))
        .unwrap();
    let events_before = store.list_run_events(&tenant, &run.id, None, 100).unwrap().len();
    let again = store
        .with_session(|session| session.request_cancel(&tenant, &run.id, false))
        .unwrap();
    assert_eq!(again.status, RunStatus::Canceled);
    let events_after = store.list_run_events(&tenant, &run.id, None, 100).unwrap().len();
    assert_eq!(events_before, events_after, "terminal cancel must not append events");
}

#[test]
fn retry_resets_failure_fields_and_increments_count() {
    let (_dir, store, tenant, _project, run) = seed();
    store
        .with_session(|session| {
            session.transition_run_status(
                &tenant,
                &run.id,
                RunStatus::Running,
                &TransitionUpdate::default(),
            )?;
            session.transition_run_status(
                &tenant,
                &run.id,
                RunStatus::Failed,
                &TransitionUpdate {
                    failure_reason: Some("boom".to_string()),
                    error_code: Some("worker_error".to_string()),
                    finished_at: Some(Timestamp::now()),
                    ..TransitionUpdate::default()
                },
            )
        })
        .unwrap();

    let retried = store
        .with_session(|session| session.retry_run(&tenant, &run.id))
        .unwrap();
    assert_eq!(retried.status, RunStatus::Queued);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.failure_reason.is_none());
    assert!(retried.error_code.is_none());
    assert!(retried.finished_at.is_none());
    assert!(retried.cancel_requested_at.is_none());
}

#[test]
fn retry_is_rejected_for_non_failed_runs() {
    let (_dir, store, tenant, _project, run) = seed();
    let result = store.with_session(|session| session.retry_run(&tenant, &run.id));
    assert!(matches!(result, Err(StoreError::RetryNotAllowed { .. })));
}

#[test]
fn client_request_id_resolves_existing_run() {
    let (_dir, store, tenant, project, run) = seed();
    let found = store
        .with_session(|session| {
            session.get_run_by_client_request_id(&tenant, &project.id, "c1")
        })
        .unwrap();
    assert_eq!(found.map(|r| r.id), Some(run.id));
}
