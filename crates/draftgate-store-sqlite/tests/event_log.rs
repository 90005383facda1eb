// crates/draftgate-store-sqlite/tests/event_log.rs
// ============================================================================
// Module: Event Log Tests
// Description: Tests for dense numbering, ordering, and sink idempotency.
// ============================================================================
//! ## Overview
//! Validates the dense monotonic `event_number` sequence, `after` filtering
//! for resume, the finished-run append guard, and `stage_start`
//! idempotency.

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

use draftgate_core::EventSink;
use draftgate_core::NewRunEvent;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::event_types;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteEventSink;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;
use draftgate_store_sqlite::emit_stage_start;

/// Opens a store with one queued run.
fn seed() -> (tempfile::TempDir, SqliteStore, TenantId, RunId) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    let tenant = TenantId::new("t1");
    let run_id = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "demo", None)?;
            let run = session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id,
                    status: RunStatus::Queued,
                    current_stage: None,
                    question: "q".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: None,
                    budgets: serde_json::json!({}),
                    usage: serde_json::json!({}),
                },
            )?;
            Ok(run.id)
        })
        .unwrap();
    (dir, store, tenant, run_id)
}

#[test]
fn event_numbers_are_dense_and_start_at_one() {
    let (_dir, store, tenant, run_id) = seed();
    let sink = SqliteEventSink::new(&store);
    for index in 0 .. 5 {
        sink.append(&NewRunEvent::info(
            tenant.clone(),
            run_id.clone(),
            event_types::LOG,
            format!("message {index}"),
        ))
        .unwrap();
    }
    let events = store.list_run_events(&tenant, &run_id, None, 100).unwrap();
    assert_eq!(events.len(), 5);
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.event_number, i64::try_from(index).unwrap() + 1);
    }
}

#[test]
fn numbering_is_per_run() {
    let (_dir, store, tenant, run_a) = seed();
    let run_b = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "other", None)?;
            let run = session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id,
                    status: RunStatus::Queued,
                    current_stage: None,
                    question: "q".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: None,
                    budgets: serde_json::json!({}),
                    usage: serde_json::json!({}),
                },
            )?;
            Ok(run.id)
        })
        .unwrap();
    let sink = SqliteEventSink::new(&store);
    sink.append(&NewRunEvent::info(tenant.clone(), run_a.clone(), event_types::LOG, "a"))
        .unwrap();
    let first_b = sink
        .append(&NewRunEvent::info(tenant.clone(), run_b, event_types::LOG, "b"))
        .unwrap();
    assert_eq!(first_b.event_number, 1, "each run numbers independently");
}

#[test]
fn after_filter_resumes_without_gaps_or_duplicates() {
    let (_dir, store, tenant, run_id) = seed();
    let sink = SqliteEventSink::new(&store);
    for index in 0 .. 10 {
        sink.append(&NewRunEvent::info(
            tenant.clone(),
            run_id.clone(),
            event_types::LOG,
            format!("message {index}"),
        ))
        .unwrap();
    }
    let resumed = store.list_run_events(&tenant, &run_id, Some(7), 100).unwrap();
    let numbers: Vec<i64> = resumed.iter().map(|event| event.event_number).collect();
    assert_eq!(numbers, vec![8, 9, 10]);
}

#[test]
fn finished_runs_reject_plain_appends() {
    let (_dir, store, tenant, run_id) = seed();
    store
        .with_session(|session| session.request_cancel(&tenant, &run_id, true))
        .unwrap();
    let sink = SqliteEventSink::new(&store);
    let denied = sink.append(&NewRunEvent::info(
        tenant.clone(),
        run_id.clone(),
        event_types::LOG,
        "late message",
    ));
    assert!(denied.is_err());

    let terminal_record = NewRunEvent::info(tenant, run_id, event_types::LOG, "terminal record")
        .allowing_finished();
    assert!(sink.append(&terminal_record).is_ok());
}

#[test]
fn stage_start_is_idempotent_per_stage() {
    let (_dir, store, tenant, run_id) = seed();
    let sink = SqliteEventSink::new(&store);
    let first =
        emit_stage_start(&sink, &tenant, &run_id, Stage::Retrieve, serde_json::json!({})).unwrap();
    let second =
        emit_stage_start(&sink, &tenant, &run_id, Stage::Retrieve, serde_json::json!({})).unwrap();
    assert_eq!(first.event_number, second.event_number, "duplicate start returns existing");

    let events = store.list_run_events(&tenant, &run_id, None, 100).unwrap();
    let starts = events
        .iter()
        .filter(|event| event.event_type == event_types::STAGE_START)
        .count();
    assert_eq!(starts, 1);
}

#[test]
fn sink_appends_are_visible_outside_any_store_session() {
    let (_dir, store, tenant, run_id) = seed();
    let sink = SqliteEventSink::new(&store);
    sink.append(&NewRunEvent::info(
        tenant.clone(),
        run_id.clone(),
        event_types::PROGRESS,
        "progress",
    ))
    .unwrap();
    // A plain reader on a different connection sees the committed append.
    let events = store.list_run_events(&tenant, &run_id, None, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, event_types::PROGRESS);
}
