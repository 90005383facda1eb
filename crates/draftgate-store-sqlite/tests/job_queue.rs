// crates/draftgate-store-sqlite/tests/job_queue.rs
// ============================================================================
// Module: Job Queue Tests
// Description: Tests for idempotent enqueue and exclusive FIFO claims.
// ============================================================================
//! ## Overview
//! Validates the one-non-terminal-job rule, claim ordering, attempt
//! counting, and that concurrent workers never claim the same job.

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

use std::collections::BTreeSet;
use std::thread;

use draftgate_core::JobStatus;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::TenantId;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;

const JOB_TYPE: &str = "research.run";

/// Opens a store with one project, returning a run factory.
fn seed(run_count: usize) -> (tempfile::TempDir, SqliteStore, TenantId, Vec<RunId>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    let tenant = TenantId::new("t1");
    let run_ids = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "demo", None)?;
            let mut ids = Vec::new();
            for index in 0 .. run_count {
                let run = session.create_run(
                    &tenant,
                    &NewRun {
                        project_id: project.id.clone(),
                        status: RunStatus::Queued,
                        current_stage: None,
                        question: format!("question {index}"),
                        output_type: "report".to_string(),
                        client_request_id: None,
                        budgets: serde_json::json!({}),
                        usage: serde_json::json!({}),
                    },
                )?;
                ids.push(run.id);
            }
            Ok(ids)
        })
        .unwrap();
    (dir, store, tenant, run_ids)
}

#[test]
fn enqueue_is_idempotent_over_non_terminal_jobs() {
    let (_dir, store, tenant, run_ids) = seed(1);
    let run_id = &run_ids[0];
    let first = store
        .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
        .unwrap();
    let second = store
        .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
        .unwrap();
    assert_eq!(first.id, second.id);
    let open = store
        .with_session(|session| session.count_open_jobs(&tenant, run_id))
        .unwrap();
    assert_eq!(open, 1);
}

#[test]
fn enqueue_moves_created_runs_to_queued() {
    let (_dir, store, tenant, _runs) = seed(0);
    let run = store
        .with_session(|session| {
            let project = session.create_project(&tenant, "fresh", None)?;
            session.create_run(
                &tenant,
                &NewRun {
                    project_id: project.id,
                    status: RunStatus::Created,
                    current_stage: None,
                    question: "q".to_string(),
                    output_type: "report".to_string(),
                    client_request_id: None,
                    budgets: serde_json::json!({}),
                    usage: serde_json::json!({}),
                },
            )
        })
        .unwrap();
    store
        .with_session(|session| session.enqueue_run_job(&tenant, &run.id, JOB_TYPE))
        .unwrap();
    let refreshed = store
        .with_session(|session| session.get_run_required(&tenant, &run.id))
        .unwrap();
    assert_eq!(refreshed.status, RunStatus::Queued);
}

#[test]
fn claims_are_fifo_and_increment_attempts() {
    let (_dir, store, tenant, run_ids) = seed(2);
    for run_id in &run_ids {
        store
            .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
            .unwrap();
    }
    let first = store.claim_next_job().unwrap().expect("first claim");
    assert_eq!(first.status, JobStatus::Running);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.run_id, run_ids[0]);

    let second = store.claim_next_job().unwrap().expect("second claim");
    assert_eq!(second.run_id, run_ids[1]);
    assert!(store.claim_next_job().unwrap().is_none(), "queue drained");
}

#[test]
fn terminal_jobs_allow_reenqueue() {
    let (_dir, store, tenant, run_ids) = seed(1);
    let run_id = &run_ids[0];
    let first = store
        .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
        .unwrap();
    let claimed = store.claim_next_job().unwrap().expect("claim");
    store.mark_job_failed(&tenant, &claimed.id, "boom").unwrap();

    let second = store
        .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
        .unwrap();
    assert_ne!(first.id, second.id, "terminal job must not satisfy enqueue");
    let failed = store
        .with_session(|session| session.get_job(&tenant, &first.id))
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("boom"));
}

#[test]
fn concurrent_workers_never_claim_the_same_job() {
    let (_dir, store, tenant, run_ids) = seed(8);
    for run_id in &run_ids {
        store
            .with_session(|session| session.enqueue_run_job(&tenant, run_id, JOB_TYPE))
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0 .. 4 {
        let worker_store = store.clone();
        handles.push(thread::spawn(move || {
            let mut claimed = Vec::new();
            while let Ok(Some(job)) = worker_store.claim_next_job() {
                claimed.push(job.id.as_str().to_string());
            }
            claimed
        }));
    }
    let mut all: Vec<String> = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let unique: BTreeSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 8, "every job claimed exactly once");
    assert_eq!(unique.len(), all.len(), "no job claimed twice");
}
