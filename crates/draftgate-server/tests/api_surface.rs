// crates/draftgate-server/tests/api_surface.rs
// ============================================================================
// Module: API Surface Tests
// Description: Handler-level tests for the run lifecycle endpoints.
// ============================================================================
//! ## Overview
//! Calls the handlers directly with extracted state: run creation with its
//! lifecycle events and job, idempotent replay over `client_request_id`,
//! input validation, idempotent cancel, and the retry flow.

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

use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use draftgate_config::AppConfig;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_server::ApiError;
use draftgate_server::AppState;
use draftgate_server::api::EventsQuery;
use draftgate_server::api::ProjectCreate;
use draftgate_server::api::RunCreate;
use draftgate_server::api::cancel_run;
use draftgate_server::api::get_run;
use draftgate_server::api::post_project;
use draftgate_server::api::post_run_for_project;
use draftgate_server::api::retry_run;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;
use draftgate_store_sqlite::TransitionUpdate;

/// Builds app state over a fresh store.
fn state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(SqliteStoreConfig::new(dir.path().join("store.db"))).unwrap();
    (
        dir,
        AppState {
            store,
            config: Arc::new(AppConfig::default()),
        },
    )
}

/// Headers carrying the test tenant.
fn tenant_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-tenant-id", HeaderValue::from_static("t1"));
    headers
}

/// Creates a project through the handler, returning its id.
async fn create_project(state: &AppState) -> String {
    let Json(project) = post_project(
        State(state.clone()),
        tenant_headers(),
        Json(ProjectCreate {
            name: "demo".to_string(),
            description: None,
        }),
    )
    .await
    .unwrap();
    project.id
}

/// A run-creation body with a question and client request id.
fn run_body(client_request_id: Option<&str>) -> RunCreate {
    RunCreate {
        question: Some("effects of sleep on memory".to_string()),
        output_type: Some("report".to_string()),
        client_request_id: client_request_id.map(ToString::to_string),
        llm_provider: None,
        llm_model: None,
        budget_override: None,
    }
}

#[tokio::test]
async fn run_creation_enqueues_job_and_emits_lifecycle_events() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;

    let Json(created) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(run_body(Some("c1"))),
    )
    .await
    .unwrap();
    assert_eq!(created.status, "queued");

    let tenant = TenantId::new("t1");
    let run_id = RunId::new(created.run_id.clone());
    let events = state.store.list_run_events(&tenant, &run_id, None, 100).unwrap();
    let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
    assert_eq!(types, vec!["run.created", "run.queued"]);

    let open = state
        .store
        .with_session(|session| session.count_open_jobs(&tenant, &run_id))
        .unwrap();
    assert_eq!(open, 1, "exactly one job enqueued");
}

#[tokio::test]
async fn run_creation_replays_on_duplicate_client_request_id() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;

    let Json(first) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id.clone()),
        Json(run_body(Some("c1"))),
    )
    .await
    .unwrap();
    let Json(second) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(run_body(Some("c1"))),
    )
    .await
    .unwrap();
    assert_eq!(first.run_id, second.run_id, "same client_request_id replays the run");

    let tenant = TenantId::new("t1");
    let run_id = RunId::new(first.run_id);
    let open = state
        .store
        .with_session(|session| session.count_open_jobs(&tenant, &run_id))
        .unwrap();
    assert_eq!(open, 1, "replay must not enqueue another job");
}

#[tokio::test]
async fn missing_question_is_a_bad_request() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;
    let result = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(RunCreate {
            question: None,
            output_type: None,
            client_request_id: None,
            llm_provider: None,
            llm_model: None,
            budget_override: None,
        }),
    )
    .await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn missing_tenant_header_is_rejected() {
    let (_dir, state) = state();
    let result = get_run(
        State(state.clone()),
        HeaderMap::new(),
        Path("missing".to_string()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let (_dir, state) = state();
    let result = get_run(
        State(state.clone()),
        tenant_headers(),
        Path("missing".to_string()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn cancel_is_idempotent_on_terminal_runs() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;
    let Json(created) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(run_body(None)),
    )
    .await
    .unwrap();

    let Json(first) = cancel_run(
        State(state.clone()),
        tenant_headers(),
        Path(created.run_id.clone()),
    )
    .await
    .unwrap();
    assert!(first.ok);
    // The queued run canceled immediately; a second cancel still returns OK.
    let Json(second) = cancel_run(
        State(state.clone()),
        tenant_headers(),
        Path(created.run_id.clone()),
    )
    .await
    .unwrap();
    assert!(second.ok);

    let Json(run) = get_run(State(state.clone()), tenant_headers(), Path(created.run_id))
        .await
        .unwrap();
    assert_eq!(run.status, "canceled");
}

#[tokio::test]
async fn retry_requires_a_failed_or_blocked_run() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;
    let Json(created) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(run_body(None)),
    )
    .await
    .unwrap();

    // Queued runs cannot retry.
    let result = retry_run(
        State(state.clone()),
        tenant_headers(),
        Path(created.run_id.clone()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));

    // Fail the run, then retry succeeds, clears failure fields, and
    // re-enqueues the recorded job type.
    let tenant = TenantId::new("t1");
    let run_id = RunId::new(created.run_id.clone());
    state
        .store
        .with_session(|session| {
            session.transition_run_status(
                &tenant,
                &run_id,
                RunStatus::Running,
                &TransitionUpdate::default(),
            )?;
            let claimed = session.claim_next_job()?;
            if let Some(job) = claimed {
                session.mark_job_failed(&tenant, &job.id, "boom")?;
            }
            session.transition_run_status(
                &tenant,
                &run_id,
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

    let Json(retried) = retry_run(
        State(state.clone()),
        tenant_headers(),
        Path(created.run_id.clone()),
    )
    .await
    .unwrap();
    assert_eq!(retried.status, "queued");
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error_message.is_none());

    let open = state
        .store
        .with_session(|session| session.count_open_jobs(&tenant, &run_id))
        .unwrap();
    assert_eq!(open, 1, "retry re-enqueues exactly one job");
}

#[tokio::test]
async fn events_listing_filters_by_after_id() {
    let (_dir, state) = state();
    let project_id = create_project(&state).await;
    let Json(created) = post_run_for_project(
        State(state.clone()),
        tenant_headers(),
        Path(project_id),
        Json(run_body(None)),
    )
    .await
    .unwrap();

    let tenant = TenantId::new("t1");
    let run_id = RunId::new(created.run_id);
    let all = state.store.list_run_events(&tenant, &run_id, None, 100).unwrap();
    assert_eq!(all.len(), 2);
    let after = state.store.list_run_events(&tenant, &run_id, Some(1), 100).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].event_number, 2);
    // The query shape the JSON endpoint parses.
    let query: EventsQuery = Query(EventsQuery {
        after_id: Some(1),
    })
    .0;
    assert_eq!(query.after_id, Some(1));
}
