// crates/draftgate-server/src/api.rs
// ============================================================================
// Module: HTTP API
// Description: Project and run endpoints with tenant scoping.
// Purpose: Create, observe, cancel, and retry runs over HTTP.
// Dependencies: axum, draftgate-core, draftgate-store-sqlite,
//               draftgate-pipeline, tokio
// ============================================================================

//! ## Overview
//! Run creation is atomic with its `run.created` / `run.queued` events and
//! the job enqueue: one store session commits all of it, so a crash can
//! never leave a queued run without a job. Creation is idempotent over
//! `client_request_id`, cancel is idempotent over terminal runs, and retry
//! re-enqueues the recorded job type. Store calls ride the blocking pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use draftgate_config::AppConfig;
use draftgate_core::Artifact;
use draftgate_core::EventLevel;
use draftgate_core::NewRunEvent;
use draftgate_core::Project;
use draftgate_core::ProjectId;
use draftgate_core::Run;
use draftgate_core::RunEvent;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_pipeline::RESEARCH_JOB_TYPE;
use draftgate_store_sqlite::NewRun;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::StoreError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::stream::run_event_stream;

// ============================================================================
// SECTION: State and Errors
// ============================================================================

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable store.
    pub store: SqliteStore,
    /// Application configuration.
    pub config: Arc<AppConfig>,
}

/// API errors mapped onto HTTP statuses.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The referenced entity does not exist for the tenant.
    #[error("{0}")]
    NotFound(String),
    /// The request is malformed or violates a lifecycle rule.
    #[error("{0}")]
    BadRequest(String),
    /// A uniqueness rule rejected the request.
    #[error("{0}")]
    Conflict(String),
    /// Unexpected storage or execution failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound | StoreError::ProjectNotFound => {
                Self::NotFound(err.to_string())
            }
            StoreError::Transition(_) | StoreError::RetryNotAllowed { .. } => {
                Self::BadRequest(err.to_string())
            }
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Db(message) | StoreError::Corrupt(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

/// Extracts the trusted tenant header.
fn tenant_from_headers(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    headers
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(TenantId::new)
        .ok_or_else(|| ApiError::BadRequest("x-tenant-id header is required".to_string()))
}

/// Runs a store closure on the blocking pool.
async fn with_store<T, F>(store: SqliteStore, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(ApiError::from)
}

// ============================================================================
// SECTION: Wire Shapes
// ============================================================================

/// Body for creating a project.
#[derive(Debug, Deserialize)]
pub struct ProjectCreate {
    /// Tenant-unique project name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Body for patching a project.
#[derive(Debug, Deserialize)]
pub struct ProjectPatch {
    /// New name, when provided.
    #[serde(default)]
    pub name: Option<String>,
    /// New description, when provided.
    #[serde(default)]
    pub description: Option<String>,
}

/// Project response shape.
#[derive(Debug, Serialize)]
pub struct ProjectOut {
    /// Project identifier.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Most recently mutated run.
    pub last_run_id: Option<String>,
    /// Status of that run.
    pub last_run_status: Option<String>,
    /// RFC3339 timestamp of the last activity.
    pub last_activity_at: Option<String>,
}

impl ProjectOut {
    /// Converts a project record.
    fn from_record(project: Project) -> Self {
        Self {
            id: project.id.as_str().to_string(),
            name: project.name,
            description: project.description,
            last_run_id: project.last_run_id.map(|id| id.as_str().to_string()),
            last_run_status: project.last_run_status.map(|status| status.as_str().to_string()),
            last_activity_at: project.last_activity_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

/// Body for creating a run.
#[derive(Debug, Deserialize)]
pub struct RunCreate {
    /// Research question.
    #[serde(default)]
    pub question: Option<String>,
    /// Requested output kind; only `report` is accepted.
    #[serde(default)]
    pub output_type: Option<String>,
    /// Client idempotency key.
    #[serde(default)]
    pub client_request_id: Option<String>,
    /// LLM provider override; only `hosted` is accepted.
    #[serde(default)]
    pub llm_provider: Option<String>,
    /// LLM model override.
    #[serde(default)]
    pub llm_model: Option<String>,
    /// Budget envelope override.
    #[serde(default)]
    pub budget_override: Option<Value>,
}

/// Response to run creation.
#[derive(Debug, Serialize)]
pub struct RunSetupResponse {
    /// Created or replayed run identifier.
    pub run_id: String,
    /// Status at response time.
    pub status: String,
}

/// Run response shape.
#[derive(Debug, Serialize)]
pub struct RunOut {
    /// Run identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Lifecycle status.
    pub status: String,
    /// Stage currently (or last) executing.
    pub current_stage: Option<String>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 update timestamp.
    pub updated_at: String,
    /// RFC3339 pipeline start.
    pub started_at: Option<String>,
    /// RFC3339 run end.
    pub finished_at: Option<String>,
    /// RFC3339 cancellation request marker.
    pub cancel_requested_at: Option<String>,
    /// Explicit retries performed.
    pub retry_count: u32,
    /// Failure description for failed runs.
    pub error_message: Option<String>,
    /// Stable failure classification.
    pub error_code: Option<String>,
    /// Budget envelope.
    pub budgets: Value,
    /// Usage ledger.
    pub usage: Value,
}

impl RunOut {
    /// Converts a run record.
    fn from_record(run: Run) -> Self {
        Self {
            id: run.id.as_str().to_string(),
            project_id: run.project_id.as_str().to_string(),
            status: run.status.as_str().to_string(),
            current_stage: run.current_stage.map(|stage| stage.as_str().to_string()),
            created_at: run.created_at.to_rfc3339(),
            updated_at: run.updated_at.to_rfc3339(),
            started_at: run.started_at.map(|ts| ts.to_rfc3339()),
            finished_at: run.finished_at.map(|ts| ts.to_rfc3339()),
            cancel_requested_at: run.cancel_requested_at.map(|ts| ts.to_rfc3339()),
            retry_count: run.retry_count,
            error_message: run.failure_reason,
            error_code: run.error_code,
            budgets: run.budgets,
            usage: run.usage,
        }
    }
}

/// Event response shape for the JSON listing.
#[derive(Debug, Serialize)]
pub struct RunEventOut {
    /// Dense per-run event number.
    pub id: i64,
    /// RFC3339 append timestamp.
    pub ts: String,
    /// Stage label, when stage-scoped.
    pub stage: Option<String>,
    /// Event type label.
    pub event_type: String,
    /// Severity label.
    pub level: String,
    /// Human-readable message.
    pub message: String,
    /// Event payload.
    pub payload: Value,
}

impl RunEventOut {
    /// Converts an event record.
    fn from_record(event: RunEvent) -> Self {
        Self {
            id: event.event_number,
            ts: event.ts.to_rfc3339(),
            stage: event.stage.map(|stage| stage.as_str().to_string()),
            event_type: event.event_type,
            level: event.level.as_str().to_string(),
            message: event.message,
            payload: event.payload,
        }
    }
}

/// Artifact response shape.
#[derive(Debug, Serialize)]
pub struct ArtifactOut {
    /// Artifact identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Producing run.
    pub run_id: Option<String>,
    /// Artifact type label.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Blob reference.
    pub blob_ref: String,
    /// MIME type.
    pub mime_type: String,
    /// Content size in bytes.
    pub size_bytes: u64,
    /// Metadata, including inline content.
    pub metadata_json: Value,
}

impl ArtifactOut {
    /// Converts an artifact record.
    fn from_record(artifact: Artifact) -> Self {
        Self {
            id: artifact.id.as_str().to_string(),
            project_id: artifact.project_id.as_str().to_string(),
            run_id: artifact.run_id.map(|id| id.as_str().to_string()),
            artifact_type: artifact.artifact_type,
            blob_ref: artifact.blob_ref,
            mime_type: artifact.mime_type,
            size_bytes: artifact.size_bytes,
            metadata_json: artifact.metadata,
        }
    }
}

/// Plain success response.
#[derive(Debug, Serialize)]
pub struct OkResponse {
    /// Always true.
    pub ok: bool,
}

/// Query parameters for the event listing.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only return events with numbers beyond this value.
    #[serde(default)]
    pub after_id: Option<i64>,
}

// ============================================================================
// SECTION: Project Handlers
// ============================================================================

/// POST `/projects`.
pub async fn post_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProjectCreate>,
) -> Result<Json<ProjectOut>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let project = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.create_project(&tenant_id, &name, body.description.as_deref())
        })
    })
    .await?;
    Ok(Json(ProjectOut::from_record(project)))
}

/// GET `/projects`.
pub async fn get_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProjectOut>>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let projects = with_store(state.store.clone(), move |store| {
        store.with_session(|session| session.list_projects(&tenant_id, 200))
    })
    .await?;
    Ok(Json(projects.into_iter().map(ProjectOut::from_record).collect()))
}

/// GET `/projects/{project_id}`.
pub async fn get_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectOut>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let project = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.get_project(&tenant_id, &ProjectId::new(project_id.clone()))
        })
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("project not found".to_string()))?;
    Ok(Json(ProjectOut::from_record(project)))
}

/// PATCH `/projects/{project_id}`.
pub async fn patch_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<ProjectPatch>,
) -> Result<Json<ProjectOut>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let project = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.patch_project(
                &tenant_id,
                &ProjectId::new(project_id.clone()),
                body.name.as_deref(),
                body.description.as_deref(),
            )
        })
    })
    .await?;
    Ok(Json(ProjectOut::from_record(project)))
}

// ============================================================================
// SECTION: Run Handlers
// ============================================================================

/// POST `/projects/{project_id}/runs`.
///
/// Creates the run, emits its lifecycle events, and enqueues the job in one
/// committed session. Replays the existing run for a known
/// `client_request_id`.
pub async fn post_run_for_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<RunCreate>,
) -> Result<Json<RunSetupResponse>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let project_id = ProjectId::new(project_id);
    let question = body.question.as_deref().unwrap_or("").trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question is required".to_string()));
    }
    if let Some(output_type) = body.output_type.as_deref()
        && output_type != "report"
    {
        return Err(ApiError::BadRequest("only report output is supported".to_string()));
    }
    let llm_provider =
        body.llm_provider.clone().unwrap_or_else(|| state.config.llm.provider.clone());
    if llm_provider != "hosted" {
        return Err(ApiError::BadRequest("only the hosted LLM provider is supported".to_string()));
    }
    let llm_model = body.llm_model.clone().unwrap_or_else(|| state.config.llm.model.clone());
    let client_request_id = body.client_request_id.clone();
    let budgets = body.budget_override.clone().unwrap_or_else(|| json!({}));

    let outcome = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            if let Some(request_id) = client_request_id.as_deref()
                && let Some(existing) =
                    session.get_run_by_client_request_id(&tenant_id, &project_id, request_id)?
            {
                return Ok(existing);
            }

            let usage = json!({
                "job_type": RESEARCH_JOB_TYPE,
                "user_query": question,
                "output_type": "report",
                "research_goal": "report",
                "llm_provider": llm_provider,
                "llm_model": llm_model,
            });
            let run = session.create_run(
                &tenant_id,
                &NewRun {
                    project_id: project_id.clone(),
                    status: RunStatus::Queued,
                    current_stage: Some(Stage::Retrieve),
                    question: question.clone(),
                    output_type: "report".to_string(),
                    client_request_id: client_request_id.clone(),
                    budgets: budgets.clone(),
                    usage,
                },
            )?;
            for (event_type, message) in
                [("run.created", "Run created"), ("run.queued", "Run queued")]
            {
                let event = NewRunEvent {
                    tenant_id: tenant_id.clone(),
                    run_id: run.id.clone(),
                    event_type: event_type.to_string(),
                    stage: Some(Stage::Retrieve),
                    level: EventLevel::Info,
                    message: message.to_string(),
                    payload: json!({ "run_id": run.id.as_str() }),
                    allow_finished: false,
                };
                session.append_event(&event)?;
            }
            session.enqueue_run_job(&tenant_id, &run.id, RESEARCH_JOB_TYPE)?;
            Ok(run)
        })
    })
    .await;

    match outcome {
        Ok(run) => Ok(Json(RunSetupResponse {
            run_id: run.id.as_str().to_string(),
            status: run.status.as_str().to_string(),
        })),
        Err(ApiError::Conflict(_)) => {
            Err(ApiError::Conflict("run already exists".to_string()))
        }
        Err(err) => Err(err),
    }
}

/// GET `/runs/{run_id}`.
pub async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<RunOut>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let run = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.get_run_required(&tenant_id, &RunId::new(run_id.clone()))
        })
    })
    .await?;
    Ok(Json(RunOut::from_record(run)))
}

/// GET `/runs/{run_id}/events`: JSON listing or SSE stream by `Accept`.
pub async fn get_run_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let run_id = RunId::new(run_id);

    // Last-Event-ID takes precedence over the after_id query parameter.
    let after_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .or(query.after_id)
        .unwrap_or(0);

    let accepts_sse = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    if accepts_sse {
        let stream = run_event_stream(state.store.clone(), tenant_id, run_id, after_id);
        let body = Body::from_stream(tokio_stream::StreamExt::map(stream, |frame| {
            Ok::<_, std::convert::Infallible>(frame)
        }));
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        return Ok(response);
    }

    let events = with_store(state.store.clone(), move |store| {
        store.list_run_events(&tenant_id, &run_id, Some(after_id), 1_000)
    })
    .await?;
    let listing: Vec<RunEventOut> = events.into_iter().map(RunEventOut::from_record).collect();
    Ok(Json(listing).into_response())
}

/// POST `/runs/{run_id}/cancel`.
pub async fn cancel_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.request_cancel(&tenant_id, &RunId::new(run_id.clone()), false)
        })
    })
    .await?;
    Ok(Json(OkResponse {
        ok: true,
    }))
}

/// POST `/runs/{run_id}/retry`.
pub async fn retry_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<RunOut>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let run = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            let run_id = RunId::new(run_id.clone());
            let run = session.retry_run(&tenant_id, &run_id)?;
            let job_type = run
                .usage
                .get("job_type")
                .and_then(Value::as_str)
                .filter(|job_type| !job_type.is_empty())
                .unwrap_or(RESEARCH_JOB_TYPE)
                .to_string();
            session.enqueue_run_job(&tenant_id, &run_id, &job_type)?;
            Ok(run)
        })
    })
    .await?;
    Ok(Json(RunOut::from_record(run)))
}

/// GET `/runs/{run_id}/artifacts`.
pub async fn get_artifacts_for_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<ArtifactOut>>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let artifacts = with_store(state.store.clone(), move |store| {
        store.with_session(|session| {
            session.list_artifacts(&tenant_id, &RunId::new(run_id.clone()), 200)
        })
    })
    .await?;
    Ok(Json(artifacts.into_iter().map(ArtifactOut::from_record).collect()))
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the API router over shared state.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/projects", post(post_project).get(get_projects))
        .route("/projects/{project_id}", get(get_project).patch(patch_project))
        .route("/projects/{project_id}/runs", post(post_run_for_project))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/events", get(get_run_events))
        .route("/runs/{run_id}/cancel", post(cancel_run))
        .route("/runs/{run_id}/retry", post(retry_run))
        .route("/runs/{run_id}/artifacts", get(get_artifacts_for_run))
        .with_state(state)
}
