// crates/draftgate-store-sqlite/src/runs.rs
// ============================================================================
// Module: Run and Project Store
// Description: Project CRUD plus atomic, validated run transitions.
// Purpose: Keep every run mutation behind the state machine and one writer.
// Dependencies: draftgate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Run mutations happen inside the caller's [`StoreSession`], whose
//! immediate transaction serializes writers; validation against the state
//! machine runs after the current row is read under that exclusivity, which
//! is the SQLite equivalent of a row-locked read-modify-write.
//!
//! Every successful transition touches the owning project's `last_run_*`
//! denormalization and, unless suppressed, appends a `state` event in the
//! same transaction so the log and the row can never disagree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::NewRunEvent;
use draftgate_core::Project;
use draftgate_core::ProjectId;
use draftgate_core::Run;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_core::event_types;
use draftgate_core::validate_transition;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;

use crate::events::append_event_on;
use crate::store::StoreError;
use crate::store::StoreSession;
use crate::store::decode_json;
use crate::store::encode_json;

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Inputs for creating a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Owning project.
    pub project_id: ProjectId,
    /// Initial status; the API enqueues directly as `queued`.
    pub status: RunStatus,
    /// Stage shown while the run waits for a claim.
    pub current_stage: Option<Stage>,
    /// Research question driving the run.
    pub question: String,
    /// Requested output kind.
    pub output_type: String,
    /// Client-supplied idempotency key.
    pub client_request_id: Option<String>,
    /// Budget envelope.
    pub budgets: Value,
    /// Usage ledger seed (job type, inputs).
    pub usage: Value,
}

/// Field updates applied alongside a status transition.
///
/// # Invariants
/// - `None` fields are left untouched on the row.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Stage to record on the run.
    pub stage: Option<Stage>,
    /// Failure description.
    pub failure_reason: Option<String>,
    /// Stable failure classification.
    pub error_code: Option<String>,
    /// Pipeline start timestamp.
    pub started_at: Option<Timestamp>,
    /// Run end timestamp.
    pub finished_at: Option<Timestamp>,
    /// Cancellation request timestamp.
    pub cancel_requested_at: Option<Timestamp>,
    /// Suppress the `state` event when false.
    pub suppress_event: bool,
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps one `runs` row.
pub(crate) fn run_from_row(row: &Row<'_>) -> Result<Run, StoreError> {
    let status_raw: String = row.get("status")?;
    let status = RunStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown run status {status_raw}")))?;
    let stage_raw: Option<String> = row.get("current_stage")?;
    let current_stage = stage_raw.as_deref().and_then(Stage::parse);
    let budgets_raw: String = row.get("budgets_json")?;
    let usage_raw: String = row.get("usage_json")?;
    let retry_count: i64 = row.get("retry_count")?;
    Ok(Run {
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        id: RunId::new(row.get::<_, String>("id")?),
        project_id: ProjectId::new(row.get::<_, String>("project_id")?),
        status,
        current_stage,
        budgets: decode_json(&budgets_raw, "budgets_json")?,
        usage: decode_json(&usage_raw, "usage_json")?,
        failure_reason: row.get("failure_reason")?,
        error_code: row.get("error_code")?,
        started_at: row.get::<_, Option<i64>>("started_at")?.map(Timestamp::from_unix_millis),
        finished_at: row.get::<_, Option<i64>>("finished_at")?.map(Timestamp::from_unix_millis),
        cancel_requested_at: row
            .get::<_, Option<i64>>("cancel_requested_at")?
            .map(Timestamp::from_unix_millis),
        retry_count: u32::try_from(retry_count.max(0)).unwrap_or(0),
        question: row.get("question")?,
        output_type: row.get("output_type")?,
        client_request_id: row.get("client_request_id")?,
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
        updated_at: Timestamp::from_unix_millis(row.get("updated_at")?),
    })
}

/// Maps one `projects` row.
fn project_from_row(row: &Row<'_>) -> Result<Project, StoreError> {
    let last_status_raw: Option<String> = row.get("last_run_status")?;
    Ok(Project {
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        id: ProjectId::new(row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        last_run_id: row.get::<_, Option<String>>("last_run_id")?.map(RunId::new),
        last_run_status: last_status_raw.as_deref().and_then(RunStatus::parse),
        last_activity_at: row
            .get::<_, Option<i64>>("last_activity_at")?
            .map(Timestamp::from_unix_millis),
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
        updated_at: Timestamp::from_unix_millis(row.get("updated_at")?),
    })
}

// ============================================================================
// SECTION: Project Operations
// ============================================================================

impl StoreSession<'_> {
    /// Creates a project with a tenant-unique name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is taken and
    /// [`StoreError::Db`] on storage failures.
    pub fn create_project(
        &mut self,
        tenant_id: &TenantId,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, StoreError> {
        let id = ProjectId::generate();
        let now = Timestamp::now();
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO projects
                 (tenant_id, id, name, description, last_activity_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                name,
                description,
                now.unix_millis(),
                now.unix_millis()
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict("project name already exists for tenant".to_string()));
        }
        self.get_project(tenant_id, &id)?.ok_or(StoreError::ProjectNotFound)
    }

    /// Fetches a project by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn get_project(
        &mut self,
        tenant_id: &TenantId,
        project_id: &ProjectId,
    ) -> Result<Option<Project>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM projects WHERE tenant_id = ?1 AND id = ?2")?;
        let project = stmt
            .query_row(params![tenant_id.as_str(), project_id.as_str()], |row| {
                Ok(project_from_row(row))
            })
            .optional()?
            .transpose()?;
        Ok(project)
    }

    /// Lists projects ordered by most recent activity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn list_projects(
        &mut self,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<Project>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM projects WHERE tenant_id = ?1
             ORDER BY COALESCE(last_activity_at, created_at) DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![tenant_id.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| Ok(project_from_row(row)),
        )?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row??);
        }
        Ok(projects)
    }

    /// Applies a partial update to a project's name and description.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] for unknown projects and
    /// [`StoreError::Conflict`] when a new name is taken.
    pub fn patch_project(
        &mut self,
        tenant_id: &TenantId,
        project_id: &ProjectId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project, StoreError> {
        let existing =
            self.get_project(tenant_id, project_id)?.ok_or(StoreError::ProjectNotFound)?;
        let new_name = name.unwrap_or(existing.name.as_str());
        let new_description = description.or(existing.description.as_deref());
        let now = Timestamp::now();
        let updated = self.conn().execute(
            "UPDATE projects SET name = ?3, description = ?4, updated_at = ?5
             WHERE tenant_id = ?1 AND id = ?2
               AND NOT EXISTS (
                   SELECT 1 FROM projects
                   WHERE tenant_id = ?1 AND name = ?3 AND id <> ?2
               )",
            params![
                tenant_id.as_str(),
                project_id.as_str(),
                new_name,
                new_description,
                now.unix_millis()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict("project name already exists for tenant".to_string()));
        }
        self.get_project(tenant_id, project_id)?.ok_or(StoreError::ProjectNotFound)
    }

    /// Touches the project denormalization after a run mutation.
    pub(crate) fn touch_project_from_run(
        &mut self,
        tenant_id: &TenantId,
        project_id: &ProjectId,
        run_id: &RunId,
        status: RunStatus,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE projects
             SET last_run_id = ?3, last_run_status = ?4, last_activity_at = ?5, updated_at = ?5
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.as_str(),
                project_id.as_str(),
                run_id.as_str(),
                status.as_str(),
                now.unix_millis()
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Run Operations
// ============================================================================

impl StoreSession<'_> {
    /// Creates a run under a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] for unknown projects and
    /// [`StoreError::Conflict`] for duplicate client request ids.
    pub fn create_run(&mut self, tenant_id: &TenantId, new_run: &NewRun) -> Result<Run, StoreError> {
        let project = self
            .get_project(tenant_id, &new_run.project_id)?
            .ok_or(StoreError::ProjectNotFound)?;
        let id = RunId::generate();
        let now = Timestamp::now();
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO runs
                 (tenant_id, id, project_id, status, current_stage, budgets_json, usage_json,
                  retry_count, question, output_type, client_request_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11, ?11)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                project.id.as_str(),
                new_run.status.as_str(),
                new_run.current_stage.map(Stage::as_str),
                encode_json(&new_run.budgets),
                encode_json(&new_run.usage),
                new_run.question,
                new_run.output_type,
                new_run.client_request_id,
                now.unix_millis()
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict("run already exists".to_string()));
        }
        self.touch_project_from_run(tenant_id, &project.id, &id, new_run.status, now)?;
        self.get_run(tenant_id, &id)?.ok_or(StoreError::RunNotFound)
    }

    /// Fetches a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn get_run(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<Option<Run>, StoreError> {
        let mut stmt =
            self.conn().prepare("SELECT * FROM runs WHERE tenant_id = ?1 AND id = ?2")?;
        let run = stmt
            .query_row(params![tenant_id.as_str(), run_id.as_str()], |row| Ok(run_from_row(row)))
            .optional()?
            .transpose()?;
        Ok(run)
    }

    /// Fetches a run, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs.
    pub fn get_run_required(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<Run, StoreError> {
        self.get_run(tenant_id, run_id)?.ok_or(StoreError::RunNotFound)
    }

    /// Resolves a run by its client idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn get_run_by_client_request_id(
        &mut self,
        tenant_id: &TenantId,
        project_id: &ProjectId,
        client_request_id: &str,
    ) -> Result<Option<Run>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM runs
             WHERE tenant_id = ?1 AND project_id = ?2 AND client_request_id = ?3",
        )?;
        let run = stmt
            .query_row(
                params![tenant_id.as_str(), project_id.as_str(), client_request_id],
                |row| Ok(run_from_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(run)
    }

    /// Stores a new usage ledger for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs.
    pub fn update_run_usage(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        usage: &Value,
    ) -> Result<(), StoreError> {
        let now = Timestamp::now();
        let updated = self.conn().execute(
            "UPDATE runs SET usage_json = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), run_id.as_str(), encode_json(usage), now.unix_millis()],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotFound);
        }
        Ok(())
    }

    /// Atomically transitions a run's status with state machine validation.
    ///
    /// Reads the current row under the session's write exclusivity, applies
    /// the update fields, touches the project denormalization, and appends a
    /// `state` event unless suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs and
    /// [`StoreError::Transition`] for illegal moves.
    pub fn transition_run_status(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        to: RunStatus,
        update: &TransitionUpdate,
    ) -> Result<Run, StoreError> {
        let run = self.get_run_required(tenant_id, run_id)?;
        let from = run.status;
        validate_transition(from, to)?;

        let now = Timestamp::now();
        self.conn().execute(
            "UPDATE runs SET
                 status = ?3,
                 current_stage = COALESCE(?4, current_stage),
                 failure_reason = COALESCE(?5, failure_reason),
                 error_code = COALESCE(?6, error_code),
                 started_at = COALESCE(?7, started_at),
                 finished_at = COALESCE(?8, finished_at),
                 cancel_requested_at = COALESCE(?9, cancel_requested_at),
                 updated_at = ?10
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.as_str(),
                run_id.as_str(),
                to.as_str(),
                update.stage.map(Stage::as_str),
                update.failure_reason,
                update.error_code,
                update.started_at.map(Timestamp::unix_millis),
                update.finished_at.map(Timestamp::unix_millis),
                update.cancel_requested_at.map(Timestamp::unix_millis),
                now.unix_millis()
            ],
        )?;
        self.touch_project_from_run(tenant_id, &run.project_id, run_id, to, now)?;

        if !update.suppress_event {
            let mut event = NewRunEvent::info(
                tenant_id.clone(),
                run_id.clone(),
                event_types::STATE,
                format!("Run transitioned: {from} -> {to}"),
            )
            .with_payload(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            }))
            .allowing_finished();
            event.stage = update.stage;
            append_event_on(self.conn(), &event)?;
        }
        self.get_run_required(tenant_id, run_id)
    }

    /// Requests cooperative cancellation of a run.
    ///
    /// Terminal runs are returned unchanged. Queued runs (or any run when
    /// `force_immediate` is set) cancel immediately; running ones only get
    /// the flag and cancel at the next stage boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs.
    pub fn request_cancel(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        force_immediate: bool,
    ) -> Result<Run, StoreError> {
        let run = self.get_run_required(tenant_id, run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        let now = Timestamp::now();
        self.conn().execute(
            "UPDATE runs SET cancel_requested_at = ?3, updated_at = ?3
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), run_id.as_str(), now.unix_millis()],
        )?;
        let event = NewRunEvent::info(
            tenant_id.clone(),
            run_id.clone(),
            event_types::STATE,
            "Cancel requested",
        )
        .with_payload(json!({
            "cancel_requested_at": now.to_rfc3339(),
        }))
        .allowing_finished();
        append_event_on(self.conn(), &event)?;

        if force_immediate || run.status == RunStatus::Queued {
            let update = TransitionUpdate {
                finished_at: Some(now),
                ..TransitionUpdate::default()
            };
            match self.transition_run_status(tenant_id, run_id, RunStatus::Canceled, &update) {
                Ok(updated) => return Ok(updated),
                // A state that cannot cancel keeps only the flag.
                Err(StoreError::Transition(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.get_run_required(tenant_id, run_id)
    }

    /// Reads the cooperative cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs.
    pub fn check_cancel_requested(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<bool, StoreError> {
        let run = self.get_run_required(tenant_id, run_id)?;
        Ok(run.cancel_requested_at.is_some())
    }

    /// Retries a failed or blocked run by resetting it to `queued`.
    ///
    /// Clears failure and cancellation fields, increments `retry_count`, and
    /// emits a retry `state` event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RetryNotAllowed`] for runs in any other status
    /// and [`StoreError::RunNotFound`] for unknown runs.
    pub fn retry_run(&mut self, tenant_id: &TenantId, run_id: &RunId) -> Result<Run, StoreError> {
        let run = self.get_run_required(tenant_id, run_id)?;
        if run.status != RunStatus::Failed && run.status != RunStatus::Blocked {
            return Err(StoreError::RetryNotAllowed {
                status: run.status.as_str().to_string(),
            });
        }

        let from = run.status;
        validate_transition(from, RunStatus::Queued)?;
        let now = Timestamp::now();
        let retry_count = run.retry_count + 1;
        self.conn().execute(
            "UPDATE runs SET
                 status = 'queued',
                 current_stage = NULL,
                 failure_reason = NULL,
                 error_code = NULL,
                 finished_at = NULL,
                 cancel_requested_at = NULL,
                 retry_count = ?3,
                 updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.as_str(),
                run_id.as_str(),
                i64::from(retry_count),
                now.unix_millis()
            ],
        )?;
        self.touch_project_from_run(tenant_id, &run.project_id, run_id, RunStatus::Queued, now)?;

        let event = NewRunEvent::info(
            tenant_id.clone(),
            run_id.clone(),
            event_types::STATE,
            format!("Retry requested (attempt #{retry_count})"),
        )
        .with_payload(json!({
            "from": from.as_str(),
            "to": RunStatus::Queued.as_str(),
            "retry_count": retry_count,
        }))
        .allowing_finished();
        append_event_on(self.conn(), &event)?;
        self.get_run_required(tenant_id, run_id)
    }
}
