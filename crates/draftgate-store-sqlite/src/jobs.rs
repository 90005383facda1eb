// crates/draftgate-store-sqlite/src/jobs.rs
// ============================================================================
// Module: Job Queue Store
// Description: Claim-based FIFO job queue over the runs table.
// Purpose: Hand each queued run to exactly one worker.
// Dependencies: draftgate-core, rusqlite
// ============================================================================

//! ## Overview
//! Enqueue is idempotent over the run's non-terminal job, and claims run
//! inside one immediate transaction: the write lock plays the role a
//! skip-locked row lock plays on a server database, so two workers can
//! never return the same job. The cost is that claims serialize; workers
//! tolerate that because claims are short.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::Job;
use draftgate_core::JobId;
use draftgate_core::JobStatus;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;

use crate::store::SqliteStore;
use crate::store::StoreError;
use crate::store::StoreSession;

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps one `jobs` row.
fn job_from_row(row: &Row<'_>) -> Result<Job, StoreError> {
    let status_raw: String = row.get("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown job status {status_raw}")))?;
    let attempts: i64 = row.get("attempts")?;
    Ok(Job {
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        id: JobId::new(row.get::<_, String>("id")?),
        run_id: RunId::new(row.get::<_, String>("run_id")?),
        job_type: row.get("job_type")?,
        status,
        attempts: u32::try_from(attempts.max(0)).unwrap_or(0),
        last_error: row.get("last_error")?,
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
        updated_at: Timestamp::from_unix_millis(row.get("updated_at")?),
    })
}

// ============================================================================
// SECTION: Session Operations
// ============================================================================

impl StoreSession<'_> {
    /// Ensures a queued job exists for the run, idempotently.
    ///
    /// An existing job in `queued` or `running` is returned as-is. Otherwise
    /// a fresh job is inserted and, when the run is still `created`, the run
    /// moves to `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] for unknown runs.
    pub fn enqueue_run_job(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
        job_type: &str,
    ) -> Result<Job, StoreError> {
        let existing = {
            let mut stmt = self.conn().prepare(
                "SELECT * FROM jobs
                 WHERE tenant_id = ?1 AND run_id = ?2 AND status IN ('queued', 'running')
                 ORDER BY created_at DESC LIMIT 1",
            )?;
            stmt.query_row(params![tenant_id.as_str(), run_id.as_str()], |row| {
                Ok(job_from_row(row))
            })
            .optional()?
            .transpose()?
        };
        if let Some(job) = existing {
            return Ok(job);
        }

        let run = self.get_run_required(tenant_id, run_id)?;
        let now = Timestamp::now();
        if run.status == RunStatus::Created {
            self.conn().execute(
                "UPDATE runs SET status = 'queued', updated_at = ?3
                 WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.as_str(), run_id.as_str(), now.unix_millis()],
            )?;
            self.touch_project_from_run(
                tenant_id,
                &run.project_id,
                run_id,
                RunStatus::Queued,
                now,
            )?;
        }

        let id = JobId::generate();
        self.conn().execute(
            "INSERT INTO jobs
                 (tenant_id, id, run_id, job_type, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?5)",
            params![
                tenant_id.as_str(),
                id.as_str(),
                run_id.as_str(),
                job_type,
                now.unix_millis()
            ],
        )?;
        self.get_job(tenant_id, &id)?.ok_or_else(|| {
            StoreError::Db("enqueued job row missing immediately after insert".to_string())
        })
    }

    /// Fetches a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn get_job(
        &mut self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<Option<Job>, StoreError> {
        let mut stmt =
            self.conn().prepare("SELECT * FROM jobs WHERE tenant_id = ?1 AND id = ?2")?;
        let job = stmt
            .query_row(params![tenant_id.as_str(), job_id.as_str()], |row| Ok(job_from_row(row)))
            .optional()?
            .transpose()?;
        Ok(job)
    }

    /// Counts a run's jobs that are not yet terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn count_open_jobs(
        &mut self,
        tenant_id: &TenantId,
        run_id: &RunId,
    ) -> Result<u64, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(1) FROM jobs
             WHERE tenant_id = ?1 AND run_id = ?2 AND status IN ('queued', 'running')",
            params![tenant_id.as_str(), run_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count.max(0)).unwrap_or(0))
    }

    /// Claims the oldest queued job, flipping it to `running`.
    ///
    /// Returns `None` when the queue is empty. The surrounding transaction
    /// must stay short; the claim is released to other workers on commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn claim_next_job(&mut self) -> Result<Option<Job>, StoreError> {
        let candidate = {
            let mut stmt = self.conn().prepare(
                "SELECT * FROM jobs WHERE status = 'queued'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
            )?;
            stmt.query_row(params![], |row| Ok(job_from_row(row))).optional()?.transpose()?
        };
        let Some(job) = candidate else {
            return Ok(None);
        };

        let now = Timestamp::now();
        self.conn().execute(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?3
             WHERE tenant_id = ?1 AND id = ?2",
            params![job.tenant_id.as_str(), job.id.as_str(), now.unix_millis()],
        )?;
        self.get_job(&job.tenant_id, &job.id)
    }

    /// Marks a job terminally succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn mark_job_done(&mut self, tenant_id: &TenantId, job_id: &JobId) -> Result<(), StoreError> {
        let now = Timestamp::now();
        self.conn().execute(
            "UPDATE jobs SET status = 'succeeded', updated_at = ?3
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), job_id.as_str(), now.unix_millis()],
        )?;
        Ok(())
    }

    /// Marks a job terminally failed with its error text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn mark_job_failed(
        &mut self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
    ) -> Result<(), StoreError> {
        let now = Timestamp::now();
        self.conn().execute(
            "UPDATE jobs SET status = 'failed', last_error = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id.as_str(), job_id.as_str(), error, now.unix_millis()],
        )?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Store Surface
// ============================================================================

impl SqliteStore {
    /// Claims the oldest queued job in one short transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn claim_next_job(&self) -> Result<Option<Job>, StoreError> {
        self.with_session(|session| session.claim_next_job())
    }

    /// Marks a job done in one short transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn mark_job_done(&self, tenant_id: &TenantId, job_id: &JobId) -> Result<(), StoreError> {
        self.with_session(|session| session.mark_job_done(tenant_id, job_id))
    }

    /// Marks a job failed in one short transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on storage failures.
    pub fn mark_job_failed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
    ) -> Result<(), StoreError> {
        self.with_session(|session| session.mark_job_failed(tenant_id, job_id, error))
    }
}
