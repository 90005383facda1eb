// crates/draftgate-pipeline/src/worker.rs
// ============================================================================
// Module: Worker Loop
// Description: Claim-process-commit loop around the coordinator.
// Purpose: Execute queued jobs one at a time per worker process.
// Dependencies: draftgate-core, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! Each worker claims the oldest queued job in one short transaction,
//! dispatches it by job type, and records the terminal job status. A job
//! failure marks the job failed and backstops the run into `failed` in case
//! the coordinator could not; the loop itself never dies on a job error.
//! Telemetry is a dependency-light hook so deployments can plug their own
//! counters in without redesign.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use draftgate_core::Job;
use draftgate_core::RunStatus;
use draftgate_core::Timestamp;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::StoreError;
use draftgate_store_sqlite::TransitionUpdate;

use crate::coordinator::Coordinator;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Job type executed by the research pipeline.
pub const RESEARCH_JOB_TYPE: &str = "research.run";

// ============================================================================
// SECTION: Telemetry
// ============================================================================

/// Dependency-light worker counters.
///
/// Deployments bridge these to their metrics backend; the default
/// implementation does nothing.
pub trait WorkerTelemetry: Send + Sync {
    /// Called when a job is claimed.
    fn job_started(&self, job: &Job) {
        let _ = job;
    }

    /// Called when a job completes successfully.
    fn job_succeeded(&self, job: &Job, duration: Duration) {
        let _ = (job, duration);
    }

    /// Called when a job fails.
    fn job_failed(&self, job: &Job, error: &str, duration: Duration) {
        let _ = (job, error, duration);
    }

    /// Called when the claim path itself errors.
    fn queue_error(&self, error: &str) {
        let _ = error;
    }
}

/// Telemetry that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl WorkerTelemetry for NoopTelemetry {}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// One worker process's claim loop.
pub struct Worker {
    /// Durable store shared with the coordinator.
    store: SqliteStore,
    /// Pipeline coordinator.
    coordinator: Coordinator,
    /// Telemetry hook.
    telemetry: Arc<dyn WorkerTelemetry>,
    /// Idle sleep when the queue is empty.
    poll_interval: Duration,
}

impl Worker {
    /// Creates a worker around a coordinator.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        coordinator: Coordinator,
        telemetry: Arc<dyn WorkerTelemetry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            telemetry,
            poll_interval,
        }
    }

    /// Claims and processes at most one job.
    ///
    /// Returns true when a job was claimed, regardless of its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the claim path itself fails; job
    /// failures are recorded on the job and run rows instead.
    pub fn run_once(&self) -> Result<bool, StoreError> {
        let Some(job) = self.store.claim_next_job()? else {
            return Ok(false);
        };
        self.telemetry.job_started(&job);
        let started = Instant::now();

        let outcome = if job.job_type == RESEARCH_JOB_TYPE {
            self.coordinator
                .execute_run(&job.tenant_id, &job.run_id)
                .map_err(|err| err.to_string())
        } else {
            Err(format!("unknown job_type: {}", job.job_type))
        };

        match outcome {
            Ok(()) => {
                self.store.mark_job_done(&job.tenant_id, &job.id)?;
                self.telemetry.job_succeeded(&job, started.elapsed());
            }
            Err(error) => {
                self.store.mark_job_failed(&job.tenant_id, &job.id, &error)?;
                self.backstop_run_failed(&job, &error);
                self.telemetry.job_failed(&job, &error, started.elapsed());
            }
        }
        Ok(true)
    }

    /// Loops until the stop flag is raised.
    ///
    /// Queue errors are reported through telemetry and retried after the
    /// idle sleep; the loop only exits on request.
    pub fn run_forever(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(self.poll_interval),
                Err(err) => {
                    self.telemetry.queue_error(&err.to_string());
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Ensures a failed job's run does not stay `running`.
    fn backstop_run_failed(&self, job: &Job, error: &str) {
        let update = TransitionUpdate {
            failure_reason: Some(error.to_string()),
            error_code: Some("worker_error".to_string()),
            finished_at: Some(Timestamp::now()),
            ..TransitionUpdate::default()
        };
        let outcome: Result<_, StoreError> = self.store.with_session(|session| {
            let run = session.get_run_required(&job.tenant_id, &job.run_id)?;
            if run.status.is_finished() {
                return Ok(run);
            }
            session.transition_run_status(&job.tenant_id, &job.run_id, RunStatus::Failed, &update)
        });
        // Terminal runs keep their state; the job row already records the error.
        drop(outcome);
    }
}
