// crates/draftgate-pipeline/src/coordinator.rs
// ============================================================================
// Module: Pipeline Coordinator
// Description: Fixed stage sequence with cancel gates and one repair loop.
// Purpose: Drive one claimed run to a terminal state.
// Dependencies: draftgate-core, draftgate-store-sqlite, draftgate-llm,
//               draftgate-config
// ============================================================================

//! ## Overview
//! The coordinator owns the orchestrator state and the stage order:
//! retrieve, outline, evidence_pack, draft, evaluate, then either export or
//! one repair-and-reevaluate round. The cancellation gate runs before every
//! stage; a cancel observed there finishes the run without touching further
//! stages. Every stage completion checkpoints the serialized state so an
//! administrative resume can skip completed stages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use draftgate_config::AppConfig;
use draftgate_core::EvaluatorDecision;
use draftgate_core::EventSink;
use draftgate_core::OrchestratorState;
use draftgate_core::RunId;
use draftgate_core::RunStatus;
use draftgate_core::Stage;
use draftgate_core::TenantId;
use draftgate_core::Timestamp;
use draftgate_core::event_types;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::StoreError;
use draftgate_store_sqlite::TransitionUpdate;
use serde_json::json;

use crate::context::Clients;
use crate::context::StageContext;
use crate::error::PipelineError;
use crate::instrument::PipelineStage;
use crate::instrument::StagePipeline;
use crate::instrument::run_instrumented;
use crate::stages::evaluate::evaluate_stage;
use crate::stages::evidence::evidence_pack_stage;
use crate::stages::export::export_stage;
use crate::stages::outline::outline_stage;
use crate::stages::repair::repair_stage;
use crate::stages::retrieve::retrieve_stage;
use crate::stages::writer::writer_stage;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Checkpoint label for serialized orchestrator state.
const ORCHESTRATOR_CHECKPOINT: &str = "orchestrator";

/// Outcome of one cancellation gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Proceed to the next stage.
    Proceed,
    /// The run was canceled at this boundary.
    Canceled,
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Coordinator for one worker process.
pub struct Coordinator {
    /// Durable store.
    store: SqliteStore,
    /// Independently committing event sink.
    events: Arc<dyn EventSink>,
    /// Client resolution capability.
    clients: Arc<dyn Clients>,
    /// Application configuration.
    config: Arc<AppConfig>,
}

impl Coordinator {
    /// Creates a coordinator over the shared process resources.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        events: Arc<dyn EventSink>,
        clients: Arc<dyn Clients>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            events,
            clients,
            config,
        }
    }

    /// Builds the stage context handed to stage invocations.
    fn context(&self) -> StageContext {
        StageContext {
            store: self.store.clone(),
            events: Arc::clone(&self.events),
            clients: Arc::clone(&self.clients),
            config: Arc::clone(&self.config),
        }
    }

    /// Returns the pre-evaluation stage sequence as values.
    fn main_pipeline() -> StagePipeline {
        StagePipeline::new(vec![
            PipelineStage {
                stage: Stage::Retrieve,
                run: retrieve_stage,
            },
            PipelineStage {
                stage: Stage::Outline,
                run: outline_stage,
            },
            PipelineStage {
                stage: Stage::EvidencePack,
                run: evidence_pack_stage,
            },
            PipelineStage {
                stage: Stage::Draft,
                run: writer_stage,
            },
            PipelineStage {
                stage: Stage::Evaluate,
                run: evaluate_stage,
            },
        ])
    }

    /// Executes a claimed run end to end.
    ///
    /// On stage failure the run transitions to `failed` with the error text
    /// and code before the error propagates to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for any uncaught stage failure.
    pub fn execute_run(&self, tenant_id: &TenantId, run_id: &RunId) -> Result<(), PipelineError> {
        let run = self
            .store
            .with_session(|session| session.get_run_required(tenant_id, run_id))?;
        if run.status.is_terminal() {
            return Ok(());
        }

        let mut state = OrchestratorState::new(
            tenant_id.clone(),
            run_id.clone(),
            run.project_id.clone(),
            run.question.clone(),
            run.output_type.clone(),
        );
        state.llm_provider = run
            .usage
            .get("llm_provider")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        state.llm_model = run
            .usage
            .get("llm_model")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        self.store.with_session(|session| {
            session.transition_run_status(
                tenant_id,
                run_id,
                RunStatus::Running,
                &TransitionUpdate {
                    stage: Some(Stage::Retrieve),
                    started_at: Some(Timestamp::now()),
                    ..TransitionUpdate::default()
                },
            )
        })?;

        match self.drive(&mut state) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.mark_run_failed(tenant_id, run_id, &err);
                Err(err)
            }
        }
    }

    /// Resumes a run from its last orchestrator checkpoint.
    ///
    /// Completed stage outputs are kept; execution continues at the first
    /// stage whose output slot is empty. Exposed for administrative
    /// retries; the default retry path re-queues from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] when no checkpoint exists and
    /// stage errors otherwise.
    pub fn resume_run(&self, tenant_id: &TenantId, run_id: &RunId) -> Result<(), PipelineError> {
        let snapshot = self.store.with_session(|session| {
            session.latest_run_checkpoint(tenant_id, run_id, ORCHESTRATOR_CHECKPOINT)
        })?;
        let Some(snapshot) = snapshot else {
            return Err(PipelineError::validation(format!(
                "no orchestrator checkpoint found for run {run_id}"
            )));
        };
        let mut state: OrchestratorState = serde_json::from_value(snapshot)
            .map_err(|err| PipelineError::validation(format!("checkpoint undecodable: {err}")))?;

        self.store.with_session(|session| {
            let run = session.get_run_required(tenant_id, run_id)?;
            match run.status {
                RunStatus::Running => Ok(run),
                _ => session.transition_run_status(
                    tenant_id,
                    run_id,
                    RunStatus::Running,
                    &TransitionUpdate {
                        started_at: Some(Timestamp::now()),
                        ..TransitionUpdate::default()
                    },
                ),
            }
        })?;

        match self.drive(&mut state) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.mark_run_failed(tenant_id, run_id, &err);
                Err(err)
            }
        }
    }

    /// Runs the stage sequence from wherever the state left off.
    fn drive(&self, state: &mut OrchestratorState) -> Result<(), PipelineError> {
        let cx = self.context();
        for entry in Self::main_pipeline().stages() {
            if self.stage_is_complete(state, entry.stage) {
                continue;
            }
            if self.gate(state, &cx)? == Gate::Canceled {
                return Ok(());
            }
            run_instrumented(*entry, state, &cx)?;
            self.checkpoint(state)?;
        }

        loop {
            match state.evaluator_decision {
                Some(EvaluatorDecision::StopSuccess) => break,
                Some(EvaluatorDecision::ContinueRewrite) => {
                    if state.repair_attempts >= 1 {
                        let reason = state
                            .evaluation_reason
                            .clone()
                            .unwrap_or_else(|| "sections failed evaluation".to_string());
                        return Err(PipelineError::EvaluationFailed(reason));
                    }
                    state.iteration_count += 1;
                    if self.gate(state, &cx)? == Gate::Canceled {
                        return Ok(());
                    }
                    run_instrumented(
                        PipelineStage {
                            stage: Stage::Repair,
                            run: repair_stage,
                        },
                        state,
                        &cx,
                    )?;
                    self.checkpoint(state)?;
                    if self.gate(state, &cx)? == Gate::Canceled {
                        return Ok(());
                    }
                    run_instrumented(
                        PipelineStage {
                            stage: Stage::Evaluate,
                            run: evaluate_stage,
                        },
                        state,
                        &cx,
                    )?;
                    self.checkpoint(state)?;
                }
                None => {
                    return Err(PipelineError::validation("evaluator produced no decision"));
                }
            }
        }

        if self.gate(state, &cx)? == Gate::Canceled {
            return Ok(());
        }
        run_instrumented(
            PipelineStage {
                stage: Stage::Export,
                run: export_stage,
            },
            state,
            &cx,
        )?;
        // The terminal transition follows the export stage_finish event.
        self.store.with_session(|session| {
            session.transition_run_status(
                &state.tenant_id,
                &state.run_id,
                RunStatus::Succeeded,
                &TransitionUpdate {
                    stage: Some(Stage::Export),
                    finished_at: Some(Timestamp::now()),
                    ..TransitionUpdate::default()
                },
            )
        })?;
        self.checkpoint(state)?;
        Ok(())
    }

    /// Returns true when a stage's output already lives in the state.
    fn stage_is_complete(&self, state: &OrchestratorState, stage: Stage) -> bool {
        match stage {
            Stage::Retrieve => !state.retrieved_sources.is_empty(),
            Stage::Outline => state.outline.is_some(),
            Stage::EvidencePack => !state.section_evidence.is_empty(),
            Stage::Draft => state.draft_text.is_some(),
            Stage::Evaluate => state.evaluator_decision.is_some(),
            Stage::Repair | Stage::Export => false,
        }
    }

    /// Consults the cancellation gate at a stage boundary.
    fn gate(
        &self,
        state: &OrchestratorState,
        cx: &StageContext,
    ) -> Result<Gate, PipelineError> {
        let requested = self.store.with_session(|session| {
            session.check_cancel_requested(&state.tenant_id, &state.run_id)
        })?;
        if !requested {
            return Ok(Gate::Proceed);
        }

        let current_stage = self.store.with_session(|session| {
            let run = session.get_run_required(&state.tenant_id, &state.run_id)?;
            session.transition_run_status(
                &state.tenant_id,
                &state.run_id,
                RunStatus::Canceled,
                &TransitionUpdate {
                    finished_at: Some(Timestamp::now()),
                    ..TransitionUpdate::default()
                },
            )?;
            Ok(run.current_stage)
        })?;

        if let Some(stage) = current_stage {
            let event = draftgate_core::NewRunEvent {
                tenant_id: state.tenant_id.clone(),
                run_id: state.run_id.clone(),
                event_type: event_types::STAGE_FINISH.to_string(),
                stage: Some(stage),
                level: draftgate_core::EventLevel::Info,
                message: format!("Finished stage: {stage}"),
                payload: json!({}),
                allow_finished: true,
            };
            cx.events.append(&event)?;
        }
        Ok(Gate::Canceled)
    }

    /// Persists the serialized orchestrator state as a checkpoint.
    fn checkpoint(&self, state: &OrchestratorState) -> Result<(), PipelineError> {
        let snapshot = serde_json::to_value(&*state)
            .map_err(|err| PipelineError::validation(format!("state unserializable: {err}")))?;
        self.store.with_session(|session| {
            session.create_run_checkpoint(
                &state.tenant_id,
                &state.run_id,
                ORCHESTRATOR_CHECKPOINT,
                &snapshot,
            )
        })?;
        Ok(())
    }

    /// Transitions a run to `failed` after a stage error, best effort.
    fn mark_run_failed(&self, tenant_id: &TenantId, run_id: &RunId, err: &PipelineError) {
        let update = TransitionUpdate {
            failure_reason: Some(err.to_string()),
            error_code: Some(err.error_code().to_string()),
            finished_at: Some(Timestamp::now()),
            ..TransitionUpdate::default()
        };
        let outcome: Result<_, StoreError> = self.store.with_session(|session| {
            let run = session.get_run_required(tenant_id, run_id)?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            session.transition_run_status(tenant_id, run_id, RunStatus::Failed, &update)
        });
        // A run already canceled or concurrently finished keeps its state.
        drop(outcome);
    }
}
