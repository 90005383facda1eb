// crates/draftgate-pipeline/src/instrument.rs
// ============================================================================
// Module: Stage Instrumentation
// Description: Stage values and the start/finish/error event wrapper.
// Purpose: Make every stage observable and uniformly failure-handled.
// Dependencies: draftgate-core, draftgate-store-sqlite, serde_json
// ============================================================================

//! ## Overview
//! Stages are values: a [`Stage`] name paired with a plain function. The
//! wrapper emits an idempotent `stage_start` carrying a state summary,
//! marks the run's `current_stage`, invokes the stage, and emits either
//! `stage_finish` with `duration_ms` or an `error` event before re-raising.
//! A failed stage's uncommitted work is discarded with it; only committed
//! session writes survive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use draftgate_core::EventLevel;
use draftgate_core::NewRunEvent;
use draftgate_core::OrchestratorState;
use draftgate_core::Stage;
use draftgate_core::event_types;
use draftgate_store_sqlite::TransitionUpdate;
use draftgate_store_sqlite::emit_stage_finish;
use draftgate_store_sqlite::emit_stage_start;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Stage Values
// ============================================================================

/// Signature every pipeline stage implements.
pub type StageFn = fn(&mut OrchestratorState, &StageContext) -> Result<(), PipelineError>;

/// One named stage of the pipeline.
#[derive(Clone, Copy)]
pub struct PipelineStage {
    /// Stage name recorded on events and the run row.
    pub stage: Stage,
    /// Stage body.
    pub run: StageFn,
}

/// An ordered list of instrumented stages.
pub struct StagePipeline {
    /// Stages in execution order.
    stages: Vec<PipelineStage>,
}

impl StagePipeline {
    /// Builds a pipeline from `(name, fn)` stage values.
    #[must_use]
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self {
            stages,
        }
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }
}

// ============================================================================
// SECTION: Instrumented Execution
// ============================================================================

/// Runs one stage with start/finish/error instrumentation.
///
/// # Errors
///
/// Re-raises the stage error after emitting the `error` event.
pub fn run_instrumented(
    entry: PipelineStage,
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let started = Instant::now();
    let input_summary = state.summary();

    emit_stage_start(
        cx.events.as_ref(),
        &state.tenant_id,
        &state.run_id,
        entry.stage,
        json!({
            "iteration": state.iteration_count,
            "state_summary": input_summary,
        }),
    )?;
    mark_current_stage(state, cx, entry.stage)?;

    match (entry.run)(state, cx) {
        Ok(()) => {
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            emit_stage_finish(
                cx.events.as_ref(),
                &state.tenant_id,
                &state.run_id,
                entry.stage,
                json!({
                    "iteration": state.iteration_count,
                    "success": true,
                    "duration_ms": duration_ms,
                    "state_summary": state.summary(),
                }),
            )?;
            Ok(())
        }
        Err(err) => {
            let event = NewRunEvent {
                tenant_id: state.tenant_id.clone(),
                run_id: state.run_id.clone(),
                event_type: event_types::ERROR.to_string(),
                stage: Some(entry.stage),
                level: EventLevel::Error,
                message: format!("Error: {err}"),
                payload: json!({
                    "iteration": state.iteration_count,
                    "error": err.to_string(),
                    "error_code": err.error_code(),
                    "stage": entry.stage.as_str(),
                    "state_summary": input_summary,
                }),
                allow_finished: true,
            };
            // Failure reporting must not mask the stage error.
            let _appended = cx.events.append(&event);
            Err(err)
        }
    }
}

/// Records the stage on the run row without emitting a state event.
fn mark_current_stage(
    state: &OrchestratorState,
    cx: &StageContext,
    stage: Stage,
) -> Result<(), PipelineError> {
    let update = TransitionUpdate {
        stage: Some(stage),
        suppress_event: true,
        ..TransitionUpdate::default()
    };
    cx.store.with_session(|session| {
        let run = session.get_run_required(&state.tenant_id, &state.run_id)?;
        session.transition_run_status(&state.tenant_id, &state.run_id, run.status, &update)
    })?;
    Ok(())
}
