// crates/draftgate-pipeline/src/error.rs
// ============================================================================
// Module: Pipeline Errors
// Description: Unified error type for stages and the coordinator.
// Purpose: Classify failures for events, run rows, and retry policy.
// Dependencies: draftgate-core, draftgate-store-sqlite, thiserror
// ============================================================================

//! ## Overview
//! Every stage failure funnels into [`PipelineError`]; the coordinator
//! writes `error_code` from [`PipelineError::error_code`] onto the run row.
//! Validation failures that already consumed their single corrective call
//! arrive here as `Validation` and fail the stage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::EmbedError;
use draftgate_core::EventSinkError;
use draftgate_core::LlmError;
use draftgate_core::core::revision::RevisionError;
use draftgate_core::core::text::TextRuleError;
use draftgate_store_sqlite::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Error Type
// ============================================================================

/// Stage and coordinator failures.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage failure or rejected transition.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Event log failure.
    #[error(transparent)]
    Events(#[from] EventSinkError),
    /// LLM transport or decode failure.
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// Embedding transport or decode failure.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Drafted text violated a citation or summary rule.
    #[error(transparent)]
    TextRule(#[from] TextRuleError),
    /// A repair exceeded its permitted scope.
    #[error(transparent)]
    Revision(#[from] RevisionError),
    /// LLM output or stage input failed a structural rule.
    #[error("{0}")]
    Validation(String),
    /// Every section review must pass before export.
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),
}

impl PipelineError {
    /// Builds a validation failure from a rule description.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns the stable `error_code` recorded on failed runs.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::EvaluationFailed(_) => "evaluation_failed",
            _ => "worker_error",
        }
    }
}
