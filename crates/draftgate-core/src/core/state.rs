// crates/draftgate-core/src/core/state.rs
// ============================================================================
// Module: Draftgate Run State Machine
// Description: Run status lifecycle and the allowed-transition table.
// Purpose: Validate every status change before it is persisted.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! The run status state machine is a pure function over an explicit
//! transition table. Both the API and the worker mutate runs, so every
//! writer funnels through [`validate_transition`] inside a row-locked store
//! transaction; this module performs no I/O itself.
//!
//! `succeeded` and `canceled` are sinks. `failed` can re-enter `queued`, but
//! only through the explicit retry operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run row exists but no job has been enqueued.
    Created,
    /// Run is waiting for a worker claim.
    Queued,
    /// Run is executing pipeline stages.
    Running,
    /// Run is held for manual intervention; no stage writes this today.
    Blocked,
    /// Run failed; retry may re-queue it.
    Failed,
    /// Run completed and exported artifacts. Terminal.
    Succeeded,
    /// Run was canceled. Terminal.
    Canceled,
}

impl RunStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "created" => Some(Self::Created),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            "succeeded" => Some(Self::Succeeded),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns true when the status is a sink that no stage leaves.
    ///
    /// `failed` is deliberately not terminal here: the retry operation may
    /// re-queue it.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled)
    }

    /// Returns true when the status counts as finished for readers.
    ///
    /// Event appends to finished runs are rejected unless the writer
    /// explicitly allows them.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Failed | Self::Succeeded | Self::Canceled)
    }

    /// Returns the statuses reachable from this one, excluding same-state.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Queued, Self::Canceled],
            Self::Queued => &[Self::Running, Self::Canceled],
            Self::Running => &[Self::Blocked, Self::Failed, Self::Succeeded, Self::Canceled],
            Self::Blocked => &[Self::Running, Self::Failed, Self::Canceled],
            // Retry only.
            Self::Failed => &[Self::Queued],
            Self::Succeeded | Self::Canceled => &[],
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Transition Validation
// ============================================================================

/// Errors raised by state machine validation.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The requested transition is not in the allowed table.
    #[error("illegal transition: {from} -> {to}")]
    Illegal {
        /// Status the run currently holds.
        from: RunStatus,
        /// Status the caller requested.
        to: RunStatus,
    },
}

/// Validates that a status change is allowed.
///
/// Same-state transitions are always accepted so repeated writers stay
/// idempotent.
///
/// # Errors
///
/// Returns [`TransitionError::Illegal`] when the transition is not in the
/// allowed table.
pub fn validate_transition(from: RunStatus, to: RunStatus) -> Result<(), TransitionError> {
    if from == to {
        return Ok(());
    }
    if from.allowed_transitions().contains(&to) {
        return Ok(());
    }
    Err(TransitionError::Illegal {
        from,
        to,
    })
}

// ============================================================================
// SECTION: Pipeline Stages
// ============================================================================

/// Fixed pipeline stage names.
///
/// # Invariants
/// - Variants are stable; event rows and run rows store the `as_str` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Query planning, connector fan-out, rerank, and source selection.
    Retrieve,
    /// Per-section evidence pack construction.
    EvidencePack,
    /// Outline generation and validation.
    Outline,
    /// Per-section drafting with citation tokens.
    Draft,
    /// Per-section grounding review.
    Evaluate,
    /// Targeted sentence repair plus continuity patch.
    Repair,
    /// Report assembly and artifact persistence.
    Export,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ORDERED: &'static [Self] = &[
        Self::Retrieve,
        Self::EvidencePack,
        Self::Outline,
        Self::Draft,
        Self::Evaluate,
        Self::Repair,
        Self::Export,
    ];

    /// Returns the stable wire label for the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::EvidencePack => "evidence_pack",
            Self::Outline => "outline",
            Self::Draft => "draft",
            Self::Evaluate => "evaluate",
            Self::Repair => "repair",
            Self::Export => "export",
        }
    }

    /// Parses a stored stage label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "retrieve" => Some(Self::Retrieve),
            "evidence_pack" => Some(Self::EvidencePack),
            "outline" => Some(Self::Outline),
            "draft" => Some(Self::Draft),
            "evaluate" => Some(Self::Evaluate),
            "repair" => Some(Self::Repair),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
