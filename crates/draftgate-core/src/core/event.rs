// crates/draftgate-core/src/core/event.rs
// ============================================================================
// Module: Draftgate Event Log Model
// Description: Append-only run event records and the event vocabulary.
// Purpose: Give readers a dense, monotonic, immutable per-run log.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every observable step of a run appends one [`RunEvent`]. Within a run,
//! `event_number` is dense and strictly increasing starting at 1, which is
//! what lets SSE clients resume from `Last-Event-ID` without gaps or
//! duplicates. Events are never updated or deleted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::EventId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TenantId;
use crate::core::state::Stage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Vocabulary
// ============================================================================

/// Well-known `event_type` labels.
///
/// Stages may additionally emit dotted progress labels such as
/// `retrieve.rerank.completed`; the constants here are the ones the
/// lifecycle machinery itself depends on.
pub mod event_types {
    /// Run status transition with `{from, to}` payload.
    pub const STATE: &str = "state";
    /// Stage entry marker, idempotent per `(run_id, stage)`.
    pub const STAGE_START: &str = "stage_start";
    /// Stage completion marker with duration and output summary.
    pub const STAGE_FINISH: &str = "stage_finish";
    /// Free-form informational record.
    pub const LOG: &str = "log";
    /// Stage or worker failure record.
    pub const ERROR: &str = "error";
    /// Coarse progress marker inside a stage.
    pub const PROGRESS: &str = "progress";
}

/// Coarse severity attached to every event.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal lifecycle progress.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Failure record.
    Error,
}

impl EventLevel {
    /// Returns the stable wire label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses a stored level label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Event Records
// ============================================================================

/// One immutable row of a run's event log.
///
/// # Invariants
/// - `event_number` is dense and strictly increasing per run, starting at 1.
/// - Rows are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Event identifier.
    pub id: EventId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Dense per-run sequence number starting at 1.
    pub event_number: i64,
    /// Append timestamp.
    pub ts: Timestamp,
    /// Stage the event belongs to, when stage-scoped.
    pub stage: Option<Stage>,
    /// Event type label; see [`event_types`].
    pub event_type: String,
    /// Coarse severity.
    pub level: EventLevel,
    /// Human-readable message.
    pub message: String,
    /// Free-form JSON payload.
    pub payload: Value,
}

/// Payload for appending a new event.
///
/// # Invariants
/// - `allow_finished` must be set by lifecycle writers that legitimately
///   append to finished runs (terminal state events, error records).
#[derive(Debug, Clone)]
pub struct NewRunEvent {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Event type label; see [`event_types`].
    pub event_type: String,
    /// Stage the event belongs to, when stage-scoped.
    pub stage: Option<Stage>,
    /// Coarse severity.
    pub level: EventLevel,
    /// Human-readable message.
    pub message: String,
    /// Free-form JSON payload.
    pub payload: Value,
    /// Permit appends to runs that already finished.
    pub allow_finished: bool,
}

impl NewRunEvent {
    /// Creates an informational event draft with an empty payload.
    #[must_use]
    pub fn info(
        tenant_id: TenantId,
        run_id: RunId,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            run_id,
            event_type: event_type.into(),
            stage: None,
            level: EventLevel::Info,
            message: message.into(),
            payload: Value::Object(serde_json::Map::new()),
            allow_finished: false,
        }
    }

    /// Attaches a stage to the draft.
    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches a payload to the draft.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the severity of the draft.
    #[must_use]
    pub const fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    /// Permits appending even when the run already finished.
    #[must_use]
    pub const fn allowing_finished(mut self) -> Self {
        self.allow_finished = true;
        self
    }
}
