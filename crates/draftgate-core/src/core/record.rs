// crates/draftgate-core/src/core/record.rs
// ============================================================================
// Module: Draftgate Persisted Records
// Description: Run, project, job, section, review, and artifact records.
// Purpose: Shared row shapes between the store and the API surface.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Records mirror the persisted tables one to one. They carry no behavior
//! beyond label parsing; mutation rules live in the store (atomic
//! transitions, upserts) and in the validators.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SectionId;
use crate::core::identifiers::SnippetId;
use crate::core::identifiers::TenantId;
use crate::core::state::RunStatus;
use crate::core::state::Stage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Projects
// ============================================================================

/// Project row owning a family of runs.
///
/// # Invariants
/// - `name` is unique per tenant.
/// - `last_run_*` fields are denormalized and touched on every run mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Project identifier.
    pub id: ProjectId,
    /// Tenant-unique project name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Most recently mutated run, when any exists.
    pub last_run_id: Option<RunId>,
    /// Status of the most recently mutated run.
    pub last_run_status: Option<RunStatus>,
    /// Timestamp of the last run mutation or event append.
    pub last_activity_at: Option<Timestamp>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Runs
// ============================================================================

/// Run row for one end-to-end pipeline execution.
///
/// # Invariants
/// - Mutated only through atomic, row-locked transitions.
/// - `(tenant_id, project_id, client_request_id)` is unique when the client
///   request id is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub id: RunId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Stage currently (or last) executing.
    pub current_stage: Option<Stage>,
    /// Budget envelope supplied at creation.
    pub budgets: Value,
    /// Usage ledger: job type, inputs, warnings.
    pub usage: Value,
    /// Failure description when `status` is failed.
    pub failure_reason: Option<String>,
    /// Stable failure classification when `status` is failed.
    pub error_code: Option<String>,
    /// Wall-clock start of pipeline execution.
    pub started_at: Option<Timestamp>,
    /// Wall-clock end of the run.
    pub finished_at: Option<Timestamp>,
    /// Cooperative cancellation request marker.
    pub cancel_requested_at: Option<Timestamp>,
    /// Number of explicit retries performed.
    pub retry_count: u32,
    /// Research question driving the run.
    pub question: String,
    /// Requested output kind; currently always `report`.
    pub output_type: String,
    /// Client-supplied idempotency key.
    pub client_request_id: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Jobs
// ============================================================================

/// Job lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker claim.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Terminal failure.
    Failed,
    /// Terminal success.
    Succeeded,
}

impl JobStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "succeeded" => Some(Self::Succeeded),
            _ => None,
        }
    }

    /// Returns true when the job reached a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Succeeded)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue claim unit tying a worker to a run.
///
/// # Invariants
/// - At most one non-terminal job exists per run at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Job identifier.
    pub id: JobId,
    /// Run this job executes.
    pub run_id: RunId,
    /// Job type label, e.g. `research.run`.
    pub job_type: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Number of claims performed, including the current one.
    pub attempts: u32,
    /// Error text from the most recent failure.
    pub last_error: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Outline Sections
// ============================================================================

/// Persisted outline section row.
///
/// # Invariants
/// - `section_order` values form a contiguous 1..N sequence per run.
/// - The first section id is `intro` and the last is `conclusion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSection {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Section identifier.
    pub section_id: SectionId,
    /// Section title, unique within the run.
    pub title: String,
    /// Two to three sentence statement of the section's goal.
    pub goal: String,
    /// One-based position in the outline.
    pub section_order: u32,
}

/// Outline planning notes stored alongside a section.
///
/// # Invariants
/// - Exactly one row per `(run_id, section_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNotes {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Section identifier.
    pub section_id: SectionId,
    /// Key points the section must cover.
    pub key_points: Vec<String>,
    /// Themes the evidence pack should search for.
    pub suggested_evidence_themes: Vec<String>,
}

// ============================================================================
// SECTION: Drafts and Reviews
// ============================================================================

/// Drafted section text with its continuity micro-summary.
///
/// # Invariants
/// - `text` passes the citation placement validator before persistence.
/// - `section_summary` is one to three citation-free sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSection {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Section identifier.
    pub section_id: SectionId,
    /// Drafted body text with `[CITE:...]` tokens.
    pub text: String,
    /// Citation-free continuity micro-summary.
    pub section_summary: Option<String>,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

/// Review verdict for one drafted section.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// Section is grounded and correctly cited.
    Pass,
    /// Section has at least one grounding or citation issue.
    Fail,
}

impl ReviewVerdict {
    /// Returns the stable wire label for the verdict.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    /// Parses a stored verdict label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problem classification for a review issue.
///
/// # Invariants
/// - Variants are stable; unknown labels from the evaluator are dropped
///   during normalization, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Claim lacks support in the evidence pack.
    Unsupported,
    /// Claim contradicts the cited evidence.
    Contradicted,
    /// Factual sentence carries no citation.
    MissingCitation,
    /// Citation token does not resolve to a snippet.
    InvalidCitation,
    /// Cited snippet is not in this section's evidence pack.
    NotInPack,
    /// Claim overstates what the evidence supports.
    Overstated,
}

impl IssueKind {
    /// Returns the stable wire label for the issue kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::Contradicted => "contradicted",
            Self::MissingCitation => "missing_citation",
            Self::InvalidCitation => "invalid_citation",
            Self::NotInPack => "not_in_pack",
            Self::Overstated => "overstated",
        }
    }

    /// Parses an evaluator-supplied label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "unsupported" => Some(Self::Unsupported),
            "contradicted" => Some(Self::Contradicted),
            "missing_citation" => Some(Self::MissingCitation),
            "invalid_citation" => Some(Self::InvalidCitation),
            "not_in_pack" => Some(Self::NotInPack),
            "overstated" => Some(Self::Overstated),
            _ => None,
        }
    }
}

/// Normalized issue attached to a section review.
///
/// # Invariants
/// - `citations` only contains snippet ids from the section's evidence pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Zero-based index of the offending sentence.
    pub sentence_index: usize,
    /// Problem classification.
    pub problem: IssueKind,
    /// Reviewer notes.
    pub notes: String,
    /// Snippet ids the reviewer referenced.
    pub citations: Vec<SnippetId>,
}

/// Persisted per-section review.
///
/// # Invariants
/// - Exactly one row per `(run_id, section_id)`, updated in place.
/// - A non-empty `issues` list forces `verdict` to `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReview {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Section identifier.
    pub section_id: SectionId,
    /// Review verdict.
    pub verdict: ReviewVerdict,
    /// Normalized issue list.
    pub issues: Vec<ReviewIssue>,
    /// Review timestamp.
    pub reviewed_at: Timestamp,
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// Exported output record.
///
/// # Invariants
/// - `(tenant_id, run_id, artifact_type)` upserts in place; content is
///   replaced wholesale, never edited.
/// - Survives run deletion with `run_id` cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Artifact identifier.
    pub id: ArtifactId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Producing run, when it still exists.
    pub run_id: Option<RunId>,
    /// Artifact type label, e.g. `report_md`.
    pub artifact_type: String,
    /// Opaque blob reference, e.g. `inline://runs/<id>/report.md`.
    pub blob_ref: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Content size in bytes.
    pub size_bytes: u64,
    /// Metadata, including the inline content for inline blob refs.
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
