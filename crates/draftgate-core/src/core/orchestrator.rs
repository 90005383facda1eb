// crates/draftgate-core/src/core/orchestrator.rs
// ============================================================================
// Module: Draftgate Orchestrator State
// Description: In-memory state threaded through the pipeline stages.
// Purpose: Hold stage outputs, counters, and instrumentation summaries.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! One [`OrchestratorState`] value lives for the duration of a run. The
//! coordinator owns it; stages receive it mutably and fill in their output
//! slots. The whole value serializes, which is what makes per-stage
//! checkpoints and administrative resume possible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::identifiers::ProjectId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SnippetId;
use crate::core::identifiers::SourceId;
use crate::core::identifiers::TenantId;
use crate::core::outline::Outline;

// ============================================================================
// SECTION: Stage Output References
// ============================================================================

/// Selected source carried through the pipeline.
///
/// # Invariants
/// - `canonical_id` is the priority-resolved identifier string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Persisted source identifier.
    pub source_id: SourceId,
    /// Canonical identifier string.
    pub canonical_id: String,
    /// Source title.
    pub title: String,
    /// Author names.
    pub authors: Vec<String>,
    /// Abstract text when the connector supplied one.
    pub abstract_text: Option<String>,
    /// Publication year.
    pub year: Option<i32>,
    /// Venue name.
    pub venue: Option<String>,
    /// DOI when known.
    pub doi: Option<String>,
    /// arXiv identifier when known.
    pub arxiv_id: Option<String>,
    /// Landing page URL.
    pub url: Option<String>,
    /// Connector that retrieved the source.
    pub connector: String,
    /// Citation count reported by the connector.
    pub cited_by_count: Option<u64>,
    /// Rerank score at selection time.
    pub score: f64,
}

/// Evidence snippet reference carried through drafting and review.
///
/// # Invariants
/// - `snippet_id` appears in `section_evidence` for every section whose
///   pack includes this snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSnippetRef {
    /// Snippet identifier cited by `[CITE:...]` tokens.
    pub snippet_id: SnippetId,
    /// Source the snippet came from.
    pub source_id: SourceId,
    /// Snippet text.
    pub text: String,
    /// Character offset of the snippet start in its snapshot.
    pub char_start: usize,
    /// Character offset of the snippet end in its snapshot.
    pub char_end: usize,
}

/// Aggregate evaluator decision for the run.
///
/// # Invariants
/// - Variants are stable for serialization and checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorDecision {
    /// At least one section failed; run repair and re-evaluate.
    ContinueRewrite,
    /// Every section passed; proceed to export.
    StopSuccess,
}

impl EvaluatorDecision {
    /// Returns the stable wire label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContinueRewrite => "continue_rewrite",
            Self::StopSuccess => "stop_success",
        }
    }
}

// ============================================================================
// SECTION: Orchestrator State
// ============================================================================

/// Mutable state owned by the coordinator for one run.
///
/// # Invariants
/// - Identifiers never change after construction.
/// - Stage slots are written once per pipeline pass; repair bumps
///   `draft_version` and `repair_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Run identifier.
    pub run_id: RunId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Research question driving the run.
    pub user_query: String,
    /// Requested output kind.
    pub output_type: String,
    /// LLM provider override from the run inputs.
    pub llm_provider: Option<String>,
    /// LLM model override from the run inputs.
    pub llm_model: Option<String>,
    /// Search queries produced by the query plan.
    pub generated_queries: Vec<String>,
    /// Sources selected by retrieval.
    pub retrieved_sources: Vec<SourceRef>,
    /// All evidence snippets gathered across sections.
    pub evidence_snippets: Vec<EvidenceSnippetRef>,
    /// Per-section evidence packs keyed by section id.
    pub section_evidence: BTreeMap<String, Vec<EvidenceSnippetRef>>,
    /// Validated outline.
    pub outline: Option<Outline>,
    /// Assembled draft text.
    pub draft_text: Option<String>,
    /// Draft assembly counter; bumped by draft and repair.
    pub draft_version: u32,
    /// Aggregate evaluator decision from the latest pass.
    pub evaluator_decision: Option<EvaluatorDecision>,
    /// Human-readable evaluator reason.
    pub evaluation_reason: Option<String>,
    /// Number of repair passes performed; capped at one.
    pub repair_attempts: u32,
    /// Evaluate/repair loop iteration counter.
    pub iteration_count: u32,
    /// Structured edit logs accumulated by repair.
    pub repair_edits: Vec<Value>,
    /// Non-fatal warnings surfaced under `usage.warnings`.
    pub warnings: Vec<String>,
    /// Artifact types persisted by export.
    pub artifacts: Vec<String>,
}

impl OrchestratorState {
    /// Creates fresh state for a newly claimed run.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        run_id: RunId,
        project_id: ProjectId,
        user_query: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            run_id,
            project_id,
            user_query: user_query.into(),
            output_type: output_type.into(),
            llm_provider: None,
            llm_model: None,
            generated_queries: Vec::new(),
            retrieved_sources: Vec::new(),
            evidence_snippets: Vec::new(),
            section_evidence: BTreeMap::new(),
            outline: None,
            draft_text: None,
            draft_version: 0,
            evaluator_decision: None,
            evaluation_reason: None,
            repair_attempts: 0,
            iteration_count: 0,
            repair_edits: Vec::new(),
            warnings: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Returns the evidence pack for a section, empty when none was built.
    #[must_use]
    pub fn section_pack(&self, section_id: &str) -> &[EvidenceSnippetRef] {
        self.section_evidence.get(section_id).map_or(&[], Vec::as_slice)
    }

    /// Produces a compact summary of the state for instrumentation events.
    ///
    /// Inspects a small fixed set of slots; never clones stage outputs.
    #[must_use]
    pub fn summary(&self) -> Value {
        let mut summary = serde_json::Map::new();
        summary.insert("generated_queries".to_string(), json!(self.generated_queries.len()));
        summary.insert("retrieved_sources".to_string(), json!(self.retrieved_sources.len()));
        summary.insert("evidence_snippets".to_string(), json!(self.evidence_snippets.len()));
        if let Some(outline) = &self.outline {
            summary.insert("outline_sections".to_string(), json!(outline.sections.len()));
        }
        if let Some(draft) = &self.draft_text {
            summary.insert("draft_length".to_string(), json!(draft.len()));
        }
        if let Some(decision) = self.evaluator_decision {
            summary.insert("evaluator_decision".to_string(), json!(decision.as_str()));
        }
        summary.insert("iteration_count".to_string(), json!(self.iteration_count));
        summary.insert("repair_attempts".to_string(), json!(self.repair_attempts));
        if !self.artifacts.is_empty() {
            summary.insert("artifacts".to_string(), json!(self.artifacts.len()));
        }
        Value::Object(summary)
    }
}
