// crates/draftgate-core/src/lib.rs
// ============================================================================
// Module: Draftgate Core Library
// Description: Pure domain model for the run execution core.
// Purpose: Provide records, validators, and interfaces shared by all crates.
// Dependencies: serde, serde_json, thiserror, time, rand, sha2
// ============================================================================

//! ## Overview
//! Draftgate Core defines the domain model for the run execution core: run
//! and job records, the run-status state machine, the append-only event
//! vocabulary, outline and citation validators, the in-memory orchestrator
//! state, and the backend-agnostic interfaces the pipeline consumes.
//!
//! Nothing in this crate performs I/O. Storage, HTTP, and LLM access live in
//! sibling crates behind the interfaces declared here.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::event::EventLevel;
pub use core::event::NewRunEvent;
pub use core::event::RunEvent;
pub use core::event::event_types;
pub use core::identifiers::ArtifactId;
pub use core::identifiers::CheckpointId;
pub use core::identifiers::EventId;
pub use core::identifiers::JobId;
pub use core::identifiers::ProjectId;
pub use core::identifiers::RunId;
pub use core::identifiers::SectionId;
pub use core::identifiers::SnapshotId;
pub use core::identifiers::SnippetId;
pub use core::identifiers::SourceId;
pub use core::identifiers::TenantId;
pub use core::orchestrator::EvaluatorDecision;
pub use core::orchestrator::EvidenceSnippetRef;
pub use core::orchestrator::OrchestratorState;
pub use core::orchestrator::SourceRef;
pub use core::outline::Outline;
pub use core::outline::OutlineSection;
pub use core::outline::normalize_outline;
pub use core::outline::section_count_bounds;
pub use core::outline::validate_outline;
pub use core::record::Artifact;
pub use core::record::DraftSection;
pub use core::record::IssueKind;
pub use core::record::Job;
pub use core::record::JobStatus;
pub use core::record::OutlineNotes;
pub use core::record::Project;
pub use core::record::ReviewIssue;
pub use core::record::ReviewVerdict;
pub use core::record::Run;
pub use core::record::RunSection;
pub use core::record::SectionReview;
pub use core::state::RunStatus;
pub use core::state::Stage;
pub use core::state::TransitionError;
pub use core::state::validate_transition;
pub use core::time::Timestamp;
pub use interfaces::CanonicalIdentifier;
pub use interfaces::Connector;
pub use interfaces::ConnectorError;
pub use interfaces::EmbedError;
pub use interfaces::EmbeddingClient;
pub use interfaces::EventSink;
pub use interfaces::EventSinkError;
pub use interfaces::JsonSchemaFormat;
pub use interfaces::LlmClient;
pub use interfaces::LlmError;
pub use interfaces::LlmRequest;
pub use interfaces::RetrievedSource;
pub use interfaces::SearchOptions;
pub use interfaces::SourceType;
