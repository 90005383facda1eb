// crates/draftgate-connectors/src/lib.rs
// ============================================================================
// Module: Draftgate Connectors Library
// Description: OpenAlex and arXiv connectors plus cross-connector dedup.
// Purpose: Retrieve candidate sources for the run execution core.
// Dependencies: draftgate-core, reqwest, serde_json, thiserror, url
// ============================================================================

//! ## Overview
//! Connectors issue bounded blocking HTTP requests with per-call timeouts
//! and translate remote records into [`draftgate_core::RetrievedSource`]
//! values. Retrieval swallows connector errors per query; connectors
//! themselves fail closed with typed errors rather than returning partial
//! silence.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod arxiv;
pub mod dedup;
pub mod openalex;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use arxiv::ArxivConnector;
pub use dedup::DedupStats;
pub use dedup::deduplicate_sources;
pub use openalex::OpenAlexConnector;
