// crates/draftgate-llm/src/lib.rs
// ============================================================================
// Module: Draftgate LLM Library
// Description: Hosted LLM and embedding clients over blocking HTTP.
// Purpose: Implement the generation and embedding interfaces for the core.
// Dependencies: draftgate-core, draftgate-config, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The hosted clients speak an OpenAI-compatible surface: chat completions
//! for generation and the embeddings endpoint for vectors. API keys come
//! from the environment variable named in configuration and never appear in
//! configuration files. The [`ClientRegistry`] is built once at process
//! startup and passed explicitly; nothing here caches globally.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod embedding;
pub mod hosted;
pub mod payload;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use embedding::HostedEmbeddingClient;
pub use hosted::HostedLlmClient;
pub use payload::extract_json_payload;
pub use registry::ClientRegistry;

#[cfg(test)]
mod tests;
