// crates/draftgate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Draftgate SQLite Store Library
// Description: Durable multi-tenant store for runs, jobs, events, and stages.
// Purpose: Persist every table of the run execution core behind one store type.
// Dependencies: draftgate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This crate implements the durable side of the run execution core on
//! SQLite in WAL mode. Run and job mutations run inside immediate
//! transactions, which serializes writers the way row locks do on a server
//! database. Event appends use a dedicated connection committing
//! independently of any stage transaction, so readers observe in-flight
//! progress.
//!
//! SQLite has no skip-locked dequeue; the single-writer claim transaction
//! provides the same no-double-claim guarantee with reduced concurrency.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod artifacts;
pub mod events;
pub mod jobs;
pub mod runs;
pub mod sources;
pub mod stagedata;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use events::SqliteEventSink;
pub use events::emit_stage_finish;
pub use events::emit_stage_start;
pub use runs::NewRun;
pub use runs::TransitionUpdate;
pub use sources::CachedSourceEmbedding;
pub use sources::SnippetSearchResult;
pub use sources::SourceUpsert;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::StoreError;
pub use store::StoreSession;

#[cfg(test)]
mod tests;
