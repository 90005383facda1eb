// crates/draftgate-server/src/lib.rs
// ============================================================================
// Module: Draftgate Server Library
// Description: HTTP API for projects, runs, events, and artifacts.
// Purpose: Expose the run execution core over axum with SSE streaming.
// Dependencies: axum, tokio, draftgate-core, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! The API creates and observes runs; the worker executes them. Handlers
//! run store calls on the blocking pool and map store errors onto HTTP
//! statuses. The event endpoint serves both JSON pagination and a
//! long-lived SSE stream with `Last-Event-ID` resume, keepalive comments,
//! and a terminal grace window.
//!
//! Tenancy arrives as a trusted `x-tenant-id` header resolved by the
//! deployment's identity layer upstream of this service.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod stream;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use api::ApiError;
pub use api::AppState;
pub use api::build_router;
pub use stream::StreamPlanner;
pub use stream::format_sse_event;
