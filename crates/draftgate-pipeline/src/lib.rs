// crates/draftgate-pipeline/src/lib.rs
// ============================================================================
// Module: Draftgate Pipeline Library
// Description: The run execution core: coordinator, stages, worker loop.
// Purpose: Drive a claimed run from queued to a terminal state.
// Dependencies: draftgate-core, draftgate-store-sqlite, draftgate-llm,
//               draftgate-connectors, draftgate-config
// ============================================================================

//! ## Overview
//! The coordinator executes the fixed stage sequence retrieve, outline,
//! evidence_pack, draft, evaluate (with one repair round), export. Stages
//! are plain function values wrapped by instrumentation that emits
//! `stage_start`, `stage_finish`, and `error` events; the cancellation gate
//! is consulted at every stage boundary. Workers run the
//! claim-process-commit loop around the coordinator.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod context;
pub mod coordinator;
pub mod error;
pub mod instrument;
pub mod rank;
pub mod stages;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use context::Clients;
pub use context::ProductionClients;
pub use context::StageContext;
pub use coordinator::Coordinator;
pub use error::PipelineError;
pub use instrument::PipelineStage;
pub use instrument::StagePipeline;
pub use worker::NoopTelemetry;
pub use worker::RESEARCH_JOB_TYPE;
pub use worker::Worker;
pub use worker::WorkerTelemetry;
