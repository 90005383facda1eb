// crates/draftgate-pipeline/src/context.rs
// ============================================================================
// Module: Stage Context
// Description: Capabilities handed to every stage invocation.
// Purpose: Give stages storage, events, clients, and configuration.
// Dependencies: draftgate-core, draftgate-store-sqlite, draftgate-llm,
//               draftgate-connectors, draftgate-config
// ============================================================================

//! ## Overview
//! Stages receive one [`StageContext`] for their whole invocation. Table
//! writes go through short [`StageContext::store`] sessions; observability
//! goes through the event sink, which commits independently so readers see
//! progress while the stage is still working. Clients and connectors
//! resolve through the [`Clients`] capability, built once at process
//! startup; tests substitute their own implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use draftgate_config::AppConfig;
use draftgate_connectors::ArxivConnector;
use draftgate_connectors::OpenAlexConnector;
use draftgate_core::Connector;
use draftgate_core::ConnectorError;
use draftgate_core::EmbedError;
use draftgate_core::EmbeddingClient;
use draftgate_core::EventLevel;
use draftgate_core::EventSink;
use draftgate_core::LlmClient;
use draftgate_core::LlmError;
use draftgate_core::NewRunEvent;
use draftgate_core::OrchestratorState;
use draftgate_core::Stage;
use draftgate_llm::ClientRegistry;
use draftgate_store_sqlite::SqliteStore;
use serde_json::Value;

use crate::error::PipelineError;

// ============================================================================
// SECTION: Client Capability
// ============================================================================

/// Client resolution capability consumed by stages.
pub trait Clients: Send + Sync {
    /// Resolves an LLM client for an optional per-run model override.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when no client is available.
    fn llm_client(&self, model_override: Option<&str>) -> Result<Arc<dyn LlmClient>, LlmError>;

    /// Resolves the embedding client.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when no client is available.
    fn embedding_client(&self) -> Result<Arc<dyn EmbeddingClient>, EmbedError>;

    /// Returns the academic source connectors in fan-out order.
    fn connectors(&self) -> Vec<Arc<dyn Connector>>;
}

/// Production clients: hosted LLM/embedding plus OpenAlex and arXiv.
pub struct ProductionClients {
    /// Hosted client registry.
    registry: ClientRegistry,
    /// Connectors built at startup.
    connectors: Vec<Arc<dyn Connector>>,
}

impl ProductionClients {
    /// Builds production clients from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when a connector HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConnectorError> {
        let timeout = Duration::from_secs(config.retriever.connector_timeout_seconds);
        let openalex =
            OpenAlexConnector::new(timeout, config.retriever.openalex_email.clone())?;
        let arxiv = ArxivConnector::new(timeout)?;
        Ok(Self {
            registry: ClientRegistry::from_config(config),
            connectors: vec![Arc::new(openalex), Arc::new(arxiv)],
        })
    }
}

impl Clients for ProductionClients {
    fn llm_client(&self, model_override: Option<&str>) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.registry.llm_client(model_override)
    }

    fn embedding_client(&self) -> Result<Arc<dyn EmbeddingClient>, EmbedError> {
        self.registry.embedding_client()
    }

    fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors.clone()
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Shared capabilities for one stage invocation.
pub struct StageContext {
    /// Durable store; stages open short sessions for their table writes.
    pub store: SqliteStore,
    /// Independently committing event sink.
    pub events: Arc<dyn EventSink>,
    /// Client resolution capability.
    pub clients: Arc<dyn Clients>,
    /// Application configuration.
    pub config: Arc<AppConfig>,
}

impl StageContext {
    /// Emits a stage-scoped progress event.
    ///
    /// The message follows the `<event_type>: <stage>` convention used by
    /// progress consumers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Events`] when the append fails.
    pub fn emit(
        &self,
        state: &OrchestratorState,
        stage: Stage,
        event_type: &str,
        payload: Value,
    ) -> Result<(), PipelineError> {
        let event = NewRunEvent {
            tenant_id: state.tenant_id.clone(),
            run_id: state.run_id.clone(),
            event_type: event_type.to_string(),
            stage: Some(stage),
            level: EventLevel::Info,
            message: format!("{event_type}: {stage}"),
            payload,
            allow_finished: false,
        };
        self.events.append(&event)?;
        Ok(())
    }
}
