// crates/draftgate-llm/src/registry.rs
// ============================================================================
// Module: Client Registry
// Description: Process-wide LLM and embedding client handles.
// Purpose: Build clients once at startup and pass them explicitly.
// Dependencies: draftgate-core, draftgate-config
// ============================================================================

//! ## Overview
//! The registry owns client construction for the worker process. Per-run
//! model overrides resolve to their own cached client keyed by model name,
//! so a run that pins a model never mutates another run's client. Handles
//! are `Arc`s; the registry clones cheaply into the coordinator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use draftgate_config::AppConfig;
use draftgate_core::EmbedError;
use draftgate_core::EmbeddingClient;
use draftgate_core::LlmClient;
use draftgate_core::LlmError;

use crate::embedding::HostedEmbeddingClient;
use crate::hosted::HostedLlmClient;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Client registry shared by worker and coordinator.
pub struct ClientRegistry {
    /// LLM configuration used to build per-model clients.
    llm_config: draftgate_config::LlmConfig,
    /// Embedding configuration used to build the embedding client.
    embedding_config: draftgate_config::EmbeddingConfig,
    /// LLM clients cached by model identifier.
    llm_clients: Mutex<BTreeMap<String, Arc<HostedLlmClient>>>,
    /// Embedding client, built lazily on first use.
    embedding_client: Mutex<Option<Arc<HostedEmbeddingClient>>>,
}

impl ClientRegistry {
    /// Creates a registry from application configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            llm_config: config.llm.clone(),
            embedding_config: config.embedding.clone(),
            llm_clients: Mutex::new(BTreeMap::new()),
            embedding_client: Mutex::new(None),
        }
    }

    /// Resolves an LLM client for an optional per-run model override.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Disabled`] when the provider is disabled and
    /// construction errors otherwise.
    pub fn llm_client(&self, model_override: Option<&str>) -> Result<Arc<dyn LlmClient>, LlmError> {
        if self.llm_config.provider == "disabled" {
            return Err(LlmError::Disabled);
        }
        let model = model_override.unwrap_or(self.llm_config.model.as_str()).to_string();
        let mut clients = self
            .llm_clients
            .lock()
            .map_err(|_| LlmError::Transport("llm client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&model) {
            return Ok(Arc::clone(client) as Arc<dyn LlmClient>);
        }
        let client = Arc::new(HostedLlmClient::new(&self.llm_config, &model)?);
        clients.insert(model, Arc::clone(&client));
        Ok(client as Arc<dyn LlmClient>)
    }

    /// Resolves the embedding client.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when the client cannot be constructed.
    pub fn embedding_client(&self) -> Result<Arc<dyn EmbeddingClient>, EmbedError> {
        let mut slot = self
            .embedding_client
            .lock()
            .map_err(|_| EmbedError::Transport("embedding client cache poisoned".to_string()))?;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client) as Arc<dyn EmbeddingClient>);
        }
        let client = Arc::new(HostedEmbeddingClient::new(&self.embedding_config)?);
        *slot = Some(Arc::clone(&client));
        Ok(client as Arc<dyn EmbeddingClient>)
    }
}
