// crates/draftgate-llm/src/embedding.rs
// ============================================================================
// Module: Hosted Embedding Client
// Description: Embeddings-endpoint client with batch integrity checks.
// Purpose: Serve rerank and evidence-pack vector needs.
// Dependencies: draftgate-core, draftgate-config, reqwest, serde_json
// ============================================================================

//! ## Overview
//! Batches go up as one request; the response must return exactly one
//! vector per input in order. Anything else fails closed so cached vectors
//! never mismatch their text hashes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::time::Duration;

use draftgate_config::EmbeddingConfig;
use draftgate_core::EmbedError;
use draftgate_core::EmbeddingClient;
use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Client
// ============================================================================

/// Hosted embeddings client.
pub struct HostedEmbeddingClient {
    /// Blocking HTTP client with the configured timeout.
    client: Client,
    /// Embeddings base URL.
    base_url: String,
    /// Bearer token resolved from the environment.
    api_key: String,
    /// Embedding model identifier.
    model: String,
    /// Vector dimensionality the model produces.
    dimensions: usize,
}

impl HostedEmbeddingClient {
    /// Creates a client from the embedding configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Transport`] when the HTTP client cannot be
    /// constructed or the API key is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            EmbedError::Transport(format!("api key env {} is not set", config.api_key_env))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| EmbedError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingClient for HostedEmbeddingClient {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    EmbedError::Timeout
                } else {
                    EmbedError::Transport(err.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Transport(format!(
                "embedding request failed with status {status}"
            )));
        }
        let body: Value = response
            .json()
            .map_err(|err| EmbedError::InvalidResponse(err.to_string()))?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbedError::InvalidResponse("missing data array".to_string()))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| EmbedError::InvalidResponse("missing embedding".to_string()))?;
            let mut vector = Vec::with_capacity(embedding.len());
            for component in embedding {
                let value = component.as_f64().ok_or_else(|| {
                    EmbedError::InvalidResponse("embedding holds a non-number".to_string())
                })?;
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "f32 vector precision is intended"
                )]
                vector.push(value as f32);
            }
            vectors.push(vector);
        }
        if vectors.len() != texts.len() {
            return Err(EmbedError::BatchMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
