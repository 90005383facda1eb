// crates/draftgate-llm/src/hosted.rs
// ============================================================================
// Module: Hosted LLM Client
// Description: Chat-completions client with typed failure mapping.
// Purpose: Serve every pipeline generation call with bounded requests.
// Dependencies: draftgate-core, draftgate-config, reqwest, serde_json
// ============================================================================

//! ## Overview
//! One client per model identifier. Timeouts, rate responses, and transport
//! failures map onto the typed error variants the pipeline keys retry
//! decisions off: parse problems are locally recoverable, everything else
//! bubbles up as a stage failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::time::Duration;

use draftgate_config::LlmConfig;
use draftgate_core::LlmClient;
use draftgate_core::LlmError;
use draftgate_core::LlmRequest;
use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Client
// ============================================================================

/// Hosted chat-completions client.
///
/// # Invariants
/// - `model` never changes after construction; per-run model overrides get
///   their own client from the registry.
pub struct HostedLlmClient {
    /// Blocking HTTP client with the configured timeout.
    client: Client,
    /// Chat-completions base URL.
    base_url: String,
    /// Bearer token resolved from the environment.
    api_key: String,
    /// Model identifier requests are issued against.
    model: String,
}

impl HostedLlmClient {
    /// Creates a client for the configured provider and model.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Disabled`] when the provider is disabled and
    /// [`LlmError::Transport`] when the HTTP client cannot be constructed or
    /// the API key is missing.
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        if config.provider == "disabled" {
            return Err(LlmError::Disabled);
        }
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            LlmError::Transport(format!("api key env {} is not set", config.api_key_env))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Builds the chat-completions request body.
    fn request_body(&self, request: &LlmRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let (Some(format), Some(map)) = (&request.response_format, body.as_object_mut()) {
            map.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": format.name,
                        "schema": format.schema,
                        "strict": true,
                    },
                }),
            );
        }
        body
    }
}

impl LlmClient for HostedLlmClient {
    fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: message.chars().take(400).collect(),
            });
        }

        let body: Value = response
            .json()
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        body.get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                LlmError::InvalidResponse("completion carried no message content".to_string())
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
