// crates/draftgate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Draftgate Interfaces
// Description: Backend-agnostic interfaces for LLM, connectors, and events.
// Purpose: Define the contract surfaces the run execution core consumes.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the run execution core integrates with external
//! systems without embedding backend-specific details. Implementations must
//! fail closed: transport problems surface as typed errors, never as empty
//! results.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::event::NewRunEvent;
use crate::core::event::RunEvent;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TenantId;
use crate::core::state::Stage;

// ============================================================================
// SECTION: LLM Client
// ============================================================================

/// LLM client errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; stages treat
///   `InvalidResponse` as locally recoverable and everything else as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// Transport-level failure reaching the provider.
    #[error("llm transport error: {0}")]
    Transport(String),
    /// The request exceeded its configured timeout.
    #[error("llm request timed out")]
    Timeout,
    /// The provider rejected the request for rate reasons.
    #[error("llm rate limited")]
    RateLimited,
    /// The provider returned a non-success status.
    #[error("llm request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },
    /// The provider response could not be decoded.
    #[error("llm response invalid: {0}")]
    InvalidResponse(String),
    /// No LLM client is configured for this deployment.
    #[error("llm provider is disabled")]
    Disabled,
}

/// Optional strict-JSON response format hint.
///
/// # Invariants
/// - `schema` is a JSON Schema object forwarded to providers that support
///   structured output; providers without support may ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    /// Schema name label.
    pub name: String,
    /// JSON Schema body.
    pub schema: Value,
}

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// User prompt body.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional strict-JSON response format.
    pub response_format: Option<JsonSchemaFormat>,
}

impl LlmRequest {
    /// Creates a request with the given prompt and defaults elsewhere.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: 1_024,
            temperature: 0.3,
            response_format: None,
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the completion token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the strict-JSON response format.
    #[must_use]
    pub fn with_response_format(mut self, format: JsonSchemaFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Text-generation client.
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on transport, timeout, rate, or decode failures.
    fn generate(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Returns the model identifier requests are issued against.
    fn model(&self) -> &str;
}

// ============================================================================
// SECTION: Embedding Client
// ============================================================================

/// Embedding client errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    /// Transport-level failure reaching the provider.
    #[error("embedding transport error: {0}")]
    Transport(String),
    /// The request exceeded its configured timeout.
    #[error("embedding request timed out")]
    Timeout,
    /// The provider response could not be decoded.
    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),
    /// The provider returned a different number of vectors than requested.
    #[error("embedding batch size mismatch: expected {expected} got {actual}")]
    BatchMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// No embedding client is configured for this deployment.
    #[error("embedding provider is disabled")]
    Disabled,
}

/// Text embedding client.
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of texts, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] on transport or decode failures, or when the
    /// provider returns a mismatched batch.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Returns the embedding model identifier.
    fn model_name(&self) -> &str;

    /// Returns the vector dimensionality this model produces.
    fn dimensions(&self) -> usize;
}

// ============================================================================
// SECTION: Source Connectors
// ============================================================================

/// Connector errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; retrieval swallows
///   these per query and logs them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Transport-level failure reaching the service.
    #[error("connector transport error: {0}")]
    Transport(String),
    /// The service returned a non-success status.
    #[error("connector request failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The service response could not be decoded.
    #[error("connector response invalid: {0}")]
    Decode(String),
}

/// Source kind reported by connectors.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Peer-reviewed or preprint paper.
    Paper,
    /// Preprint explicitly flagged by the connector.
    Preprint,
    /// General web page.
    Webpage,
}

impl SourceType {
    /// Returns the stable wire label for the source type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Preprint => "preprint",
            Self::Webpage => "webpage",
        }
    }
}

/// Canonical identifier tuple with resolution priority
/// DOI > arXiv > OpenAlex > URL.
///
/// # Invariants
/// - At least one field is set for every retrieved source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalIdentifier {
    /// Digital object identifier.
    pub doi: Option<String>,
    /// arXiv identifier.
    pub arxiv_id: Option<String>,
    /// OpenAlex work identifier.
    pub openalex_id: Option<String>,
    /// Landing page URL.
    pub url: Option<String>,
}

impl CanonicalIdentifier {
    /// Resolves the canonical string using the identifier priority.
    ///
    /// Returns an empty string only when every field is unset, which valid
    /// connector output never produces.
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        if let Some(doi) = &self.doi {
            return format!("doi:{}", doi.trim().to_lowercase());
        }
        if let Some(arxiv_id) = &self.arxiv_id {
            return format!("arxiv:{}", arxiv_id.trim().to_lowercase());
        }
        if let Some(openalex_id) = &self.openalex_id {
            return format!("openalex:{}", openalex_id.trim().to_lowercase());
        }
        if let Some(url) = &self.url {
            return format!("url:{}", url.trim());
        }
        String::new()
    }
}

/// One source returned by a connector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSource {
    /// Canonical identifier tuple.
    pub canonical_id: CanonicalIdentifier,
    /// Source title.
    pub title: String,
    /// Author names.
    pub authors: Vec<String>,
    /// Publication year.
    pub year: Option<i32>,
    /// Venue name.
    pub venue: Option<String>,
    /// Abstract text.
    pub abstract_text: Option<String>,
    /// Landing page URL.
    pub url: Option<String>,
    /// Direct PDF URL.
    pub pdf_url: Option<String>,
    /// Source kind.
    pub source_type: SourceType,
    /// Connector name that produced this source.
    pub connector: String,
    /// Citation count reported by the connector.
    pub citations_count: Option<u64>,
    /// Connector-specific metadata, including intent/query tags.
    pub extra_metadata: Value,
}

/// Search options common to every connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum results to return.
    pub max_results: usize,
    /// Inclusive lower publication-year bound.
    pub year_from: Option<i32>,
    /// Inclusive upper publication-year bound.
    pub year_to: Option<i32>,
}

/// Academic source connector.
pub trait Connector: Send + Sync {
    /// Returns the stable connector name used in source origins.
    fn name(&self) -> &'static str;

    /// Searches the connector for sources matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on transport, status, or decode failures.
    fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedSource>, ConnectorError>;
}

// ============================================================================
// SECTION: Event Sink
// ============================================================================

/// Event sink errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventSinkError {
    /// The referenced run does not exist.
    #[error("run not found for event append")]
    RunNotFound,
    /// The run already finished and the append did not allow that.
    #[error("cannot append events to a finished run")]
    RunFinished,
    /// The sink's backing storage failed.
    #[error("event sink storage error: {0}")]
    Storage(String),
}

/// Append-only event writer with its own commit scope.
///
/// Implementations commit each append independently of any surrounding
/// stage transaction so readers observe in-flight progress.
pub trait EventSink: Send + Sync {
    /// Appends one event, allocating the next dense `event_number`.
    ///
    /// # Errors
    ///
    /// Returns [`EventSinkError`] when the run is missing, already finished
    /// without `allow_finished`, or storage fails.
    fn append(&self, event: &NewRunEvent) -> Result<RunEvent, EventSinkError>;

    /// Returns the most recent event for a `(run, stage)` pair.
    ///
    /// Used for `stage_start` idempotency.
    ///
    /// # Errors
    ///
    /// Returns [`EventSinkError`] when storage fails.
    fn latest_for_stage(
        &self,
        tenant_id: &TenantId,
        run_id: &RunId,
        stage: Stage,
    ) -> Result<Option<RunEvent>, EventSinkError>;
}
