// crates/draftgate-config/src/lib.rs
// ============================================================================
// Module: Draftgate Configuration
// Description: Canonical configuration model with env overrides.
// Purpose: Load, override, and validate every recognized option once.
// Dependencies: serde, toml, thiserror
// ============================================================================

//! ## Overview
//! Configuration loads in three steps: defaults, an optional TOML file, and
//! environment overrides. Validation runs last and fails closed; a process
//! never starts with an inconsistent configuration. Environment names match
//! the deployment surface (`RETRIEVER_*`, `EVIDENCE_*`, `DRAFT_*`,
//! `WORKER_POLL_SECONDS`, and friends).
//!
//! Unparsable environment values fall back to the current value rather than
//! aborting, mirroring how operators expect partially-set environments to
//! behave; range problems are still caught by validation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config file unreadable: {0}")]
    Io(String),
    /// The configuration file could not be parsed.
    #[error("config file invalid: {0}")]
    Parse(String),
    /// A validated option holds an out-of-range or inconsistent value.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Environment Readers
// ============================================================================

/// Reads a trimmed, non-empty environment string.
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

/// Overrides an integer option when the environment parses.
fn env_override_usize(name: &str, slot: &mut usize) {
    if let Some(raw) = env_string(name)
        && let Ok(value) = raw.parse::<usize>()
    {
        *slot = value;
    }
}

/// Overrides a u64 option when the environment parses.
fn env_override_u64(name: &str, slot: &mut u64) {
    if let Some(raw) = env_string(name)
        && let Ok(value) = raw.parse::<u64>()
    {
        *slot = value;
    }
}

/// Overrides a float option when the environment parses.
fn env_override_f64(name: &str, slot: &mut f64) {
    if let Some(raw) = env_string(name)
        && let Ok(value) = raw.parse::<f64>()
    {
        *slot = value;
    }
}

/// Overrides a string option when the environment is set.
fn env_override_string(name: &str, slot: &mut String) {
    if let Some(raw) = env_string(name) {
        *slot = raw;
    }
}

/// Overrides an optional string option when the environment is set.
fn env_override_opt_string(name: &str, slot: &mut Option<String>) {
    if let Some(raw) = env_string(name) {
        *slot = Some(raw);
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Database options.
///
/// # Invariants
/// - `path` must name a file location, not a directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds applied to every connection.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("draftgate.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// HTTP server options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API binds to.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Worker loop options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle sleep in seconds when the queue is empty.
    pub poll_seconds: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 2.0,
        }
    }
}

/// Hosted LLM options.
///
/// # Invariants
/// - `provider` is `hosted` or `disabled`; nothing else passes validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider selector: `hosted` or `disabled`.
    pub provider: String,
    /// Default model identifier for hosted requests.
    pub model: String,
    /// Chat-completions base URL.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "hosted".to_string(),
            model: "draft-large".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "HOSTED_LLM_API_KEY".to_string(),
            timeout_seconds: 120,
        }
    }
}

/// Hosted embedding options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub model: String,
    /// Embeddings base URL.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Vector dimensionality the model produces.
    pub dimensions: usize,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum characters of source text submitted per embedding.
    pub text_max_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "HOSTED_LLM_API_KEY".to_string(),
            dimensions: 1_536,
            timeout_seconds: 60,
            text_max_chars: 7_000,
        }
    }
}

/// Retrieval options.
///
/// # Invariants
/// - `min_sources <= max_sources`; `rerank_topk` is clamped to 200.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Soft upper bound on generated search queries.
    pub query_count: usize,
    /// Embedding fan-out cap for reranking.
    pub rerank_topk: usize,
    /// BM25 weight in the rerank score.
    pub weight_bm25: f64,
    /// Embedding-similarity weight in the rerank score.
    pub weight_embed: f64,
    /// Recency weight in the rerank score.
    pub weight_recency: f64,
    /// Citation-count weight in the rerank score.
    pub weight_citation: f64,
    /// Minimum selected sources.
    pub min_sources: usize,
    /// Maximum selected sources.
    pub max_sources: usize,
    /// Per-query cap for the OpenAlex connector.
    pub openalex_max: usize,
    /// Per-query cap for the arXiv connector.
    pub arxiv_max: usize,
    /// Contact email forwarded to OpenAlex.
    pub openalex_email: Option<String>,
    /// Per-call connector timeout in seconds.
    pub connector_timeout_seconds: u64,
    /// Batch size for rerank embedding calls.
    pub embed_batch: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            query_count: 8,
            rerank_topk: 120,
            weight_bm25: 0.55,
            weight_embed: 0.30,
            weight_recency: 0.10,
            weight_citation: 0.05,
            min_sources: 10,
            max_sources: 20,
            openalex_max: 5,
            arxiv_max: 5,
            openalex_email: None,
            connector_timeout_seconds: 30,
            embed_batch: 32,
        }
    }
}

/// Evidence-pack options.
///
/// # Invariants
/// - `snippet_min <= snippet_max`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Minimum snippets per section pack.
    pub snippet_min: usize,
    /// Maximum snippets per section pack.
    pub snippet_max: usize,
    /// Per-source snippet cap inside one pack.
    pub per_source_cap: usize,
    /// Minimum cosine similarity for vector search hits.
    pub min_similarity: f64,
    /// Vector search result limit per section query.
    pub search_limit: usize,
    /// Result count under which the threshold is relaxed and retried.
    pub min_required: usize,
    /// Batch size for section-query embedding calls.
    pub embed_batch: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            snippet_min: 8,
            snippet_max: 20,
            per_source_cap: 3,
            min_similarity: 0.35,
            search_limit: 60,
            min_required: 5,
            embed_batch: 16,
        }
    }
}

/// Drafting options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// Minimum words per drafted section; zero disables the check.
    pub section_min_words: usize,
    /// Completion token cap per drafted section.
    pub section_max_tokens: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            section_min_words: 50,
            section_max_tokens: 1_800,
        }
    }
}

// ============================================================================
// SECTION: Application Config
// ============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database options.
    pub database: DatabaseConfig,
    /// HTTP server options.
    pub server: ServerConfig,
    /// Worker loop options.
    pub worker: WorkerConfig,
    /// Hosted LLM options.
    pub llm: LlmConfig,
    /// Hosted embedding options.
    pub embedding: EmbeddingConfig,
    /// Retrieval options.
    pub retriever: RetrieverConfig,
    /// Evidence-pack options.
    pub evidence: EvidenceConfig,
    /// Drafting options.
    pub draft: DraftConfig,
}

impl AppConfig {
    /// Loads configuration from defaults, an optional TOML file, and the
    /// environment, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable or unparsable,
    /// or when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(file) => {
                let raw =
                    fs::read_to_string(file).map_err(|err| ConfigError::Io(err.to_string()))?;
                toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies recognized environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Some(raw) = env_string("DATABASE_PATH") {
            self.database.path = PathBuf::from(raw);
        }
        env_override_string("BIND_ADDR", &mut self.server.bind_addr);
        env_override_f64("WORKER_POLL_SECONDS", &mut self.worker.poll_seconds);

        env_override_string("LLM_PROVIDER", &mut self.llm.provider);
        env_override_string("HOSTED_LLM_MODEL", &mut self.llm.model);
        env_override_string("HOSTED_LLM_BASE_URL", &mut self.llm.base_url);
        env_override_u64("LLM_TIMEOUT_SECONDS", &mut self.llm.timeout_seconds);

        env_override_string("EMBEDDING_MODEL", &mut self.embedding.model);
        env_override_string("EMBEDDING_BASE_URL", &mut self.embedding.base_url);
        env_override_usize("EMBEDDING_DIMENSIONS", &mut self.embedding.dimensions);
        env_override_u64("EMBED_TIMEOUT_SECONDS", &mut self.embedding.timeout_seconds);

        env_override_usize("RETRIEVER_QUERY_COUNT", &mut self.retriever.query_count);
        env_override_usize("RETRIEVER_RERANK_TOPK", &mut self.retriever.rerank_topk);
        env_override_f64("RETRIEVER_WEIGHT_BM25", &mut self.retriever.weight_bm25);
        env_override_f64("RETRIEVER_WEIGHT_EMBED", &mut self.retriever.weight_embed);
        env_override_f64("RETRIEVER_WEIGHT_RECENCY", &mut self.retriever.weight_recency);
        env_override_f64("RETRIEVER_WEIGHT_CITATION", &mut self.retriever.weight_citation);
        env_override_usize("RETRIEVER_MIN_SOURCES", &mut self.retriever.min_sources);
        env_override_usize("RETRIEVER_MAX_SOURCES", &mut self.retriever.max_sources);
        env_override_usize("RETRIEVER_OPENALEX_MAX", &mut self.retriever.openalex_max);
        env_override_usize("RETRIEVER_ARXIV_MAX", &mut self.retriever.arxiv_max);
        env_override_opt_string("OPENALEX_EMAIL", &mut self.retriever.openalex_email);
        env_override_u64(
            "CONNECTOR_TIMEOUT_SECONDS",
            &mut self.retriever.connector_timeout_seconds,
        );
        env_override_usize("RETRIEVER_EMBED_BATCH", &mut self.retriever.embed_batch);

        env_override_usize("EVIDENCE_SNIPPET_MIN", &mut self.evidence.snippet_min);
        env_override_usize("EVIDENCE_SNIPPET_MAX", &mut self.evidence.snippet_max);
        env_override_usize("EVIDENCE_PER_SOURCE_CAP", &mut self.evidence.per_source_cap);
        env_override_f64("EVIDENCE_MIN_SIMILARITY", &mut self.evidence.min_similarity);
        env_override_usize("EVIDENCE_SEARCH_LIMIT", &mut self.evidence.search_limit);
        env_override_usize("EVIDENCE_MIN_REQUIRED", &mut self.evidence.min_required);
        env_override_usize("EVIDENCE_EMBED_BATCH", &mut self.evidence.embed_batch);

        env_override_usize("DRAFT_SECTION_MIN_WORDS", &mut self.draft.section_min_words);
        env_override_u64("DRAFT_SECTION_MAX_TOKENS", &mut self.draft.section_max_tokens);
    }

    /// Validates option ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".to_string()));
        }
        if self.llm.provider != "hosted" && self.llm.provider != "disabled" {
            return Err(ConfigError::Invalid(format!(
                "llm.provider must be hosted or disabled, got {}",
                self.llm.provider
            )));
        }
        if self.worker.poll_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "worker.poll_seconds must be greater than zero".to_string(),
            ));
        }
        if self.retriever.query_count < 6 {
            return Err(ConfigError::Invalid(
                "retriever.query_count must be at least 6".to_string(),
            ));
        }
        if self.retriever.rerank_topk == 0 {
            return Err(ConfigError::Invalid(
                "retriever.rerank_topk must be greater than zero".to_string(),
            ));
        }
        // The fan-out cap is a hard ceiling; larger requests clamp quietly.
        self.retriever.rerank_topk = self.retriever.rerank_topk.min(200);
        if self.retriever.min_sources == 0
            || self.retriever.min_sources > self.retriever.max_sources
        {
            return Err(ConfigError::Invalid(
                "retriever.min_sources must be in 1..=retriever.max_sources".to_string(),
            ));
        }
        for (label, weight) in [
            ("retriever.weight_bm25", self.retriever.weight_bm25),
            ("retriever.weight_embed", self.retriever.weight_embed),
            ("retriever.weight_recency", self.retriever.weight_recency),
            ("retriever.weight_citation", self.retriever.weight_citation),
        ] {
            if weight < 0.0 {
                return Err(ConfigError::Invalid(format!("{label} must not be negative")));
            }
        }
        if self.evidence.snippet_min == 0
            || self.evidence.snippet_min > self.evidence.snippet_max
        {
            return Err(ConfigError::Invalid(
                "evidence.snippet_min must be in 1..=evidence.snippet_max".to_string(),
            ));
        }
        if self.evidence.per_source_cap == 0 {
            return Err(ConfigError::Invalid(
                "evidence.per_source_cap must be greater than zero".to_string(),
            ));
        }
        if !(0.0 ..= 1.0).contains(&self.evidence.min_similarity) {
            return Err(ConfigError::Invalid(
                "evidence.min_similarity must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
