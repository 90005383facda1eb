// crates/draftgate-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Tests
// Description: Tests for file loading, defaults, and validation rules.
// ============================================================================
//! ## Overview
//! Validates defaults, TOML merging, the rerank clamp, and the fail-closed
//! range checks.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::io::Write;

use draftgate_config::AppConfig;
use draftgate_config::ConfigError;

#[test]
fn defaults_validate() {
    let mut config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.retriever.rerank_topk, 120);
    assert_eq!(config.draft.section_min_words, 50);
    assert_eq!(config.evidence.per_source_cap, 3);
}

#[test]
fn toml_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[retriever]\nquery_count = 9\nmax_sources = 18\n\n[draft]\nsection_min_words = 80\n"
    )
    .unwrap();
    let config = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.retriever.query_count, 9);
    assert_eq!(config.retriever.max_sources, 18);
    assert_eq!(config.draft.section_min_words, 80);
    // Untouched sections keep defaults.
    assert_eq!(config.evidence.snippet_max, 20);
}

#[test]
fn unparsable_file_fails_closed() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "retriever = \"not a table\"").unwrap();
    assert!(matches!(AppConfig::load(Some(file.path())), Err(ConfigError::Parse(_))));
}

#[test]
fn rerank_topk_is_clamped_to_200() {
    let mut config = AppConfig::default();
    config.retriever.rerank_topk = 5_000;
    config.validate().unwrap();
    assert_eq!(config.retriever.rerank_topk, 200);
}

#[test]
fn inverted_source_bounds_are_rejected() {
    let mut config = AppConfig::default();
    config.retriever.min_sources = 30;
    config.retriever.max_sources = 20;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn unknown_llm_provider_is_rejected() {
    let mut config = AppConfig::default();
    config.llm.provider = "local".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn similarity_outside_unit_interval_is_rejected() {
    let mut config = AppConfig::default();
    config.evidence.min_similarity = 1.5;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn negative_weight_is_rejected() {
    let mut config = AppConfig::default();
    config.retriever.weight_embed = -0.1;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}
