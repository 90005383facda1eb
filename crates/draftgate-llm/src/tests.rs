// crates/draftgate-llm/src/tests.rs
// ============================================================================
// Module: LLM Crate Tests
// Description: Tests for completion payload extraction.
// ============================================================================
//! ## Overview
//! Validates fence stripping, brace-span recovery, and rejection of
//! unparseable completions.

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

use serde_json::json;

use crate::payload::extract_json_payload;

#[test]
fn plain_json_parses_directly() {
    let payload = extract_json_payload(r#"{"queries": []}"#).unwrap();
    assert_eq!(payload, json!({ "queries": [] }));
}

#[test]
fn fenced_json_is_unwrapped() {
    let fenced = "```json\n{\"verdict\": \"pass\"}\n```";
    assert_eq!(extract_json_payload(fenced), Some(json!({ "verdict": "pass" })));
}

#[test]
fn leading_prose_is_skipped_via_brace_span() {
    let noisy = "Here is the outline you asked for:\n{\"sections\": [1, 2]}\nHope that helps!";
    assert_eq!(extract_json_payload(noisy), Some(json!({ "sections": [1, 2] })));
}

#[test]
fn arrays_are_supported() {
    let noisy = "result: [\"a\", \"b\"] done";
    assert_eq!(extract_json_payload(noisy), Some(json!(["a", "b"])));
}

#[test]
fn unparseable_text_returns_none() {
    assert_eq!(extract_json_payload("no structure here"), None);
    assert_eq!(extract_json_payload(""), None);
    assert_eq!(extract_json_payload("{broken"), None);
}
