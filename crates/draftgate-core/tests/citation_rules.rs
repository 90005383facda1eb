// crates/draftgate-core/tests/citation_rules.rs
// ============================================================================
// Module: Citation Rule Tests
// Description: Tests for citation token parsing, resolution, and placement.
// ============================================================================
//! ## Overview
//! Validates the citation grammar the writer, evaluator, and repair stages
//! all gate on: pack membership, unique-prefix resolution, and sentence-end
//! placement.

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

use std::collections::BTreeSet;

use draftgate_core::core::text::TextRuleError;
use draftgate_core::core::text::citations_at_sentence_end;
use draftgate_core::core::text::extract_citation_ids;
use draftgate_core::core::text::resolve_citation_ids;
use draftgate_core::core::text::split_sentences;
use draftgate_core::core::text::strip_citations;
use draftgate_core::core::text::validate_micro_summary;
use draftgate_core::core::text::validate_repair_summary;
use draftgate_core::core::text::validate_section_length;
use draftgate_core::core::text::validate_section_text;
use draftgate_core::core::text::word_count;

/// Builds an allowed-id set from string literals.
fn pack(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}

#[test]
fn extracts_tokens_in_reading_order() {
    let text = "Sleep consolidates memory. [CITE:aaa111] More findings follow [CITE:bbb222].";
    assert_eq!(extract_citation_ids(text), vec!["aaa111".to_string(), "bbb222".to_string()]);
}

#[test]
fn malformed_tokens_are_ignored() {
    assert!(extract_citation_ids("open token [CITE:abc").is_empty());
    assert!(extract_citation_ids("bad chars [CITE:XYZ!]").is_empty());
}

#[test]
fn sentence_splitting_matches_issue_indexing() {
    let text = "First claim. Second claim! Third question? Tail without punctuation";
    let sentences = split_sentences(text);
    assert_eq!(sentences.len(), 4);
    assert_eq!(sentences[2], "Third question?");
}

#[test]
fn placement_accepts_trailing_cluster() {
    assert!(citations_at_sentence_end("Sleep helps memory. [CITE:aaa111] [CITE:bbb222]"));
    assert!(citations_at_sentence_end("Sleep helps memory [CITE:aaa111]."));
}

#[test]
fn placement_rejects_interior_tokens() {
    assert!(!citations_at_sentence_end("Sleep [CITE:aaa111] helps memory."));
    assert!(!citations_at_sentence_end(
        "Sleep [CITE:aaa111] helps memory, and so does rest [CITE:bbb222]."
    ));
}

#[test]
fn unique_prefix_rewrites_to_full_id() {
    let allowed = pack(&["deadbeef01", "cafe0002"]);
    let resolved = resolve_citation_ids("Claim holds. [CITE:dead]", &allowed);
    assert!(resolved.invalid.is_empty());
    assert!(resolved.text.contains("[CITE:deadbeef01]"));
}

#[test]
fn ambiguous_prefix_is_invalid() {
    let allowed = pack(&["deadbeef01", "deadbeef02"]);
    let resolved = resolve_citation_ids("Claim holds. [CITE:deadbeef0]", &allowed);
    assert_eq!(resolved.invalid, vec!["deadbeef0".to_string()]);
}

#[test]
fn validate_section_text_rejects_out_of_pack_citation() {
    let allowed = pack(&["aaa111"]);
    let result = validate_section_text("A strong claim. [CITE:bbb222]", &allowed);
    assert_eq!(
        result,
        Err(TextRuleError::CitesOutsidePack {
            ids: vec!["bbb222".to_string()],
        })
    );
}

#[test]
fn validate_section_text_rejects_interior_citation() {
    let allowed = pack(&["aaa111"]);
    let result = validate_section_text("A claim [CITE:aaa111] sits mid-sentence here.", &allowed);
    assert_eq!(result, Err(TextRuleError::CitationNotAtEnd));
}

#[test]
fn word_count_boundary_matches_minimum_rule() {
    let words_49: String = (0 .. 49).map(|n| format!("word{n} ")).collect();
    let words_50: String = (0 .. 50).map(|n| format!("word{n} ")).collect();
    assert_eq!(word_count(&words_49), 49);
    assert!(matches!(
        validate_section_length(&words_49, 50),
        Err(TextRuleError::SectionTooShort {
            min_words: 50,
            words: 49,
        })
    ));
    assert!(validate_section_length(&words_50, 50).is_ok());
}

#[test]
fn micro_summary_accepts_one_to_three_sentences() {
    assert!(validate_micro_summary("One clear line.").is_ok());
    assert!(validate_micro_summary("One. Two. Three.").is_ok());
    assert!(matches!(
        validate_micro_summary("One. Two. Three. Four."),
        Err(TextRuleError::SummarySentenceCount {
            count: 4,
        })
    ));
}

#[test]
fn micro_summary_rejects_citations_and_loose_tails() {
    assert_eq!(
        validate_micro_summary("A line. [CITE:aaa111]"),
        Err(TextRuleError::SummaryHasCitations)
    );
    assert_eq!(
        validate_micro_summary("No punctuation at the end"),
        Err(TextRuleError::SummaryMissingPunctuation)
    );
}

#[test]
fn repair_summary_requires_exactly_two_lines() {
    assert!(validate_repair_summary("Line one holds.\nLine two holds.").is_ok());
    assert!(matches!(
        validate_repair_summary("Only one line."),
        Err(TextRuleError::SummaryLineCount {
            count: 1,
        })
    ));
}

#[test]
fn strip_citations_normalizes_whitespace_and_punctuation() {
    let stripped = strip_citations("Memory improves with sleep [CITE:aaa111]");
    assert_eq!(stripped, "Memory improves with sleep.");
    let stripped = strip_citations("Claim one. [CITE:aaa111] Claim two. [CITE:bbb222]");
    assert_eq!(stripped, "Claim one. Claim two.");
}
