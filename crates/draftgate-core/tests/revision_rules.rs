// crates/draftgate-core/tests/revision_rules.rs
// ============================================================================
// Module: Revision Rule Tests
// Description: Tests for repair scope validation and mechanical edits.
// ============================================================================
//! ## Overview
//! Validates that repairs stay confined to flagged sentences and that the
//! continuity patch leaves the next section's tail byte-identical.

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

use draftgate_core::core::revision::RevisionError;
use draftgate_core::core::revision::patch_next_section_narrative;
use draftgate_core::core::revision::remove_issue_sentences;
use draftgate_core::core::revision::validate_next_section_patch;
use draftgate_core::core::revision::validate_repair_scope;
use draftgate_core::core::text::validate_repair_summary;

/// Builds an index set from literals.
fn indices(values: &[usize]) -> BTreeSet<usize> {
    values.iter().copied().collect()
}

const ORIGINAL: &str = "First stands. Second is weak. Third stands. Fourth stands.";

#[test]
fn rewriting_only_issue_sentences_passes() {
    let revised = "First stands. Second is now supported. Third stands. Fourth stands.";
    assert!(validate_repair_scope(ORIGINAL, revised, &indices(&[1])).is_ok());
}

#[test]
fn removing_an_issue_sentence_passes() {
    let revised = "First stands. Third stands. Fourth stands.";
    assert!(validate_repair_scope(ORIGINAL, revised, &indices(&[1])).is_ok());
}

#[test]
fn modifying_a_non_issue_sentence_fails() {
    let revised = "First stands. Second is weak. Third was altered. Fourth stands.";
    assert_eq!(
        validate_repair_scope(ORIGINAL, revised, &indices(&[1])),
        Err(RevisionError::NonIssueModified)
    );
}

#[test]
fn dropping_a_non_issue_sentence_fails() {
    let revised = "First stands. Second is weak. Third stands.";
    assert_eq!(
        validate_repair_scope(ORIGINAL, revised, &indices(&[1])),
        Err(RevisionError::NonIssueRemoved)
    );
}

#[test]
fn appending_sentences_fails() {
    let revised = "First stands. Second is weak. Third stands. Fourth stands. Fifth appears.";
    assert_eq!(
        validate_repair_scope(ORIGINAL, revised, &indices(&[1])),
        Err(RevisionError::SentencesAdded)
    );
}

#[test]
fn no_issues_requires_identical_text() {
    assert!(validate_repair_scope(ORIGINAL, ORIGINAL, &indices(&[])).is_ok());
    assert_eq!(
        validate_repair_scope(ORIGINAL, "Different text.", &indices(&[])),
        Err(RevisionError::NoIssuesButChanged)
    );
}

#[test]
fn mechanical_removal_records_edits() {
    let (revised, edits) = remove_issue_sentences(ORIGINAL, &indices(&[1, 3]));
    assert_eq!(revised, "First stands. Third stands.");
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].sentence_index, 1);
    assert_eq!(edits[0].change_type, "remove");
    assert!(edits[1].after.is_empty());
}

#[test]
fn next_section_patch_preserves_tail() {
    let next = "Old opening one. Old opening two. Body stays. Closing stays.";
    let (patched, summary, patch) =
        patch_next_section_narrative("findings", next, "Sleep aids recall.\nEffects persist.", "Findings")
            .unwrap();
    assert!(patched.contains("Body stays. Closing stays."));
    assert!(patch.after_first_two_sentences.starts_with("Building on sleep aids recall,"));
    assert!(validate_repair_summary(&summary).is_ok());
    assert!(validate_next_section_patch(next, &patched).is_ok());
}

#[test]
fn next_section_patch_rejects_modified_tail() {
    let next = "Old opening one. Old opening two. Body stays. Closing stays.";
    let patched = "New one. New two. Body changed. Closing stays.";
    assert_eq!(
        validate_next_section_patch(next, patched),
        Err(RevisionError::NextSectionTailModified)
    );
}

#[test]
fn short_next_section_cannot_be_patched() {
    assert_eq!(
        patch_next_section_narrative("findings", "Only one sentence.", "A.\nB.", "Findings")
            .map(|_| ()),
        Err(RevisionError::NextSectionTooShort)
    );
}
