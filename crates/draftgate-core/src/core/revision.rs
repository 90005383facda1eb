// crates/draftgate-core/src/core/revision.rs
// ============================================================================
// Module: Draftgate Revision Rules
// Description: Scope validation and mechanical edits for section repair.
// Purpose: Keep repairs confined to the sentences the evaluator flagged.
// Dependencies: serde, thiserror, crate::core::text
// ============================================================================

//! ## Overview
//! Repair may only touch the sentences named by review issues, and the
//! continuity patch may only touch the first two sentences of the next
//! section. Everything else must survive byte-identical. The validators here
//! compare sentence lists produced by the shared splitter so their indexes
//! line up with review issues.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::text::split_sentences;
use crate::core::text::strip_citations;
use crate::core::text::summary_from_text;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Violations of the repair scope rules.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevisionError {
    /// The revision changed text although no issues were provided.
    #[error("no issues provided but revised text differs")]
    NoIssuesButChanged,
    /// A sentence outside the issue indexes was modified.
    #[error("non-issue sentence was modified during repair")]
    NonIssueModified,
    /// A sentence outside the issue indexes was removed.
    #[error("revised text removed non-issue sentences")]
    NonIssueRemoved,
    /// The revision added sentences beyond the issue scope.
    #[error("revised text added new sentences outside issue scope")]
    SentencesAdded,
    /// The next section is too short to receive a continuity patch.
    #[error("next section must have at least two sentences to patch")]
    NextSectionTooShort,
    /// The continuity patch modified text beyond the first two sentences.
    #[error("next section text beyond the first two sentences was modified")]
    NextSectionTailModified,
}

// ============================================================================
// SECTION: Edit Records
// ============================================================================

/// One sentence-level edit recorded by a repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceEdit {
    /// Zero-based index of the edited sentence in the original text.
    pub sentence_index: usize,
    /// Sentence text before the edit.
    pub before: String,
    /// Sentence text after the edit; empty for removals.
    pub after: String,
    /// Edit classification, e.g. `remove` or `rewrite`.
    pub change_type: String,
}

/// Continuity patch record for the next section's opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityPatch {
    /// Section that received the patch.
    pub next_section_id: String,
    /// Original first two sentences, joined.
    pub before_first_two_sentences: String,
    /// Patched first two sentences, joined.
    pub after_first_two_sentences: String,
}

// ============================================================================
// SECTION: Scope Validation
// ============================================================================

/// Validates that a revision only touched issue-indexed sentences.
///
/// Issue sentences may be rewritten or removed; every other sentence must
/// appear byte-identical and in order, and no new sentences may be added.
///
/// # Errors
///
/// Returns [`RevisionError`] describing the first scope violation found.
pub fn validate_repair_scope(
    original_text: &str,
    revised_text: &str,
    issue_indices: &BTreeSet<usize>,
) -> Result<(), RevisionError> {
    if issue_indices.is_empty() {
        if original_text.trim() == revised_text.trim() {
            return Ok(());
        }
        return Err(RevisionError::NoIssuesButChanged);
    }

    let original = split_sentences(original_text);
    let revised = split_sentences(revised_text);

    let mut i = 0_usize;
    let mut j = 0_usize;
    while i < original.len() && j < revised.len() {
        if issue_indices.contains(&i) {
            if revised[j] == original[i] {
                i += 1;
                j += 1;
                continue;
            }
            // The issue sentence may have been removed; resync on the next
            // non-issue sentence when the revision already shows it.
            let mut next_non_issue = i + 1;
            while next_non_issue < original.len() && issue_indices.contains(&next_non_issue) {
                next_non_issue += 1;
            }
            if next_non_issue < original.len() && revised[j] == original[next_non_issue] {
                i = next_non_issue;
                continue;
            }
            i += 1;
            j += 1;
            continue;
        }
        if revised[j] != original[i] {
            return Err(RevisionError::NonIssueModified);
        }
        i += 1;
        j += 1;
    }

    if i < original.len() {
        let remaining_non_issue =
            (i .. original.len()).any(|index| !issue_indices.contains(&index));
        if remaining_non_issue {
            return Err(RevisionError::NonIssueRemoved);
        }
    }
    if j < revised.len() {
        return Err(RevisionError::SentencesAdded);
    }
    Ok(())
}

/// Validates a continuity patch against the next section's original text.
///
/// Both texts need at least two sentences, and every sentence past index 1
/// must be byte-identical to the original.
///
/// # Errors
///
/// Returns [`RevisionError`] when the section is too short or the tail was
/// modified.
pub fn validate_next_section_patch(
    original_text: &str,
    patched_text: &str,
) -> Result<(), RevisionError> {
    let original = split_sentences(original_text);
    let patched = split_sentences(patched_text);
    if original.len() < 2 || patched.len() < 2 {
        return Err(RevisionError::NextSectionTooShort);
    }
    if original[2 ..] != patched[2 ..] {
        return Err(RevisionError::NextSectionTailModified);
    }
    Ok(())
}

// ============================================================================
// SECTION: Mechanical Edits
// ============================================================================

/// Removes every issue-indexed sentence, recording the edits.
///
/// Used when a section has no evidence pack and an LLM repair would have
/// nothing to cite.
#[must_use]
pub fn remove_issue_sentences(
    text: &str,
    issue_indices: &BTreeSet<usize>,
) -> (String, Vec<SentenceEdit>) {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return (text.to_string(), Vec::new());
    }
    let mut edits = Vec::new();
    let mut kept = Vec::new();
    for (index, sentence) in sentences.into_iter().enumerate() {
        if issue_indices.contains(&index) {
            edits.push(SentenceEdit {
                sentence_index: index,
                before: sentence,
                after: String::new(),
                change_type: "remove".to_string(),
            });
            continue;
        }
        kept.push(sentence);
    }
    (kept.join(" ").trim().to_string(), edits)
}

/// Replaces the next section's first two sentences with narrative
/// transitions derived from the revised summary.
///
/// Returns the patched text, a fresh two-line summary for the patched
/// section, and the patch record.
///
/// # Errors
///
/// Returns [`RevisionError::NextSectionTooShort`] when the section has fewer
/// than two sentences.
pub fn patch_next_section_narrative(
    next_section_id: &str,
    next_section_text: &str,
    revised_summary: &str,
    next_section_title: &str,
) -> Result<(String, String, ContinuityPatch), RevisionError> {
    let sentences = split_sentences(next_section_text);
    if sentences.len() < 2 {
        return Err(RevisionError::NextSectionTooShort);
    }
    let summary_line = revised_summary.lines().next().unwrap_or("the prior section").trim();
    let lead = if summary_line.is_empty() {
        "the prior section".to_string()
    } else {
        strip_citations(summary_line).to_lowercase().trim_end_matches(['.', '!', '?']).to_string()
    };
    let first_sentence =
        format!("Building on {lead}, this section transitions into {next_section_title}.");
    let second_sentence =
        "The following discussion connects the earlier summary to the next set of evidence."
            .to_string();

    let mut patched = vec![first_sentence.clone(), second_sentence.clone()];
    patched.extend(sentences[2 ..].iter().cloned());
    let patched_text = patched.join(" ").trim().to_string();
    let patch = ContinuityPatch {
        next_section_id: next_section_id.to_string(),
        before_first_two_sentences: sentences[.. 2].join(" "),
        after_first_two_sentences: format!("{first_sentence} {second_sentence}"),
    };
    let patched_summary = summary_from_text(&patched_text);
    Ok((patched_text, patched_summary, patch))
}
