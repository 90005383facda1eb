// crates/draftgate-core/src/core/text.rs
// ============================================================================
// Module: Draftgate Text Rules
// Description: Sentence splitting, citation tokens, and summary rules.
// Purpose: Gate drafted text on strict citation grounding and placement.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Pure text validators for LLM output. The citation token grammar is the
//! literal string `[CITE:<snippet_id>]` where the id is lowercase hex with
//! optional dashes. Sentences end at `.`, `!`, or `?` followed by
//! whitespace, which is also how sentence indexes in review issues are
//! counted, so every consumer of indexes must split with the same function.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Violations of the drafted-text rules.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextRuleError {
    /// Text cites snippet ids outside the section's evidence pack.
    #[error("section cites snippets not in evidence pack: {ids:?}")]
    CitesOutsidePack {
        /// Offending snippet ids in sorted order.
        ids: Vec<String>,
    },
    /// A cited sentence carries tokens away from the sentence end.
    #[error("citations must appear only at the end of each cited sentence")]
    CitationNotAtEnd,
    /// The micro-summary is empty.
    #[error("section summary is empty")]
    SummaryEmpty,
    /// The micro-summary has the wrong sentence count.
    #[error("section summary must be 1 to 3 sentences, got {count}")]
    SummarySentenceCount {
        /// Observed sentence count.
        count: usize,
    },
    /// The repaired-summary line count is wrong.
    #[error("section summary must be exactly 2 non-empty lines, got {count}")]
    SummaryLineCount {
        /// Observed line count.
        count: usize,
    },
    /// The micro-summary contains citation tokens.
    #[error("section summary must not include citations")]
    SummaryHasCitations,
    /// A summary sentence lacks terminal punctuation.
    #[error("each summary sentence must end with terminal punctuation")]
    SummaryMissingPunctuation,
    /// The section body is shorter than the configured minimum.
    #[error("section length must be at least {min_words} words, got {words}")]
    SectionTooShort {
        /// Configured minimum word count.
        min_words: usize,
        /// Observed word count.
        words: usize,
    },
}

// ============================================================================
// SECTION: Sentence Splitting
// ============================================================================

/// Returns true for sentence-terminal punctuation.
const fn is_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// Splits text into trimmed sentences.
///
/// A sentence boundary is a run of whitespace immediately preceded by
/// terminal punctuation. Indexes into the returned vector are the sentence
/// indexes used by review issues and repair scopes.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut prev_non_ws_terminal = false;
    for ch in cleaned.chars() {
        if ch.is_whitespace() {
            if prev_non_ws_terminal {
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
                prev_non_ws_terminal = false;
                continue;
            }
            current.push(ch);
            continue;
        }
        prev_non_ws_terminal = is_terminal(ch);
        current.push(ch);
    }
    let sentence = current.trim().to_string();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
    sentences
}

/// Counts words as maximal alphanumeric runs, allowing interior apostrophes.
#[must_use]
pub fn word_count(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0_usize;
    let mut in_word = false;
    for (index, ch) in chars.iter().enumerate() {
        let alnum = ch.is_ascii_alphanumeric();
        let joining_apostrophe = *ch == '\''
            && in_word
            && chars.get(index + 1).is_some_and(char::is_ascii_alphanumeric);
        if alnum || joining_apostrophe {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

// ============================================================================
// SECTION: Citation Tokens
// ============================================================================

/// Opening marker of a citation token.
const CITE_OPEN: &str = "[CITE:";

/// Returns true for characters permitted inside a citation id.
const fn is_cite_id_char(ch: char) -> bool {
    matches!(ch, '0'..='9' | 'a'..='f' | '-')
}

/// One citation token found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationToken {
    /// Byte offset of the opening bracket.
    pub start: usize,
    /// Byte offset one past the closing bracket.
    pub end: usize,
    /// Snippet id carried by the token.
    pub snippet_id: String,
}

/// Finds every well-formed citation token in reading order.
#[must_use]
pub fn find_citation_tokens(text: &str) -> Vec<CitationToken> {
    let mut tokens = Vec::new();
    let mut search_from = 0_usize;
    while let Some(found) = text[search_from ..].find(CITE_OPEN) {
        let start = search_from + found;
        let id_start = start + CITE_OPEN.len();
        let rest = &text[id_start ..];
        let id_len = rest.chars().take_while(|ch| is_cite_id_char(*ch)).count();
        let id_end = id_start + id_len;
        if id_len > 0 && text[id_end ..].starts_with(']') {
            tokens.push(CitationToken {
                start,
                end: id_end + 1,
                snippet_id: text[id_start .. id_end].to_string(),
            });
            search_from = id_end + 1;
        } else {
            search_from = id_start;
        }
    }
    tokens
}

/// Extracts the snippet ids of every citation token in reading order.
#[must_use]
pub fn extract_citation_ids(text: &str) -> Vec<String> {
    find_citation_tokens(text).into_iter().map(|token| token.snippet_id).collect()
}

/// Checks that every citation token in a sentence sits in one trailing
/// cluster, optionally after a single terminal punctuation mark.
#[must_use]
pub fn citations_at_sentence_end(sentence: &str) -> bool {
    let mut cleaned = sentence.trim();
    if cleaned.is_empty() {
        return true;
    }
    if cleaned.ends_with(|ch| is_terminal(ch)) {
        cleaned = cleaned[.. cleaned.len() - 1].trim_end();
    }
    let tokens = find_citation_tokens(cleaned);
    if tokens.is_empty() {
        return false;
    }
    // Walk the trailing token cluster backwards over interleaved whitespace.
    let mut tail_count = 0_usize;
    let mut cursor = cleaned.len();
    for token in tokens.iter().rev() {
        if cleaned[token.end .. cursor].trim().is_empty() {
            tail_count += 1;
            cursor = token.start;
        } else {
            break;
        }
    }
    tail_count == tokens.len() && tail_count > 0
}

/// Outcome of resolving citation ids against an evidence pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationResolution {
    /// Text with short unique prefixes rewritten to full snippet ids.
    pub text: String,
    /// Tokens that matched nothing or matched ambiguously.
    pub invalid: Vec<String>,
}

/// Resolves each citation token against the allowed snippet ids.
///
/// A token that is a short prefix uniquely matching one allowed id is
/// rewritten to the full id. Ambiguous or unknown tokens are reported and
/// left in place.
#[must_use]
pub fn resolve_citation_ids(text: &str, allowed: &BTreeSet<String>) -> CitationResolution {
    let lowered: BTreeMap<String, &String> =
        allowed.iter().map(|id| (id.to_lowercase(), id)).collect();
    let resolve = |cited: &str| -> Option<String> {
        let cited_lower = cited.to_lowercase();
        if let Some(full) = lowered.get(&cited_lower) {
            return Some((*full).clone());
        }
        let mut matches = lowered.iter().filter(|(lower, _)| lower.starts_with(&cited_lower));
        match (matches.next(), matches.next()) {
            (Some((_, full)), None) => Some((*full).clone()),
            _ => None,
        }
    };

    let tokens = find_citation_tokens(text);
    let mut rewritten = String::with_capacity(text.len());
    let mut invalid = Vec::new();
    let mut cursor = 0_usize;
    for token in tokens {
        rewritten.push_str(&text[cursor .. token.start]);
        match resolve(&token.snippet_id) {
            Some(full) => {
                rewritten.push_str(CITE_OPEN);
                rewritten.push_str(&full);
                rewritten.push(']');
            }
            None => {
                invalid.push(token.snippet_id.clone());
                rewritten.push_str(&text[token.start .. token.end]);
            }
        }
        cursor = token.end;
    }
    rewritten.push_str(&text[cursor ..]);
    CitationResolution {
        text: rewritten,
        invalid,
    }
}

/// Validates a drafted section body against its evidence pack.
///
/// Resolves short citation prefixes, rejects citations outside the pack,
/// and enforces sentence-end placement for every cited sentence.
///
/// # Errors
///
/// Returns [`TextRuleError`] when a citation is outside the pack or a cited
/// sentence carries tokens away from its end.
pub fn validate_section_text(
    text: &str,
    allowed: &BTreeSet<String>,
) -> Result<String, TextRuleError> {
    let resolution = resolve_citation_ids(text, allowed);
    if !resolution.invalid.is_empty() {
        let mut ids: Vec<String> = resolution
            .invalid
            .into_iter()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        ids.sort();
        return Err(TextRuleError::CitesOutsidePack {
            ids,
        });
    }
    for sentence in split_sentences(&resolution.text) {
        if !sentence.contains(CITE_OPEN) {
            continue;
        }
        if !citations_at_sentence_end(&sentence) {
            return Err(TextRuleError::CitationNotAtEnd);
        }
    }
    Ok(resolution.text)
}

/// Enforces the configured minimum word count on a section body.
///
/// # Errors
///
/// Returns [`TextRuleError::SectionTooShort`] when the body is shorter than
/// `min_words`. A zero minimum disables the check.
pub fn validate_section_length(text: &str, min_words: usize) -> Result<(), TextRuleError> {
    if min_words == 0 {
        return Ok(());
    }
    let words = word_count(text);
    if words < min_words {
        return Err(TextRuleError::SectionTooShort {
            min_words,
            words,
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Micro-Summaries
// ============================================================================

/// Validates a writer micro-summary: 1 to 3 citation-free sentences, each
/// ending with terminal punctuation.
///
/// # Errors
///
/// Returns [`TextRuleError`] for empty summaries, citation tokens, bad
/// sentence counts, or missing punctuation.
pub fn validate_micro_summary(summary: &str) -> Result<(), TextRuleError> {
    let cleaned = summary.trim();
    if cleaned.is_empty() {
        return Err(TextRuleError::SummaryEmpty);
    }
    if cleaned.contains(CITE_OPEN) {
        return Err(TextRuleError::SummaryHasCitations);
    }
    let sentences = split_sentences(cleaned);
    if sentences.is_empty() || sentences.len() > 3 {
        return Err(TextRuleError::SummarySentenceCount {
            count: sentences.len(),
        });
    }
    for sentence in &sentences {
        if !sentence.ends_with(|ch| is_terminal(ch)) {
            return Err(TextRuleError::SummaryMissingPunctuation);
        }
    }
    Ok(())
}

/// Validates a repaired micro-summary: exactly 2 non-empty citation-free
/// lines, each ending with terminal punctuation.
///
/// # Errors
///
/// Returns [`TextRuleError`] for empty summaries, citation tokens, bad line
/// counts, or missing punctuation.
pub fn validate_repair_summary(summary: &str) -> Result<(), TextRuleError> {
    let cleaned = summary.trim();
    if cleaned.is_empty() {
        return Err(TextRuleError::SummaryEmpty);
    }
    if cleaned.contains(CITE_OPEN) {
        return Err(TextRuleError::SummaryHasCitations);
    }
    let lines: Vec<&str> =
        cleaned.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    if lines.len() != 2 {
        return Err(TextRuleError::SummaryLineCount {
            count: lines.len(),
        });
    }
    for line in &lines {
        if !line.ends_with(|ch| is_terminal(ch)) {
            return Err(TextRuleError::SummaryMissingPunctuation);
        }
    }
    Ok(())
}

/// Removes citation tokens and normalizes the remaining whitespace, ensuring
/// the result ends with terminal punctuation.
#[must_use]
pub fn strip_citations(text: &str) -> String {
    let tokens = find_citation_tokens(text);
    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0_usize;
    for token in tokens {
        stripped.push_str(&text[cursor .. token.start]);
        cursor = token.end;
    }
    stripped.push_str(&text[cursor ..]);
    let collapsed: String = stripped.split_whitespace().collect::<Vec<&str>>().join(" ");
    let mut cleaned = collapsed.trim().to_string();
    if !cleaned.is_empty() && !cleaned.ends_with(|ch| is_terminal(ch)) {
        cleaned.push('.');
    }
    cleaned
}

/// Synthesizes a two-line repair summary from a section body.
///
/// Uses the first two sentences when available and fixed filler lines
/// otherwise, so the result always satisfies [`validate_repair_summary`].
#[must_use]
pub fn summary_from_text(text: &str) -> String {
    let sentences = split_sentences(text);
    let (line1, line2) = match sentences.as_slice() {
        [] => (
            "This section contains no supported factual statements.".to_string(),
            "Additional evidence is required to expand the analysis.".to_string(),
        ),
        [only] => (
            strip_citations(only),
            "This section remains limited by the available evidence.".to_string(),
        ),
        [first, second, ..] => (strip_citations(first), strip_citations(second)),
    };
    format!("{line1}\n{line2}")
}
