// crates/draftgate-core/src/core/outline.rs
// ============================================================================
// Module: Draftgate Outline Model
// Description: Outline shape, normalization, and structural validation.
// Purpose: Gate LLM outlines on hard structural constraints.
// Dependencies: serde, crate::core::text
// ============================================================================

//! ## Overview
//! The outline is the contract between planning and drafting: its section
//! ids key every downstream table. Normalization canonicalizes ids and
//! ordering; validation returns the full list of violated rules so a single
//! correction call can present them all to the model at once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::text::split_sentences;

// ============================================================================
// SECTION: Outline Shape
// ============================================================================

/// One planned report section.
///
/// # Invariants
/// - After normalization, `section_order` values are 1..N in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    /// Section identifier slug.
    pub section_id: String,
    /// Section title, unique within the outline.
    pub title: String,
    /// Two to three sentence statement of the section's goal.
    pub goal: String,
    /// Key points the section must cover.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Themes the evidence pack should search for.
    #[serde(default)]
    pub suggested_evidence_themes: Vec<String>,
    /// One-based position in the outline.
    pub section_order: u32,
}

/// A full report outline.
///
/// # Invariants
/// - Valid outlines open with `intro` and close with `conclusion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    /// Planned sections in order.
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    /// Looks up a section by id.
    #[must_use]
    pub fn section(&self, section_id: &str) -> Option<&OutlineSection> {
        self.sections.iter().find(|section| section.section_id == section_id)
    }

    /// Returns section ids in outline order.
    #[must_use]
    pub fn ordered_ids(&self) -> Vec<String> {
        let mut sections: Vec<&OutlineSection> = self.sections.iter().collect();
        sections.sort_by_key(|section| section.section_order);
        sections.into_iter().map(|section| section.section_id.clone()).collect()
    }
}

// ============================================================================
// SECTION: Bounds
// ============================================================================

/// Returns the allowed section count range for a given source count.
///
/// Thin source sets get shorter reports.
#[must_use]
pub const fn section_count_bounds(source_count: usize) -> (usize, usize) {
    if source_count < 10 {
        (4, 6)
    } else {
        (6, 10)
    }
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Trims a string list and drops empty entries.
fn normalize_str_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Canonicalizes an outline in place of the raw LLM payload.
///
/// Lowercases and trims section ids, maps introduction/conclusion aliases to
/// the canonical `intro`/`conclusion` slugs, sorts by `section_order`, and
/// renumbers orders to a contiguous 1..N sequence.
#[must_use]
pub fn normalize_outline(outline: &Outline) -> Outline {
    let mut sections: Vec<OutlineSection> = outline
        .sections
        .iter()
        .map(|section| {
            let mut section_id = section.section_id.trim().to_lowercase();
            let title = section.title.trim().to_string();
            let title_lower = title.to_lowercase();
            if section_id == "introduction" || section_id == "intro" || title_lower == "introduction"
            {
                section_id = "intro".to_string();
            }
            if section_id == "summary" || section_id == "conclusion" || title_lower == "conclusion"
            {
                section_id = "conclusion".to_string();
            }
            OutlineSection {
                section_id,
                title,
                goal: section.goal.trim().to_string(),
                key_points: normalize_str_list(&section.key_points),
                suggested_evidence_themes: normalize_str_list(&section.suggested_evidence_themes),
                section_order: section.section_order,
            }
        })
        .collect();

    if sections.is_empty() {
        return Outline {
            sections,
        };
    }

    sections.sort_by_key(|section| section.section_order);
    for (index, section) in sections.iter_mut().enumerate() {
        section.section_order = u32::try_from(index + 1).unwrap_or(u32::MAX);
    }
    Outline {
        sections,
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates outline structure, returning every violated rule.
///
/// The returned strings are sent back to the model verbatim as correction
/// instructions, so each one states the rule rather than the observation.
#[must_use]
pub fn validate_outline(outline: &Outline, source_count: usize) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();
    let sections = &outline.sections;
    if sections.is_empty() {
        return vec!["Outline must include sections.".to_string()];
    }

    let (min_sections, max_sections) = section_count_bounds(source_count);
    if sections.len() < min_sections || sections.len() > max_sections {
        errors.push("Outline section count is outside required bounds.".to_string());
    }

    let orders: Vec<u32> = sections.iter().map(|section| section.section_order).collect();
    let expected: Vec<u32> =
        (1 ..= sections.len()).map(|order| u32::try_from(order).unwrap_or(u32::MAX)).collect();
    let mut sorted_orders = orders.clone();
    sorted_orders.sort_unstable();
    if sorted_orders != expected {
        errors.push("section_order values must be consecutive starting at 1.".to_string());
    }
    if orders != expected {
        errors.push("Sections must be ordered by section_order.".to_string());
    }

    let first = &sections[0];
    let last = &sections[sections.len() - 1];
    if first.section_id != "intro" || first.title.trim().to_lowercase() != "introduction" {
        errors.push(
            "Introduction must be the first section with section_id=\"intro\".".to_string(),
        );
    }
    if last.section_id != "conclusion" || last.title.trim().to_lowercase() != "conclusion" {
        errors.push(
            "Conclusion must be the last section with section_id=\"conclusion\".".to_string(),
        );
    }
    if sections.len() < 4 {
        errors.push("Outline must include at least two middle sections.".to_string());
    }

    let titles: BTreeSet<String> =
        sections.iter().map(|section| section.title.trim().to_lowercase()).collect();
    if titles.len() != sections.len() {
        errors.push("Section titles must be unique.".to_string());
    }
    let ids: BTreeSet<&str> =
        sections.iter().map(|section| section.section_id.as_str()).collect();
    if ids.len() != sections.len() {
        errors.push("Section IDs must be unique.".to_string());
    }

    for section in sections {
        if section.goal.trim().is_empty() {
            errors.push("Each section must include a non-empty goal.".to_string());
        }
        let sentence_count = split_sentences(&section.goal).len();
        if !(2 ..= 3).contains(&sentence_count) {
            errors.push("Each section goal must be 2 to 3 sentences.".to_string());
        }
        if section.key_points.len() < 6 || section.key_points.len() > 10 {
            errors.push("Each section must include 6 to 10 key_points.".to_string());
        }
        if section.suggested_evidence_themes.is_empty() {
            errors.push("Each section must include suggested_evidence_themes.".to_string());
        }
    }
    errors
}
