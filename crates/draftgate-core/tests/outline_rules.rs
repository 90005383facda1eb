// crates/draftgate-core/tests/outline_rules.rs
// ============================================================================
// Module: Outline Rule Tests
// Description: Tests for outline normalization and structural validation.
// ============================================================================
//! ## Overview
//! Validates canonical intro/conclusion ids, contiguous ordering, and the
//! per-section content rules.

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

use draftgate_core::Outline;
use draftgate_core::OutlineSection;
use draftgate_core::normalize_outline;
use draftgate_core::section_count_bounds;
use draftgate_core::validate_outline;

/// Builds a section with valid content fields.
fn section(section_id: &str, title: &str, order: u32) -> OutlineSection {
    OutlineSection {
        section_id: section_id.to_string(),
        title: title.to_string(),
        goal: "This section frames the topic. It then sets expectations.".to_string(),
        key_points: (0 .. 6).map(|n| format!("point {n}")).collect(),
        suggested_evidence_themes: vec!["memory".to_string()],
        section_order: order,
    }
}

/// Builds a valid four-section outline.
fn valid_outline() -> Outline {
    Outline {
        sections: vec![
            section("intro", "Introduction", 1),
            section("mechanisms", "Mechanisms", 2),
            section("findings", "Findings", 3),
            section("conclusion", "Conclusion", 4),
        ],
    }
}

#[test]
fn bounds_shrink_for_thin_source_sets() {
    assert_eq!(section_count_bounds(3), (4, 6));
    assert_eq!(section_count_bounds(9), (4, 6));
    assert_eq!(section_count_bounds(10), (6, 10));
}

#[test]
fn valid_outline_passes() {
    assert!(validate_outline(&valid_outline(), 5).is_empty());
}

#[test]
fn normalization_canonicalizes_ids_and_orders() {
    let mut outline = valid_outline();
    outline.sections[0].section_id = "Introduction".to_string();
    outline.sections[3].section_id = "summary".to_string();
    outline.sections[3].title = "Conclusion".to_string();
    outline.sections[1].section_order = 20;
    outline.sections[2].section_order = 10;

    let normalized = normalize_outline(&outline);
    assert_eq!(normalized.sections[0].section_id, "intro");
    assert_eq!(normalized.sections[3].section_id, "conclusion");
    // Re-sorted by order, then renumbered 1..N.
    assert_eq!(normalized.sections[1].section_id, "findings");
    let orders: Vec<u32> = normalized.sections.iter().map(|s| s.section_order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
}

#[test]
fn three_sections_violate_lower_bound() {
    let outline = Outline {
        sections: vec![
            section("intro", "Introduction", 1),
            section("middle", "Middle", 2),
            section("conclusion", "Conclusion", 3),
        ],
    };
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("section count")), "{errors:?}");
    assert!(errors.iter().any(|err| err.contains("middle sections")), "{errors:?}");
}

#[test]
fn misplaced_intro_is_reported() {
    let outline = Outline {
        sections: vec![
            section("background", "Background", 1),
            section("mechanisms", "Mechanisms", 2),
            section("findings", "Findings", 3),
            section("conclusion", "Conclusion", 4),
        ],
    };
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("Introduction must be the first")));
}

#[test]
fn duplicate_titles_are_reported() {
    let mut outline = valid_outline();
    outline.sections[2].title = "Mechanisms".to_string();
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("titles must be unique")));
}

#[test]
fn one_sentence_goal_is_reported() {
    let mut outline = valid_outline();
    outline.sections[1].goal = "Only one sentence here.".to_string();
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("2 to 3 sentences")));
}

#[test]
fn key_point_bounds_are_reported() {
    let mut outline = valid_outline();
    outline.sections[1].key_points.truncate(2);
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("6 to 10 key_points")));
}

#[test]
fn noncontiguous_orders_are_reported() {
    let mut outline = valid_outline();
    outline.sections[2].section_order = 7;
    let errors = validate_outline(&outline, 5);
    assert!(errors.iter().any(|err| err.contains("consecutive starting at 1")));
}
