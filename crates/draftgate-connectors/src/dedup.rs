// crates/draftgate-connectors/src/dedup.rs
// ============================================================================
// Module: Source Deduplication
// Description: Cross-connector dedup by canonical identifier.
// Purpose: Collapse the fan-out into one record per underlying work.
// Dependencies: draftgate-core
// ============================================================================

//! ## Overview
//! Connector fan-out retrieves the same work through different routes; the
//! canonical identifier (DOI first, then arXiv, OpenAlex, URL) collapses
//! them. Merging prefers more complete fields, keeps the maximum citation
//! count, and lets the preferred connector win ties on scalar fields.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::RetrievedSource;
use serde_json::Value;

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Counters describing one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Sources examined.
    pub input_count: usize,
    /// Distinct sources kept.
    pub kept_count: usize,
    /// Duplicates merged away.
    pub merged_count: usize,
}

// ============================================================================
// SECTION: Deduplication
// ============================================================================

/// Deduplicates sources by canonical identifier, merging metadata.
///
/// Input order is preserved for first occurrences. `prefer_connector` wins
/// scalar-field ties when both records carry a value.
#[must_use]
pub fn deduplicate_sources(
    sources: Vec<RetrievedSource>,
    prefer_connector: &str,
) -> (Vec<RetrievedSource>, DedupStats) {
    let mut stats = DedupStats {
        input_count: sources.len(),
        ..DedupStats::default()
    };
    let mut order: Vec<String> = Vec::new();
    let mut by_canonical: BTreeMap<String, RetrievedSource> = BTreeMap::new();

    for source in sources {
        let key = source.canonical_id.to_canonical_string();
        if key.is_empty() {
            // No identifier at all; keep the record under its title.
            let fallback = format!("title:{}", source.title.trim().to_lowercase());
            if by_canonical.contains_key(&fallback) {
                stats.merged_count += 1;
                continue;
            }
            order.push(fallback.clone());
            by_canonical.insert(fallback, source);
            continue;
        }
        match by_canonical.remove(&key) {
            Some(existing) => {
                stats.merged_count += 1;
                let merged = merge_sources(existing, source, prefer_connector);
                by_canonical.insert(key, merged);
            }
            None => {
                order.push(key.clone());
                by_canonical.insert(key, source);
            }
        }
    }

    let mut kept = Vec::with_capacity(order.len());
    for key in order {
        if let Some(source) = by_canonical.remove(&key) {
            kept.push(source);
        }
    }
    stats.kept_count = kept.len();
    (kept, stats)
}

/// Merges a duplicate into the kept record.
fn merge_sources(
    kept: RetrievedSource,
    incoming: RetrievedSource,
    prefer_connector: &str,
) -> RetrievedSource {
    let (mut base, other) = if incoming.connector == prefer_connector
        && kept.connector != prefer_connector
    {
        (incoming, kept)
    } else {
        (kept, incoming)
    };

    if base.abstract_text.as_deref().unwrap_or("").trim().is_empty() {
        base.abstract_text = other.abstract_text;
    }
    if base.authors.is_empty() {
        base.authors = other.authors;
    }
    base.year = base.year.or(other.year);
    base.venue = base.venue.or(other.venue);
    base.url = base.url.or(other.url);
    base.pdf_url = base.pdf_url.or(other.pdf_url);
    base.citations_count = match (base.citations_count, other.citations_count) {
        (Some(left), Some(right)) => Some(left.max(right)),
        (left, right) => left.or(right),
    };
    base.canonical_id.doi = base.canonical_id.doi.or(other.canonical_id.doi);
    base.canonical_id.arxiv_id = base.canonical_id.arxiv_id.or(other.canonical_id.arxiv_id);
    base.canonical_id.openalex_id =
        base.canonical_id.openalex_id.or(other.canonical_id.openalex_id);
    base.canonical_id.url = base.canonical_id.url.or(other.canonical_id.url);

    if let (Value::Object(base_map), Value::Object(other_map)) =
        (&mut base.extra_metadata, other.extra_metadata)
    {
        for (key, value) in other_map {
            base_map.entry(key).or_insert(value);
        }
    }
    base
}
