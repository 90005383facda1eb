// crates/draftgate-pipeline/src/rank.rs
// ============================================================================
// Module: Retrieval Ranking
// Description: BM25 scoring, rerank weights, and diversity selection.
// Purpose: Order and select retrieved sources for a run.
// Dependencies: draftgate-core
// ============================================================================

//! ## Overview
//! Ranking runs over title plus abstract. BM25 supplies the lexical signal
//! per planned query; the best-scoring query also assigns each document its
//! intent. Embedding similarity, recency, and citation count contribute
//! through configurable weights, and the final selection caps per-intent
//! share to keep the source set diverse.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::RetrievedSource;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Intents the query plan may assign.
pub const ALLOWED_INTENTS: &[&str] =
    &["survey", "methods", "benchmarks", "failure modes", "future directions", "recent work"];

/// BM25 term-frequency saturation parameter.
const BM25_K1: f64 = 1.5;
/// BM25 length-normalization parameter.
const BM25_B: f64 = 0.75;

// ============================================================================
// SECTION: Tokenization
// ============================================================================

/// Tokenizes text into lowercase alphanumeric terms longer than two chars.
#[must_use]
pub fn bm25_tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buffer = String::new();
    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            buffer.push(ch);
            continue;
        }
        if buffer.len() > 2 {
            tokens.push(std::mem::take(&mut buffer));
        } else {
            buffer.clear();
        }
    }
    if buffer.len() > 2 {
        tokens.push(buffer);
    }
    tokens
}

/// Returns the text BM25 scores a source on.
#[must_use]
pub fn bm25_text(source: &RetrievedSource) -> String {
    let title = source.title.trim();
    let abstract_text = source.abstract_text.as_deref().unwrap_or("").trim();
    if !title.is_empty() && !abstract_text.is_empty() {
        return format!("{title}\n\n{abstract_text}");
    }
    if title.is_empty() { abstract_text.to_string() } else { title.to_string() }
}

// ============================================================================
// SECTION: Corpus Statistics
// ============================================================================

/// Precomputed per-document and corpus statistics for BM25.
pub struct Bm25Corpus {
    /// Term counts per document.
    doc_counts: Vec<BTreeMap<String, usize>>,
    /// Token counts per document.
    doc_lens: Vec<usize>,
    /// Average document length.
    avg_doc_len: f64,
    /// Document frequency per term.
    doc_freq: BTreeMap<String, usize>,
}

impl Bm25Corpus {
    /// Builds corpus statistics over the given documents.
    #[must_use]
    pub fn build(documents: &[String]) -> Self {
        let doc_tokens: Vec<Vec<String>> =
            documents.iter().map(|text| bm25_tokenize(text)).collect();
        let doc_counts: Vec<BTreeMap<String, usize>> = doc_tokens
            .iter()
            .map(|tokens| {
                let mut counts = BTreeMap::new();
                for token in tokens {
                    *counts.entry(token.clone()).or_insert(0) += 1;
                }
                counts
            })
            .collect();
        let doc_lens: Vec<usize> = doc_tokens.iter().map(Vec::len).collect();
        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = total as f64 / doc_lens.len().max(1) as f64;
        let mut doc_freq = BTreeMap::new();
        for counts in &doc_counts {
            for term in counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        Self {
            doc_counts,
            doc_lens,
            avg_doc_len,
            doc_freq,
        }
    }

    /// Returns the corpus size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_counts.len()
    }

    /// Returns true when the corpus holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_counts.is_empty()
    }

    /// Scores one document against tokenized query terms.
    #[must_use]
    pub fn score(&self, doc_index: usize, query_tokens: &[String]) -> f64 {
        let Some(counts) = self.doc_counts.get(doc_index) else {
            return 0.0;
        };
        let doc_len = self.doc_lens.get(doc_index).copied().unwrap_or(0);
        if query_tokens.is_empty() || doc_len == 0 {
            return 0.0;
        }
        let corpus_size = self.len() as f64;
        let denom_base =
            BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len as f64 / self.avg_doc_len.max(1.0)));
        let mut score = 0.0;
        let unique: std::collections::BTreeSet<&String> = query_tokens.iter().collect();
        for term in unique {
            let tf = counts.get(term).copied().unwrap_or(0);
            if tf == 0 {
                continue;
            }
            let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
            let idf = (1.0 + (corpus_size - df + 0.5) / (df + 0.5)).ln();
            score += idf * ((tf as f64 * (BM25_K1 + 1.0)) / (tf as f64 + denom_base));
        }
        score
    }
}

// ============================================================================
// SECTION: Auxiliary Signals
// ============================================================================

/// Recency signal: linear decay over ten years.
#[must_use]
pub fn recency_score(year: Option<i32>, current_year: i32) -> f64 {
    let Some(year) = year else {
        return 0.0;
    };
    let years_old = f64::from((current_year - year).max(0));
    (1.0 - years_old / 10.0).clamp(0.0, 1.0)
}

/// Citation signal: log-scaled and capped at one.
#[must_use]
pub fn citation_score(cited_by_count: Option<u64>) -> f64 {
    match cited_by_count {
        None | Some(0) => 0.0,
        Some(count) => ((count as f64 + 1.0).ln() / 10.0).min(1.0),
    }
}

/// Cosine similarity mapped into `0.0..=1.0` via `(1 + cos) / 2`.
#[must_use]
pub fn embed_similarity_norm(left: &[f32], right: &[f32]) -> f64 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (l, r) in left.iter().zip(right.iter()) {
        dot += f64::from(*l) * f64::from(*r);
        left_norm += f64::from(*l) * f64::from(*l);
        right_norm += f64::from(*r) * f64::from(*r);
    }
    let denom = left_norm.sqrt() * right_norm.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (1.0 + (dot / denom).clamp(-1.0, 1.0)) / 2.0
}

// ============================================================================
// SECTION: Diversity Selection
// ============================================================================

/// One ranked retrieval candidate.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    /// The retrieved source.
    pub source: RetrievedSource,
    /// Combined rerank score.
    pub score: f64,
    /// Intent of the best-matching planned query.
    pub intent: String,
}

/// Selects up to `target_count` candidates, capping per-intent share.
///
/// When the cap starves the selection, remaining slots backfill from the
/// ranked order regardless of intent.
#[must_use]
pub fn select_diverse(
    candidates: &[RankedCandidate],
    target_count: usize,
    per_intent_cap: usize,
) -> Vec<RankedCandidate> {
    let mut selected: Vec<RankedCandidate> = Vec::new();
    let mut intent_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut taken = vec![false; candidates.len()];

    for (index, candidate) in candidates.iter().enumerate() {
        if selected.len() >= target_count {
            break;
        }
        let count = intent_counts.entry(candidate.intent.as_str()).or_insert(0);
        if *count >= per_intent_cap {
            continue;
        }
        *count += 1;
        taken[index] = true;
        selected.push(candidate.clone());
    }
    if selected.len() < target_count {
        for (index, candidate) in candidates.iter().enumerate() {
            if selected.len() >= target_count {
                break;
            }
            if taken[index] {
                continue;
            }
            taken[index] = true;
            selected.push(candidate.clone());
        }
    }
    selected
}
