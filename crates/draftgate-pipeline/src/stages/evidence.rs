// crates/draftgate-pipeline/src/stages/evidence.rs
// ============================================================================
// Module: Evidence-Pack Stage
// Description: Per-section semantic snippet selection with diversity caps.
// Purpose: Gate each section's citations on a curated snippet set.
// Dependencies: draftgate-core, draftgate-store-sqlite, sha2
// ============================================================================

//! ## Overview
//! Each outline section becomes a query over the run's selected sources:
//! title, goal, key points, and evidence themes embed into one vector, the
//! snippet index answers with cosine hits, and selection caps per-source
//! share. Sources that arrived abstract-only get a synthesized abstract
//! snippet first so every source can be cited. Packs for all sections swap
//! in atomically in one commit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::EvidenceSnippetRef;
use draftgate_core::OrchestratorState;
use draftgate_core::SectionId;
use draftgate_core::SnippetId;
use draftgate_core::SourceId;
use draftgate_core::Stage;
use draftgate_store_sqlite::SnippetSearchResult;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// SHA-256 hash of snippet text, hex encoded.
fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Builds the query text for one outline section.
fn section_query_text(
    title: &str,
    goal: &str,
    key_points: &[String],
    themes: &[String],
) -> String {
    let mut parts: Vec<&str> = vec![title, goal];
    let key_points_joined = key_points.join(" ");
    let themes_joined = themes.join(" ");
    parts.push(&key_points_joined);
    parts.push(&themes_joined);
    parts
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Keeps the best-similarity hit per snippet id.
fn dedupe_hits(hits: Vec<SnippetSearchResult>) -> Vec<SnippetSearchResult> {
    let mut best: BTreeMap<String, SnippetSearchResult> = BTreeMap::new();
    for hit in hits {
        let key = hit.snippet_id.as_str().to_string();
        match best.get(&key) {
            Some(existing) if existing.similarity >= hit.similarity => {}
            _ => {
                best.insert(key, hit);
            }
        }
    }
    let mut merged: Vec<SnippetSearchResult> = best.into_values().collect();
    merged.sort_by(|left, right| {
        right.similarity.partial_cmp(&left.similarity).unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}

/// Selects snippets with a per-source cap, backfilling when starved.
fn select_diverse_snippets(
    hits: &[SnippetSearchResult],
    max_count: usize,
    per_source_cap: usize,
) -> Vec<SnippetSearchResult> {
    let mut selected: Vec<SnippetSearchResult> = Vec::new();
    let mut taken = vec![false; hits.len()];
    let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
    for (index, hit) in hits.iter().enumerate() {
        if selected.len() >= max_count {
            break;
        }
        let count = per_source.entry(hit.source_id.as_str()).or_insert(0);
        if *count >= per_source_cap {
            continue;
        }
        *count += 1;
        taken[index] = true;
        selected.push(hit.clone());
    }
    if selected.len() < max_count {
        for (index, hit) in hits.iter().enumerate() {
            if selected.len() >= max_count {
                break;
            }
            if taken[index] {
                continue;
            }
            selected.push(hit.clone());
        }
    }
    selected
}

/// Synthesizes abstract snippets when no source has snippets yet.
fn ensure_snippets_from_abstracts(
    state: &OrchestratorState,
    cx: &StageContext,
    embedding_model: &str,
) -> Result<(), PipelineError> {
    let source_ids: Vec<SourceId> =
        state.retrieved_sources.iter().map(|source| source.source_id.clone()).collect();
    if source_ids.is_empty() {
        return Ok(());
    }
    let any = cx
        .store
        .with_session(|session| session.any_snippets_for_sources(&state.tenant_id, &source_ids))?;
    if any {
        return Ok(());
    }

    let mut texts = Vec::new();
    let mut owners = Vec::new();
    for source in &state.retrieved_sources {
        let text = source
            .abstract_text
            .as_deref()
            .filter(|abstract_text| !abstract_text.trim().is_empty())
            .unwrap_or(source.title.as_str())
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }
        texts.push(text);
        owners.push(source);
    }
    if texts.is_empty() {
        return Ok(());
    }

    let embed_client = cx.clients.embedding_client()?;
    let batch_size = cx.config.evidence.embed_batch.max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        vectors.extend(embed_client.embed_texts(batch)?);
    }
    if vectors.len() != texts.len() {
        return Err(PipelineError::validation(
            "mismatch between abstract snippets and embeddings",
        ));
    }

    cx.store.with_session(|session| {
        for ((source, text), vector) in owners.iter().zip(&texts).zip(&vectors) {
            let version = session.next_snapshot_version(&state.tenant_id, &source.source_id)?;
            let snapshot_id = session.insert_snapshot(
                &state.tenant_id,
                &source.source_id,
                version,
                "text/plain",
                &format!("abstract:{}", source.canonical_id),
                &sha256_hex(text),
                text.len(),
                &json!({ "origin": "abstract_fallback" }),
            )?;
            let snippet_id = session.insert_snippet(
                &state.tenant_id,
                &snapshot_id,
                0,
                text,
                &sha256_hex(text),
            )?;
            session.insert_snippet_embedding(
                &state.tenant_id,
                &snippet_id,
                embedding_model,
                vector,
            )?;
        }
        Ok(())
    })?;
    Ok(())
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the evidence-pack stage.
///
/// # Errors
///
/// Returns [`PipelineError`] when the outline is missing, embedding fails,
/// or persistence fails.
pub fn evidence_pack_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let outline = state
        .outline
        .clone()
        .filter(|outline| !outline.sections.is_empty())
        .ok_or_else(|| {
            PipelineError::validation("outline is required before building evidence packs")
        })?;

    let embed_client = cx.clients.embedding_client()?;
    let embedding_model = embed_client.model_name().to_string();
    ensure_snippets_from_abstracts(state, cx, &embedding_model)?;

    let source_ids: Vec<SourceId> =
        state.retrieved_sources.iter().map(|source| source.source_id.clone()).collect();
    let evidence = &cx.config.evidence;

    // Embed every section query in one batched pass.
    let section_queries: Vec<(String, String)> = outline
        .sections
        .iter()
        .map(|section| {
            (
                section.section_id.clone(),
                section_query_text(
                    &section.title,
                    &section.goal,
                    &section.key_points,
                    &section.suggested_evidence_themes,
                ),
            )
        })
        .filter(|(_, query)| !query.is_empty())
        .collect();
    let query_texts: Vec<String> =
        section_queries.iter().map(|(_, query)| query.clone()).collect();
    let mut query_vectors = Vec::with_capacity(query_texts.len());
    for batch in query_texts.chunks(evidence.embed_batch.max(1)) {
        query_vectors.extend(embed_client.embed_texts(batch)?);
    }
    if query_vectors.len() != section_queries.len() {
        return Err(PipelineError::validation(
            "mismatch between outline sections and query embeddings",
        ));
    }

    let mut shared_refs: BTreeMap<String, EvidenceSnippetRef> = BTreeMap::new();
    let mut packs: Vec<(SectionId, Vec<SnippetId>, Vec<EvidenceSnippetRef>)> = Vec::new();

    for ((section_id, _), query_vector) in section_queries.iter().zip(&query_vectors) {
        let mut hits = cx.store.with_session(|session| {
            session.search_snippets(
                &state.tenant_id,
                query_vector,
                &embedding_model,
                evidence.search_limit,
                evidence.min_similarity,
                Some(&source_ids),
            )
        })?;
        if hits.len() < evidence.min_required {
            let relaxed = cx.store.with_session(|session| {
                session.search_snippets(
                    &state.tenant_id,
                    query_vector,
                    &embedding_model,
                    evidence.search_limit + 30,
                    (evidence.min_similarity - 0.15).max(0.0),
                    Some(&source_ids),
                )
            })?;
            hits.extend(relaxed);
            hits = dedupe_hits(hits);
        }

        let mut selected =
            select_diverse_snippets(&hits, evidence.snippet_max, evidence.per_source_cap);
        if selected.len() < evidence.snippet_min && hits.len() > selected.len() {
            selected = select_diverse_snippets(
                &hits,
                evidence.snippet_min,
                evidence.per_source_cap.max(evidence.snippet_min),
            );
        }

        let snippet_ids: Vec<SnippetId> =
            selected.iter().map(|hit| hit.snippet_id.clone()).collect();
        let mut section_refs = Vec::with_capacity(selected.len());
        for hit in &selected {
            let entry = shared_refs
                .entry(hit.snippet_id.as_str().to_string())
                .or_insert_with(|| EvidenceSnippetRef {
                    snippet_id: hit.snippet_id.clone(),
                    source_id: hit.source_id.clone(),
                    text: hit.snippet_text.clone(),
                    char_start: hit.char_start,
                    char_end: if hit.char_end > 0 { hit.char_end } else { hit.snippet_text.len() },
                });
            section_refs.push(entry.clone());
        }

        cx.emit(
            state,
            Stage::EvidencePack,
            "evidence_pack.created",
            json!({
                "section_id": section_id,
                "snippet_count": snippet_ids.len(),
            }),
        )?;
        packs.push((SectionId::new(section_id.clone()), snippet_ids, section_refs));
    }

    // One commit swaps every section's pack.
    cx.store.with_session(|session| {
        for (section_id, snippet_ids, _) in &packs {
            session.replace_section_evidence(
                &state.tenant_id,
                &state.run_id,
                section_id,
                snippet_ids,
            )?;
        }
        Ok(())
    })?;

    state.section_evidence = packs
        .into_iter()
        .map(|(section_id, _, refs)| (section_id.as_str().to_string(), refs))
        .collect();
    state.evidence_snippets = shared_refs.into_values().collect();
    Ok(())
}
