// crates/draftgate-pipeline/src/stages/retrieve.rs
// ============================================================================
// Module: Retrieve Stage
// Description: Query planning, connector fan-out, rerank, and selection.
// Purpose: Select a diverse, ranked source set for the run.
// Dependencies: draftgate-core, draftgate-connectors, draftgate-llm,
//               draftgate-store-sqlite, sha2
// ============================================================================

//! ## Overview
//! The stage asks the LLM for 6 to 10 intent-labeled queries, fans them out
//! to OpenAlex and arXiv (failures are swallowed per query), deduplicates
//! by canonical identifier, reranks with BM25 plus cached embeddings,
//! recency, and citations, then selects a per-intent-capped set of 10 to 20
//! sources. Everything persists in one commit at the end: sources, run
//! links, refreshed embedding cache rows, and the retrieval summary
//! checkpoint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Instant;

use draftgate_core::Connector;
use draftgate_core::JsonSchemaFormat;
use draftgate_core::LlmRequest;
use draftgate_core::OrchestratorState;
use draftgate_core::RetrievedSource;
use draftgate_core::SearchOptions;
use draftgate_core::SourceRef;
use draftgate_core::Stage;
use draftgate_core::Timestamp;
use draftgate_connectors::deduplicate_sources;
use draftgate_llm::extract_json_payload;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;

use crate::context::StageContext;
use crate::error::PipelineError;
use crate::rank::ALLOWED_INTENTS;
use crate::rank::Bm25Corpus;
use crate::rank::RankedCandidate;
use crate::rank::bm25_text;
use crate::rank::bm25_tokenize;
use crate::rank::citation_score;
use crate::rank::embed_similarity_norm;
use crate::rank::recency_score;
use crate::rank::select_diverse;

// ============================================================================
// SECTION: Query Plan
// ============================================================================

/// One planned search query with its intent label.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryPlan {
    /// Intent label from [`ALLOWED_INTENTS`].
    intent: String,
    /// Search query text.
    query: String,
}

/// JSON schema for the query-plan response format.
fn query_plan_schema() -> JsonSchemaFormat {
    JsonSchemaFormat {
        name: "query_plan".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "intent": { "type": "string" },
                            "query": { "type": "string" },
                        },
                        "required": ["intent", "query"],
                        "additionalProperties": false,
                    },
                },
            },
            "required": ["queries"],
            "additionalProperties": false,
        }),
    }
}

/// Canonicalizes an intent label, accepting common aliases.
fn normalize_intent(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase().replace('_', " ");
    let mapped = match normalized.as_str() {
        "failure mode" | "failures" => "failure modes",
        "future direction" => "future directions",
        "recent" => "recent work",
        other => other,
    };
    ALLOWED_INTENTS.contains(&mapped).then(|| mapped.to_string())
}

/// Builds the query-plan prompt.
fn query_plan_prompt(question: &str, tightened: bool) -> String {
    let intents = ALLOWED_INTENTS.join(", ");
    let reminder = if tightened {
        "\nYour previous answer was not valid JSON. Return ONLY the JSON object, nothing else.\n"
    } else {
        ""
    };
    format!(
        "Generate 6 to 10 diverse academic search queries for the research question below.\n\
         Return ONLY JSON with this schema:\n\
         {{\n  \"queries\": [\n    {{\"intent\": \"survey|methods|benchmarks|failure modes|future directions|recent work\", \"query\": \"...\"}}\n  ]\n}}\n\n\
         Question: {question}\n\
         Allowed intents: {intents}\n\
         Rules:\n\
         - Use each intent at least once when possible\n\
         - Keep queries concise and specific\n\
         - Do not include numbering or commentary\n{reminder}"
    )
}

/// Parses query plans out of an extracted JSON payload.
fn plans_from_payload(payload: &Value, max_queries: usize) -> Vec<QueryPlan> {
    let items = match payload {
        Value::Object(map) => map.get("queries").or_else(|| map.get("items")),
        Value::Array(_) => Some(payload),
        _ => None,
    };
    let Some(Value::Array(items)) = items else {
        return Vec::new();
    };
    let mut plans = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for item in items {
        let Some(map) = item.as_object() else {
            continue;
        };
        let query_raw = map.get("query").and_then(Value::as_str).unwrap_or("").trim();
        if query_raw.is_empty() {
            continue;
        }
        let Some(intent) =
            normalize_intent(map.get("intent").and_then(Value::as_str).unwrap_or(""))
        else {
            continue;
        };
        let query = query_raw.split_whitespace().collect::<Vec<&str>>().join(" ");
        if !seen.insert(query.clone()) {
            continue;
        }
        plans.push(QueryPlan {
            intent,
            query,
        });
        if plans.len() >= max_queries {
            break;
        }
    }
    plans
}

/// Permissive fallback: parses `intent: query` or `intent - query` lines.
fn plans_from_text(text: &str, max_queries: usize) -> Vec<QueryPlan> {
    let mut plans = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for line in text.lines() {
        let cleaned = line
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim_start_matches(|ch: char| ch.is_ascii_digit() || ch == '.' || ch == ')')
            .trim()
            .trim_matches(['"', '\''])
            .trim();
        if cleaned.is_empty() || cleaned.starts_with("```") {
            continue;
        }
        let (intent, query) = match cleaned.split_once(':').or_else(|| cleaned.split_once(" - ")) {
            Some((label, rest)) => match normalize_intent(label.trim_matches(['[', ']'])) {
                Some(intent) => (intent, rest.trim().to_string()),
                None => ("survey".to_string(), cleaned.to_string()),
            },
            None => ("survey".to_string(), cleaned.to_string()),
        };
        let query = query.split_whitespace().collect::<Vec<&str>>().join(" ");
        if query.len() < 6 || !seen.insert(query.clone()) {
            continue;
        }
        plans.push(QueryPlan {
            intent,
            query,
        });
        if plans.len() >= max_queries {
            break;
        }
    }
    plans
}

/// Builds the query plan, retrying once with tightened instructions.
fn build_query_plan(
    state: &OrchestratorState,
    cx: &StageContext,
) -> Result<Vec<QueryPlan>, PipelineError> {
    let question = state.user_query.split_whitespace().collect::<Vec<&str>>().join(" ");
    if question.is_empty() {
        return Err(PipelineError::validation("question is required for retrieval"));
    }
    let max_queries = cx.config.retriever.query_count.max(6);
    let llm = cx.clients.llm_client(state.llm_model.as_deref())?;

    for tightened in [false, true] {
        let request = LlmRequest::new(query_plan_prompt(&question, tightened))
            .with_system("You generate search queries as strict JSON only.")
            .with_max_tokens(600)
            .with_temperature(0.4)
            .with_response_format(query_plan_schema());
        let response = llm.generate(&request)?;
        let mut plans = extract_json_payload(&response)
            .map(|payload| plans_from_payload(&payload, max_queries))
            .unwrap_or_default();
        if plans.is_empty() {
            plans = plans_from_text(&response, max_queries);
        }
        if !plans.is_empty() {
            return Ok(plans);
        }
    }
    Err(PipelineError::validation("LLM query generation failed or returned no queries"))
}

// ============================================================================
// SECTION: Fan-Out
// ============================================================================

/// Searches one connector per query, tagging results and swallowing errors.
fn fan_out(
    connector: &dyn Connector,
    plans: &[QueryPlan],
    max_per_query: usize,
) -> Vec<RetrievedSource> {
    let options = SearchOptions {
        max_results: max_per_query.max(1),
        year_from: None,
        year_to: None,
    };
    let mut sources = Vec::new();
    for plan in plans {
        // Per-query connector failures are survivable; the rerank works
        // with whatever came back.
        let Ok(batch) = connector.search(&plan.query, &options) else {
            continue;
        };
        for mut source in batch {
            if let Some(map) = source.extra_metadata.as_object_mut() {
                map.insert("intent".to_string(), json!(plan.intent));
                map.insert("query".to_string(), json!(plan.query));
            }
            sources.push(source);
        }
    }
    sources
}

// ============================================================================
// SECTION: Rerank
// ============================================================================

/// Embedding text for a source: title plus abstract, length-capped.
fn embedding_text(source: &RetrievedSource, max_chars: usize) -> String {
    let text = bm25_text(source);
    if text.len() > max_chars {
        let mut end = max_chars;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        return text[.. end].to_string();
    }
    text
}

/// SHA-256 hash of embedded text, hex encoded.
fn text_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Counters describing the rerank embedding pass.
#[derive(Debug, Default)]
struct RerankStats {
    /// Cache rows reused.
    cache_hits: usize,
    /// Cache rows missing or stale.
    cache_misses: usize,
    /// Vectors computed in this pass.
    embedded_now: usize,
    /// Embedding batches issued.
    batch_count: usize,
}

/// A cache refresh computed during rerank, persisted at stage end.
struct PendingEmbedding {
    /// Canonical identifier of the source.
    canonical_id: String,
    /// Hash of the embedded text.
    text_hash: String,
    /// Computed vector.
    vector: Vec<f32>,
}

/// Reranks deduplicated sources; returns candidates sorted by score.
#[allow(clippy::too_many_lines, reason = "the rerank recipe reads best in one piece")]
fn rank_sources(
    state: &OrchestratorState,
    cx: &StageContext,
    sources: Vec<RetrievedSource>,
    plans: &[QueryPlan],
    stats: &mut RerankStats,
    pending: &mut Vec<PendingEmbedding>,
) -> Result<Vec<RankedCandidate>, PipelineError> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = sources.iter().map(bm25_text).collect();
    let corpus = Bm25Corpus::build(&documents);
    let query_tokens: Vec<Vec<String>> =
        plans.iter().map(|plan| bm25_tokenize(&plan.query)).collect();

    let mut bm25_scores = Vec::with_capacity(sources.len());
    let mut intents = Vec::with_capacity(sources.len());
    for index in 0 .. sources.len() {
        let mut best_score = 0.0_f64;
        let mut best_intent =
            plans.first().map_or_else(|| "survey".to_string(), |plan| plan.intent.clone());
        for (plan, tokens) in plans.iter().zip(query_tokens.iter()) {
            let score = corpus.score(index, tokens);
            if score > best_score {
                best_score = score;
                best_intent = plan.intent.clone();
            }
        }
        bm25_scores.push(best_score);
        intents.push(best_intent);
    }
    let max_bm25 = bm25_scores.iter().copied().fold(0.0_f64, f64::max);
    let bm25_norm: Vec<f64> = bm25_scores
        .iter()
        .map(|score| if max_bm25 > 0.0 { score / max_bm25 } else { 0.0 })
        .collect();

    // Embedding pass over the BM25 top-K, served from the cache when the
    // text hash still matches.
    let mut embed_norms = vec![0.0_f64; sources.len()];
    let topk = cx.config.retriever.rerank_topk.min(200).min(sources.len());
    if topk > 0 {
        let embed_client = cx.clients.embedding_client()?;
        let query_vector = embed_client
            .embed_texts(std::slice::from_ref(&state.user_query))?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::validation("query embedding came back empty"))?;

        let mut ranked_indices: Vec<usize> = (0 .. sources.len()).collect();
        ranked_indices.sort_by(|left, right| {
            bm25_scores[*right]
                .partial_cmp(&bm25_scores[*left])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let topk_indices = &ranked_indices[.. topk];

        let canonical_ids: Vec<String> = topk_indices
            .iter()
            .map(|index| sources[*index].canonical_id.to_canonical_string())
            .collect();
        let cached = cx.store.with_session(|session| {
            session.load_source_embeddings(
                &state.tenant_id,
                &canonical_ids,
                embed_client.model_name(),
            )
        })?;

        let max_chars = cx.config.embedding.text_max_chars;
        let mut texts_to_embed = Vec::new();
        let mut misses: Vec<(usize, String, String)> = Vec::new();
        for index in topk_indices {
            let text = embedding_text(&sources[*index], max_chars);
            if text.is_empty() {
                stats.cache_misses += 1;
                continue;
            }
            let hash = text_hash(&text);
            let canonical_id = sources[*index].canonical_id.to_canonical_string();
            if let Some(row) = cached.get(&canonical_id)
                && row.text_hash == hash
            {
                stats.cache_hits += 1;
                embed_norms[*index] = embed_similarity_norm(&query_vector, &row.vector);
                continue;
            }
            stats.cache_misses += 1;
            texts_to_embed.push(text);
            misses.push((*index, canonical_id, hash));
        }

        let batch_size = cx.config.retriever.embed_batch.max(1);
        stats.batch_count = texts_to_embed.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(texts_to_embed.len());
        for batch in texts_to_embed.chunks(batch_size) {
            vectors.extend(embed_client.embed_texts(batch)?);
        }
        if vectors.len() != misses.len() {
            return Err(PipelineError::validation(format!(
                "embedding batch size mismatch: expected {} got {}",
                misses.len(),
                vectors.len()
            )));
        }
        for ((index, canonical_id, hash), vector) in misses.into_iter().zip(vectors) {
            if vector.is_empty() {
                continue;
            }
            embed_norms[index] = embed_similarity_norm(&query_vector, &vector);
            stats.embedded_now += 1;
            pending.push(PendingEmbedding {
                canonical_id,
                text_hash: hash,
                vector,
            });
        }
    }

    let weights = &cx.config.retriever;
    let current_year = current_year();
    let mut ranked: Vec<RankedCandidate> = sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            let score = bm25_norm[index] * weights.weight_bm25
                + embed_norms[index] * weights.weight_embed
                + recency_score(source.year, current_year) * weights.weight_recency
                + citation_score(source.citations_count) * weights.weight_citation;
            RankedCandidate {
                source,
                score,
                intent: intents[index].clone(),
            }
        })
        .collect();
    ranked.sort_by(|left, right| {
        right.score.partial_cmp(&left.score).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(ranked)
}

/// Derives the current calendar year from the wall clock.
fn current_year() -> i32 {
    // Days-per-year approximation is fine for a decade-scale decay signal.
    let millis = Timestamp::now().unix_millis();
    let years = millis / 1_000 / 86_400 / 365;
    1970 + i32::try_from(years).unwrap_or(0)
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the retrieve stage.
///
/// # Errors
///
/// Returns [`PipelineError`] when the query plan cannot be built, embedding
/// calls fail, or persistence fails.
pub fn retrieve_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let plans = build_query_plan(state, cx)?;
    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.plan_created",
        json!({
            "query_count": plans.len(),
            "queries": plans
                .iter()
                .map(|plan| json!({ "intent": plan.intent, "query": plan.query }))
                .collect::<Vec<Value>>(),
        }),
    )?;

    let connectors = cx.clients.connectors();
    let mut openalex_sources = Vec::new();
    let mut arxiv_sources = Vec::new();
    for connector in &connectors {
        let max_per_query = if connector.name() == "arxiv" {
            cx.config.retriever.arxiv_max
        } else {
            cx.config.retriever.openalex_max
        };
        let batch = fan_out(connector.as_ref(), &plans, max_per_query);
        if connector.name() == "arxiv" {
            arxiv_sources.extend(batch);
        } else {
            openalex_sources.extend(batch);
        }
    }
    let found_openalex = openalex_sources.len();
    let found_arxiv = arxiv_sources.len();

    let mut all_sources = openalex_sources;
    all_sources.extend(arxiv_sources);
    let (deduped, dedup_stats) = deduplicate_sources(all_sources, "openalex");
    let kept_openalex = deduped.iter().filter(|source| source.connector == "openalex").count();
    let kept_arxiv = deduped.iter().filter(|source| source.connector == "arxiv").count();

    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.openalex_completed",
        json!({ "found": found_openalex, "kept": kept_openalex }),
    )?;
    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.arxiv_completed",
        json!({ "found": found_arxiv, "kept": kept_arxiv }),
    )?;
    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.rerank.started",
        json!({
            "candidate_count": deduped.len(),
            "topk": cx.config.retriever.rerank_topk.min(200).min(deduped.len()),
        }),
    )?;

    let rerank_started = Instant::now();
    let mut stats = RerankStats::default();
    let mut pending = Vec::new();
    let ranked = rank_sources(state, cx, deduped, &plans, &mut stats, &mut pending)?;
    let latency_ms = u64::try_from(rerank_started.elapsed().as_millis()).unwrap_or(u64::MAX);

    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.rerank.cache",
        json!({
            "hits": stats.cache_hits,
            "misses": stats.cache_misses,
            "embedded_now": stats.embedded_now,
            "batch_count": stats.batch_count,
        }),
    )?;
    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.rerank.completed",
        json!({ "latency_ms": latency_ms }),
    )?;

    let min_sources = cx.config.retriever.min_sources;
    let max_sources = cx.config.retriever.max_sources;
    let target_count =
        if ranked.len() >= min_sources { max_sources.min(ranked.len()) } else { ranked.len() };
    let per_intent_cap = target_count.div_ceil(ALLOWED_INTENTS.len()).max(1);
    let selected = select_diverse(&ranked, target_count, per_intent_cap);

    let mut intent_counts: BTreeMap<String, usize> = BTreeMap::new();
    for candidate in &selected {
        *intent_counts.entry(candidate.intent.clone()).or_insert(0) += 1;
    }

    // One commit for sources, run links, cache refreshes, and the summary.
    let embed_model = cx.clients.embedding_client().map(|client| {
        client.model_name().to_string()
    });
    let selected_refs = cx.store.with_session(|session| {
        let mut refs: Vec<SourceRef> = Vec::with_capacity(selected.len());
        for candidate in &selected {
            let origin = candidate.source.connector.clone();
            let upsert = session.upsert_source(&state.tenant_id, &candidate.source, &origin)?;
            session.upsert_run_source(
                &state.tenant_id,
                &state.run_id,
                &upsert.source_id,
                candidate.score,
                &origin,
            )?;
            refs.push(SourceRef {
                source_id: upsert.source_id,
                canonical_id: upsert.canonical_id,
                title: upsert.title,
                authors: upsert.authors,
                abstract_text: candidate.source.abstract_text.clone(),
                year: upsert.year,
                venue: upsert.venue,
                doi: upsert.doi,
                arxiv_id: upsert.arxiv_id,
                url: upsert.url.or_else(|| candidate.source.url.clone()),
                connector: origin,
                cited_by_count: upsert.cited_by_count,
                score: candidate.score,
            });
        }
        if let Ok(model) = &embed_model {
            for refresh in &pending {
                session.upsert_source_embedding(
                    &state.tenant_id,
                    &refresh.canonical_id,
                    model,
                    &refresh.vector,
                    &refresh.text_hash,
                )?;
            }
        }
        session.create_run_checkpoint(
            &state.tenant_id,
            &state.run_id,
            "retrieval_summary",
            &json!({
                "query_count": plans.len(),
                "queries": plans
                    .iter()
                    .map(|plan| json!({ "intent": plan.intent, "query": plan.query }))
                    .collect::<Vec<Value>>(),
                "found_openalex": found_openalex,
                "found_arxiv": found_arxiv,
                "kept_openalex": kept_openalex,
                "kept_arxiv": kept_arxiv,
                "deduped_sources": dedup_stats.kept_count,
                "selected_sources": refs.len(),
                "intent_counts": intent_counts,
            }),
        )?;
        Ok(refs)
    })?;

    cx.emit(
        state,
        Stage::Retrieve,
        "retrieve.summary",
        json!({ "selected_sources_total": selected_refs.len() }),
    )?;

    state.generated_queries = plans.into_iter().map(|plan| plan.query).collect();
    state.retrieved_sources = selected_refs;
    state.evidence_snippets = Vec::new();
    Ok(())
}
