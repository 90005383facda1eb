// crates/draftgate-pipeline/src/stages/repair.rs
// ============================================================================
// Module: Repair Stage
// Description: Sentence-scoped repair plus next-section continuity patch.
// Purpose: Fix only what the evaluator flagged, exactly once per run.
// Dependencies: draftgate-core, draftgate-llm, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! Repair runs at most once per run. For each failing section it either
//! removes the flagged sentences mechanically (when the section has no
//! evidence pack) or asks the LLM for scoped edits, then re-validates
//! citations, summaries, and scope: sentences outside the flagged indexes
//! and everything past the next section's second sentence must survive
//! byte-identical. Any violation fails the stage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use draftgate_core::EvidenceSnippetRef;
use draftgate_core::LlmRequest;
use draftgate_core::OrchestratorState;
use draftgate_core::OutlineSection;
use draftgate_core::ReviewVerdict;
use draftgate_core::SectionId;
use draftgate_core::core::revision::patch_next_section_narrative;
use draftgate_core::core::revision::remove_issue_sentences;
use draftgate_core::core::revision::validate_next_section_patch;
use draftgate_core::core::revision::validate_repair_scope;
use draftgate_core::core::text::split_sentences;
use draftgate_core::core::text::strip_citations;
use draftgate_core::core::text::summary_from_text;
use draftgate_core::core::text::validate_repair_summary;
use draftgate_core::core::text::validate_section_text;
use draftgate_llm::extract_json_payload;
use serde_json::Value;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;
use crate::stages::writer::assemble_draft;

// ============================================================================
// SECTION: LLM Repair Call
// ============================================================================

/// Renders the snippet payload shown to the repair model.
fn snippet_payload(snippets: &[EvidenceSnippetRef]) -> Value {
    let items: Vec<Value> = snippets
        .iter()
        .map(|snippet| {
            let mut text = snippet.text.trim().to_string();
            if text.len() > 600 {
                let mut end = 600;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
            json!({ "snippet_id": snippet.snippet_id.as_str(), "text": text })
        })
        .collect();
    Value::Array(items)
}

/// Inputs for one LLM repair call.
struct RepairCall<'a> {
    /// Failing section.
    section: &'a OutlineSection,
    /// Current section text.
    section_text: &'a str,
    /// Current section summary.
    section_summary: &'a str,
    /// Prior section summary, when one exists.
    prior_summary: Option<&'a str>,
    /// Normalized issues as JSON for the prompt.
    issues: &'a Value,
    /// Current section evidence pack.
    snippets: &'a [EvidenceSnippetRef],
    /// Next section receiving the continuity patch.
    next_section: &'a OutlineSection,
    /// Next section text.
    next_text: &'a str,
    /// Next section summary.
    next_summary: &'a str,
    /// Next section evidence pack.
    next_snippets: &'a [EvidenceSnippetRef],
}

/// Builds the repair prompt.
fn repair_prompt(call: &RepairCall<'_>) -> String {
    format!(
        "Repair the current section and apply a continuity patch to the next section.\n\
         Return ONLY JSON with this schema:\n\
         {{\n  \"section_id\": \"...\",\n  \"revised_text\": \"...\",\n  \"revised_summary\": \"line1\\nline2\",\n  \"next_section_id\": \"...\",\n  \"patched_next_text\": \"...\",\n  \"patched_next_summary\": \"line1\\nline2\",\n  \"edits_json\": {{\n    \"repaired_section_edits\": [\n      {{ \"sentence_index\": 0, \"before\": \"...\", \"after\": \"...\", \"change_type\": \"...\" }}\n    ],\n    \"continuity_patch\": {{\n      \"next_section_id\": \"...\",\n      \"before_first_two_sentences\": \"...\",\n      \"after_first_two_sentences\": \"...\"\n    }}\n  }}\n}}\n\n\
         Current Section ID: {section_id}\n\
         Current Section Title: {section_title}\n\
         Current Section Text:\n{section_text}\n\n\
         Current Section Summary:\n{section_summary}\n\n\
         Prior Section Summary (if any):\n{prior}\n\n\
         Evaluator Issues:\n{issues}\n\n\
         Evidence pack snippets for current section:\n{snippets}\n\n\
         Next Section ID: {next_id}\n\
         Next Section Title: {next_title}\n\
         Next Section Text:\n{next_text}\n\n\
         Next Section Summary:\n{next_summary}\n\n\
         Evidence pack snippets for next section:\n{next_snippets}\n\n\
         Rules:\n\
         - Fix ONLY sentences referenced by sentence_index.\n\
         - Do NOT modify sentences outside those indexes.\n\
         - Do NOT add new claims not present in the original section text.\n\
         - If unsupported: remove or rewrite to match evidence.\n\
         - If overstated: soften language and add citations if factual.\n\
         - If missing_citation: add citation tokens at the end.\n\
         - If invalid_citation or not_in_pack: replace with valid snippet_id or remove.\n\
         - Every factual sentence must end with citation token(s).\n\
         - Citations only at the end of sentences.\n\
         - No headings, bullet lists, or markdown.\n\n\
         Micro-summary rules:\n\
         - Exactly 2 lines, one sentence per line.\n\
         - No citations.\n\
         - No new facts not in revised_text.\n\n\
         Continuity patch rules (next section):\n\
         - ALWAYS patch the first two sentences only.\n\
         - Keep every character after sentence 1 identical to the original next_section_text.\n\
         - Do NOT introduce new claims.\n\
         - If patched sentences are factual, cite using next section evidence pack.\n\
         - Narrative transitions may be uncited.\n\
         - Update patched_next_summary only if needed for consistency.\n\
         - Do NOT include commentary outside JSON.\n",
        section_id = call.section.section_id,
        section_title = call.section.title,
        section_text = call.section_text,
        section_summary = call.section_summary,
        prior = call.prior_summary.unwrap_or("NONE"),
        issues = serde_json::to_string_pretty(call.issues).unwrap_or_else(|_| "[]".to_string()),
        snippets = serde_json::to_string_pretty(&snippet_payload(call.snippets))
            .unwrap_or_else(|_| "[]".to_string()),
        next_id = call.next_section.section_id,
        next_title = call.next_section.title,
        next_text = call.next_text,
        next_summary = call.next_summary,
        next_snippets = serde_json::to_string_pretty(&snippet_payload(call.next_snippets))
            .unwrap_or_else(|_| "[]".to_string()),
    )
}

/// Decoded repair response.
struct RepairResponse {
    /// Revised current-section text.
    revised_text: String,
    /// Revised two-line summary.
    revised_summary: String,
    /// Patched next-section text.
    patched_next_text: String,
    /// Patched next-section summary.
    patched_next_summary: String,
    /// Structured edit log.
    edits: Option<Value>,
}

/// Issues the repair call and decodes the response.
fn repair_with_llm(
    state: &OrchestratorState,
    cx: &StageContext,
    call: &RepairCall<'_>,
) -> Result<RepairResponse, PipelineError> {
    let llm = cx.clients.llm_client(state.llm_model.as_deref())?;
    let request = LlmRequest::new(repair_prompt(call))
        .with_system("You repair evidence-grounded drafts and return strict JSON only.")
        .with_max_tokens(1_800)
        .with_temperature(0.2);
    let response = llm.generate(&request)?;
    let payload = extract_json_payload(&response)
        .ok_or_else(|| PipelineError::validation("repair response did not return a JSON object"))?;
    let Some(map) = payload.as_object() else {
        return Err(PipelineError::validation("repair response did not return a JSON object"));
    };

    let section_id = map.get("section_id").and_then(Value::as_str).unwrap_or("").trim();
    if !section_id.is_empty() && section_id != call.section.section_id {
        return Err(PipelineError::validation(format!(
            "repair response section_id mismatch for {}",
            call.section.section_id
        )));
    }
    let next_id = map.get("next_section_id").and_then(Value::as_str).unwrap_or("").trim();
    if !next_id.is_empty() && next_id != call.next_section.section_id {
        return Err(PipelineError::validation(format!(
            "repair response next_section_id mismatch for {}",
            call.next_section.section_id
        )));
    }

    let field = |key: &str| -> String {
        map.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string()
    };
    Ok(RepairResponse {
        revised_text: field("revised_text"),
        revised_summary: field("revised_summary"),
        patched_next_text: field("patched_next_text"),
        patched_next_summary: field("patched_next_summary"),
        edits: map.get("edits_json").filter(|value| value.is_object()).cloned(),
    })
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the repair stage.
///
/// # Errors
///
/// Returns [`PipelineError`] immediately on a second attempt within the
/// same run, and on any scope, citation, or summary violation.
#[allow(clippy::too_many_lines, reason = "the repair recipe reads best in one piece")]
pub fn repair_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    if state.repair_attempts >= 1 {
        return Err(PipelineError::validation("repair agent can only run once per draft"));
    }
    state.repair_attempts += 1;

    let outline = state
        .outline
        .clone()
        .filter(|outline| !outline.sections.is_empty())
        .ok_or_else(|| PipelineError::validation("outline is required for repairs"))?;
    let ordered_ids = outline.ordered_ids();
    let sections_by_id: BTreeMap<&str, &OutlineSection> = outline
        .sections
        .iter()
        .map(|section| (section.section_id.as_str(), section))
        .collect();

    let (drafts, reviews) = cx.store.with_session(|session| {
        let drafts = session.load_draft_sections(&state.tenant_id, &state.run_id)?;
        let reviews = session.load_section_reviews(&state.tenant_id, &state.run_id)?;
        Ok((drafts, reviews))
    })?;

    let failing: Vec<String> = ordered_ids
        .iter()
        .filter(|section_id| {
            reviews
                .get(*section_id)
                .is_some_and(|review| review.verdict != ReviewVerdict::Pass)
        })
        .cloned()
        .collect();
    if failing.is_empty() {
        return Ok(());
    }

    let mut texts: BTreeMap<String, String> = drafts
        .iter()
        .map(|(section_id, draft)| (section_id.clone(), draft.text.clone()))
        .collect();
    let mut summaries: BTreeMap<String, String> = drafts
        .iter()
        .map(|(section_id, draft)| {
            (section_id.clone(), draft.section_summary.clone().unwrap_or_default())
        })
        .collect();
    let mut repair_logs: Vec<Value> = Vec::new();

    for section_id in &failing {
        let section = sections_by_id.get(section_id.as_str()).copied().ok_or_else(|| {
            PipelineError::validation(format!("outline section missing for {section_id}"))
        })?;
        let review = reviews.get(section_id);
        let issues: Vec<Value> = review
            .map(|review| {
                review
                    .issues
                    .iter()
                    .map(|issue| {
                        json!({
                            "sentence_index": issue.sentence_index,
                            "issue_type": issue.problem.as_str(),
                            "details": issue.notes,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let issue_indices: BTreeSet<usize> = review
            .map(|review| review.issues.iter().map(|issue| issue.sentence_index).collect())
            .unwrap_or_default();

        let original_text = texts.get(section_id).cloned().unwrap_or_default();
        if original_text.is_empty() {
            return Err(PipelineError::validation(format!(
                "draft section missing for {section_id}"
            )));
        }
        let original_summary = summaries.get(section_id).cloned().unwrap_or_default();

        let position = ordered_ids
            .iter()
            .position(|candidate| candidate == section_id)
            .unwrap_or_default();
        let prior_summary = position
            .checked_sub(1)
            .and_then(|prev| summaries.get(&ordered_ids[prev]).cloned());
        let next_section_id = ordered_ids.get(position + 1).ok_or_else(|| {
            PipelineError::validation(format!(
                "next section missing for continuity patch after {section_id}"
            ))
        })?;
        let next_section =
            sections_by_id.get(next_section_id.as_str()).copied().ok_or_else(|| {
                PipelineError::validation(format!("outline section missing for {next_section_id}"))
            })?;
        let next_text = texts.get(next_section_id).cloned().unwrap_or_default();
        if next_text.is_empty() {
            return Err(PipelineError::validation(format!(
                "draft section missing for {next_section_id}"
            )));
        }
        let next_summary = summaries.get(next_section_id).cloned().unwrap_or_default();

        let snippets: Vec<EvidenceSnippetRef> = state.section_pack(section_id).to_vec();
        let next_snippets: Vec<EvidenceSnippetRef> =
            state.section_pack(next_section_id).to_vec();

        let sentence_count = split_sentences(&original_text).len();
        let has_invalid_indexes =
            issue_indices.iter().any(|index| *index >= sentence_count);

        let (mut revised_text, mut revised_summary, patched_next_text, patched_next_summary, edits) =
            if snippets.is_empty() {
                let (removed_text, edits) =
                    remove_issue_sentences(&original_text, &issue_indices);
                let revised_text = strip_citations(&removed_text);
                let revised_summary = summary_from_text(&revised_text);
                let (patched_text, patched_summary, patch_log) = patch_next_section_narrative(
                    next_section_id,
                    &next_text,
                    &revised_summary,
                    &next_section.title,
                )?;
                let edits_json = json!({
                    "repaired_section_edits": edits,
                    "continuity_patch": patch_log,
                });
                (revised_text, revised_summary, patched_text, patched_summary, Some(edits_json))
            } else {
                let issues_value = Value::Array(issues.clone());
                let call = RepairCall {
                    section,
                    section_text: &original_text,
                    section_summary: &original_summary,
                    prior_summary: prior_summary.as_deref(),
                    issues: &issues_value,
                    snippets: &snippets,
                    next_section,
                    next_text: &next_text,
                    next_summary: &next_summary,
                    next_snippets: &next_snippets,
                };
                let response = repair_with_llm(state, cx, &call)?;
                (
                    response.revised_text,
                    response.revised_summary,
                    response.patched_next_text,
                    response.patched_next_summary,
                    response.edits,
                )
            };

        // Out-of-range indexes cannot be repaired meaningfully; the section
        // comes back unchanged and only the summary is normalized.
        if has_invalid_indexes {
            revised_text = original_text.clone();
            revised_summary = if validate_repair_summary(&original_summary).is_ok() {
                original_summary.clone()
            } else {
                summary_from_text(&original_text)
            };
        }

        let allowed: BTreeSet<String> =
            snippets.iter().map(|snippet| snippet.snippet_id.as_str().to_string()).collect();
        let revised_text = validate_section_text(&revised_text, &allowed)?;
        validate_repair_summary(&revised_summary)?;
        if !has_invalid_indexes {
            validate_repair_scope(&original_text, &revised_text, &issue_indices)?;
        }

        let mut next_allowed: BTreeSet<String> = next_snippets
            .iter()
            .map(|snippet| snippet.snippet_id.as_str().to_string())
            .collect();
        if next_allowed.is_empty() {
            next_allowed = allowed;
        }
        validate_next_section_patch(&next_text, &patched_next_text)?;
        let first_two = split_sentences(&patched_next_text)
            .into_iter()
            .take(2)
            .collect::<Vec<String>>()
            .join(" ");
        validate_section_text(&first_two, &next_allowed)?;
        validate_repair_summary(&patched_next_summary)?;

        texts.insert(section_id.clone(), revised_text);
        summaries.insert(section_id.clone(), revised_summary);
        texts.insert(next_section_id.clone(), patched_next_text);
        summaries.insert(next_section_id.clone(), patched_next_summary);
        if let Some(edits_json) = edits {
            repair_logs.push(edits_json);
        }
    }

    // One commit persists every revised section.
    cx.store.with_session(|session| {
        for section_id in ordered_ids.iter() {
            let Some(text) = texts.get(section_id) else {
                continue;
            };
            session.upsert_draft_section(
                &state.tenant_id,
                &state.run_id,
                &SectionId::new(section_id.clone()),
                text,
                summaries.get(section_id).map(String::as_str),
            )?;
        }
        Ok(())
    })?;

    let assembled: Vec<(OutlineSection, String)> = ordered_ids
        .iter()
        .filter_map(|section_id| {
            sections_by_id.get(section_id.as_str()).map(|section| {
                ((*section).clone(), texts.get(section_id).cloned().unwrap_or_default())
            })
        })
        .collect();
    state.draft_text = Some(assemble_draft(&state.user_query, &assembled));
    state.draft_version += 1;
    state.repair_edits.extend(repair_logs);
    Ok(())
}
