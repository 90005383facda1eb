// crates/draftgate-pipeline/src/stages/evaluate.rs
// ============================================================================
// Module: Evaluator Stage
// Description: Per-section grounding review with issue normalization.
// Purpose: Decide between export and the single repair round.
// Dependencies: draftgate-core, draftgate-llm, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! Each drafted section is reviewed against its evidence pack. Normalization
//! drops unknown problem codes, coerces sentence indexes, and filters
//! citations to the pack; any surviving issue forces the verdict to `fail`.
//! One failing section makes the aggregate decision `CONTINUE_REWRITE`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use draftgate_core::EvaluatorDecision;
use draftgate_core::EvidenceSnippetRef;
use draftgate_core::IssueKind;
use draftgate_core::LlmRequest;
use draftgate_core::OrchestratorState;
use draftgate_core::OutlineSection;
use draftgate_core::ReviewIssue;
use draftgate_core::ReviewVerdict;
use draftgate_core::SectionId;
use draftgate_core::SnippetId;
use draftgate_core::Stage;
use draftgate_llm::extract_json_payload;
use serde_json::Value;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Issue Normalization
// ============================================================================

/// Normalizes one raw issue; unknown problem codes drop the issue.
pub(crate) fn normalize_issue(item: &Value, allowed_ids: &BTreeSet<String>) -> Option<ReviewIssue> {
    let map = item.as_object()?;
    let problem = IssueKind::parse(
        map.get("problem").and_then(Value::as_str).unwrap_or("").trim().to_lowercase().as_str(),
    )?;
    let sentence_index = map
        .get("sentence_index")
        .and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_str().and_then(|raw| raw.trim().parse::<u64>().ok()))
        })
        .and_then(|index| usize::try_from(index).ok())
        .unwrap_or(0);
    let mut notes = map.get("notes").and_then(Value::as_str).unwrap_or("").trim().to_string();
    let citations_raw: Vec<String> = map
        .get("citations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let citations: Vec<SnippetId> = citations_raw
        .iter()
        .filter(|id| allowed_ids.contains(*id))
        .map(|id| SnippetId::new(id.clone()))
        .collect();
    if citations.len() != citations_raw.len() && notes.is_empty() {
        notes = "Filtered invalid citations.".to_string();
    }
    Some(ReviewIssue {
        sentence_index,
        problem,
        notes,
        citations,
    })
}

// ============================================================================
// SECTION: Review Call
// ============================================================================

/// Renders the snippet payload shown to the reviewer.
fn snippet_payload(snippets: &[EvidenceSnippetRef]) -> Value {
    let items: Vec<Value> = snippets
        .iter()
        .map(|snippet| {
            let mut text = snippet.text.trim().to_string();
            if text.len() > 800 {
                let mut end = 800;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
                text.push_str("...");
            }
            json!({ "snippet_id": snippet.snippet_id.as_str(), "text": text })
        })
        .collect();
    Value::Array(items)
}

/// Builds the review prompt for one section.
fn review_prompt(
    section: &OutlineSection,
    section_text: &str,
    snippets: &[EvidenceSnippetRef],
) -> String {
    format!(
        "Evaluate the drafted section for citation structure and grounding.\n\
         Return ONLY valid JSON with this schema:\n\
         {{\n  \"section_id\": \"...\",\n  \"verdict\": \"pass\" | \"fail\",\n  \"issues\": [\n    {{\n      \"sentence_index\": 0,\n      \"problem\": \"unsupported|contradicted|missing_citation|invalid_citation|not_in_pack|overstated\",\n      \"notes\": \"...\",\n      \"citations\": [\"snippet_id_1\"]\n    }}\n  ]\n}}\n\n\
         Section ID: {section_id}\n\
         Title: {title}\n\n\
         Drafted section text:\n{section_text}\n\n\
         Evidence snippets (id + text):\n{snippets}\n\n\
         Rules:\n\
         - Every factual sentence must have at least one [CITE:...] at the end.\n\
         - Transitional sentences may be uncited.\n\
         - Every cited snippet_id must exist and be in the evidence pack.\n\
         - Verify cited snippets support the sentence.\n\
         - Never invent snippet_ids.\n\
         - Do not include markdown, no backticks, no commentary.\n",
        section_id = section.section_id,
        title = section.title,
        snippets = serde_json::to_string_pretty(&snippet_payload(snippets))
            .unwrap_or_else(|_| "[]".to_string()),
    )
}

/// Reviews one section, returning the verdict and normalized issues.
fn evaluate_section(
    state: &OrchestratorState,
    cx: &StageContext,
    section: &OutlineSection,
    section_text: &str,
    snippets: &[EvidenceSnippetRef],
) -> Result<(ReviewVerdict, Vec<ReviewIssue>), PipelineError> {
    let llm = cx.clients.llm_client(state.llm_model.as_deref())?;
    let request = LlmRequest::new(review_prompt(section, section_text, snippets))
        .with_system("You are a strict citation validator and fact checker for research drafts.")
        .with_max_tokens(1_400)
        .with_temperature(0.2);
    let response = llm.generate(&request)?;
    let payload = extract_json_payload(&response)
        .ok_or_else(|| PipelineError::validation("evaluator did not return a JSON object"))?;
    let Some(map) = payload.as_object() else {
        return Err(PipelineError::validation("evaluator did not return a JSON object"));
    };

    let section_id = map.get("section_id").and_then(Value::as_str).unwrap_or("").trim();
    if !section_id.is_empty() && section_id != section.section_id {
        return Err(PipelineError::validation(format!(
            "evaluator section_id mismatch: expected {} got {section_id}",
            section.section_id
        )));
    }
    let verdict_raw = map
        .get("verdict")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let mut verdict = ReviewVerdict::parse(&verdict_raw).ok_or_else(|| {
        PipelineError::validation(format!("evaluator verdict invalid: {verdict_raw}"))
    })?;

    let allowed_ids: BTreeSet<String> =
        snippets.iter().map(|snippet| snippet.snippet_id.as_str().to_string()).collect();
    let issues: Vec<ReviewIssue> = map
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| normalize_issue(item, &allowed_ids)).collect())
        .unwrap_or_default();
    if !issues.is_empty() {
        verdict = ReviewVerdict::Fail;
    }
    Ok((verdict, issues))
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the evaluator stage.
///
/// # Errors
///
/// Returns [`PipelineError`] when drafts are missing or a review cannot be
/// obtained.
pub fn evaluate_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let outline = state
        .outline
        .clone()
        .filter(|outline| !outline.sections.is_empty())
        .ok_or_else(|| PipelineError::validation("outline is required for evaluation"))?;

    let drafts = cx
        .store
        .with_session(|session| session.load_draft_sections(&state.tenant_id, &state.run_id))?;
    if drafts.is_empty() {
        return Err(PipelineError::validation("draft sections not found for evaluation"));
    }

    let mut pass_count = 0_usize;
    let mut fail_count = 0_usize;
    let mut reviews: Vec<(SectionId, ReviewVerdict, Vec<ReviewIssue>)> = Vec::new();

    for section in &outline.sections {
        let draft = drafts.get(&section.section_id).ok_or_else(|| {
            PipelineError::validation(format!("draft section missing for {}", section.section_id))
        })?;
        let snippets: Vec<EvidenceSnippetRef> =
            state.section_pack(&section.section_id).to_vec();

        cx.emit(
            state,
            Stage::Evaluate,
            "evaluate.section_started",
            json!({ "section_id": section.section_id }),
        )?;
        let (verdict, issues) = evaluate_section(state, cx, section, &draft.text, &snippets)?;
        cx.emit(
            state,
            Stage::Evaluate,
            "evaluate.section_completed",
            json!({ "section_id": section.section_id, "verdict": verdict.as_str() }),
        )?;

        match verdict {
            ReviewVerdict::Pass => pass_count += 1,
            ReviewVerdict::Fail => fail_count += 1,
        }
        reviews.push((SectionId::new(section.section_id.clone()), verdict, issues));
    }

    cx.store.with_session(|session| {
        for (section_id, verdict, issues) in &reviews {
            session.upsert_section_review(
                &state.tenant_id,
                &state.run_id,
                section_id,
                *verdict,
                issues,
            )?;
        }
        Ok(())
    })?;

    cx.emit(
        state,
        Stage::Evaluate,
        "evaluate.summary",
        json!({ "pass_count": pass_count, "fail_count": fail_count }),
    )?;

    if fail_count > 0 {
        state.evaluator_decision = Some(EvaluatorDecision::ContinueRewrite);
        state.evaluation_reason = Some(format!("{fail_count} section(s) failed evaluation"));
    } else {
        state.evaluator_decision = Some(EvaluatorDecision::StopSuccess);
        state.evaluation_reason = Some("All sections passed evaluation".to_string());
    }
    Ok(())
}
