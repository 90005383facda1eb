// crates/draftgate-pipeline/src/stages/writer.rs
// ============================================================================
// Module: Writer Stage
// Description: Per-section drafting with strict citation placement.
// Purpose: Produce drafted sections whose every claim is pack-grounded.
// Dependencies: draftgate-core, draftgate-llm, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! Sections draft in outline order, each carrying the previous section's
//! micro-summary for narrative continuity. Every response passes the
//! citation resolution, placement, length, and summary validators before
//! anything persists; a failure anywhere fails the stage and no section of
//! this pass is committed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use draftgate_core::EvidenceSnippetRef;
use draftgate_core::JsonSchemaFormat;
use draftgate_core::LlmRequest;
use draftgate_core::OrchestratorState;
use draftgate_core::OutlineSection;
use draftgate_core::SectionId;
use draftgate_core::Stage;
use draftgate_core::core::text::validate_micro_summary;
use draftgate_core::core::text::validate_section_length;
use draftgate_core::core::text::validate_section_text;
use draftgate_llm::extract_json_payload;
use serde_json::Value;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// JSON schema for the drafted-section response format.
fn draft_section_schema() -> JsonSchemaFormat {
    JsonSchemaFormat {
        name: "draft_section".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "section_id": { "type": "string" },
                "section_text": { "type": "string" },
                "section_summary": { "type": "string" },
                "status": { "type": "string" },
            },
            "required": ["section_id", "section_text", "section_summary", "status"],
            "additionalProperties": false,
        }),
    }
}

// ============================================================================
// SECTION: Prompting
// ============================================================================

/// Truncates snippet text for the prompt payload.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let cleaned = text.trim();
    if cleaned.len() <= max_chars {
        return cleaned.to_string();
    }
    let mut end = max_chars;
    while end > 0 && !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", cleaned[.. end].trim_end())
}

/// Renders the snippet payload shown to the model.
fn snippet_payload(snippets: &[EvidenceSnippetRef]) -> Value {
    let items: Vec<Value> = snippets
        .iter()
        .map(|snippet| {
            json!({
                "snippet_id": snippet.snippet_id.as_str(),
                "text": truncate_chars(&snippet.text, 400),
            })
        })
        .collect();
    Value::Array(items)
}

/// Context for drafting one section.
struct SectionPrompt<'a> {
    /// Section being drafted.
    section: &'a OutlineSection,
    /// One-based position in the outline.
    index: usize,
    /// Total section count.
    total: usize,
    /// Previous section title.
    prev_title: Option<&'a str>,
    /// Next section title.
    next_title: Option<&'a str>,
    /// Prior micro-summary carried for continuity.
    prior_summary: Option<&'a str>,
}

/// Builds the drafting prompt for one section.
fn draft_prompt(
    state: &OrchestratorState,
    prompt: &SectionPrompt<'_>,
    snippets: &[EvidenceSnippetRef],
    min_words: usize,
) -> String {
    format!(
        "Draft a report section using ONLY the evidence snippets provided.\n\
         Return ONLY valid JSON with this schema:\n\
         {{\n  \"section_id\": \"...\",\n  \"section_text\": \"...\",\n  \"section_summary\": \"...\",\n  \"status\": \"ok\"\n}}\n\n\
         Report Title: {title}\n\
         Section {index} of {total}\n\
         Previous Section Title: {prev}\n\
         Current Section ID: {section_id}\n\
         Current Section Title: {section_title}\n\
         Current Section Goal: {goal}\n\
         Next Section Title: {next}\n\n\
         Prior section micro-summary (use this ONLY for narrative continuity, not for facts):\n\
         {prior}\n\n\
         Rules:\n\
         - Use ONLY the snippets provided for factual content.\n\
         - Section length MUST be at least {min_words} words.\n\
         - Every sentence that contains any factual claim MUST end with citation token(s).\n\
         - If a sentence cannot be supported by the provided snippets, rewrite it as a non-factual transition.\n\
         - Citation format: [CITE:snippet_id]\n\
         - Multiple citations must be separate tokens: [CITE:id1] [CITE:id2]\n\
         - Use the exact snippet_id values from the evidence list; do NOT shorten or truncate them.\n\
         - Citations must appear at the very end of the sentence, after the final punctuation.\n\
         - No citations spanning multiple sentences.\n\
         - Narrative transitions may be uncited, but must contain no facts, names, dates, numbers, or definitions.\n\
         - Do NOT include headings, bullet lists, or markdown in section_text.\n\
         - Do NOT include any commentary outside JSON.\n\n\
         Flow requirements:\n\
         - Start section_text with 1 to 2 short transition sentences that connect from the prior micro-summary.\n\
         - End section_text with 1 short bridge sentence that sets up the next section.\n\
         - Do NOT repeat long chunks from prior sections.\n\n\
         Micro-summary requirements (section_summary):\n\
         - Provide 1 to 3 sentences as plain text.\n\
         - No citations in section_summary.\n\
         - No new facts or numbers that are not already stated in section_text.\n\
         - The summary is for continuity only.\n\n\
         Evidence snippets (id + text):\n{snippets}",
        title = state.user_query,
        index = prompt.index,
        total = prompt.total,
        prev = prompt.prev_title.unwrap_or("NONE (this is the first section)"),
        section_id = prompt.section.section_id,
        section_title = prompt.section.title,
        goal = prompt.section.goal,
        next = prompt.next_title.unwrap_or("NONE (this is the last section)"),
        prior = prompt.prior_summary.unwrap_or("NONE"),
        snippets = serde_json::to_string_pretty(&snippet_payload(snippets))
            .unwrap_or_else(|_| "[]".to_string()),
    )
}

/// Generates and decodes one section draft.
fn generate_section(
    state: &OrchestratorState,
    cx: &StageContext,
    prompt: &SectionPrompt<'_>,
    snippets: &[EvidenceSnippetRef],
) -> Result<(String, String), PipelineError> {
    let llm = cx.clients.llm_client(state.llm_model.as_deref())?;
    let min_words = cx.config.draft.section_min_words;
    let max_tokens =
        u32::try_from(cx.config.draft.section_max_tokens.max(600)).unwrap_or(u32::MAX);
    let request = LlmRequest::new(draft_prompt(state, prompt, snippets, min_words))
        .with_system("You draft evidence-grounded sections and respond with strict JSON only.")
        .with_max_tokens(max_tokens)
        .with_temperature(0.3)
        .with_response_format(draft_section_schema());
    let response = llm.generate(&request)?;
    let payload = extract_json_payload(&response)
        .ok_or_else(|| PipelineError::validation("LLM draft did not return a JSON object"))?;
    let Some(map) = payload.as_object() else {
        return Err(PipelineError::validation("LLM draft did not return a JSON object"));
    };

    let section_id = map.get("section_id").and_then(Value::as_str).unwrap_or("").trim();
    if !section_id.is_empty() && section_id != prompt.section.section_id {
        return Err(PipelineError::validation(format!(
            "draft section_id mismatch: expected {} got {section_id}",
            prompt.section.section_id
        )));
    }
    let status = map
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if !status.is_empty() && status != "ok" {
        return Err(PipelineError::validation(format!("draft status not ok: {status}")));
    }
    let section_text = map
        .get("section_text")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::validation("draft section_text must be a string"))?;
    let section_summary = map
        .get("section_summary")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::validation("draft section_summary must be a string"))?;
    Ok((section_text.trim().to_string(), section_summary.trim().to_string()))
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Assembles the full report draft from drafted sections.
pub(crate) fn assemble_draft(
    user_query: &str,
    sections: &[(OutlineSection, String)],
) -> String {
    let mut lines: Vec<String> = vec![format!("# Research Report: {user_query}"), String::new()];
    for (section, text) in sections {
        lines.push(format!("## {}. {}", section.section_order, section.title));
        lines.push(String::new());
        if !text.is_empty() {
            lines.push(text.clone());
        }
        lines.push(String::new());
    }
    let mut assembled = lines.join("\n").trim().to_string();
    assembled.push('\n');
    assembled
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the writer stage.
///
/// # Errors
///
/// Returns [`PipelineError`] when a section fails any citation, length, or
/// summary rule; nothing persists in that case.
pub fn writer_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let outline = state
        .outline
        .clone()
        .ok_or_else(|| PipelineError::validation("outline not found in state"))?;
    let total = outline.sections.len();

    let mut drafted: Vec<(OutlineSection, String, String)> = Vec::with_capacity(total);
    let mut prior_summary: Option<String> = None;

    for (index, section) in outline.sections.iter().enumerate() {
        if index % 3 == 0 {
            cx.emit(
                state,
                Stage::Draft,
                "progress",
                json!({
                    "section_index": index + 1,
                    "total_sections": total,
                    "section_id": section.section_id,
                }),
            )?;
        }

        let snippets: Vec<EvidenceSnippetRef> =
            state.section_pack(&section.section_id).to_vec();
        cx.emit(
            state,
            Stage::Draft,
            "draft.section_started",
            json!({
                "section_id": section.section_id,
                "snippet_count": snippets.len(),
            }),
        )?;

        let prompt = SectionPrompt {
            section,
            index: index + 1,
            total,
            prev_title: index.checked_sub(1).map(|prev| outline.sections[prev].title.as_str()),
            next_title: outline.sections.get(index + 1).map(|next| next.title.as_str()),
            prior_summary: prior_summary.as_deref(),
        };
        let (raw_text, summary) = generate_section(state, cx, &prompt, &snippets)?;

        let allowed: BTreeSet<String> =
            snippets.iter().map(|snippet| snippet.snippet_id.as_str().to_string()).collect();
        let text = validate_section_text(&raw_text, &allowed)?;
        validate_section_length(&text, cx.config.draft.section_min_words)?;
        validate_micro_summary(&summary)?;

        cx.emit(
            state,
            Stage::Draft,
            "draft.section_completed",
            json!({ "section_id": section.section_id, "status": "ok" }),
        )?;
        drafted.push((section.clone(), text, summary.clone()));
        prior_summary = Some(summary);
    }

    // One commit persists every drafted section.
    cx.store.with_session(|session| {
        for (section, text, summary) in &drafted {
            session.upsert_draft_section(
                &state.tenant_id,
                &state.run_id,
                &SectionId::new(section.section_id.clone()),
                text,
                Some(summary),
            )?;
        }
        Ok(())
    })?;

    let assembled: Vec<(OutlineSection, String)> = drafted
        .into_iter()
        .map(|(section, text, _)| (section, text))
        .collect();
    state.draft_text = Some(assemble_draft(&state.user_query, &assembled));
    state.draft_version += 1;
    Ok(())
}
