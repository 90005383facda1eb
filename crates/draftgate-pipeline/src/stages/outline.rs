// crates/draftgate-pipeline/src/stages/outline.rs
// ============================================================================
// Module: Outline Stage
// Description: LLM outline generation with one corrective round.
// Purpose: Produce the validated section plan every later stage keys on.
// Dependencies: draftgate-core, draftgate-llm, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! The model gets the question plus a source digest and must answer with
//! strict JSON. The payload normalizes (canonical intro/conclusion ids,
//! renumbered orders) and validates against the structural rules; on
//! failure, one corrective call carries the full violated-rule list back to
//! the model. A second failure fails the stage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use draftgate_core::LlmRequest;
use draftgate_core::Outline;
use draftgate_core::OrchestratorState;
use draftgate_core::SourceRef;
use draftgate_core::Stage;
use draftgate_core::normalize_outline;
use draftgate_core::section_count_bounds;
use draftgate_core::validate_outline;
use draftgate_llm::extract_json_payload;
use serde_json::Value;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Prompts
// ============================================================================

/// Renders the source digest lines included in outline prompts.
fn source_lines(sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        return "- (no sources available)".to_string();
    }
    let mut lines = Vec::new();
    for source in sources.iter().take(12) {
        let year =
            source.year.map_or_else(|| "n.d.".to_string(), |year| year.to_string());
        let mut line = format!("- {} ({year})", source.title);
        if let Some(abstract_text) = &source.abstract_text {
            let mut digest =
                abstract_text.trim().split_whitespace().collect::<Vec<&str>>().join(" ");
            if digest.len() > 220 {
                let mut end = 220;
                while end > 0 && !digest.is_char_boundary(end) {
                    end -= 1;
                }
                digest.truncate(end);
                digest.push_str("...");
            }
            if !digest.is_empty() {
                line.push_str(": ");
                line.push_str(&digest);
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Shared schema block shown in both prompts.
const OUTLINE_SCHEMA_BLOCK: &str = "{\n  \"sections\": [\n    {\n      \"section_id\": \"intro\",\n      \"title\": \"Introduction\",\n      \"goal\": \"2-3 sentences.\",\n      \"key_points\": [\"...\", \"...\"],\n      \"suggested_evidence_themes\": [\"...\"],\n      \"section_order\": 1\n    }\n  ]\n}";

/// Builds the initial outline prompt.
fn outline_prompt(state: &OrchestratorState, min_sections: usize, max_sections: usize) -> String {
    format!(
        "Create a structured report outline grounded in the sources below.\n\
         Return ONLY valid JSON with this schema:\n{OUTLINE_SCHEMA_BLOCK}\n\n\
         Question: {question}\n\n\
         Sources:\n{sources}\n\n\
         Rules:\n\
         - Total sections should be {min_sections} to {max_sections}\n\
         - Introduction must be first and Conclusion must be last\n\
         - Section titles must be unique\n\
         - Each section must include 6-10 key_points\n\
         - suggested_evidence_themes should be keywords/topics\n\
         - If too few sources, use fewer sections but keep intro+conclusion\n\
         - Do not include markdown, no backticks, no commentary\n",
        question = state.user_query,
        sources = source_lines(&state.retrieved_sources),
    )
}

/// Builds the corrective prompt listing every violated rule.
fn repair_prompt(
    state: &OrchestratorState,
    outline: &Outline,
    errors: &[String],
    min_sections: usize,
    max_sections: usize,
) -> String {
    let violations =
        errors.iter().map(|err| format!("- {err}")).collect::<Vec<String>>().join("\n");
    let previous = serde_json::to_string_pretty(outline).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Your JSON failed validation for these reasons:\n{violations}\n\n\
         Return corrected JSON matching the schema exactly.\n\
         Return ONLY valid JSON with this schema:\n{OUTLINE_SCHEMA_BLOCK}\n\n\
         Question: {question}\n\
         Required section count: {min_sections} to {max_sections}\n\n\
         Previous JSON:\n{previous}\n\n\
         Do not include markdown, no backticks, no commentary.\n",
        question = state.user_query,
    )
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Decodes an outline from an extracted payload; bare arrays are wrapped.
fn outline_from_payload(payload: Value) -> Option<Outline> {
    let wrapped = match payload {
        Value::Array(sections) => json!({ "sections": sections }),
        other => other,
    };
    let outline: Outline = serde_json::from_value(wrapped).ok()?;
    (!outline.sections.is_empty()).then_some(outline)
}

/// Issues one outline call and decodes the response.
fn request_outline(
    cx: &StageContext,
    state: &OrchestratorState,
    prompt: String,
    system: &str,
    temperature: f32,
) -> Result<Option<Outline>, PipelineError> {
    let llm = cx.clients.llm_client(state.llm_model.as_deref())?;
    let request = LlmRequest::new(prompt)
        .with_system(system)
        .with_max_tokens(1_400)
        .with_temperature(temperature);
    let response = llm.generate(&request)?;
    Ok(extract_json_payload(&response).and_then(outline_from_payload))
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the outline stage.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] when generation fails twice or the
/// corrected outline still violates the rules.
pub fn outline_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    let source_count = state.retrieved_sources.len();
    let (min_sections, max_sections) = section_count_bounds(source_count);

    let generated = request_outline(
        cx,
        state,
        outline_prompt(state, min_sections, max_sections),
        "You design grounded report outlines as strict JSON.",
        0.3,
    )?
    .ok_or_else(|| PipelineError::validation("LLM outline generation failed"))?;

    let mut outline = normalize_outline(&generated);
    let mut errors = validate_outline(&outline, source_count);
    if !errors.is_empty() {
        let corrected = request_outline(
            cx,
            state,
            repair_prompt(state, &outline, &errors, min_sections, max_sections),
            "You correct report outlines as strict JSON.",
            0.2,
        )?
        .ok_or_else(|| {
            PipelineError::validation(format!(
                "LLM outline validation failed: {}",
                errors.iter().take(6).cloned().collect::<Vec<String>>().join(", ")
            ))
        })?;
        outline = normalize_outline(&corrected);
        errors = validate_outline(&outline, source_count);
        if !errors.is_empty() {
            return Err(PipelineError::validation(format!(
                "LLM outline validation failed: {}",
                errors.iter().take(6).cloned().collect::<Vec<String>>().join(", ")
            )));
        }
    }

    cx.store
        .with_session(|session| session.replace_outline(&state.tenant_id, &state.run_id, &outline))?;
    cx.emit(
        state,
        Stage::Outline,
        "outline.created",
        json!({
            "run_id": state.run_id.as_str(),
            "section_count": outline.sections.len(),
        }),
    )?;
    state.outline = Some(outline);
    Ok(())
}
