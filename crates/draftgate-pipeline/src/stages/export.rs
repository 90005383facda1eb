// crates/draftgate-pipeline/src/stages/export.rs
// ============================================================================
// Module: Exporter Stage
// Description: Report assembly, footnote substitution, artifact upsert.
// Purpose: Publish the run's report exactly once and finish the run.
// Dependencies: draftgate-core, draftgate-store-sqlite
// ============================================================================

//! ## Overview
//! Export reads the persisted sections and drafts, assembles the Markdown
//! report, replaces citation tokens with sequential footnotes, and upserts
//! the `report_md` artifact. The coordinator performs the terminal
//! transition once the stage returns, so the `stage_finish` event precedes
//! the `state` event. Missing drafts become warnings under
//! `usage.warnings`; the run still succeeds, flagged as such.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use draftgate_core::OrchestratorState;
use draftgate_core::SourceRef;
use draftgate_core::Stage;
use draftgate_core::core::text::find_citation_tokens;
use serde_json::json;

use crate::context::StageContext;
use crate::error::PipelineError;

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Assembles the report body from persisted sections and drafts.
fn assemble_report(
    state: &OrchestratorState,
    sections: &[draftgate_core::RunSection],
    drafts: &BTreeMap<String, draftgate_core::DraftSection>,
) -> Result<(String, Vec<String>), PipelineError> {
    let mut warnings = Vec::new();
    if !sections.is_empty() && !drafts.is_empty() {
        let mut lines: Vec<String> =
            vec![format!("# Research Report: {}", state.user_query), String::new()];
        for section in sections {
            lines.push(format!("## {}. {}", section.section_order, section.title));
            lines.push(String::new());
            match drafts.get(section.section_id.as_str()) {
                Some(draft) if !draft.text.trim().is_empty() => {
                    lines.push(draft.text.trim().to_string());
                }
                _ => {
                    warnings
                        .push(format!("Missing draft for section_id={}.", section.section_id));
                    lines.push("_Draft missing for this section._".to_string());
                }
            }
            lines.push(String::new());
        }
        let mut markdown = lines.join("\n").trim().to_string();
        markdown.push('\n');
        return Ok((markdown, warnings));
    }

    if sections.is_empty() {
        warnings.push("run_sections missing; assembled from draft text.".to_string());
    }
    if drafts.is_empty() {
        warnings.push("draft_sections missing; assembled from draft text.".to_string());
    }
    if let Some(draft_text) = &state.draft_text {
        let mut markdown = draft_text.trim().to_string();
        markdown.push('\n');
        return Ok((markdown, warnings));
    }
    Err(PipelineError::validation("no draft content available for export"))
}

// ============================================================================
// SECTION: Footnotes
// ============================================================================

/// Formats one footnote line for a source.
fn footnote_line(number: usize, source: &SourceRef) -> String {
    let mut authors = source.authors.iter().take(3).cloned().collect::<Vec<String>>().join(", ");
    if authors.is_empty() {
        authors = "Unknown".to_string();
    } else if source.authors.len() > 3 {
        authors.push_str(" et al.");
    }
    let year = source.year.map_or_else(|| "n.d.".to_string(), |year| year.to_string());
    let mut line = format!("[^{number}]: {authors}. {}. {year}.", source.title);
    if let Some(url) = &source.url {
        line.push_str(&format!(" [{url}]({url})"));
    }
    line
}

/// Replaces citation tokens with sequential footnotes and appends the
/// references list.
fn apply_citation_footnotes(state: &OrchestratorState, markdown: &str) -> String {
    let source_by_snippet: BTreeMap<&str, &SourceRef> = state
        .evidence_snippets
        .iter()
        .filter_map(|snippet| {
            state
                .retrieved_sources
                .iter()
                .find(|source| source.source_id == snippet.source_id)
                .map(|source| (snippet.snippet_id.as_str(), source))
        })
        .collect();

    let tokens = find_citation_tokens(markdown);
    if tokens.is_empty() {
        return markdown.to_string();
    }

    let mut assigned: BTreeMap<String, usize> = BTreeMap::new();
    let mut footnotes: Vec<String> = Vec::new();
    let mut rewritten = String::with_capacity(markdown.len());
    let mut cursor = 0_usize;
    for token in tokens {
        rewritten.push_str(&markdown[cursor .. token.start]);
        match source_by_snippet.get(token.snippet_id.as_str()) {
            Some(source) => {
                let number = match assigned.get(&token.snippet_id) {
                    Some(existing) => *existing,
                    None => {
                        let number = footnotes.len() + 1;
                        assigned.insert(token.snippet_id.clone(), number);
                        footnotes.push(footnote_line(number, source));
                        number
                    }
                };
                rewritten.push_str(&format!("[^{number}]"));
            }
            // Tokens without a resolvable source stay literal.
            None => rewritten.push_str(&markdown[token.start .. token.end]),
        }
        cursor = token.end;
    }
    rewritten.push_str(&markdown[cursor ..]);

    if !footnotes.is_empty() {
        rewritten.push_str("\n\n---\n\n## References\n\n");
        rewritten.push_str(&footnotes.join("\n\n"));
    }
    rewritten
}

// ============================================================================
// SECTION: Stage Body
// ============================================================================

/// Runs the exporter stage.
///
/// # Errors
///
/// Returns [`PipelineError`] when no draft content exists or persistence
/// fails.
pub fn export_stage(
    state: &mut OrchestratorState,
    cx: &StageContext,
) -> Result<(), PipelineError> {
    cx.emit(
        state,
        Stage::Export,
        "export.started",
        json!({ "run_id": state.run_id.as_str() }),
    )?;

    let (sections, drafts) = cx.store.with_session(|session| {
        let sections = session.list_run_sections(&state.tenant_id, &state.run_id)?;
        let drafts = session.load_draft_sections(&state.tenant_id, &state.run_id)?;
        Ok((sections, drafts))
    })?;

    let (assembled, mut warnings) = assemble_report(state, &sections, &drafts)?;
    let markdown = apply_citation_footnotes(state, &assembled);
    warnings.extend(state.warnings.iter().cloned());

    let blob_ref = format!("inline://runs/{}/report.md", state.run_id);
    cx.store.with_session(|session| {
        let run = session.get_run_required(&state.tenant_id, &state.run_id)?;
        session.upsert_artifact(
            &state.tenant_id,
            &run.project_id,
            &state.run_id,
            "report_md",
            &blob_ref,
            "text/markdown",
            markdown.len(),
            &json!({
                "filename": "report.md",
                "markdown": markdown,
            }),
        )?;
        if !warnings.is_empty() {
            let mut usage = run.usage.clone();
            if let Some(map) = usage.as_object_mut() {
                map.insert("warnings".to_string(), json!(warnings));
            }
            session.update_run_usage(&state.tenant_id, &state.run_id, &usage)?;
        }
        Ok(())
    })?;

    let completion_event = if warnings.is_empty() {
        "run.succeeded"
    } else {
        "run.succeeded_with_warnings"
    };
    emit_terminal(state, cx, "export.completed", json!({ "artifact_types": ["report_md"] }))?;
    emit_terminal(state, cx, completion_event, json!({ "warnings": warnings }))?;

    state.artifacts = vec!["report_md".to_string()];
    state.warnings = warnings;
    Ok(())
}

/// Emits an export completion event, tolerant of a finished run on replay.
fn emit_terminal(
    state: &OrchestratorState,
    cx: &StageContext,
    event_type: &str,
    payload: serde_json::Value,
) -> Result<(), PipelineError> {
    let event = draftgate_core::NewRunEvent {
        tenant_id: state.tenant_id.clone(),
        run_id: state.run_id.clone(),
        event_type: event_type.to_string(),
        stage: Some(Stage::Export),
        level: draftgate_core::EventLevel::Info,
        message: format!("{event_type}: export"),
        payload,
        allow_finished: true,
    };
    cx.events.append(&event)?;
    Ok(())
}
