// crates/draftgate-llm/src/payload.rs
// ============================================================================
// Module: Completion Payload Extraction
// Description: Tolerant JSON extraction from model completions.
// Purpose: Recover structured payloads from fenced or noisy output.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Models asked for strict JSON still wrap it in markdown fences or lead-in
//! prose often enough that every call site funnels responses through this
//! extractor: try the whole text, then the fenced block, then the outermost
//! brace or bracket span. Callers treat `None` as a schema failure and
//! decide whether a corrective call is warranted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Strips one ```...``` fence (with optional `json` tag) when present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    match rest.rfind("```") {
        Some(end) => rest[.. end].trim(),
        None => rest.trim(),
    }
}

/// Extracts the first JSON object or array from a completion.
///
/// Returns `None` when no parseable payload exists.
#[must_use]
pub fn extract_json_payload(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = strip_code_fence(text);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    let object_start = cleaned.find('{');
    let array_start = cleaned.find('[');
    let start = match (object_start, array_start) {
        (Some(object), Some(array)) => object.min(array),
        (Some(object), None) => object,
        (None, Some(array)) => array,
        (None, None) => return None,
    };
    let end = if cleaned[start ..].starts_with('{') {
        cleaned.rfind('}')?
    } else {
        cleaned.rfind(']')?
    };
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start ..= end]).ok()
}
