//! Structured decoding of generated text.
//!
//! Models asked for JSON frequently wrap it in reasoning tags, code fences,
//! or surrounding prose. Decoding runs an ordered fallback chain:
//!
//! 1. strict parse of the (reasoning-stripped) text
//! 2. contents of the first fenced code block
//! 3. the outermost embedded JSON object or array
//!
//! If every stage fails the caller gets a [`GenerationError`]; missing
//! required fields are never silently defaulted.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors from decoding structured generation output.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("undecodable structured payload: {reason} (content: {snippet})")]
    Undecodable { reason: String, snippet: String },
}

/// Decode a structured payload from raw model output.
pub fn decode_structured<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let text = strip_reasoning(raw);
    let text = text.trim();

    let strict = match serde_json::from_str(text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(fenced) = extract_fenced(text) {
        if let Ok(value) = serde_json::from_str(fenced.trim()) {
            return Ok(value);
        }
    }

    if let Some(embedded) = extract_embedded(text) {
        if let Ok(value) = serde_json::from_str(embedded) {
            return Ok(value);
        }
    }

    Err(GenerationError::Undecodable {
        reason: strict.to_string(),
        snippet: snippet(text),
    })
}

/// Remove `<think>...</think>` blocks some models emit before the answer.
pub fn strip_reasoning(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("<think>") {
        result.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => {
                // Unterminated tag: drop everything after it.
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

/// The contents of the first fenced code block, if any.
fn extract_fenced(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the language tag line ("json", etc.).
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// The outermost `{...}` or `[...]` span embedded in surrounding text.
fn extract_embedded(text: &str) -> Option<&str> {
    let object = span(text, '{', '}');
    let array = span(text, '[', ']');

    match (object, array) {
        (Some(o), Some(a)) => {
            // Prefer whichever opens first.
            if text.find('{') < text.find('[') {
                Some(o)
            } else {
                Some(a)
            }
        }
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() > MAX {
        let truncated: String = text.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
