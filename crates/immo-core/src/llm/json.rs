//! Getting structured data out of model output.

use serde_json::Value;

use crate::error::{GenerationError, Result};

/// Longest excerpt of a bad response quoted back in an error.
const EXCERPT_LEN: usize = 200;

/// Parse the JSON document contained in a model response.
///
/// Accepts a bare document, one wrapped in a Markdown code fence, or one
/// embedded in surrounding prose.
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Ok(value);
        }
    }

    if let Some(embedded) = outermost_document(trimmed) {
        if let Ok(value) = serde_json::from_str(embedded) {
            return Ok(value);
        }
    }

    Err(GenerationError::malformed(format!(
        "response is not valid JSON: {}",
        excerpt(trimmed)
    )))
}

/// Canonicalize a list-shaped response.
///
/// Providers return either the bare array or an object wrapping it, usually
/// under `key`. Both become the array.
pub fn normalize_list(value: Value, key: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove(key) {
                return Ok(items);
            }
            if map.len() == 1 {
                if let Some((_, Value::Array(items))) = map.into_iter().next() {
                    return Ok(items);
                }
            }
            Err(GenerationError::malformed(format!(
                "expected a JSON array or an object with a \"{key}\" array"
            )))
        }
        other => Err(GenerationError::malformed(format!(
            "expected a JSON array of {key}, got {}",
            type_name(&other)
        ))),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn outermost_document(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LEN {
        return text.to_owned();
    }
    let cut: String = text.chars().take(EXCERPT_LEN).collect();
    format!("{cut}...")
}
