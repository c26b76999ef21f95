//! Tolerant JSON extraction from model output
//!
//! Models wrap JSON in prose or markdown fences more often than not. Tried in
//! order: the whole text, a ```` ```json ```` fence, any fence, then the span
//! from the first `{` to the last `}`.

use serde_json::Value;

/// Pull a JSON value out of free-form model output
#[must_use]
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let fenced = fenced_block(raw, "```json").or_else(|| fenced_block(raw, "```"));
    if let Some(block) = fenced {
        if let Ok(value) = serde_json::from_str(block) {
            return Some(value);
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn fenced_block<'a>(raw: &'a str, opener: &str) -> Option<&'a str> {
    let start = raw.find(opener)? + opener.len();
    let len = raw[start..].find("```")?;
    Some(raw[start..start + len].trim())
}
