use serde::Deserialize;
use serde_json::Value;

use super::MappingError;
use crate::pipeline::llm::clean_completion;

/// Decode an LLM completion as JSON after stripping artifacts and fences.
pub fn parse_completion_json(raw: &str) -> Result<Value, MappingError> {
    let cleaned = clean_completion(raw);
    if cleaned.is_empty() {
        return Err(MappingError::MalformedResponse("empty completion".into()));
    }
    serde_json::from_str(&cleaned).map_err(|e| MappingError::JsonParsing(e.to_string()))
}

/// A JSON array of strings, or a bare string as a one-element list.
/// Non-string items and blank entries are dropped; casing is left alone.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![],
    }
}

/// Parse a term-list completion; malformed output is an empty list.
pub fn parse_term_list(raw: &str) -> Vec<String> {
    match parse_completion_json(raw) {
        Ok(value) => string_list(&value),
        Err(e) => {
            tracing::debug!(error = %e, "Term list not parseable");
            vec![]
        }
    }
}

/// Yes/no answer: JSON `true`/`false`, otherwise a substring heuristic on
/// the normalized text.
pub fn parse_yes_no(raw: &str) -> bool {
    let normalized = clean_completion(raw)
        .to_lowercase()
        .replace(['"', '\''], "")
        .trim()
        .to_string();
    match serde_json::from_str::<Value>(&normalized) {
        Ok(Value::Bool(b)) => b,
        _ => normalized.contains("true"),
    }
}

/// Parse an array leniently, skipping items that fail to deserialize.
pub fn parse_array_lenient<T: for<'de> Deserialize<'de>>(value: &Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => vec![],
    }
}

/// Non-blank string field of a JSON object.
pub fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
