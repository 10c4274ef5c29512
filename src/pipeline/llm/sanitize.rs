//! Post-LLM output cleanup.
//!
//! Strips model artifacts (thinking tags, unused tokens) and Markdown code
//! fences so the mapping nodes can hand the remainder to `serde_json`.

use std::sync::LazyLock;

use regex::Regex;

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)```[a-z]*[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```").expect("valid regex")
});

/// Strip model-specific artifacts from raw LLM output.
///
/// Handles:
/// 1. `<think>...</think>` reasoning blocks
/// 2. Gemma thinking prefixes (`<unusedN>thought\n...`)
/// 3. Stray `<unusedN>` tokens
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = THINK_BLOCK_RE.replace_all(raw, "").to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }

    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();

    text.trim().to_string()
}

/// Return the payload of the first ```` ```json ```` / ```` ``` ```` block, or the
/// trimmed input when there is no complete fence. A dangling opening fence
/// (truncated output) is dropped.
pub fn strip_code_fences(text: &str) -> String {
    if let Some(caps) = FENCED_BLOCK_RE.captures(text) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Full cleanup applied to every completion before JSON decoding.
pub fn clean_completion(raw: &str) -> String {
    strip_code_fences(&sanitize_llm_output(raw))
}
