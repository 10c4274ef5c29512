use serde_json::Value;

use super::caller::PromptCaller;
use super::confidence::parse_confidence;
use super::parser::{non_empty_str, parse_completion_json};
use super::prompt::{PromptContext, PromptTemplate};
use super::state::{MappingState, RankedTerm, StateUpdate, ValidatedMapping};

/// Confirm the top-ranked candidate of every term against the survey text.
///
/// Produces exactly one entry per ranked term. Any malformed validation
/// falls back to the top candidate with its ranking confidence.
pub fn validate_mappings(state: &MappingState, caller: &PromptCaller<'_>) -> StateUpdate {
    let mappings = state
        .ranked_mappings
        .iter()
        .map(|ranked| validate_term(&state.text, ranked, caller))
        .collect();
    StateUpdate::Validated { mappings }
}

/// Validation disabled: every term gets the fallback result directly.
pub fn promote_top_candidates(state: &MappingState) -> StateUpdate {
    StateUpdate::Validated {
        mappings: top_candidate_mappings(&state.ranked_mappings),
    }
}

/// The fallback rule alone: top candidate, or a null match for an empty term.
pub fn top_candidate_mappings(ranked: &[RankedTerm]) -> Vec<ValidatedMapping> {
    ranked
        .iter()
        .map(|ranked| match ranked.ranked_candidates.first() {
            Some(top) => ValidatedMapping::from_top_candidate(&ranked.original, top),
            None => ValidatedMapping::no_match(&ranked.original),
        })
        .collect()
}

fn validate_term(text: &str, ranked: &RankedTerm, caller: &PromptCaller<'_>) -> ValidatedMapping {
    let Some(top) = ranked.ranked_candidates.first() else {
        return ValidatedMapping::no_match(&ranked.original);
    };

    let context = PromptContext::new()
        .with("survey_text", text)
        .with("code", top.code.as_str())
        .with("term", top.term.as_str());

    let parsed = caller
        .complete(PromptTemplate::ValidateMapping, &context)
        .and_then(|raw| parse_completion_json(&raw));

    match parsed {
        Ok(value) => match interpret_validation(&ranked.original, &value) {
            Some(validated) => validated,
            None => {
                tracing::warn!(term = %ranked.original, "Validation empty or malformed, using top-ranked fallback");
                ValidatedMapping::from_top_candidate(&ranked.original, top)
            }
        },
        Err(e) => {
            tracing::warn!(term = %ranked.original, error = %e, "Validation failed, using top-ranked fallback");
            ValidatedMapping::from_top_candidate(&ranked.original, top)
        }
    }
}

/// A usable validation needs a code, a term and a parseable confidence.
fn interpret_validation(original: &str, value: &Value) -> Option<ValidatedMapping> {
    let code = non_empty_str(value, "best_match_code")?;
    let term = non_empty_str(value, "best_match_term")?;
    let confidence = parse_confidence(value.get("confidence")?).ok()?;
    Some(ValidatedMapping {
        original: original.to_string(),
        best_match_code: Some(code.to_string()),
        best_match_term: Some(term.to_string()),
        confidence,
    })
}
