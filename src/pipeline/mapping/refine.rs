use serde_json::Value;

use super::caller::PromptCaller;
use super::confidence::parse_confidence;
use super::parser::{non_empty_str, parse_completion_json};
use super::prompt::{PromptContext, PromptTemplate};
use super::state::{MappingState, RefinedMapping, Refinement, StateUpdate, ValidatedMapping};
use crate::pipeline::ontology::{ConceptInfo, OntologyClient};

/// Single-shot ancestor refinement of the top validated mapping.
///
/// Walks code → concept → ancestors → ancestor details on the ontology
/// service and lets the LLM pick a broader concept. Any missing link yields
/// an empty refinement; that is a normal outcome.
pub fn refine_with_ancestors(
    state: &MappingState,
    caller: &PromptCaller<'_>,
    ontology: &dyn OntologyClient,
) -> StateUpdate {
    let details = ancestor_details(state, ontology);
    if details.is_empty() {
        return StateUpdate::Refined {
            refinement: Refinement::unavailable(),
            details,
        };
    }

    let context = PromptContext::new()
        .with("survey_text", state.text.as_str())
        .with("validated_mappings", mapping_lines(&state.validated_mappings))
        .with("candidate_list", candidate_list(&details));

    let refinement = match caller
        .complete(PromptTemplate::RefineMapping, &context)
        .and_then(|raw| parse_completion_json(&raw))
    {
        Ok(value) => interpret_refinement(&value).unwrap_or_else(|| {
            tracing::warn!("Refinement output missing refined_code or refined_term");
            Refinement::unavailable()
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Refinement failed");
            Refinement::unavailable()
        }
    };

    StateUpdate::Refined { refinement, details }
}

/// Named ancestors of the top validated code; empty when any lookup fails.
fn ancestor_details(state: &MappingState, ontology: &dyn OntologyClient) -> Vec<ConceptInfo> {
    let Some(code) = state
        .validated_mappings
        .first()
        .and_then(|v| v.best_match_code.as_deref())
        .filter(|c| !c.trim().is_empty())
    else {
        tracing::info!("No validated code to refine");
        return vec![];
    };

    let cui = match ontology.code_to_concept(code) {
        Ok(Some(cui)) => cui,
        Ok(None) => {
            tracing::info!(code, "No concept id for code");
            return vec![];
        }
        Err(e) => {
            tracing::warn!(code, error = %e, "Concept lookup failed");
            return vec![];
        }
    };

    let ancestors = match ontology.ancestors(&cui) {
        Ok(ancestors) => ancestors,
        Err(e) => {
            tracing::warn!(cui = %cui, error = %e, "Ancestor lookup failed");
            return vec![];
        }
    };

    ancestors
        .iter()
        .filter_map(|id| match ontology.concept_info(id) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(cui = %id, error = %e, "Skipping ancestor");
                None
            }
        })
        .collect()
}

fn mapping_lines(mappings: &[ValidatedMapping]) -> String {
    mappings
        .iter()
        .map(|m| {
            format!(
                "- {} -> {} ({}), confidence {:.2}",
                m.original,
                m.best_match_code.as_deref().unwrap_or("none"),
                m.best_match_term.as_deref().unwrap_or("none"),
                m.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn candidate_list(details: &[ConceptInfo]) -> String {
    details
        .iter()
        .map(|c| format!("- {} ({})", c.cui, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Code and term are required; an unusable confidence becomes 0.0.
fn interpret_refinement(value: &Value) -> Option<Refinement> {
    let refined_code = non_empty_str(value, "refined_code")?;
    let refined_term = non_empty_str(value, "refined_term")?;
    let confidence = value
        .get("confidence")
        .and_then(|c| parse_confidence(c).ok())
        .unwrap_or(0.0);
    Some(Refinement::Refined(RefinedMapping {
        refined_term: refined_term.to_string(),
        refined_code: refined_code.to_string(),
        confidence,
    }))
}
