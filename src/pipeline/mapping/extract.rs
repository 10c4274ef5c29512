use super::caller::PromptCaller;
use super::parser::parse_term_list;
use super::prompt::{PromptContext, PromptTemplate};
use super::state::{MappingState, StateUpdate};
use crate::pipeline_config::MappingConfig;

/// Extract candidate medical terms with the field-type-specific prompt.
///
/// Empty or unparseable output is retried up to `max_extraction_attempts`
/// calls; on exhaustion the run continues with no terms.
pub fn extract_terms(
    state: &MappingState,
    caller: &PromptCaller<'_>,
    config: &MappingConfig,
) -> StateUpdate {
    let template = PromptTemplate::for_field_type(state.field_type);
    let context = PromptContext::new().with("survey_text", state.text.as_str());
    let attempts = config.max_extraction_attempts.max(1);

    for attempt in 1..=attempts {
        let terms = match caller.complete(template, &context) {
            Ok(raw) => parse_term_list(&raw),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Term extraction call failed");
                vec![]
            }
        };

        if !terms.is_empty() {
            tracing::info!(template = template.name(), attempt, ?terms, "Extracted terms");
            return StateUpdate::Extracted { terms };
        }
        tracing::warn!(attempt, "No terms extracted");
    }

    tracing::error!(attempts, "Extraction failed after max attempts, proceeding with empty list");
    StateUpdate::Extracted { terms: vec![] }
}
