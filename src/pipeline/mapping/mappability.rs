use super::caller::PromptCaller;
use super::parser::parse_yes_no;
use super::prompt::{PromptContext, PromptTemplate};
use super::state::{MappingState, StateUpdate};
use crate::pipeline_config::MappingConfig;

/// Ask the LLM whether the survey item is mappable at all.
///
/// A negative answer is re-asked while the retry counter is under
/// `max_mappability_retries`; a failed call counts as a negative answer.
pub fn check_mappability(
    state: &MappingState,
    caller: &PromptCaller<'_>,
    config: &MappingConfig,
) -> StateUpdate {
    let context = PromptContext::new()
        .with("survey_text", state.text.as_str())
        .with("field_type", state.field_type.as_str())
        .with("ontology", state.ontology.as_str());

    let mut retry_count = state.mappability_retry_count;
    loop {
        let is_mappable = match caller.complete(PromptTemplate::IsMappable, &context) {
            Ok(raw) => parse_yes_no(&raw),
            Err(e) => {
                tracing::warn!(attempt = retry_count + 1, error = %e, "Mappability check failed");
                false
            }
        };

        if is_mappable || retry_count >= config.max_mappability_retries {
            if !is_mappable {
                tracing::info!(retries = retry_count, "Survey item judged not mappable");
            }
            return StateUpdate::Mappability {
                is_mappable,
                retry_count,
            };
        }
        retry_count += 1;
    }
}
