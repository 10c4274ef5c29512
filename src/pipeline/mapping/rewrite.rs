use std::collections::HashSet;

use super::caller::PromptCaller;
use super::parser::parse_term_list;
use super::prompt::{quoted_list, PromptContext, PromptTemplate};
use super::state::{MappingState, StateUpdate, TermCandidates, ValidatedMapping};
use crate::pipeline_config::{MappingConfig, RetryTrigger};

/// Key used for history membership: trimmed, case-insensitive.
fn history_key(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Ordered set insert keyed by [`history_key`]; the first spelling wins.
fn push_unique(history: &mut Vec<String>, seen: &mut HashSet<String>, term: &str) {
    if term.trim().is_empty() {
        return;
    }
    if seen.insert(history_key(term)) {
        history.push(term.to_string());
    }
}

/// Terms that need a rewrite plus what survives the cycle untouched.
struct RewritePlan {
    failing: Vec<String>,
    preserved_mappings: Vec<TermCandidates>,
    preserved_validations: Vec<ValidatedMapping>,
}

fn plan(state: &MappingState, config: &MappingConfig) -> RewritePlan {
    match config.retry_trigger {
        RetryTrigger::EmptyCandidates => {
            let (empty, found): (Vec<&TermCandidates>, Vec<&TermCandidates>) = state
                .umls_mappings
                .iter()
                .partition(|m| m.candidates.is_empty());
            RewritePlan {
                failing: empty.iter().map(|m| m.original.clone()).collect(),
                preserved_mappings: found.into_iter().cloned().collect(),
                preserved_validations: state.preserved_validations.clone(),
            }
        }
        RetryTrigger::LowConfidence => {
            let (low, high): (Vec<&ValidatedMapping>, Vec<&ValidatedMapping>) = state
                .validated_mappings
                .iter()
                .partition(|v| v.confidence < config.confidence_threshold);
            let mut preserved_validations = state.preserved_validations.clone();
            preserved_validations.extend(high.into_iter().cloned());
            RewritePlan {
                failing: low.iter().map(|v| v.original.clone()).collect(),
                preserved_mappings: vec![],
                preserved_validations,
            }
        }
    }
}

/// Ask the LLM for replacement terms for everything that failed this cycle.
///
/// The history only grows. Proposals already in it are dropped; if nothing
/// new is left, failing terms that were never tried before are kept instead.
pub fn rewrite_terms(
    state: &MappingState,
    caller: &PromptCaller<'_>,
    config: &MappingConfig,
) -> StateUpdate {
    let RewritePlan {
        failing,
        preserved_mappings,
        preserved_validations,
    } = plan(state, config);

    let prior: HashSet<String> = state
        .history_rewritten_terms
        .iter()
        .map(|t| history_key(t))
        .collect();

    let mut history = state.history_rewritten_terms.clone();
    let mut seen = prior.clone();
    for term in failing.iter().chain(state.extracted_terms.iter()) {
        push_unique(&mut history, &mut seen, term);
    }

    let context = PromptContext::new()
        .with("survey_text", state.text.as_str())
        .with("failed_terms", quoted_list(&failing))
        .with("previous_terms", quoted_list(&history));

    let proposals = match caller.complete(PromptTemplate::RetryWithLlmRewrite, &context) {
        Ok(raw) => parse_term_list(&raw),
        Err(e) => {
            tracing::warn!(retry = state.retry_count + 1, error = %e, "Rewrite call failed");
            vec![]
        }
    };

    let mut revised: Vec<String> = Vec::new();
    let mut revised_keys: HashSet<String> = HashSet::new();
    for term in &proposals {
        let key = history_key(term);
        if !seen.contains(&key) && revised_keys.insert(key) {
            revised.push(term.trim().to_string());
        }
    }

    if revised.is_empty() {
        let mut fallback_keys = HashSet::new();
        revised = failing
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter(|t| !prior.contains(&history_key(t)))
            .filter(|t| fallback_keys.insert(history_key(t)))
            .cloned()
            .collect();
        tracing::warn!(
            discarded = proposals.len(),
            kept = ?revised,
            "No new rewrite proposals, keeping untried failing terms"
        );
    }

    for term in &revised {
        push_unique(&mut history, &mut seen, term);
    }

    let retry_count = state.retry_count.saturating_add(1);
    tracing::info!(retry_count, ?failing, ?revised, "Rewrote terms");

    StateUpdate::Rewritten {
        terms: revised,
        history,
        retry_count,
        preserved_mappings,
        preserved_validations,
    }
}
