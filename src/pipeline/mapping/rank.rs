use std::collections::HashMap;

use serde_json::Value;

use super::caller::PromptCaller;
use super::confidence::parse_confidence;
use super::parser::{non_empty_str, parse_array_lenient, parse_completion_json};
use super::prompt::{PromptContext, PromptTemplate};
use super::state::{MappingState, RankedTerm, ScoredCandidate, StateUpdate, TermCandidates};
use crate::pipeline::ontology::RawCandidate;

/// Score every term's candidates with the LLM and sort them by confidence.
///
/// Candidates the model leaves out score 0.0. The sort is stable, so ties
/// keep the ontology's order. Terms without candidates keep an empty entry.
pub fn rank_candidates(state: &MappingState, caller: &PromptCaller<'_>) -> StateUpdate {
    let mappings = state
        .umls_mappings
        .iter()
        .map(|entry| rank_term(entry, caller))
        .collect();
    StateUpdate::Ranked { mappings }
}

/// Ranking disabled: candidates are promoted unscored, in ontology order.
pub fn promote_unranked(state: &MappingState) -> StateUpdate {
    StateUpdate::Ranked {
        mappings: unranked_terms(&state.umls_mappings),
    }
}

pub fn unranked_terms(entries: &[TermCandidates]) -> Vec<RankedTerm> {
    entries
        .iter()
        .map(|entry| RankedTerm {
            original: entry.original.clone(),
            ranked_candidates: entry.candidates.iter().map(ScoredCandidate::unscored).collect(),
        })
        .collect()
}

fn rank_term(entry: &TermCandidates, caller: &PromptCaller<'_>) -> RankedTerm {
    if entry.candidates.is_empty() {
        return RankedTerm {
            original: entry.original.clone(),
            ranked_candidates: vec![],
        };
    }

    let context = PromptContext::new()
        .with("original", entry.original.as_str())
        .with("candidates", candidate_lines(&entry.candidates));

    let scores = match caller
        .complete(PromptTemplate::RankMappings, &context)
        .and_then(|raw| parse_completion_json(&raw))
    {
        Ok(value) => confidence_lookup(&value),
        Err(e) => {
            tracing::warn!(term = %entry.original, error = %e, "Ranking failed, scoring all candidates 0");
            HashMap::new()
        }
    };

    RankedTerm {
        original: entry.original.clone(),
        ranked_candidates: apply_scores(&entry.candidates, &scores),
    }
}

/// Candidate list as shown to the ranking model.
fn candidate_lines(candidates: &[RawCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let mut line = format!("- {}: {}", c.code, c.term);
            if let Some(desc) = &c.description {
                line.push_str(&format!(" ({desc})"));
            }
            if !c.synonyms.is_empty() {
                line.push_str(&format!(" [synonyms: {}]", c.synonyms.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `matched_code → confidence` from a `[{matched_code, confidence}]` array.
/// Items with no code or an unparseable confidence are skipped.
fn confidence_lookup(value: &Value) -> HashMap<String, f32> {
    let items: Vec<Value> = parse_array_lenient(value);
    let mut lookup = HashMap::new();
    for item in &items {
        let Some(code) = non_empty_str(item, "matched_code") else {
            continue;
        };
        let Some(conf) = item.get("confidence").and_then(|c| parse_confidence(c).ok()) else {
            tracing::debug!(code, "Skipping ranking item with invalid confidence");
            continue;
        };
        lookup.entry(code.to_string()).or_insert(conf);
    }
    lookup
}

/// Annotate and stable-sort candidates, highest confidence first.
pub fn apply_scores(candidates: &[RawCandidate], scores: &HashMap<String, f32>) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| ScoredCandidate {
            confidence: Some(scores.get(&c.code).copied().unwrap_or(0.0)),
            ..ScoredCandidate::unscored(c)
        })
        .collect();
    scored.sort_by(|a, b| {
        let a = a.confidence.unwrap_or(0.0);
        let b = b.confidence.unwrap_or(0.0);
        b.total_cmp(&a)
    });
    scored
}
