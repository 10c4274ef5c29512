use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use uuid::Uuid;

use super::caller::PromptCaller;
use super::extract::extract_terms;
use super::fetch::fetch_candidates;
use super::mappability::check_mappability;
use super::prompt::PromptTemplate;
use super::rank::{promote_unranked, rank_candidates, unranked_terms};
use super::refine::refine_with_ancestors;
use super::rewrite::rewrite_terms;
use super::state::{
    check_invariants, is_placeholder, MappingInput, MappingState, StateUpdate, TermCandidates,
    ValidatedMapping,
};
use super::validate::{promote_top_candidates, top_candidate_mappings, validate_mappings};
use crate::pipeline::llm::{LlmClient, ModelRouting};
use crate::pipeline::ontology::OntologyClient;
use crate::pipeline_config::{MappingConfig, RetryTrigger};

/// Nodes of the mapping state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingNode {
    MappabilityCheck,
    ChooseExtraction,
    Extract,
    FetchCandidates,
    RewriteRetry,
    RankCandidates,
    Validate,
    RefineAncestors,
    End,
}

impl MappingNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingNode::MappabilityCheck => "mappability_check",
            MappingNode::ChooseExtraction => "choose_extraction",
            MappingNode::Extract => "extract",
            MappingNode::FetchCandidates => "fetch_candidates",
            MappingNode::RewriteRetry => "rewrite_retry",
            MappingNode::RankCandidates => "rank_candidates",
            MappingNode::Validate => "validate",
            MappingNode::RefineAncestors => "refine_ancestors",
            MappingNode::End => "end",
        }
    }
}

impl fmt::Display for MappingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Transition guards (pure)
// ═══════════════════════════════════════════════════════════

fn budget_remains(state: &MappingState, config: &MappingConfig) -> bool {
    state.retry_count < config.max_rewrite_retries
}

fn below_threshold(state: &MappingState, config: &MappingConfig) -> bool {
    !state.validated_mappings.is_empty() && state.top_confidence() < config.confidence_threshold
}

/// After fetching: some term came back without candidates.
pub fn should_rewrite_after_fetch(state: &MappingState, config: &MappingConfig) -> bool {
    config.retry_enabled
        && config.retry_trigger == RetryTrigger::EmptyCandidates
        && budget_remains(state, config)
        && state.has_empty_candidates()
}

/// After validating: the top validated confidence is too low.
pub fn should_rewrite_after_validate(state: &MappingState, config: &MappingConfig) -> bool {
    config.retry_enabled
        && config.retry_trigger == RetryTrigger::LowConfidence
        && budget_remains(state, config)
        && below_threshold(state, config)
}

pub fn should_refine(state: &MappingState, config: &MappingConfig) -> bool {
    config.refinement_enabled && below_threshold(state, config)
}

/// Successor of `current` for the given state.
pub fn next_node(current: MappingNode, state: &MappingState, config: &MappingConfig) -> MappingNode {
    match current {
        MappingNode::MappabilityCheck if state.is_mappable => MappingNode::ChooseExtraction,
        MappingNode::MappabilityCheck => MappingNode::End,
        MappingNode::ChooseExtraction => MappingNode::Extract,
        MappingNode::Extract => MappingNode::FetchCandidates,
        MappingNode::FetchCandidates if should_rewrite_after_fetch(state, config) => {
            MappingNode::RewriteRetry
        }
        MappingNode::FetchCandidates => MappingNode::RankCandidates,
        MappingNode::RewriteRetry if budget_remains(state, config) => MappingNode::FetchCandidates,
        MappingNode::RewriteRetry => MappingNode::End,
        MappingNode::RankCandidates => MappingNode::Validate,
        MappingNode::Validate if should_rewrite_after_validate(state, config) => {
            MappingNode::RewriteRetry
        }
        MappingNode::Validate if should_refine(state, config) => MappingNode::RefineAncestors,
        MappingNode::Validate | MappingNode::RefineAncestors | MappingNode::End => MappingNode::End,
    }
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

/// Final state of a run plus the nodes it visited.
#[derive(Debug, Clone, Serialize)]
pub struct MappingOutcome {
    pub run_id: Uuid,
    pub state: MappingState,
    pub trace: Vec<MappingNode>,
}

impl MappingOutcome {
    pub fn final_mappings(&self) -> Vec<ValidatedMapping> {
        self.state.final_mappings()
    }
}

/// Survey item → ontology code mapping state machine:
/// mappability → extract → fetch ⇄ rewrite → rank → validate (⇄ rewrite) → refine
pub struct MappingPipeline {
    llm: Box<dyn LlmClient + Send + Sync>,
    ontology: Box<dyn OntologyClient + Send + Sync>,
    models: ModelRouting,
    config: MappingConfig,
}

impl MappingPipeline {
    pub fn new(
        llm: Box<dyn LlmClient + Send + Sync>,
        ontology: Box<dyn OntologyClient + Send + Sync>,
        models: ModelRouting,
        config: MappingConfig,
    ) -> Self {
        Self {
            llm,
            ontology,
            models,
            config,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Run the state machine to completion. Never fails: collaborator errors
    /// degrade inside the nodes and budgets end the run.
    pub fn run(&self, input: MappingInput) -> MappingOutcome {
        self.run_cancellable(input, &AtomicBool::new(false))
    }

    /// Same as [`run`](Self::run), but `cancelled` is checked before every
    /// node; once set, the run goes straight to `End` with what it has.
    /// A node already in flight finishes its calls first.
    pub fn run_cancellable(&self, input: MappingInput, cancelled: &AtomicBool) -> MappingOutcome {
        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!(
            "mapping_run",
            run_id = %run_id,
            field_type = %input.field_type,
            variant = %self.config.variant
        )
        .entered();

        let caller = PromptCaller::new(self.llm.as_ref(), &self.models);
        let max_transitions = self.config.max_transitions();
        let mut state = MappingState::new(input);
        let mut trace = Vec::new();
        let mut node = MappingNode::MappabilityCheck;

        loop {
            if node != MappingNode::End && trace.len() >= max_transitions as usize {
                tracing::error!(max_transitions, "Transition cap reached, ending run");
                node = MappingNode::End;
            }
            if node != MappingNode::End && cancelled.load(Ordering::Relaxed) {
                tracing::warn!(pending = %node, "Run cancelled");
                node = MappingNode::End;
            }
            trace.push(node);
            if node == MappingNode::End {
                break;
            }

            if let Some(update) = self.step(node, &state, &caller) {
                state = self.commit(state, update);
            }
            if node == MappingNode::Validate && !should_rewrite_after_validate(&state, &self.config) {
                state = self.merge_preserved_validations(state);
            }

            let next = next_node(node, &state, &self.config);
            tracing::debug!(from = %node, to = %next, "Transition");
            node = next;
        }

        let ended_after_rewrite = trace.iter().rev().nth(1) == Some(&MappingNode::RewriteRetry);
        let state = if ended_after_rewrite {
            self.settle_exhausted(state)
        } else {
            state
        };
        let state = self.merge_preserved_validations(state);
        tracing::info!(
            steps = trace.len(),
            retries = state.retry_count,
            mapped = state.validated_mappings.len(),
            top_confidence = state.top_confidence(),
            "Mapping run complete"
        );

        MappingOutcome {
            run_id,
            state,
            trace,
        }
    }

    fn step(
        &self,
        node: MappingNode,
        state: &MappingState,
        caller: &PromptCaller<'_>,
    ) -> Option<StateUpdate> {
        let config = &self.config;
        match node {
            MappingNode::MappabilityCheck => Some(check_mappability(state, caller, config)),
            MappingNode::ChooseExtraction => {
                tracing::debug!(
                    template = PromptTemplate::for_field_type(state.field_type).name(),
                    "Extraction prompt chosen"
                );
                None
            }
            MappingNode::Extract => Some(extract_terms(state, caller, config)),
            MappingNode::FetchCandidates => {
                Some(fetch_candidates(state, self.ontology.as_ref(), config))
            }
            MappingNode::RewriteRetry => Some(rewrite_terms(state, caller, config)),
            MappingNode::RankCandidates if config.ranking_enabled => {
                Some(rank_candidates(state, caller))
            }
            MappingNode::RankCandidates => Some(promote_unranked(state)),
            MappingNode::Validate if config.validation_enabled => {
                Some(validate_mappings(state, caller))
            }
            MappingNode::Validate => Some(promote_top_candidates(state)),
            MappingNode::RefineAncestors => {
                Some(refine_with_ancestors(state, caller, self.ontology.as_ref()))
            }
            MappingNode::End => None,
        }
    }

    /// Apply an update and check stage-boundary invariants.
    fn commit(&self, state: MappingState, update: StateUpdate) -> MappingState {
        let kind = update.kind();
        let next = state.clone().apply(update);
        for violation in check_invariants(&state, kind, &next, &self.config) {
            tracing::error!(update = kind, violation = %violation, "State invariant violated");
        }
        next
    }

    /// The rewrite budget ran out before the last proposals were searched.
    ///
    /// In empty-candidate mode nothing of the last fetch was ranked yet, so
    /// its entries (preserved hits and residual failures) are promoted as-is.
    /// In low-confidence mode the last validation already covers every term.
    fn settle_exhausted(&self, state: MappingState) -> MappingState {
        if self.config.retry_trigger != RetryTrigger::EmptyCandidates {
            return state;
        }
        let entries: Vec<TermCandidates> = state
            .umls_mappings
            .iter()
            .filter(|m| !is_placeholder(&m.original))
            .cloned()
            .collect();
        let ranked = unranked_terms(&entries);
        let validated = top_candidate_mappings(&ranked);
        tracing::warn!(
            retries = state.retry_count,
            found = entries.iter().filter(|m| !m.candidates.is_empty()).count(),
            unmatched = entries.iter().filter(|m| m.candidates.is_empty()).count(),
            "Rewrite budget spent, promoting last fetch"
        );
        self.commit(state, StateUpdate::Settled { ranked, validated })
    }

    /// Current-cycle validations first, then those carried across rewrites.
    /// One entry per term (first wins); the blank fetch placeholder is dropped.
    fn merge_preserved_validations(&self, state: MappingState) -> MappingState {
        let has_placeholder = state
            .validated_mappings
            .iter()
            .any(|v| is_placeholder(&v.original));
        if state.preserved_validations.is_empty() && !has_placeholder {
            return state;
        }
        let mut seen = HashSet::new();
        let mappings = state
            .validated_mappings
            .iter()
            .chain(state.preserved_validations.iter())
            .filter(|v| !is_placeholder(&v.original))
            .filter(|v| seen.insert(v.original.trim().to_lowercase()))
            .cloned()
            .collect();
        self.commit(state, StateUpdate::ValidationsMerged { mappings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{LlmTask, ScriptedLlmClient};
    use crate::pipeline::mapping::state::{FieldType, Refinement};
    use crate::pipeline::ontology::{MockOntologyClient, RawCandidate};
    use crate::pipeline_config::{derive_config, PipelineVariant};
    use std::sync::Arc;

    /// Shares the scripted client with the pipeline so tests can inspect calls.
    struct Shared(Arc<ScriptedLlmClient>);

    impl LlmClient for Shared {
        fn generate(
            &self,
            model: &str,
            prompt: &str,
            system: &str,
        ) -> Result<String, crate::pipeline::llm::LlmError> {
            self.0.generate(model, prompt, system)
        }
    }

    fn pipeline(
        llm: ScriptedLlmClient,
        ontology: MockOntologyClient,
        config: MappingConfig,
    ) -> (MappingPipeline, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(llm);
        let pipeline = MappingPipeline::new(
            Box::new(Shared(llm.clone())),
            Box::new(ontology),
            ModelRouting::uniform("test-model"),
            config,
        );
        (pipeline, llm)
    }

    fn chest_pain_ontology() -> MockOntologyClient {
        MockOntologyClient::new().with_results(
            "chest pain",
            vec![
                RawCandidate::new("HP:0100749", "Chest pain"),
                RawCandidate::new("HP:0030834", "Anterior chest pain"),
            ],
        )
    }

    fn count(trace: &[MappingNode], node: MappingNode) -> usize {
        trace.iter().filter(|n| **n == node).count()
    }

    #[test]
    fn chest_pain_end_to_end() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["```json\n[\"chest pain\"]\n```"])
            .respond(
                LlmTask::RankCandidates,
                &[r#"[{"matched_code": "HP:0100749", "confidence": "95%"}, {"matched_code": "HP:0030834", "confidence": "40%"}]"#],
            )
            .respond(
                LlmTask::ValidateMapping,
                &[r#"{"best_match_code": "HP:0100749", "best_match_term": "Chest pain", "confidence": "93%"}"#],
            );
        let (pipeline, llm) = pipeline(llm, chest_pain_ontology(), MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new("My child has chest pain.", FieldType::Radio));

        assert_eq!(
            outcome.trace,
            vec![
                MappingNode::MappabilityCheck,
                MappingNode::ChooseExtraction,
                MappingNode::Extract,
                MappingNode::FetchCandidates,
                MappingNode::RankCandidates,
                MappingNode::Validate,
                MappingNode::End,
            ]
        );
        let state = &outcome.state;
        assert!(state.is_mappable);
        assert_eq!(state.extracted_terms, vec!["chest pain"]);
        assert_eq!(state.umls_mappings.len(), 1);
        assert!(!state.umls_mappings[0].candidates.is_empty());
        assert_eq!(state.validated_mappings.len(), 1);
        let mapping = &state.validated_mappings[0];
        assert_eq!(mapping.original, "chest pain");
        assert_eq!(mapping.best_match_code.as_deref(), Some("HP:0100749"));
        assert_eq!(mapping.best_match_term.as_deref(), Some("Chest pain"));
        assert!((0.0..=1.0).contains(&mapping.confidence));
        assert!(state.refine_mapping.is_none());
        assert!(llm.calls().iter().all(|c| c.model == "test-model"));
    }

    #[test]
    fn unmappable_item_ends_immediately() {
        let llm = ScriptedLlmClient::new().respond(LlmTask::Mappability, &["false"]);
        let (pipeline, llm) = pipeline(llm, MockOntologyClient::new(), MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new("What is your name?", FieldType::Short));

        assert_eq!(outcome.trace, vec![MappingNode::MappabilityCheck, MappingNode::End]);
        assert!(!outcome.state.is_mappable);
        assert_eq!(outcome.state.mappability_retry_count, 5);
        assert!(llm.calls_for(LlmTask::ExtractTerms).is_empty());
        assert!(outcome.final_mappings().is_empty());
    }

    #[test]
    fn retry_budget_ends_the_run() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"xyzzy\"]"])
            .respond(
                LlmTask::RewriteTerms,
                &["[\"t1\"]", "[\"t2\"]", "[\"t3\"]", "[\"t4\"]", "[\"t5\"]", "[\"t6\"]"],
            );
        let (pipeline, llm) = pipeline(llm, MockOntologyClient::new(), MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new("Any xyzzy?", FieldType::Radio));
        let trace = &outcome.trace;

        assert_eq!(outcome.state.retry_count, 5);
        assert_eq!(count(trace, MappingNode::RewriteRetry), 5);
        assert_eq!(count(trace, MappingNode::FetchCandidates), 5);
        assert_eq!(trace[trace.len() - 2], MappingNode::RewriteRetry);
        assert_eq!(trace.last(), Some(&MappingNode::End));
        assert_eq!(llm.calls_for(LlmTask::RewriteTerms).len(), 5);
        assert!(trace.len() <= pipeline.config().max_transitions() as usize);

        let history = &outcome.state.history_rewritten_terms;
        for term in ["xyzzy", "t1", "t2", "t3", "t4", "t5"] {
            assert!(history.contains(&term.to_string()), "{term}");
        }
        // t5 was never searched; the last fetched term is reported unmatched
        assert_eq!(outcome.final_mappings(), vec![ValidatedMapping::no_match("t4")]);
    }

    fn unique_originals(mappings: &[ValidatedMapping]) -> bool {
        let mut seen = HashSet::new();
        mappings.iter().all(|v| seen.insert(v.original.as_str()))
    }

    #[test]
    fn found_terms_survive_spent_budget() {
        let ontology = MockOntologyClient::new()
            .with_results("cough", vec![RawCandidate::new("HP:0012735", "Cough")]);
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"tummy ache\", \"cough\"]"])
            .respond(
                LlmTask::RewriteTerms,
                &["[\"t1\"]", "[\"t2\"]", "[\"t3\"]", "[\"t4\"]", "[\"t5\"]"],
            );
        let (pipeline, llm) = pipeline(llm, ontology, MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new(
            "Does your child have tummy aches or a cough?",
            FieldType::Checkbox,
        ));
        let state = &outcome.state;

        assert_eq!(state.retry_count, 5);
        assert_eq!(outcome.trace.iter().rev().nth(1), Some(&MappingNode::RewriteRetry));
        assert!(state.preserved_mappings.is_empty());
        assert!(llm.calls_for(LlmTask::RankCandidates).is_empty());

        let finals = outcome.final_mappings();
        assert!(!finals.is_empty());
        assert!(unique_originals(&finals));
        let cough = finals.iter().find(|v| v.original == "cough").unwrap();
        assert_eq!(cough.best_match_code.as_deref(), Some("HP:0012735"));
        assert_eq!(cough.best_match_term.as_deref(), Some("Cough"));
        assert!(finals.contains(&ValidatedMapping::no_match("t4")));
        assert_eq!(state.ranked_mappings.len(), state.validated_mappings.len());
    }

    #[test]
    fn spent_low_confidence_budget_keeps_one_entry_per_term() {
        let ontology = chest_pain_ontology()
            .with_results("cough", vec![RawCandidate::new("HP:0012735", "Cough")]);
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\", \"cough\"]"])
            .respond(
                LlmTask::RankCandidates,
                &[r#"[{"matched_code": "HP:0100749", "confidence": "70%"}, {"matched_code": "HP:0012735", "confidence": "96%"}]"#],
            )
            .respond(
                LlmTask::ValidateMapping,
                &[
                    r#"{"best_match_code": "HP:0100749", "best_match_term": "Chest pain", "confidence": "50%"}"#,
                    r#"{"best_match_code": "HP:0012735", "best_match_term": "Cough", "confidence": "95%"}"#,
                ],
            )
            .respond(LlmTask::RewriteTerms, &["[\"thoracic pain\"]"]);
        let config = derive_config(PipelineVariant::ValidateRetry).with_max_rewrite_retries(1);
        let (pipeline, _llm) = pipeline(llm, ontology, config);

        let outcome = pipeline.run(MappingInput::new(
            "Does your child have chest pain or a cough?",
            FieldType::Checkbox,
        ));
        let state = &outcome.state;

        assert_eq!(
            &outcome.trace[outcome.trace.len() - 3..],
            &[MappingNode::Validate, MappingNode::RewriteRetry, MappingNode::End]
        );
        let originals: Vec<&str> = state.validated_mappings.iter().map(|v| v.original.as_str()).collect();
        assert_eq!(originals, vec!["chest pain", "cough"]);
        assert!(state.preserved_validations.is_empty());
        let finals = outcome.final_mappings();
        assert!(!finals.is_empty());
        assert!(unique_originals(&finals));
    }

    #[test]
    fn placeholder_never_reaches_the_result() {
        let ontology = MockOntologyClient::new()
            .with_results("zzz", vec![RawCandidate::new("HP:0000001", "All")]);
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"zzz\"]"])
            .respond(LlmTask::RankCandidates, &[r#"[{"matched_code": "HP:0000001", "confidence": "50%"}]"#])
            .respond(
                LlmTask::ValidateMapping,
                &[r#"{"best_match_code": "HP:0000001", "best_match_term": "All", "confidence": "50%"}"#],
            )
            // second rewrite proposes nothing new, leaving no terms to search
            .respond(LlmTask::RewriteTerms, &["[\"qqq\"]", "garbage"]);
        let config = derive_config(PipelineVariant::ValidateRetry).with_max_rewrite_retries(3);
        let (pipeline, _llm) = pipeline(llm, ontology, config);

        let outcome = pipeline.run(MappingInput::new("Any zzz?", FieldType::Radio));

        assert_eq!(outcome.state.retry_count, 3);
        assert!(outcome
            .state
            .umls_mappings
            .iter()
            .any(|m| m.original.is_empty()));
        assert!(outcome
            .state
            .validated_mappings
            .iter()
            .all(|v| !v.original.trim().is_empty()));
        assert!(outcome
            .final_mappings()
            .iter()
            .all(|v| !v.original.trim().is_empty()));
    }

    #[test]
    fn cancelled_run_stops_before_the_next_node() {
        let llm = ScriptedLlmClient::new().respond(LlmTask::Mappability, &["true"]);
        let (pipeline, llm) = pipeline(llm, chest_pain_ontology(), MappingConfig::default());

        let outcome = pipeline.run_cancellable(
            MappingInput::new("My child has chest pain.", FieldType::Radio),
            &AtomicBool::new(true),
        );

        assert_eq!(outcome.trace, vec![MappingNode::End]);
        assert!(llm.calls().is_empty());
        assert!(outcome.final_mappings().is_empty());
    }

    #[test]
    fn rewrite_recovers_and_keeps_found_terms() {
        let ontology = MockOntologyClient::new()
            .with_results("cough", vec![RawCandidate::new("HP:0012735", "Cough")])
            .with_results("abdominal pain", vec![RawCandidate::new("HP:0002027", "Abdominal pain")]);
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"tummy ache\", \"cough\"]"])
            .respond(LlmTask::RewriteTerms, &["[\"abdominal pain\"]"])
            .respond(
                LlmTask::RankCandidates,
                &[r#"[{"matched_code": "HP:0012735", "confidence": "95%"}, {"matched_code": "HP:0002027", "confidence": "92%"}]"#],
            )
            .respond(LlmTask::ValidateMapping, &["{}"]);
        let (pipeline, _llm) = pipeline(llm, ontology, MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new(
            "Does your child have tummy aches or a cough?",
            FieldType::Checkbox,
        ));

        assert_eq!(count(&outcome.trace, MappingNode::RewriteRetry), 1);
        let state = &outcome.state;
        assert_eq!(state.retry_count, 1);
        let originals: Vec<&str> = state.umls_mappings.iter().map(|m| m.original.as_str()).collect();
        assert_eq!(originals, vec!["cough", "abdominal pain"]);
        assert!(state.preserved_mappings.is_empty());

        let codes: Vec<Option<&str>> = state
            .validated_mappings
            .iter()
            .map(|v| v.best_match_code.as_deref())
            .collect();
        assert_eq!(codes, vec![Some("HP:0012735"), Some("HP:0002027")]);
        assert!(state.history_rewritten_terms.contains(&"tummy ache".to_string()));
    }

    #[test]
    fn low_confidence_triggers_refinement() {
        let ontology = chest_pain_ontology()
            .with_concept("HP:0100749", "C0008031")
            .with_ancestors("C0008031", &["C0030193"])
            .with_concept_info("C0030193", "Pain");
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\"]"])
            .respond(LlmTask::RankCandidates, &[r#"[{"matched_code": "HP:0100749", "confidence": "60%"}]"#])
            .respond(
                LlmTask::ValidateMapping,
                &[r#"{"best_match_code": "HP:0100749", "best_match_term": "Chest pain", "confidence": "55%"}"#],
            )
            .respond(
                LlmTask::RefineMapping,
                &[r#"{"refined_term": "Pain", "refined_code": "C0030193", "confidence": 0.7}"#],
            );
        let (pipeline, _llm) = pipeline(llm, ontology, MappingConfig::default());

        let outcome = pipeline.run(MappingInput::new("My child has chest pain.", FieldType::Radio));

        assert_eq!(
            &outcome.trace[outcome.trace.len() - 3..],
            &[MappingNode::Validate, MappingNode::RefineAncestors, MappingNode::End]
        );
        let refined = outcome
            .state
            .refine_mapping
            .as_ref()
            .and_then(Refinement::refined)
            .cloned()
            .unwrap();
        assert_eq!(refined.refined_code, "C0030193");
        assert_eq!(outcome.state.candidate_details.len(), 1);
    }

    #[test]
    fn refinement_can_be_disabled() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\"]"])
            .respond(LlmTask::RankCandidates, &["[]"]);
        let config = MappingConfig::default().with_refinement(false);
        let (pipeline, llm) = pipeline(llm, chest_pain_ontology(), config);

        let outcome = pipeline.run(MappingInput::new("My child has chest pain.", FieldType::Radio));

        assert_eq!(outcome.trace.last(), Some(&MappingNode::End));
        assert_eq!(count(&outcome.trace, MappingNode::RefineAncestors), 0);
        // unranked candidates score 0.0 and the `{}` validation keeps that score
        assert!(outcome.state.top_confidence() < 0.9);
        assert!(llm.calls_for(LlmTask::RefineMapping).is_empty());
    }

    #[test]
    fn without_rank_skips_ranking_calls() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\"]"])
            .respond(LlmTask::ValidateMapping, &["{}"]);
        let (pipeline, llm) = pipeline(
            llm,
            chest_pain_ontology(),
            derive_config(PipelineVariant::WithoutRank),
        );

        let outcome = pipeline.run(MappingInput::new("My child has chest pain.", FieldType::Radio));

        assert!(llm.calls_for(LlmTask::RankCandidates).is_empty());
        assert!(outcome.state.ranked_mappings[0]
            .ranked_candidates
            .iter()
            .all(|c| c.confidence.is_none()));
        let top = &outcome.state.validated_mappings[0];
        assert_eq!(top.best_match_code.as_deref(), Some("HP:0100749"));
        assert!((top.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(count(&outcome.trace, MappingNode::RefineAncestors), 0);
    }

    #[test]
    fn without_validate_promotes_ranked() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\"]"])
            .respond(
                LlmTask::RankCandidates,
                &[r#"[{"matched_code": "HP:0030834", "confidence": "97%"}]"#],
            );
        let (pipeline, llm) = pipeline(
            llm,
            chest_pain_ontology(),
            derive_config(PipelineVariant::WithoutValidate),
        );

        let outcome = pipeline.run(MappingInput::new("My child has chest pain.", FieldType::Radio));

        assert!(llm.calls_for(LlmTask::ValidateMapping).is_empty());
        let top = &outcome.state.validated_mappings[0];
        assert_eq!(top.best_match_code.as_deref(), Some("HP:0030834"));
        assert!((top.confidence - 0.97).abs() < 1e-6);
    }

    #[test]
    fn without_retry_ranks_empty_terms() {
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"xyzzy\"]"]);
        let (pipeline, llm) = pipeline(
            llm,
            MockOntologyClient::new(),
            derive_config(PipelineVariant::WithoutRetry),
        );

        let outcome = pipeline.run(MappingInput::new("Any xyzzy?", FieldType::Radio));

        assert_eq!(count(&outcome.trace, MappingNode::RewriteRetry), 0);
        assert!(llm.calls_for(LlmTask::RewriteTerms).is_empty());
        assert_eq!(
            outcome.state.validated_mappings,
            vec![ValidatedMapping::no_match("xyzzy")]
        );
        // null match has confidence 0.0 but no code to refine from
        assert!(outcome.state.refine_mapping.as_ref().is_some_and(|r| r.refined().is_none()));
    }

    #[test]
    fn low_confidence_rewrite_merges_preserved_validations() {
        let ontology = chest_pain_ontology()
            .with_results("cough", vec![RawCandidate::new("HP:0012735", "Cough")])
            .with_results("thoracic pain", vec![RawCandidate::new("HP:0100749", "Chest pain")]);
        let llm = ScriptedLlmClient::new()
            .respond(LlmTask::Mappability, &["true"])
            .respond(LlmTask::ExtractTerms, &["[\"chest pain\", \"cough\"]"])
            .respond(
                LlmTask::RankCandidates,
                &[r#"[{"matched_code": "HP:0100749", "confidence": "70%"}, {"matched_code": "HP:0012735", "confidence": "96%"}]"#],
            )
            .respond(
                LlmTask::ValidateMapping,
                &[
                    r#"{"best_match_code": "HP:0100749", "best_match_term": "Chest pain", "confidence": "50%"}"#,
                    r#"{"best_match_code": "HP:0012735", "best_match_term": "Cough", "confidence": "95%"}"#,
                    r#"{"best_match_code": "HP:0100749", "best_match_term": "Chest pain", "confidence": "92%"}"#,
                ],
            )
            .respond(LlmTask::RewriteTerms, &["[\"thoracic pain\"]"]);
        let (pipeline, _llm) = pipeline(llm, ontology, derive_config(PipelineVariant::ValidateRetry));

        let outcome = pipeline.run(MappingInput::new(
            "Does your child have chest pain or a cough?",
            FieldType::Checkbox,
        ));
        let state = &outcome.state;

        assert_eq!(state.retry_count, 1);
        assert_eq!(count(&outcome.trace, MappingNode::Validate), 2);
        let originals: Vec<&str> = state.validated_mappings.iter().map(|v| v.original.as_str()).collect();
        assert_eq!(originals, vec!["thoracic pain", "cough"]);
        assert!(state.preserved_validations.is_empty());
        assert_eq!(outcome.trace.last(), Some(&MappingNode::End));
        assert_eq!(count(&outcome.trace, MappingNode::RefineAncestors), 0);
    }

    #[test]
    fn rewrite_at_ceiling_routes_to_end() {
        let config = MappingConfig::default();
        let state = MappingState::new(MappingInput::new("q", FieldType::Radio)).apply(
            StateUpdate::Rewritten {
                terms: vec!["a".into()],
                history: vec!["a".into()],
                retry_count: config.max_rewrite_retries,
                preserved_mappings: vec![],
                preserved_validations: vec![],
            },
        );
        assert_eq!(next_node(MappingNode::RewriteRetry, &state, &config), MappingNode::End);

        let state = state.apply(StateUpdate::Fetched {
            mappings: vec![crate::pipeline::mapping::state::TermCandidates::empty("a")],
        });
        assert_eq!(
            next_node(MappingNode::FetchCandidates, &state, &config),
            MappingNode::RankCandidates
        );
    }

    #[test]
    fn end_is_absorbing() {
        let config = MappingConfig::default();
        let state = MappingState::new(MappingInput::new("q", FieldType::Radio));
        assert_eq!(next_node(MappingNode::End, &state, &config), MappingNode::End);
        assert_eq!(next_node(MappingNode::RefineAncestors, &state, &config), MappingNode::End);
        // nothing validated: neither rewrite nor refinement
        assert_eq!(next_node(MappingNode::Validate, &state, &config), MappingNode::End);
    }
}
