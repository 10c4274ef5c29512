use super::state::{MappingState, StateUpdate, TermCandidates};
use crate::pipeline::ontology::OntologyClient;
use crate::pipeline_config::MappingConfig;

/// Search the ontology for every extracted term.
///
/// Preserved entries from the previous rewrite cycle come first, then one
/// entry per extracted term in order. A failing search degrades to an empty
/// candidate list for that term only. With no terms and nothing preserved, a
/// single placeholder entry (`original: ""`) is emitted so the empty-candidate
/// trigger can still fire.
pub fn fetch_candidates(
    state: &MappingState,
    ontology: &dyn OntologyClient,
    config: &MappingConfig,
) -> StateUpdate {
    let mut mappings = state.preserved_mappings.clone();

    if state.extracted_terms.is_empty() && mappings.is_empty() {
        tracing::warn!("No extracted terms, emitting placeholder entry");
        return StateUpdate::Fetched {
            mappings: vec![TermCandidates::empty("")],
        };
    }

    for term in &state.extracted_terms {
        let candidates = match ontology.search(term, config.search_limit) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(term = %term, error = %e, "Ontology search failed");
                vec![]
            }
        };
        tracing::debug!(term = %term, count = candidates.len(), "Fetched candidates");
        mappings.push(TermCandidates {
            original: term.clone(),
            candidates,
        });
    }

    StateUpdate::Fetched { mappings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mapping::state::{FieldType, MappingInput};
    use crate::pipeline::ontology::{MockOntologyClient, RawCandidate};

    fn state_with(terms: &[&str]) -> MappingState {
        MappingState::new(MappingInput::new("q", FieldType::Radio)).apply(StateUpdate::Extracted {
            terms: terms.iter().map(|t| t.to_string()).collect(),
        })
    }

    fn fetched(update: StateUpdate) -> Vec<TermCandidates> {
        match update {
            StateUpdate::Fetched { mappings } => mappings,
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn one_entry_per_term_in_order() {
        let ontology = MockOntologyClient::new()
            .with_results("chest pain", vec![RawCandidate::new("HP:0100749", "Chest pain")]);
        let mappings = fetched(fetch_candidates(
            &state_with(&["chest pain", "zzz"]),
            &ontology,
            &MappingConfig::default(),
        ));
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].original, "chest pain");
        assert_eq!(mappings[0].candidates.len(), 1);
        assert_eq!(mappings[1], TermCandidates::empty("zzz"));
    }

    #[test]
    fn failing_term_degrades_to_empty() {
        let ontology = MockOntologyClient::new()
            .failing("chest pain")
            .with_results("cough", vec![RawCandidate::new("HP:0012735", "Cough")]);
        let mappings = fetched(fetch_candidates(
            &state_with(&["chest pain", "cough"]),
            &ontology,
            &MappingConfig::default(),
        ));
        assert_eq!(mappings[0], TermCandidates::empty("chest pain"));
        assert_eq!(mappings[1].candidates.len(), 1);
    }

    #[test]
    fn no_terms_yields_placeholder() {
        let ontology = MockOntologyClient::new();
        let mappings = fetched(fetch_candidates(&state_with(&[]), &ontology, &MappingConfig::default()));
        assert_eq!(mappings, vec![TermCandidates::empty("")]);
        assert!(ontology.searches().is_empty());
    }

    #[test]
    fn preserved_entries_come_first() {
        let kept = TermCandidates {
            original: "cough".into(),
            candidates: vec![RawCandidate::new("HP:0012735", "Cough")],
        };
        let state = state_with(&[]).apply(StateUpdate::Rewritten {
            terms: vec!["thoracic pain".into()],
            history: vec![],
            retry_count: 1,
            preserved_mappings: vec![kept.clone()],
            preserved_validations: vec![],
        });
        let ontology = MockOntologyClient::new();
        let mappings = fetched(fetch_candidates(&state, &ontology, &MappingConfig::default()));
        assert_eq!(mappings[0], kept);
        assert_eq!(mappings[1], TermCandidates::empty("thoracic pain"));
        assert_eq!(ontology.searches(), vec!["thoracic pain"]);
    }

    #[test]
    fn search_limit_is_passed() {
        let ontology = MockOntologyClient::new().with_results(
            "pain",
            (0..8).map(|i| RawCandidate::new(&format!("HP:{i}"), "x")).collect(),
        );
        let mappings = fetched(fetch_candidates(&state_with(&["pain"]), &ontology, &MappingConfig::default()));
        assert_eq!(mappings[0].candidates.len(), 5);
    }
}
