//! In-memory ontology service for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::types::{ConceptInfo, OntologyClient, RawCandidate};
use super::OntologyError;

/// Canned ontology: search results per term (case-insensitive), plus a tiny
/// concept graph for refinement.
#[derive(Default)]
pub struct MockOntologyClient {
    results: HashMap<String, Vec<RawCandidate>>,
    failing_terms: HashSet<String>,
    code_to_concept: HashMap<String, String>,
    ancestors: HashMap<String, Vec<String>>,
    concepts: HashMap<String, ConceptInfo>,
    graph_unavailable: bool,
    searches: Mutex<Vec<String>>,
}

fn key(term: &str) -> String {
    term.trim().to_lowercase()
}

impl MockOntologyClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, term: &str, candidates: Vec<RawCandidate>) -> Self {
        self.results.insert(key(term), candidates);
        self
    }

    /// Searches for `term` fail with a server error.
    pub fn failing(mut self, term: &str) -> Self {
        self.failing_terms.insert(key(term));
        self
    }

    pub fn with_concept(mut self, code: &str, cui: &str) -> Self {
        self.code_to_concept.insert(code.to_string(), cui.to_string());
        self
    }

    pub fn with_ancestors(mut self, cui: &str, ancestors: &[&str]) -> Self {
        self.ancestors.insert(
            cui.to_string(),
            ancestors.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn with_concept_info(mut self, cui: &str, name: &str) -> Self {
        self.concepts.insert(
            cui.to_string(),
            ConceptInfo {
                cui: cui.to_string(),
                name: name.to_string(),
                definition: None,
            },
        );
        self
    }

    /// All graph lookups fail with a connection error.
    pub fn graph_unavailable(mut self) -> Self {
        self.graph_unavailable = true;
        self
    }

    /// Terms searched so far, in call order.
    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn graph_guard(&self) -> Result<(), OntologyError> {
        if self.graph_unavailable {
            Err(OntologyError::Connection("mock".into()))
        } else {
            Ok(())
        }
    }
}

impl OntologyClient for MockOntologyClient {
    fn search(&self, term: &str, limit: usize) -> Result<Vec<RawCandidate>, OntologyError> {
        if let Ok(mut searches) = self.searches.lock() {
            searches.push(term.to_string());
        }
        let k = key(term);
        if self.failing_terms.contains(&k) {
            return Err(OntologyError::Status {
                status: 500,
                path: "/search".into(),
            });
        }
        Ok(self
            .results
            .get(&k)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn code_to_concept(&self, code: &str) -> Result<Option<String>, OntologyError> {
        self.graph_guard()?;
        Ok(self.code_to_concept.get(code).cloned())
    }

    fn ancestors(&self, cui: &str) -> Result<Vec<String>, OntologyError> {
        self.graph_guard()?;
        Ok(self.ancestors.get(cui).cloned().unwrap_or_default())
    }

    fn concept_info(&self, cui: &str) -> Result<Option<ConceptInfo>, OntologyError> {
        self.graph_guard()?;
        Ok(self.concepts.get(cui).cloned())
    }
}
