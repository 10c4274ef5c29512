use serde::{Deserialize, Serialize};

use super::OntologyError;

/// A candidate ontology entry, normalized from the service's native fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub code: String,
    pub term: String,
    pub description: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub xrefs: Vec<String>,
}

impl RawCandidate {
    pub fn new(code: &str, term: &str) -> Self {
        Self {
            code: code.to_string(),
            term: term.to_string(),
            description: None,
            synonyms: vec![],
            xrefs: vec![],
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Search hit as returned by `GET /search` (`id`, `name`, `definition`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: Option<String>,
    pub name: Option<String>,
    pub definition: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub synonyms: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub xrefs: Vec<String>,
}

impl SearchHit {
    /// Hits without an id or a name cannot be ranked or validated.
    pub fn into_candidate(self) -> Option<RawCandidate> {
        let code = self.id.filter(|s| !s.trim().is_empty())?;
        let term = self.name.filter(|s| !s.trim().is_empty())?;
        Some(RawCandidate {
            code,
            term,
            description: self.definition.filter(|d| !d.trim().is_empty()),
            synonyms: self.synonyms,
            xrefs: self.xrefs,
        })
    }
}

/// `GET /search` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub terms: Vec<SearchHit>,
}

/// Concept details from `GET /cuis/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptInfo {
    pub cui: String,
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
}

/// Raw `GET /cuis/{id}` body; both keys may be missing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConceptInfo {
    pub cui: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
}

impl RawConceptInfo {
    pub fn into_concept(self) -> Option<ConceptInfo> {
        let cui = self.cui.filter(|s| !s.trim().is_empty())?;
        let name = self.name.filter(|s| !s.trim().is_empty())?;
        Some(ConceptInfo {
            cui,
            name,
            definition: self.definition,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AncestorsResponse {
    #[serde(default)]
    pub ancestors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeToConceptResponse {
    pub cui: Option<String>,
}

/// Ontology lookup abstraction (allows mocking).
pub trait OntologyClient {
    /// Search candidates for a free-text term.
    fn search(&self, term: &str, limit: usize) -> Result<Vec<RawCandidate>, OntologyError>;

    /// Resolve an ontology code (e.g. `HP:0100749`) to the service's concept id.
    fn code_to_concept(&self, code: &str) -> Result<Option<String>, OntologyError>;

    /// Ancestor concept ids of a concept.
    fn ancestors(&self, cui: &str) -> Result<Vec<String>, OntologyError>;

    /// Name and details of a concept; `None` when the service has no usable record.
    fn concept_info(&self, cui: &str) -> Result<Option<ConceptInfo>, OntologyError>;
}

/// Synonyms/xrefs arrive as strings, objects or null depending on the backend.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let items = match value {
        Some(serde_json::Value::Array(items)) => items,
        _ => return Ok(vec![]),
    };
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("id"))
                .and_then(|n| n.as_str())
                .map(str::to_string),
            _ => None,
        })
        .collect())
}
