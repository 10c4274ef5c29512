use std::time::Duration;

use serde::de::DeserializeOwned;

use super::types::{
    AncestorsResponse, CodeToConceptResponse, ConceptInfo, OntologyClient, RawCandidate,
    RawConceptInfo, SearchResponse,
};
use super::OntologyError;

/// Public JAX ontology API for HPO.
pub const DEFAULT_ONTOLOGY_BASE_URL: &str = "https://ontology.jax.org/api/hp";

/// Upper bound for any single ontology request.
pub const MAX_ONTOLOGY_TIMEOUT_SECS: u64 = 10;

/// Blocking HTTP client for the ontology service.
pub struct HttpOntologyClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpOntologyClient {
    /// Timeouts above [`MAX_ONTOLOGY_TIMEOUT_SECS`] are clamped.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, OntologyError> {
        let timeout_secs = timeout_secs.clamp(1, MAX_ONTOLOGY_TIMEOUT_SECS);
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OntologyError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, OntologyError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    OntologyError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    OntologyError::Timeout(self.timeout_secs)
                } else {
                    OntologyError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OntologyError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        response
            .json()
            .map_err(|e| OntologyError::ResponseParsing(e.to_string()))
    }
}

impl OntologyClient for HttpOntologyClient {
    fn search(&self, term: &str, limit: usize) -> Result<Vec<RawCandidate>, OntologyError> {
        let limit = limit.to_string();
        let response: SearchResponse =
            self.get_json("/search", &[("q", term), ("page", "0"), ("limit", limit.as_str())])?;

        Ok(response
            .terms
            .into_iter()
            .filter_map(|hit| hit.into_candidate())
            .collect())
    }

    fn code_to_concept(&self, code: &str) -> Result<Option<String>, OntologyError> {
        let response: CodeToConceptResponse =
            self.get_json(&format!("/hpo_to_cui/{}", code.trim()), &[])?;
        Ok(response.cui.filter(|c| !c.trim().is_empty()))
    }

    fn ancestors(&self, cui: &str) -> Result<Vec<String>, OntologyError> {
        let response: AncestorsResponse =
            self.get_json(&format!("/cuis/{}/ancestors", cui.trim()), &[])?;
        Ok(response.ancestors)
    }

    fn concept_info(&self, cui: &str) -> Result<Option<ConceptInfo>, OntologyError> {
        let raw: RawConceptInfo = self.get_json(&format!("/cuis/{}", cui.trim()), &[])?;
        Ok(raw.into_concept())
    }
}
