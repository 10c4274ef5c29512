//! Ontology service collaborator: term search plus the concept graph
//! lookups (code → CUI, ancestors, concept details) used by refinement.

pub mod types;
pub mod client;
pub mod mock;

pub use types::*;
pub use client::*;
pub use mock::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("Ontology service is not reachable at {0}")]
    Connection(String),

    #[error("Ontology request timed out after {0}s")]
    Timeout(u64),

    #[error("Ontology service returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed ontology response: {0}")]
    ResponseParsing(String),
}
