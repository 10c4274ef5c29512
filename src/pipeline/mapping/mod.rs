pub mod state;
pub mod confidence;
pub mod parser;
pub mod prompt;
pub mod caller;
pub mod mappability;
pub mod extract;
pub mod fetch;
pub mod rank;
pub mod validate;
pub mod rewrite;
pub mod refine;
pub mod orchestrator;

pub use state::*;
pub use confidence::*;
pub use prompt::*;
pub use caller::*;
pub use orchestrator::*;

use thiserror::Error;

use super::llm::LlmError;
use super::ontology::OntologyError;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Invalid confidence value: {0}")]
    InvalidConfidence(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Prompt template '{template}' is missing context key '{key}'")]
    MissingContextKey { template: String, key: String },

    #[error("Unknown field type '{0}' (expected radio, checkbox or short)")]
    InvalidFieldType(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),
}
