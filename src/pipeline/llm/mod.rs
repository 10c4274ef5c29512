pub mod types;
pub mod ollama;
pub mod openai;
pub mod sanitize;
pub mod mock;

pub use types::*;
pub use ollama::*;
pub use openai::*;
pub use sanitize::*;
pub use mock::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM service is not reachable at {0}")]
    Connection(String),

    #[error("LLM service returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Empty completion returned by model {0}")]
    EmptyCompletion(String),
}

impl LlmError {
    /// Map a reqwest failure onto the taxonomy used by every provider.
    pub(crate) fn from_reqwest(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if e.is_connect() {
            LlmError::Connection(base_url.to_string())
        } else if e.is_timeout() {
            LlmError::Timeout(timeout_secs)
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }
}
