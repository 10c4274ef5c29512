use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::pipeline::llm::{LlmTask, ModelRouting, DEFAULT_OPENAI_BASE_URL};
use crate::pipeline::ontology::{DEFAULT_ONTOLOGY_BASE_URL, MAX_ONTOLOGY_TIMEOUT_SECS};
use crate::pipeline_config::{derive_config, MappingConfig, PipelineVariant};

/// Application-level constants
pub const APP_NAME: &str = "phenomap";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    format!("info,{}=debug,hyper=warn,reqwest=warn", env!("CARGO_CRATE_NAME"))
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Unknown LLM provider: {0} (expected ollama or openai)")]
    UnknownProvider(String),

    #[error("Unknown pipeline variant: {0}")]
    UnknownVariant(String),
}

/// Which LLM backend serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" | "open_ai" | "open-ai" => Ok(LlmProvider::OpenAi),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Runtime configuration
// ═══════════════════════════════════════════════════════════

/// Everything the binary needs, resolved from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub ontology_base_url: String,
    pub ontology_timeout_secs: u64,
    pub llm_provider: LlmProvider,
    pub llm_base_url: String,
    pub openai_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub models: ModelRouting,
    pub variant: PipelineVariant,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = match get("PHENOMAP_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PHENOMAP_BIND_ADDR",
                value: raw,
            })?,
            None => DEFAULT_BIND_ADDR.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PHENOMAP_BIND_ADDR",
                value: DEFAULT_BIND_ADDR.to_string(),
            })?,
        };

        let llm_provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => LlmProvider::Ollama,
        };
        let llm_base_url = match llm_provider {
            LlmProvider::Ollama => get("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.into()),
            LlmProvider::OpenAi => get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
        };

        let default_model = get("PHENOMAP_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        let models = LlmTask::ALL
            .into_iter()
            .fold(ModelRouting::uniform(&default_model), |routing, task| {
                match get(&format!("PHENOMAP_MODEL_{}", task.env_suffix())) {
                    Some(model) => routing.with_override(task, &model),
                    None => routing,
                }
            });

        let variant = match get("PHENOMAP_VARIANT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::UnknownVariant(raw))?,
            None => PipelineVariant::Full,
        };

        Ok(Self {
            bind_addr,
            ontology_base_url: get("ONTOLOGY_API_BASE_URL").unwrap_or_else(|| DEFAULT_ONTOLOGY_BASE_URL.into()),
            ontology_timeout_secs: parse_secs(get("ONTOLOGY_TIMEOUT_SECS"), "ONTOLOGY_TIMEOUT_SECS", MAX_ONTOLOGY_TIMEOUT_SECS)?,
            llm_provider,
            llm_base_url,
            openai_api_key: get("OPENAI_API_KEY"),
            llm_timeout_secs: parse_secs(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?,
            models,
            variant,
            request_timeout_secs: parse_secs(
                get("PHENOMAP_REQUEST_TIMEOUT_SECS"),
                "PHENOMAP_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        })
    }

    pub fn mapping_config(&self) -> MappingConfig {
        derive_config(self.variant)
    }
}

fn parse_secs(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::InvalidValue { key, value }),
        },
    }
}
