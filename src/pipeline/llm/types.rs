use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::LlmError;

/// Text-completion backend abstraction (allows mocking).
pub trait LlmClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;
}

/// Every LLM call the mapping pipeline makes, one per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmTask {
    Mappability,
    ExtractTerms,
    RankCandidates,
    RewriteTerms,
    ValidateMapping,
    RefineMapping,
}

impl LlmTask {
    pub const ALL: [LlmTask; 6] = [
        LlmTask::Mappability,
        LlmTask::ExtractTerms,
        LlmTask::RankCandidates,
        LlmTask::RewriteTerms,
        LlmTask::ValidateMapping,
        LlmTask::RefineMapping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmTask::Mappability => "mappability",
            LlmTask::ExtractTerms => "extract_terms",
            LlmTask::RankCandidates => "rank_candidates",
            LlmTask::RewriteTerms => "rewrite_terms",
            LlmTask::ValidateMapping => "validate_mapping",
            LlmTask::RefineMapping => "refine_mapping",
        }
    }

    /// Suffix of the `PHENOMAP_MODEL_<TASK>` override variable.
    pub fn env_suffix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    /// System prompt sent with every call of this task.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            LlmTask::Mappability => {
                "You decide whether a survey question describes a clinical phenotype \
                 that can be mapped to a medical ontology. Answer with JSON true or false only."
            }
            LlmTask::ExtractTerms => {
                "You extract medical terms from survey questions. Output a JSON array of strings only."
            }
            LlmTask::RankCandidates => {
                "You rank ontology candidates for a medical term. Output a JSON array only."
            }
            LlmTask::RewriteTerms => {
                "You rewrite medical terms so they match ontology vocabulary. Output a JSON array of strings only."
            }
            LlmTask::ValidateMapping => {
                "You validate an ontology mapping against its survey context. Output a JSON object only."
            }
            LlmTask::RefineMapping => {
                "You choose the best-fitting ancestor concept for an ontology mapping. Output a JSON object only."
            }
        }
    }

    /// Reverse lookup used by scripted clients that only see the system prompt.
    pub fn from_system_prompt(system: &str) -> Option<LlmTask> {
        LlmTask::ALL.into_iter().find(|t| t.system_prompt() == system)
    }
}

impl fmt::Display for LlmTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model name per task, falling back to a shared default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRouting {
    default_model: String,
    overrides: HashMap<LlmTask, String>,
}

impl ModelRouting {
    pub fn uniform(model: &str) -> Self {
        Self {
            default_model: model.to_string(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, task: LlmTask, model: &str) -> Self {
        self.overrides.insert(task, model.to_string());
        self
    }

    pub fn model_for(&self, task: LlmTask) -> &str {
        self.overrides
            .get(&task)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
