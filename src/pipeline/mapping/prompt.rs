//! Prompt template registry.
//!
//! Every LLM call of the mapping pipeline renders one named template.
//! Placeholders are written `{{key}}`; rendering fails when the context lacks
//! a key the template uses, so a node can never send a half-filled prompt.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::state::FieldType;
use super::MappingError;
use crate::pipeline::llm::LlmTask;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("valid regex"));

// ═══════════════════════════════════════════════════════════
// Templates
// ═══════════════════════════════════════════════════════════

const IS_MAPPABLE: &str = r#"Survey question ({{field_type}} field):
"{{survey_text}}"

Does this question ask about a symptom, sign, clinical finding or other
phenotype that could be coded with a {{ontology}} term?
Answer with exactly one JSON value: true or false."#;

const EXTRACT_TERMS_RADIO: &str = r#"Survey question with single-choice answers:
"{{survey_text}}"

List the medical phenotype terms this question asks about. Use concise
clinical wording (for example "chest pain", not "pain in my chest").
Ignore answer options such as yes/no or frequency scales.
Output a JSON array of strings, e.g. ["chest pain"]."#;

const EXTRACT_TERMS_CHECKBOX: &str = r#"Survey question with multiple-choice answers:
"{{survey_text}}"

Each selectable option may name a separate condition. List every medical
phenotype term the question and its options mention, one term per option.
Output a JSON array of strings, e.g. ["asthma", "eczema"]."#;

const EXTRACT_TERMS_SHORT: &str = r#"Free-text survey question:
"{{survey_text}}"

List the medical phenotype terms this question asks about, in concise
clinical wording. Output a JSON array of strings, e.g. ["seizure"]."#;

const RANK_MAPPINGS: &str = r#"Medical term: "{{original}}"

Candidate ontology entries:
{{candidates}}

Score how well each candidate represents the medical term.
Output a JSON array with one object per candidate:
[{"matched_code": "<code>", "confidence": "<0-100>%"}]"#;

const VALIDATE_MAPPING: &str = r#"Survey question: "{{survey_text}}"
Proposed mapping: {{code}} ({{term}})

Confirm whether the proposed ontology entry fits the meaning of the question.
If a more appropriate code is obvious, correct it.
Output a JSON object:
{"best_match_code": "<code>", "best_match_term": "<term>", "confidence": "<0-100>%"}"#;

const RETRY_WITH_LLM_REWRITE: &str = r#"Survey question: "{{survey_text}}"

These terms found no good ontology match: {{failed_terms}}
Terms already tried (do not repeat any of them): {{previous_terms}}

Rewrite the failing terms using standard phenotype vocabulary, such as a
synonym, a broader term or the preferred clinical name.
Output a JSON array of strings."#;

const REFINE_MAPPING: &str = r#"Survey question: "{{survey_text}}"

Current mapping (low confidence):
{{validated_mappings}}

Broader ancestor concepts of the mapped entry:
{{candidate_list}}

Pick the ancestor concept that best fits the survey question.
Output a JSON object:
{"refined_term": "<name>", "refined_code": "<id>", "confidence": "<0-100>%"}"#;

/// Named prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    IsMappable,
    ExtractTermsRadio,
    ExtractTermsCheckbox,
    ExtractTermsShort,
    RankMappings,
    ValidateMapping,
    RetryWithLlmRewrite,
    RefineMapping,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 8] = [
        PromptTemplate::IsMappable,
        PromptTemplate::ExtractTermsRadio,
        PromptTemplate::ExtractTermsCheckbox,
        PromptTemplate::ExtractTermsShort,
        PromptTemplate::RankMappings,
        PromptTemplate::ValidateMapping,
        PromptTemplate::RetryWithLlmRewrite,
        PromptTemplate::RefineMapping,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PromptTemplate::IsMappable => "is_mappable",
            PromptTemplate::ExtractTermsRadio => "extract_terms_radio",
            PromptTemplate::ExtractTermsCheckbox => "extract_terms_checkbox",
            PromptTemplate::ExtractTermsShort => "extract_terms_short",
            PromptTemplate::RankMappings => "rank_mappings",
            PromptTemplate::ValidateMapping => "validate_mapping",
            PromptTemplate::RetryWithLlmRewrite => "retry_with_llm_rewrite",
            PromptTemplate::RefineMapping => "refine_mapping",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            PromptTemplate::IsMappable => IS_MAPPABLE,
            PromptTemplate::ExtractTermsRadio => EXTRACT_TERMS_RADIO,
            PromptTemplate::ExtractTermsCheckbox => EXTRACT_TERMS_CHECKBOX,
            PromptTemplate::ExtractTermsShort => EXTRACT_TERMS_SHORT,
            PromptTemplate::RankMappings => RANK_MAPPINGS,
            PromptTemplate::ValidateMapping => VALIDATE_MAPPING,
            PromptTemplate::RetryWithLlmRewrite => RETRY_WITH_LLM_REWRITE,
            PromptTemplate::RefineMapping => REFINE_MAPPING,
        }
    }

    /// LLM task (and therefore model and system prompt) this template feeds.
    pub fn task(&self) -> LlmTask {
        match self {
            PromptTemplate::IsMappable => LlmTask::Mappability,
            PromptTemplate::ExtractTermsRadio
            | PromptTemplate::ExtractTermsCheckbox
            | PromptTemplate::ExtractTermsShort => LlmTask::ExtractTerms,
            PromptTemplate::RankMappings => LlmTask::RankCandidates,
            PromptTemplate::ValidateMapping => LlmTask::ValidateMapping,
            PromptTemplate::RetryWithLlmRewrite => LlmTask::RewriteTerms,
            PromptTemplate::RefineMapping => LlmTask::RefineMapping,
        }
    }

    /// Extraction template for a survey field type.
    pub fn for_field_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Radio => PromptTemplate::ExtractTermsRadio,
            FieldType::Checkbox => PromptTemplate::ExtractTermsCheckbox,
            FieldType::Short => PromptTemplate::ExtractTermsShort,
        }
    }

    /// Placeholder keys the template uses, in order of first appearance.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(self.body()) {
            if let Some(k) = caps.get(1) {
                if !keys.contains(&k.as_str()) {
                    keys.push(k.as_str());
                }
            }
        }
        keys
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════

/// Key/value context for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    values: BTreeMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Render `template` with `context`. Extra context keys are ignored.
pub fn render_prompt(
    template: PromptTemplate,
    context: &PromptContext,
) -> Result<String, MappingError> {
    if let Some(missing) = template.keys().into_iter().find(|k| context.get(k).is_none()) {
        return Err(MappingError::MissingContextKey {
            template: template.name().to_string(),
            key: missing.to_string(),
        });
    }

    let rendered = PLACEHOLDER_RE.replace_all(template.body(), |caps: &regex::Captures| {
        caps.get(1)
            .and_then(|k| context.get(k.as_str()))
            .unwrap_or_default()
            .to_string()
    });
    Ok(rendered.into_owned())
}

/// `["a", "b"]` style list used inside prompts.
pub fn quoted_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
