use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MappingError;
use crate::pipeline::ontology::{ConceptInfo, RawCandidate};
use crate::pipeline_config::MappingConfig;

pub const DEFAULT_ONTOLOGY: &str = "HPO";

/// Survey field kind; selects the extraction prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Radio,
    Checkbox,
    Short,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::Short => "short",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "radio" => Ok(FieldType::Radio),
            "checkbox" => Ok(FieldType::Checkbox),
            "short" => Ok(FieldType::Short),
            _ => Err(MappingError::InvalidFieldType(s.to_string())),
        }
    }
}

fn default_ontology() -> String {
    DEFAULT_ONTOLOGY.to_string()
}

/// Pipeline entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingInput {
    pub text: String,
    pub field_type: FieldType,
    #[serde(default = "default_ontology")]
    pub ontology: String,
}

impl MappingInput {
    pub fn new(text: &str, field_type: FieldType) -> Self {
        Self {
            text: text.to_string(),
            field_type,
            ontology: default_ontology(),
        }
    }
}

/// Search results for one extracted term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermCandidates {
    pub original: String,
    pub candidates: Vec<RawCandidate>,
}

impl TermCandidates {
    pub fn empty(original: &str) -> Self {
        Self {
            original: original.to_string(),
            candidates: vec![],
        }
    }
}

/// A candidate annotated by the ranker. `confidence` is `None` only when
/// ranking is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub code: String,
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: Option<f32>,
}

impl ScoredCandidate {
    pub fn unscored(candidate: &RawCandidate) -> Self {
        Self {
            code: candidate.code.clone(),
            term: candidate.term.clone(),
            description: candidate.description.clone(),
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTerm {
    pub original: String,
    pub ranked_candidates: Vec<ScoredCandidate>,
}

/// One winner per term, or a null match with confidence 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedMapping {
    pub original: String,
    pub best_match_code: Option<String>,
    pub best_match_term: Option<String>,
    pub confidence: f32,
}

impl ValidatedMapping {
    pub fn no_match(original: &str) -> Self {
        Self {
            original: original.to_string(),
            best_match_code: None,
            best_match_term: None,
            confidence: 0.0,
        }
    }

    /// Provisionally trust a top candidate; unscored candidates count as 1.0.
    pub fn from_top_candidate(original: &str, top: &ScoredCandidate) -> Self {
        Self {
            original: original.to_string(),
            best_match_code: Some(top.code.clone()),
            best_match_term: Some(top.term.clone()),
            confidence: top.confidence.unwrap_or(1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedMapping {
    pub refined_term: String,
    pub refined_code: String,
    pub confidence: f32,
}

/// Ancestor refinement outcome; `Unavailable` serializes as `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Refinement {
    Refined(RefinedMapping),
    Unavailable {},
}

impl Refinement {
    pub fn unavailable() -> Self {
        Refinement::Unavailable {}
    }

    pub fn refined(&self) -> Option<&RefinedMapping> {
        match self {
            Refinement::Refined(r) => Some(r),
            Refinement::Unavailable {} => None,
        }
    }
}

/// State threaded through every node of one mapping run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingState {
    pub text: String,
    pub field_type: FieldType,
    pub ontology: String,
    pub is_mappable: bool,
    pub mappability_retry_count: u32,
    pub extracted_terms: Vec<String>,
    pub umls_mappings: Vec<TermCandidates>,
    pub ranked_mappings: Vec<RankedTerm>,
    pub validated_mappings: Vec<ValidatedMapping>,
    /// Ordered set: insertion order kept, no duplicates.
    pub history_rewritten_terms: Vec<String>,
    pub retry_count: u32,
    pub preserved_mappings: Vec<TermCandidates>,
    pub preserved_validations: Vec<ValidatedMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_mapping: Option<Refinement>,
    pub candidate_details: Vec<ConceptInfo>,
}

/// Typed output of a node. Each variant names exactly the fields its node owns.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Mappability {
        is_mappable: bool,
        retry_count: u32,
    },
    Extracted {
        terms: Vec<String>,
    },
    /// Fetch consumes the preserved candidate entries.
    Fetched {
        mappings: Vec<TermCandidates>,
    },
    Ranked {
        mappings: Vec<RankedTerm>,
    },
    Validated {
        mappings: Vec<ValidatedMapping>,
    },
    Rewritten {
        terms: Vec<String>,
        history: Vec<String>,
        retry_count: u32,
        preserved_mappings: Vec<TermCandidates>,
        preserved_validations: Vec<ValidatedMapping>,
    },
    /// Rewrite budget spent: the last fetch promoted without LLM scoring.
    /// Consumes the preserved candidate entries.
    Settled {
        ranked: Vec<RankedTerm>,
        validated: Vec<ValidatedMapping>,
    },
    /// Current validations followed by the preserved ones; clears the carry.
    ValidationsMerged {
        mappings: Vec<ValidatedMapping>,
    },
    Refined {
        refinement: Refinement,
        details: Vec<ConceptInfo>,
    },
}

impl StateUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            StateUpdate::Mappability { .. } => "mappability",
            StateUpdate::Extracted { .. } => "extracted",
            StateUpdate::Fetched { .. } => "fetched",
            StateUpdate::Ranked { .. } => "ranked",
            StateUpdate::Validated { .. } => "validated",
            StateUpdate::Rewritten { .. } => "rewritten",
            StateUpdate::Settled { .. } => "settled",
            StateUpdate::ValidationsMerged { .. } => "validations_merged",
            StateUpdate::Refined { .. } => "refined",
        }
    }
}

impl MappingState {
    pub fn new(input: MappingInput) -> Self {
        Self {
            text: input.text,
            field_type: input.field_type,
            ontology: input.ontology,
            is_mappable: false,
            mappability_retry_count: 0,
            extracted_terms: vec![],
            umls_mappings: vec![],
            ranked_mappings: vec![],
            validated_mappings: vec![],
            history_rewritten_terms: vec![],
            retry_count: 0,
            preserved_mappings: vec![],
            preserved_validations: vec![],
            refine_mapping: None,
            candidate_details: vec![],
        }
    }

    /// Functional update: only the fields owned by `update` change.
    pub fn apply(self, update: StateUpdate) -> Self {
        match update {
            StateUpdate::Mappability {
                is_mappable,
                retry_count,
            } => Self {
                is_mappable,
                mappability_retry_count: retry_count,
                ..self
            },
            StateUpdate::Extracted { terms } => Self {
                extracted_terms: terms,
                ..self
            },
            StateUpdate::Fetched { mappings } => Self {
                umls_mappings: mappings,
                preserved_mappings: vec![],
                ..self
            },
            StateUpdate::Ranked { mappings } => Self {
                ranked_mappings: mappings,
                ..self
            },
            StateUpdate::Validated { mappings } => Self {
                validated_mappings: mappings,
                ..self
            },
            StateUpdate::Rewritten {
                terms,
                history,
                retry_count,
                preserved_mappings,
                preserved_validations,
            } => Self {
                extracted_terms: terms,
                history_rewritten_terms: history,
                retry_count,
                preserved_mappings,
                preserved_validations,
                ..self
            },
            StateUpdate::Settled { ranked, validated } => Self {
                ranked_mappings: ranked,
                validated_mappings: validated,
                preserved_mappings: vec![],
                ..self
            },
            StateUpdate::ValidationsMerged { mappings } => Self {
                validated_mappings: mappings,
                preserved_validations: vec![],
                ..self
            },
            StateUpdate::Refined {
                refinement,
                details,
            } => Self {
                refine_mapping: Some(refinement),
                candidate_details: details,
                ..self
            },
        }
    }

    /// Confidence of the first validated mapping; 1.0 when nothing was validated.
    pub fn top_confidence(&self) -> f32 {
        self.validated_mappings
            .first()
            .map(|v| v.confidence)
            .unwrap_or(1.0)
    }

    pub fn has_empty_candidates(&self) -> bool {
        self.umls_mappings.iter().any(|m| m.candidates.is_empty())
    }

    /// What callers consume: validated mappings, or the top ranked candidate
    /// per term when validation produced nothing. The blank fetch placeholder
    /// never appears.
    pub fn final_mappings(&self) -> Vec<ValidatedMapping> {
        if !self.validated_mappings.is_empty() {
            return self
                .validated_mappings
                .iter()
                .filter(|v| !is_placeholder(&v.original))
                .cloned()
                .collect();
        }
        self.ranked_mappings
            .iter()
            .filter(|r| !is_placeholder(&r.original))
            .map(|r| match r.ranked_candidates.first() {
                Some(top) => ValidatedMapping::from_top_candidate(&r.original, top),
                None => ValidatedMapping::no_match(&r.original),
            })
            .collect()
    }
}

/// The entry the fetcher emits when there is no term to search.
pub fn is_placeholder(original: &str) -> bool {
    original.trim().is_empty()
}

fn in_unit(c: f32) -> bool {
    (0.0..=1.0).contains(&c)
}

/// Stage-boundary checks between the state before and after `update`.
/// Returns one message per violated invariant.
pub fn check_invariants(
    before: &MappingState,
    update_kind: &str,
    after: &MappingState,
    config: &MappingConfig,
) -> Vec<String> {
    let mut violations = Vec::new();

    if after.retry_count < before.retry_count {
        violations.push(format!(
            "retry_count decreased from {} to {}",
            before.retry_count, after.retry_count
        ));
    }
    if after.retry_count > config.max_rewrite_retries {
        violations.push(format!(
            "retry_count {} exceeds ceiling {}",
            after.retry_count, config.max_rewrite_retries
        ));
    }
    if after.mappability_retry_count < before.mappability_retry_count {
        violations.push("mappability_retry_count decreased".to_string());
    }
    if after.mappability_retry_count > config.max_mappability_retries {
        violations.push(format!(
            "mappability_retry_count {} exceeds ceiling {}",
            after.mappability_retry_count, config.max_mappability_retries
        ));
    }

    let lost: Vec<&String> = before
        .history_rewritten_terms
        .iter()
        .filter(|t| !after.history_rewritten_terms.contains(t))
        .collect();
    if !lost.is_empty() {
        violations.push(format!("history lost terms: {lost:?}"));
    }

    if matches!(update_kind, "validated" | "settled")
        && after.validated_mappings.len() != after.ranked_mappings.len()
    {
        violations.push(format!(
            "{} validated mappings for {} ranked terms",
            after.validated_mappings.len(),
            after.ranked_mappings.len()
        ));
    }

    let ranked_out_of_range = after
        .ranked_mappings
        .iter()
        .flat_map(|r| r.ranked_candidates.iter())
        .filter_map(|c| c.confidence)
        .any(|c| !in_unit(c));
    let validated_out_of_range = after
        .validated_mappings
        .iter()
        .chain(after.preserved_validations.iter())
        .any(|v| !in_unit(v.confidence));
    let refined_out_of_range = after
        .refine_mapping
        .as_ref()
        .and_then(Refinement::refined)
        .is_some_and(|r| !in_unit(r.confidence));
    if ranked_out_of_range || validated_out_of_range || refined_out_of_range {
        violations.push("confidence outside [0, 1]".to_string());
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> MappingState {
        MappingState::new(MappingInput::new("My child has chest pain.", FieldType::Radio))
    }

    #[test]
    fn field_type_parses_case_insensitively() {
        assert_eq!("Radio".parse::<FieldType>().unwrap(), FieldType::Radio);
        assert_eq!(" checkbox ".parse::<FieldType>().unwrap(), FieldType::Checkbox);
        assert_eq!("SHORT".parse::<FieldType>().unwrap(), FieldType::Short);
        assert!(matches!(
            "dropdown".parse::<FieldType>(),
            Err(MappingError::InvalidFieldType(_))
        ));
    }

    #[test]
    fn input_defaults_ontology() {
        let input: MappingInput =
            serde_json::from_str(r#"{"text": "x", "field_type": "short"}"#).unwrap();
        assert_eq!(input.ontology, "HPO");
    }

    #[test]
    fn apply_changes_only_owned_fields() {
        let before = state().apply(StateUpdate::Extracted {
            terms: vec!["chest pain".into()],
        });
        let after = before.clone().apply(StateUpdate::Mappability {
            is_mappable: true,
            retry_count: 2,
        });
        assert!(after.is_mappable);
        assert_eq!(after.mappability_retry_count, 2);
        assert_eq!(after.extracted_terms, before.extracted_terms);
        assert_eq!(after.text, before.text);
    }

    #[test]
    fn fetch_consumes_preserved_mappings() {
        let s = state().apply(StateUpdate::Rewritten {
            terms: vec!["thoracic pain".into()],
            history: vec!["chest pain".into()],
            retry_count: 1,
            preserved_mappings: vec![TermCandidates::empty("kept")],
            preserved_validations: vec![],
        });
        assert_eq!(s.preserved_mappings.len(), 1);
        let s = s.apply(StateUpdate::Fetched { mappings: vec![] });
        assert!(s.preserved_mappings.is_empty());
        assert_eq!(s.retry_count, 1);
    }

    #[test]
    fn top_confidence_defaults_to_one() {
        let s = state();
        assert!((s.top_confidence() - 1.0).abs() < f32::EPSILON);
        let s = s.apply(StateUpdate::Validated {
            mappings: vec![ValidatedMapping {
                original: "chest pain".into(),
                best_match_code: Some("HP:0100749".into()),
                best_match_term: Some("Chest pain".into()),
                confidence: 0.4,
            }],
        });
        assert!((s.top_confidence() - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn final_mappings_fall_back_to_ranked() {
        let s = state().apply(StateUpdate::Ranked {
            mappings: vec![
                RankedTerm {
                    original: "chest pain".into(),
                    ranked_candidates: vec![ScoredCandidate {
                        code: "HP:0100749".into(),
                        term: "Chest pain".into(),
                        description: None,
                        confidence: Some(0.8),
                    }],
                },
                RankedTerm {
                    original: "zzz".into(),
                    ranked_candidates: vec![],
                },
            ],
        });
        let finals = s.final_mappings();
        assert_eq!(finals.len(), 2);
        assert_eq!(finals[0].best_match_code.as_deref(), Some("HP:0100749"));
        assert!((finals[0].confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(finals[1], ValidatedMapping::no_match("zzz"));
    }

    #[test]
    fn final_mappings_skip_placeholder() {
        let s = state().apply(StateUpdate::Validated {
            mappings: vec![ValidatedMapping::no_match(""), ValidatedMapping::no_match("cough")],
        });
        assert_eq!(s.final_mappings(), vec![ValidatedMapping::no_match("cough")]);

        let s = state().apply(StateUpdate::Ranked {
            mappings: vec![RankedTerm {
                original: " ".into(),
                ranked_candidates: vec![],
            }],
        });
        assert!(s.final_mappings().is_empty());
    }

    #[test]
    fn settled_consumes_preserved_mappings() {
        let s = state()
            .apply(StateUpdate::Rewritten {
                terms: vec!["t1".into()],
                history: vec!["tummy ache".into()],
                retry_count: 5,
                preserved_mappings: vec![TermCandidates::empty("cough")],
                preserved_validations: vec![],
            })
            .apply(StateUpdate::Settled {
                ranked: vec![],
                validated: vec![ValidatedMapping::no_match("tummy ache")],
            });
        assert!(s.preserved_mappings.is_empty());
        assert_eq!(s.validated_mappings.len(), 1);
        assert_eq!(s.extracted_terms, vec!["t1"]);
    }

    #[test]
    fn unavailable_refinement_serializes_as_empty_object() {
        let json = serde_json::to_value(Refinement::unavailable()).unwrap();
        assert_eq!(json, serde_json::json!({}));
        let refined = Refinement::Refined(RefinedMapping {
            refined_term: "Pain".into(),
            refined_code: "C0030193".into(),
            confidence: 0.7,
        });
        assert_eq!(serde_json::to_value(&refined).unwrap()["refined_code"], "C0030193");
    }

    #[test]
    fn invariants_flag_shrinking_history_and_counters() {
        let config = MappingConfig::default();
        let before = state().apply(StateUpdate::Rewritten {
            terms: vec![],
            history: vec!["a".into(), "b".into()],
            retry_count: 2,
            preserved_mappings: vec![],
            preserved_validations: vec![],
        });
        let after = before.clone().apply(StateUpdate::Rewritten {
            terms: vec![],
            history: vec!["a".into()],
            retry_count: 1,
            preserved_mappings: vec![],
            preserved_validations: vec![],
        });
        let violations = check_invariants(&before, "rewritten", &after, &config);
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn invariants_flag_validation_cardinality() {
        let config = MappingConfig::default();
        let before = state();
        let after = before.clone().apply(StateUpdate::Validated {
            mappings: vec![ValidatedMapping::no_match("x")],
        });
        let violations = check_invariants(&before, "validated", &after, &config);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("validated mappings"));
    }

    #[test]
    fn clean_transition_has_no_violations() {
        let config = MappingConfig::default();
        let before = state();
        let after = before.clone().apply(StateUpdate::Extracted {
            terms: vec!["chest pain".into()],
        });
        assert!(check_invariants(&before, "extracted", &after, &config).is_empty());
    }
}
