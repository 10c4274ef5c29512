//! Mapping pipeline configuration derived from a variant preset.
//!
//! A variant selects which stages of the mapping state machine are active
//! (ranking, validation, rewrite retry, ancestor refinement) and which signal
//! triggers a rewrite. Thresholds and budgets are shared by every variant and
//! can be overridden after derivation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Signal that sends the pipeline into a rewrite cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTrigger {
    /// After fetching, at least one term returned no candidates.
    #[default]
    EmptyCandidates,
    /// After validation, the top validated confidence is under the threshold.
    LowConfidence,
}

/// Named stage combinations of the mapping state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Every stage on; rewrites fire on empty candidate lists.
    #[default]
    Full,
    /// Ranked candidates are promoted without LLM scoring.
    WithoutRank,
    /// The top ranked candidate is promoted without LLM validation.
    WithoutValidate,
    /// No rewrite cycle.
    WithoutRetry,
    /// Every stage on; rewrites fire on low validated confidence.
    ValidateRetry,
}

impl PipelineVariant {
    pub const ALL: [PipelineVariant; 5] = [
        PipelineVariant::Full,
        PipelineVariant::WithoutRank,
        PipelineVariant::WithoutValidate,
        PipelineVariant::WithoutRetry,
        PipelineVariant::ValidateRetry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineVariant::Full => "full",
            PipelineVariant::WithoutRank => "without_rank",
            PipelineVariant::WithoutValidate => "without_validate",
            PipelineVariant::WithoutRetry => "without_retry",
            PipelineVariant::ValidateRetry => "validate_retry",
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        PipelineVariant::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| format!("unknown pipeline variant: {s}"))
    }
}

/// Thresholds, budgets and stage switches for one mapping run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingConfig {
    pub variant: PipelineVariant,
    /// Validated confidence under which rewrite (low-confidence mode) or
    /// ancestor refinement kicks in.
    pub confidence_threshold: f32,
    /// Ceiling of `retry_count`.
    pub max_rewrite_retries: u32,
    /// Ceiling of `mappability_retry_count`.
    pub max_mappability_retries: u32,
    /// LLM calls allowed while extraction keeps returning an empty list.
    pub max_extraction_attempts: u32,
    /// `limit` parameter of every ontology search.
    pub search_limit: usize,
    pub ranking_enabled: bool,
    pub validation_enabled: bool,
    pub retry_enabled: bool,
    pub refinement_enabled: bool,
    pub retry_trigger: RetryTrigger,
}

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;
pub const DEFAULT_MAX_REWRITE_RETRIES: u32 = 5;
pub const DEFAULT_MAX_MAPPABILITY_RETRIES: u32 = 5;
pub const DEFAULT_MAX_EXTRACTION_ATTEMPTS: u32 = 3;
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Nodes visited by one pass without any rewrite, `End` included.
const BASE_TRANSITIONS: u32 = 8;
/// Upper bound of nodes one rewrite cycle can add (rewrite, fetch, rank, validate).
const TRANSITIONS_PER_REWRITE: u32 = 4;

impl MappingConfig {
    /// Hard cap on visited nodes in a single run.
    pub fn max_transitions(&self) -> u32 {
        BASE_TRANSITIONS + TRANSITIONS_PER_REWRITE * (self.max_rewrite_retries + 1)
    }

    pub fn with_max_rewrite_retries(mut self, retries: u32) -> Self {
        self.max_rewrite_retries = retries;
        self
    }

    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.refinement_enabled = enabled;
        self
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        derive_config(PipelineVariant::Full)
    }
}

// ═══════════════════════════════════════════════════════════
// Derivation
// ═══════════════════════════════════════════════════════════

/// Derive the mapping configuration for a variant preset.
pub fn derive_config(variant: PipelineVariant) -> MappingConfig {
    let base = MappingConfig {
        variant,
        confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        max_rewrite_retries: DEFAULT_MAX_REWRITE_RETRIES,
        max_mappability_retries: DEFAULT_MAX_MAPPABILITY_RETRIES,
        max_extraction_attempts: DEFAULT_MAX_EXTRACTION_ATTEMPTS,
        search_limit: DEFAULT_SEARCH_LIMIT,
        ranking_enabled: true,
        validation_enabled: true,
        retry_enabled: true,
        refinement_enabled: true,
        retry_trigger: RetryTrigger::EmptyCandidates,
    };

    match variant {
        PipelineVariant::Full => base,
        PipelineVariant::WithoutRank => MappingConfig {
            ranking_enabled: false,
            ..base
        },
        PipelineVariant::WithoutValidate => MappingConfig {
            validation_enabled: false,
            ..base
        },
        PipelineVariant::WithoutRetry => MappingConfig {
            retry_enabled: false,
            ..base
        },
        PipelineVariant::ValidateRetry => MappingConfig {
            retry_trigger: RetryTrigger::LowConfidence,
            ..base
        },
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
