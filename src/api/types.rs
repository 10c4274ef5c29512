//! Shared types for the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::mapping::{
    MappingInput, MappingNode, MappingOutcome, MappingPipeline, MappingState, ValidatedMapping,
};

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes. The pipeline is immutable and reused
/// across requests; every run owns its own state.
#[derive(Clone)]
pub struct ApiContext {
    pub pipeline: Arc<MappingPipeline>,
    pub request_timeout: Duration,
}

impl ApiContext {
    pub fn new(pipeline: Arc<MappingPipeline>, request_timeout: Duration) -> Self {
        Self {
            pipeline,
            request_timeout,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// POST /map
// ═══════════════════════════════════════════════════════════

/// Request body. Fields are optional here so a missing one yields a
/// structured 400 instead of axum's plain-text rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct MapRequest {
    pub text: Option<String>,
    pub field_type: Option<String>,
    pub ontology: Option<String>,
}

/// One caller-facing mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingView {
    pub original: String,
    pub code: Option<String>,
    pub term: Option<String>,
    pub confidence: f32,
}

impl From<ValidatedMapping> for MappingView {
    fn from(m: ValidatedMapping) -> Self {
        Self {
            original: m.original,
            code: m.best_match_code,
            term: m.best_match_term,
            confidence: m.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResponse {
    pub input: MappingInput,
    pub validated_mappings: Vec<MappingView>,
    /// Refinement result; `{}` when refinement did not run or found nothing.
    pub refine_mapping: serde_json::Value,
    pub trace: Vec<MappingNode>,
    pub raw_state: MappingState,
}

impl MapResponse {
    pub fn from_outcome(input: MappingInput, outcome: MappingOutcome) -> Self {
        let validated_mappings = outcome
            .final_mappings()
            .into_iter()
            .map(MappingView::from)
            .collect();
        let refine_mapping = outcome
            .state
            .refine_mapping
            .as_ref()
            .and_then(|r| serde_json::to_value(r).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        Self {
            input,
            validated_mappings,
            refine_mapping,
            trace: outcome.trace,
            raw_state: outcome.state,
        }
    }
}
