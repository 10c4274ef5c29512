use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, MapRequest, MapResponse};
use crate::pipeline::mapping::{FieldType, MappingInput};

/// `POST /map`: run one survey item through the mapping pipeline.
///
/// The pipeline is blocking (LLM and ontology calls), so it runs on
/// tokio's blocking pool under the configured request deadline. A blocking
/// task cannot be aborted; on timeout the run is cancelled at its next node.
pub async fn map(
    State(ctx): State<ApiContext>,
    payload: Result<Json<MapRequest>, JsonRejection>,
) -> Result<Json<MapResponse>, ApiError> {
    let Json(request) = payload?;
    let input = to_input(request)?;

    let pipeline = ctx.pipeline.clone();
    let run_input = input.clone();
    let cancelled = Arc::new(AtomicBool::new(false));
    let run_cancelled = cancelled.clone();
    let task =
        tokio::task::spawn_blocking(move || pipeline.run_cancellable(run_input, &run_cancelled));

    let outcome = match tokio::time::timeout(ctx.request_timeout, task).await {
        Ok(joined) => joined?,
        Err(_) => {
            cancelled.store(true, Ordering::Relaxed);
            tracing::warn!(
                timeout_secs = ctx.request_timeout.as_secs(),
                "Mapping request timed out, cancelling run"
            );
            return Err(ApiError::Timeout(ctx.request_timeout.as_secs()));
        }
    };

    tracing::info!(
        run_id = %outcome.run_id,
        mappings = outcome.state.validated_mappings.len(),
        transitions = outcome.trace.len(),
        "Mapping request complete"
    );

    Ok(Json(MapResponse::from_outcome(input, outcome)))
}

fn to_input(request: MapRequest) -> Result<MappingInput, ApiError> {
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("text is required".into()))?;
    let field_type: FieldType = request
        .field_type
        .ok_or_else(|| ApiError::BadRequest("field_type is required".into()))?
        .parse()?;

    let mut input = MappingInput::new(&text, field_type);
    if let Some(ontology) = request.ontology.filter(|o| !o.trim().is_empty()) {
        input.ontology = ontology;
    }
    Ok(input)
}
