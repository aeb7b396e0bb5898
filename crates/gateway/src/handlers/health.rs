//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;
use siteforge_orchestrator::PipelineStatus;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(flatten)]
    pub pipeline: PipelineStatus,
}

/// Liveness plus how the pipeline was assembled. A degraded graph store
/// still reports healthy; `graph_enabled` says what is running.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = state.orchestrator.status();
    let status = if pipeline.closed { "closed" } else { "healthy" };

    Json(HealthResponse {
        status: status.to_string(),
        version: siteforge_common::VERSION.to_string(),
        pipeline,
    })
}
