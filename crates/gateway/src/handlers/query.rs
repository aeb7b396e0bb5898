//! Query handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use siteforge_common::{
    errors::{AppError, Result},
    models::{IngestionReport, RetrievedChunk},
};

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub query: String,

    /// Falls back to `agent.max_iterations`
    #[validate(range(min = 1, max = 10))]
    pub max_iterations: Option<usize>,

    /// Falls back to `agent.min_quality_threshold`
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_quality_threshold: Option<f32>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub num_results: usize,
    pub quality: f32,
    pub iterations: usize,
    pub sources: Vec<SourceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionReport>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SourceItem {
    pub chunk_id: String,
    pub url: String,
    pub title: String,
    pub score: f32,
}

impl From<&RetrievedChunk> for SourceItem {
    fn from(chunk: &RetrievedChunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            url: chunk.source_url.clone(),
            title: chunk.title.clone(),
            score: chunk.score,
        }
    }
}

/// Answer a question over indexed content
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let defaults = &state.config.agent;
    let result = state
        .orchestrator
        .query_with(
            &request.query,
            request.max_iterations.unwrap_or(defaults.max_iterations),
            request
                .min_quality_threshold
                .unwrap_or(defaults.min_quality_threshold),
        )
        .await?;

    Ok(Json(QueryResponse {
        num_results: result.num_results(),
        sources: result.results.iter().map(SourceItem::from).collect(),
        answer: result.answer,
        quality: result.quality,
        iterations: result.iterations,
        ingestion: result.ingestion,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
