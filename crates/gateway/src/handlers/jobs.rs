//! Ingest job handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::jobs::IngestJob;
use crate::AppState;
use siteforge_common::errors::{AppError, Result};

/// Request to crawl and index a site
#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(url, length(max = 2048))]
    pub url: String,
}

#[derive(Serialize)]
pub struct IngestAccepted {
    pub job_id: Uuid,
    pub status: String,
    pub poll_url: String,
}

/// Queue an ingest. The crawl runs on a spawned task; poll the returned job.
pub async fn submit_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestAccepted>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("url".to_string()),
    })?;

    let job_id = state.jobs.create(&request.url).await;
    info!(%job_id, url = %request.url, "Ingest job queued");

    let jobs = state.jobs.clone();
    let orchestrator = state.orchestrator.clone();
    let url = request.url;
    tokio::spawn(async move {
        jobs.mark_running(job_id).await;
        match orchestrator.ingest(&url).await {
            Ok(report) => {
                info!(%job_id, chunks = report.chunks_ingested, "Ingest job finished");
                jobs.complete(job_id, &report).await;
            }
            Err(e) => {
                warn!(%job_id, error = %e, "Ingest job failed");
                jobs.fail(job_id, e.to_string()).await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            job_id,
            status: "pending".to_string(),
            poll_url: format!("/ingest/{job_id}"),
        }),
    ))
}

/// Get job status
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<IngestJob>> {
    state
        .jobs
        .get(job_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::JobNotFound {
            id: job_id.to_string(),
        })
}
