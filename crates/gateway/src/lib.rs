//! SiteForge API Gateway
//!
//! Thin HTTP adapter over the orchestrator:
//! - `POST /ingest` queues a background crawl, `GET /ingest/{job_id}` polls it
//! - `POST /query` answers a question
//! - `GET /health` reports how the pipeline was assembled

pub mod handlers;
pub mod jobs;
pub mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use siteforge_common::config::AppConfig;
use siteforge_orchestrator::Orchestrator;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::jobs::JobStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: JobStore,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, orchestrator: Arc<Orchestrator>) -> Self {
        let jobs = JobStore::with_retention(config.job_retention(), config.server.max_finished_jobs);
        Self {
            config,
            orchestrator,
            jobs,
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ingest", post(handlers::jobs::submit_ingest))
        .route("/ingest/{job_id}", get(handlers::jobs::get_job))
        .route("/query", post(handlers::query::query))
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
