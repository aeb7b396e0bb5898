//! SiteForge API Gateway
//!
//! Loads configuration, assembles the orchestrator and serves the HTTP API.
//! On Ctrl+C or SIGTERM the server drains and the orchestrator is closed.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use siteforge_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics,
};
use siteforge_gateway::{create_router, AppState};
use siteforge_orchestrator::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting SiteForge API Gateway v{}", siteforge_common::VERSION);

    if config.observability.metrics_port > 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let config = Arc::new(config);
    info!(
        vector = %config.vector_store.base_url(),
        graph = %config.graph_store.base_url(),
        "Connecting backends..."
    );
    let orchestrator = Arc::new(
        Orchestrator::connect(&config)
            .await
            .context("failed to assemble the pipeline")?,
    );

    let state = AppState::new(Arc::clone(&config), Arc::clone(&orchestrator));
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host / server.port")?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    orchestrator.close().await;
    served?;

    info!("Server shutdown complete");
    Ok(())
}

/// JSON or human-readable logs; `RUST_LOG` overrides the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let prefix = metrics::METRICS_PREFIX;
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{prefix}_query_duration_seconds")),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{prefix}_request_duration_seconds")),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{prefix}_ingestion_duration_seconds")),
            metrics::INGESTION_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
