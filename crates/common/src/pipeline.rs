//! Contracts between the orchestrator and its sub-pipelines

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{IngestionReport, RetrievedChunk};

/// Crawl-and-index pipeline.
///
/// `ingest_url` only returns `Err` when infrastructure is unusable; page
/// failures go into the report.
#[async_trait]
pub trait IngestionPipeline: Send + Sync {
    async fn ingest_url(&self, url: &str) -> Result<IngestionReport>;

    /// True if `close` releases the vector handle this pipeline writes to
    fn owns_vector_store(&self) -> bool;

    /// True if `close` releases the graph handle this pipeline writes to
    fn owns_graph_store(&self) -> bool;

    /// Release owned handles. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Extra evidence source plugged into the query pipeline
#[async_trait]
pub trait AuxiliaryRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievedChunk>>;
}
