//! Web ingestion pipeline: crawl → convert → chunk → embed → store

use async_trait::async_trait;
use siteforge_common::backends::{GraphStore, VectorPoint, VectorStore};
use siteforge_common::config::IngestionConfig;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::{IngestionReport, WebDocument};
use siteforge_common::pipeline::IngestionPipeline;
use siteforge_common::Embedder;
use siteforge_search::LexicalIndex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::chunker::{Chunker, ChunkingConfig};
use crate::crawler::Crawler;
use crate::errors::IngestionError;
use crate::html::html_to_document;

/// Ingests web pages into the vector store, plus the graph store and lexical
/// index when present.
///
/// Owns its vector handle; the graph handle is only borrowed.
pub struct WebIngestionPipeline {
    crawler: Crawler,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Option<Arc<dyn GraphStore>>,
    lexical_index: Option<Arc<LexicalIndex>>,
    collection_ready: OnceCell<()>,
    closed: AtomicBool,
}

impl WebIngestionPipeline {
    pub fn new(
        config: &IngestionConfig,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        Ok(Self {
            crawler: Crawler::new(config)?,
            chunker: Chunker::new(&ChunkingConfig::from(config))?,
            embedder,
            vector_store,
            graph_store: None,
            lexical_index: None,
            collection_ready: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_graph_store(mut self, graph_store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(graph_store);
        self
    }

    pub fn with_lexical_index(mut self, index: Arc<LexicalIndex>) -> Self {
        self.lexical_index = Some(index);
        self
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.collection_ready
            .get_or_try_init(|| async {
                self.vector_store
                    .ensure_collection(self.embedder.dimension())
                    .await
            })
            .await?;
        Ok(())
    }

    /// Store one converted page. Returns the number of chunks written.
    async fn store_document(&self, document: &WebDocument) -> Result<usize> {
        let chunks = self.chunker.chunk_document(document);
        if chunks.is_empty() {
            return Err(IngestionError::EmptyDocument {
                url: document.url.clone(),
            }
            .into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(AppError::EmbeddingError {
                message: format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            });
        }

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id.clone(),
                vector,
                chunk: chunk.clone(),
            })
            .collect();
        let written = self.vector_store.upsert(points).await?;

        if let Some(graph) = &self.graph_store {
            if let Err(e) = graph.upsert_document(document, &chunks).await {
                warn!(url = %document.url, error = %e, "Graph write failed, continuing");
            }
        }

        if let Some(index) = &self.lexical_index {
            index.add_chunks(&chunks).await;
        }

        debug!(url = %document.url, chunks = written, "Document stored");
        Ok(written)
    }
}

/// Page-level problems that belong in the report instead of an error
fn is_page_failure(error: &AppError) -> bool {
    matches!(error, AppError::Crawl { .. })
}

#[async_trait]
impl IngestionPipeline for WebIngestionPipeline {
    #[instrument(skip(self))]
    async fn ingest_url(&self, url: &str) -> Result<IngestionReport> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::PipelineClosed);
        }
        let started = Instant::now();
        self.ensure_collection().await?;

        let outcome = self.crawler.crawl(url).await;
        let mut report = IngestionReport {
            url: url.to_string(),
            failed_documents: outcome
                .failures
                .iter()
                .map(|f| f.url().unwrap_or(url).to_string())
                .collect(),
            ..Default::default()
        };

        for page in outcome.pages {
            let document = html_to_document(&page.url, &page.html);
            match self.store_document(&document).await {
                Ok(count) => {
                    report.chunks_ingested += count;
                    report.documents_processed += 1;
                }
                Err(e) if is_page_failure(&e) => {
                    warn!(url = %page.url, error = %e, "Page skipped");
                    report.failed_documents.push(page.url);
                }
                Err(e) => return Err(e),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        siteforge_common::metrics::record_ingestion(
            started.elapsed().as_secs_f64(),
            report.chunks_ingested,
            report.failed_documents.len(),
        );

        info!(
            chunks = report.chunks_ingested,
            documents = report.documents_processed,
            failed = report.failed_documents.len(),
            duration_ms = report.duration_ms,
            "Ingestion finished"
        );
        Ok(report)
    }

    fn owns_vector_store(&self) -> bool {
        true
    }

    fn owns_graph_store(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.vector_store.close().await
    }
}
