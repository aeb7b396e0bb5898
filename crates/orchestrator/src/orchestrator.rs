//! The orchestrator: assembly, degradation policy and ownership-aware close

use serde::Serialize;
use siteforge_common::backends::{
    connect_with_timeout, connector_for, BackendConnector, BackendHandle, VectorStore,
};
use siteforge_common::config::AppConfig;
use siteforge_common::embeddings::create_embedder;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::{IngestionReport, QueryResult};
use siteforge_common::pipeline::{AuxiliaryRetriever, IngestionPipeline};
use siteforge_common::Embedder;
use siteforge_context::{AgenticPipeline, AnswerSynthesizer, QueryMemory};
use siteforge_ingestion::WebIngestionPipeline;
use siteforge_search::{HybridRetriever, LexicalIndex, RetrievalSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::availability::{
    effective_weights, EffectiveWeights, GraphAvailability, GraphHandles, Unavailable,
};

/// Snapshot of how the orchestrator was assembled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub collection: String,
    pub graph_enabled: bool,
    pub lexical_enabled: bool,
    pub synthesis_enabled: bool,
    pub weights: EffectiveWeights,
    pub closed: bool,
}

/// Everything `close` has to release
#[derive(Clone)]
struct Resources {
    ingestion: Arc<dyn IngestionPipeline>,
    ingest_vector: Arc<dyn VectorStore>,
    retrieval_vector: Arc<dyn VectorStore>,
    graph: Option<GraphHandles>,
}

fn close_failed(resource: &str, error: &AppError) {
    warn!(resource, error = %error, "Close failed, continuing");
    siteforge_common::metrics::record_close_failure(resource);
}

async fn close_handle<H: BackendHandle + ?Sized>(handle: &H) {
    if let Err(e) = handle.close().await {
        close_failed(handle.name(), &e);
    }
}

impl Resources {
    /// Ingestion first, then the ingestion-side handles it does not own,
    /// then the retrieval vector handle, then the graph query handle. Every
    /// step runs whatever happened before it.
    async fn close(&self) {
        if let Err(e) = self.ingestion.close().await {
            close_failed("ingestion", &e);
        }
        if !self.ingestion.owns_vector_store() {
            close_handle(self.ingest_vector.as_ref()).await;
        }
        close_handle(self.retrieval_vector.as_ref()).await;

        if let Some(graph) = &self.graph {
            close_handle(graph.query.as_ref()).await;
            if !self.ingestion.owns_graph_store() {
                close_handle(graph.ingest.as_ref()).await;
            }
        }
    }
}

/// Builds an [`Orchestrator`]. Anything not supplied comes from the config.
pub struct OrchestratorBuilder {
    config: AppConfig,
    connector: Option<Arc<dyn BackendConnector>>,
    embedder: Option<Arc<dyn Embedder>>,
    auxiliary: Vec<Arc<dyn AuxiliaryRetriever>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            connector: None,
            embedder: None,
            auxiliary: Vec::new(),
        }
    }

    pub fn connector(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn auxiliary_retriever(mut self, retriever: Arc<dyn AuxiliaryRetriever>) -> Self {
        self.auxiliary.push(retriever);
        self
    }

    async fn connect_graph(&self, connector: &dyn BackendConnector) -> Result<GraphHandles> {
        let config = &self.config.graph_store;
        let timeout = config.connect_timeout();

        let query = connect_with_timeout("graph", timeout, connector.connect_graph(config)).await?;
        match connect_with_timeout("graph", timeout, connector.connect_graph(config)).await {
            Ok(ingest) => Ok(GraphHandles { query, ingest }),
            Err(e) => {
                close_handle(query.as_ref()).await;
                Err(e)
            }
        }
    }

    /// Optional graph store: any failure turns into `Unavailable`
    async fn graph_availability(&self, connector: &dyn BackendConnector) -> GraphAvailability {
        if !self.config.graph_store.enabled {
            return Err(Unavailable::new("disabled by configuration"));
        }
        self.connect_graph(connector).await.map_err(|e| {
            warn!(error = %e, "Graph store unavailable, graph retrieval disabled");
            siteforge_common::metrics::record_degradation("graph");
            Unavailable::new(e.to_string())
        })
    }

    /// Two independently owned vector handles, ingestion side then retrieval side
    async fn connect_vectors(
        &self,
        connector: &dyn BackendConnector,
    ) -> Result<(Arc<dyn VectorStore>, Arc<dyn VectorStore>)> {
        let config = &self.config.vector_store;
        let timeout = config.connect_timeout();

        let ingest = connect_with_timeout("vector", timeout, connector.connect_vector(config)).await?;
        match connect_with_timeout("vector", timeout, connector.connect_vector(config)).await {
            Ok(retrieval) => Ok((ingest, retrieval)),
            Err(e) => {
                close_handle(ingest.as_ref()).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(collection = %self.config.vector_store.collection))]
    pub async fn build(self) -> Result<Orchestrator> {
        tokio::fs::create_dir_all(&self.config.storage.path).await?;

        let connector = match &self.connector {
            Some(connector) => Arc::clone(connector),
            None => connector_for(&self.config.vector_store, &self.config.graph_store)?,
        };
        let embedder = match &self.embedder {
            Some(embedder) => Arc::clone(embedder),
            None => create_embedder(&self.config.embedding)?,
        };

        let graph = self.graph_availability(connector.as_ref()).await;

        let (ingest_vector, retrieval_vector) = match self.connect_vectors(connector.as_ref()).await
        {
            Ok(handles) => handles,
            Err(e) => {
                if let Ok(handles) = &graph {
                    close_handle(handles.query.as_ref()).await;
                    close_handle(handles.ingest.as_ref()).await;
                }
                return Err(e);
            }
        };

        let parts = Parts {
            graph,
            ingest_vector,
            retrieval_vector,
            embedder,
        };
        match self.assemble(&parts) {
            Ok(orchestrator) => Ok(orchestrator),
            Err(e) => {
                parts.close().await;
                Err(e)
            }
        }
    }

    fn assemble(&self, parts: &Parts) -> Result<Orchestrator> {
        let config = &self.config;
        let weights = effective_weights(&config.retrieval, &parts.graph);
        let lexical = Arc::new(LexicalIndex::new());

        let mut ingestion = WebIngestionPipeline::new(
            &config.ingestion,
            Arc::clone(&parts.embedder),
            Arc::clone(&parts.ingest_vector),
        )?
        .with_lexical_index(Arc::clone(&lexical));
        if let Ok(handles) = &parts.graph {
            ingestion = ingestion.with_graph_store(Arc::clone(&handles.ingest));
        }
        let ingestion: Arc<dyn IngestionPipeline> = Arc::new(ingestion);

        let settings = RetrievalSettings {
            vector_weight: weights.vector,
            graph_weight: weights.graph,
            lexical_enabled: weights.lexical > 0.0,
            lexical_weight: weights.lexical,
            rrf_k: config.retrieval.rrf_k,
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
        };
        let mut retriever = HybridRetriever::new(
            settings,
            Arc::clone(&parts.embedder),
            Arc::clone(&parts.retrieval_vector),
        )
        .with_lexical_index(lexical);
        if let Ok(handles) = &parts.graph {
            retriever = retriever.with_graph_store(Arc::clone(&handles.query));
        }
        let retriever = Arc::new(retriever);

        let synthesizer = Arc::new(AnswerSynthesizer::new(&config.synthesis)?);
        let agent = AgenticPipeline::new(
            Arc::clone(&retriever),
            Arc::clone(&synthesizer),
            Some(Arc::clone(&ingestion)),
            self.auxiliary.clone(),
        )
        .with_memory(QueryMemory::new(&config.storage.path));

        let status = PipelineStatus {
            collection: config.vector_store.collection.clone(),
            graph_enabled: retriever.graph_enabled(),
            lexical_enabled: retriever.lexical_enabled(),
            synthesis_enabled: synthesizer.uses_llm(),
            weights,
            closed: false,
        };
        info!(
            collection = %status.collection,
            graph = status.graph_enabled,
            lexical = status.lexical_enabled,
            synthesis = status.synthesis_enabled,
            "Orchestrator assembled"
        );

        Ok(Orchestrator {
            config: config.clone(),
            resources: Resources {
                ingestion,
                ingest_vector: Arc::clone(&parts.ingest_vector),
                retrieval_vector: Arc::clone(&parts.retrieval_vector),
                graph: parts.graph.clone().ok(),
            },
            agent,
            status,
            closed: AtomicBool::new(false),
        })
    }
}

/// Handles opened during `build`, before the sub-pipelines exist
struct Parts {
    graph: GraphAvailability,
    ingest_vector: Arc<dyn VectorStore>,
    retrieval_vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Parts {
    async fn close(&self) {
        close_handle(self.ingest_vector.as_ref()).await;
        close_handle(self.retrieval_vector.as_ref()).await;
        if let Ok(handles) = &self.graph {
            close_handle(handles.query.as_ref()).await;
            close_handle(handles.ingest.as_ref()).await;
        }
    }
}

/// Web RAG pipeline: crawl and index pages, then answer questions over them.
///
/// Owns every handle it opens. `close` releases each exactly once; dropping
/// an open orchestrator schedules the same close on the current runtime.
pub struct Orchestrator {
    config: AppConfig,
    resources: Resources,
    agent: AgenticPipeline,
    status: PipelineStatus,
    closed: AtomicBool,
}

impl Orchestrator {
    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Production assembly from configuration alone
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        OrchestratorBuilder::new(config.clone()).build().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::PipelineClosed);
        }
        Ok(())
    }

    /// Crawl and index `url`. Page failures come back in the report.
    #[instrument(skip(self))]
    pub async fn ingest(&self, url: &str) -> Result<IngestionReport> {
        self.ensure_open()?;
        info!(%url, "Ingesting");
        self.resources.ingestion.ingest_url(url).await
    }

    /// Answer `text` with the configured iteration bounds
    pub async fn query(&self, text: &str) -> Result<QueryResult> {
        let agent = &self.config.agent;
        self.query_with(text, agent.max_iterations, agent.min_quality_threshold)
            .await
    }

    #[instrument(skip(self))]
    pub async fn query_with(
        &self,
        text: &str,
        max_iterations: usize,
        min_quality_threshold: f32,
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        self.agent
            .process_query(text, max_iterations, min_quality_threshold)
            .await
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            closed: self.is_closed(),
            ..self.status.clone()
        }
    }

    pub fn graph_enabled(&self) -> bool {
        self.status.graph_enabled
    }

    pub fn effective_weights(&self) -> EffectiveWeights {
        self.status.weights
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release every owned handle. Never fails; a second call does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.resources.close().await;
        info!("Orchestrator closed");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let resources = self.resources.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { resources.close().await });
            }
            Err(_) => warn!("Orchestrator dropped outside a runtime, handles not closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siteforge_common::backends::{GraphStore, MemoryBackend, MemoryConnector};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Writes through handles it was lent, or owns them when `owns` is set
    struct StubIngestion {
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        owns: bool,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl IngestionPipeline for StubIngestion {
        async fn ingest_url(&self, url: &str) -> Result<IngestionReport> {
            Err(AppError::Internal {
                message: format!("not crawling {url}"),
            })
        }

        fn owns_vector_store(&self) -> bool {
            self.owns
        }

        fn owns_graph_store(&self) -> bool {
            self.owns
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.owns {
                self.vector.close().await?;
                self.graph.close().await?;
            }
            Ok(())
        }
    }

    async fn resources(owns: bool) -> (Arc<MemoryBackend>, Arc<StubIngestion>, Resources) {
        let backend = MemoryBackend::new();
        let connector = MemoryConnector::new(Arc::clone(&backend));
        let config = AppConfig::default();

        let graph = GraphHandles {
            query: connector.connect_graph(&config.graph_store).await.unwrap(),
            ingest: connector.connect_graph(&config.graph_store).await.unwrap(),
        };
        let ingest_vector = connector.connect_vector(&config.vector_store).await.unwrap();
        let retrieval_vector = connector.connect_vector(&config.vector_store).await.unwrap();

        let stub = Arc::new(StubIngestion {
            vector: Arc::clone(&ingest_vector),
            graph: Arc::clone(&graph.ingest),
            owns,
            closes: AtomicUsize::new(0),
        });
        let resources = Resources {
            ingestion: Arc::clone(&stub) as Arc<dyn IngestionPipeline>,
            ingest_vector,
            retrieval_vector,
            graph: Some(graph),
        };
        (backend, stub, resources)
    }

    async fn assert_released_once(backend: &MemoryBackend) {
        let released = backend.released_sessions().await;
        let unique: HashSet<&String> = released.iter().collect();
        assert_eq!(released.len(), 4, "released: {released:?}");
        assert_eq!(unique.len(), 4, "released twice: {released:?}");
        assert_eq!(backend.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_borrowing_pipeline_handles_are_closed_by_orchestrator() {
        let (backend, stub, resources) = resources(false).await;
        resources.close().await;

        assert_eq!(stub.closes.load(Ordering::SeqCst), 1);
        assert!(stub.vector.is_closed());
        assert!(stub.graph.is_closed());
        assert_released_once(&backend).await;
    }

    #[tokio::test]
    async fn test_owning_pipeline_handles_are_not_closed_twice() {
        let (backend, stub, resources) = resources(true).await;
        resources.close().await;

        assert_eq!(stub.closes.load(Ordering::SeqCst), 1);
        assert_released_once(&backend).await;

        // ingestion handles went first, through the pipeline itself
        let released = backend.released_sessions().await;
        let opened = backend.opened_sessions().await;
        assert_eq!(released[0], opened[2]);
        assert_eq!(released[1], opened[1]);
    }
}
