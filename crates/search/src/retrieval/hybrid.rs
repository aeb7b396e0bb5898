//! Hybrid retrieval combining vector, graph and lexical search
//!
//! Uses weighted RRF fusion to combine results from every active source. A
//! source that fails is logged and contributes nothing.

use super::{
    fusion::RRFusion, graph::GraphRetriever, lexical::LexicalRetriever, vector::VectorRetriever,
    LexicalIndex, RetrievalMode, RetrievedChunk, Retriever, SearchRequest,
};
use siteforge_common::backends::{GraphStore, VectorStore};
use siteforge_common::config::RetrievalConfig;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::Embedder;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Weights and limits for one retrieval sub-pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub vector_weight: f32,
    pub graph_weight: f32,
    pub lexical_enabled: bool,
    pub lexical_weight: f32,
    pub rrf_k: f32,
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl RetrievalSettings {
    /// Lexical retrieval is enabled only for a strictly positive weight
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            graph_weight: config.graph_weight,
            lexical_enabled: config.lexical_weight > 0.0,
            lexical_weight: config.lexical_weight,
            rrf_k: config.rrf_k,
            top_k: config.top_k,
            min_score: config.min_score,
        }
    }

    pub fn with_graph_weight(mut self, weight: f32) -> Self {
        self.graph_weight = weight;
        self
    }

    fn fusion(&self) -> RRFusion {
        let lexical_weight = if self.lexical_enabled {
            self.lexical_weight
        } else {
            0.0
        };
        RRFusion::with_weights(self.vector_weight, self.graph_weight, lexical_weight)
            .with_k(self.rrf_k)
    }
}

/// Retrieval sub-pipeline.
///
/// Borrows the vector and graph handles it is given; closing them is the
/// caller's job.
pub struct HybridRetriever {
    settings: RetrievalSettings,
    embedder: Arc<dyn Embedder>,
    vector: VectorRetriever,
    graph: Option<GraphRetriever>,
    lexical: Option<LexicalRetriever>,
    fusion: RRFusion,
}

impl HybridRetriever {
    pub fn new(
        settings: RetrievalSettings,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            fusion: settings.fusion(),
            vector: VectorRetriever::new(vector_store, Arc::clone(&embedder)),
            embedder,
            graph: None,
            lexical: None,
            settings,
        }
    }

    /// Attach a graph handle; ignored while the graph weight is zero
    pub fn with_graph_store(mut self, graph_store: Arc<dyn GraphStore>) -> Self {
        if self.settings.graph_weight > 0.0 {
            self.graph = Some(GraphRetriever::new(graph_store));
        }
        self
    }

    /// Attach the lexical index; ignored unless lexical retrieval is enabled
    pub fn with_lexical_index(mut self, index: Arc<LexicalIndex>) -> Self {
        if self.settings.lexical_enabled {
            self.lexical = Some(LexicalRetriever::new(index));
        }
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn graph_enabled(&self) -> bool {
        self.graph.is_some()
    }

    pub fn lexical_enabled(&self) -> bool {
        self.lexical.is_some()
    }

    /// Fused ranking for `query`, at most `limit` results
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        self.retrieve(&SearchRequest::new(query, limit)).await
    }
}

async fn run_source(
    retriever: Option<&dyn Retriever>,
    request: &SearchRequest,
) -> Option<Result<Vec<RetrievedChunk>>> {
    match retriever {
        Some(retriever) => Some(retriever.retrieve(request).await),
        None => None,
    }
}

#[async_trait::async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>> {
        if request.limit == 0 || request.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Fetch more results from each retriever for better fusion
        let mut expanded = request.clone();
        expanded.limit = request.limit * 2;
        if expanded.query_embedding.is_none() {
            expanded.query_embedding = Some(Arc::new(self.embedder.embed(&request.query).await?));
        }

        let (vector, graph, lexical) = tokio::join!(
            self.vector.retrieve(&expanded),
            run_source(self.graph.as_ref().map(|g| g as &dyn Retriever), &expanded),
            run_source(self.lexical.as_ref().map(|l| l as &dyn Retriever), &expanded),
        );

        let outcomes = [
            (RetrievalMode::Vector, Some(vector)),
            (RetrievalMode::Graph, graph),
            (RetrievalMode::Lexical, lexical),
        ];

        let mut sources = Vec::new();
        let mut attempted = 0;
        let mut last_error = None;
        for (mode, outcome) in outcomes {
            let Some(outcome) = outcome else { continue };
            attempted += 1;
            match outcome {
                Ok(chunks) => sources.push((mode, chunks)),
                Err(e) => {
                    warn!(source = mode.as_str(), error = %e, "Retrieval source failed");
                    siteforge_common::metrics::record_retrieval_error(mode.as_str());
                    last_error = Some(e);
                }
            }
        }

        if sources.is_empty() && attempted > 0 {
            return Err(last_error.unwrap_or_else(|| AppError::Internal {
                message: "no retrieval source produced results".to_string(),
            }));
        }

        let fused = self.fusion.fuse(sources, request.limit);
        let chunks: Vec<RetrievedChunk> = fused
            .into_iter()
            .filter(|r| r.chunk.score >= self.settings.min_score)
            .map(|r| r.chunk)
            .collect();

        debug!(count = chunks.len(), "Hybrid retrieval completed");
        Ok(chunks)
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Hybrid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_common::backends::{BackendConnector, MemoryBackend, MemoryConnector, VectorPoint};
    use siteforge_common::config::{GraphStoreConfig, VectorStoreConfig};
    use siteforge_common::embeddings::MockEmbedder;
    use siteforge_common::models::{ContentChunk, WebDocument};

    const DIM: usize = 64;

    fn chunks() -> Vec<ContentChunk> {
        [
            "ownership rules govern memory in rust programs",
            "the borrow checker validates every reference",
            "cargo downloads crates from the registry",
        ]
        .iter()
        .enumerate()
        .map(|(i, text)| ContentChunk {
            id: format!("chunk-{i}"),
            source_url: "https://docs.example/book".to_string(),
            title: "Book".to_string(),
            content: text.to_string(),
            position: i,
        })
        .collect()
    }

    struct Stores {
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        lexical: Arc<LexicalIndex>,
        embedder: Arc<dyn Embedder>,
    }

    async fn seeded() -> Stores {
        let connector = MemoryConnector::new(MemoryBackend::new());
        let vector = connector
            .connect_vector(&VectorStoreConfig::default())
            .await
            .unwrap();
        let graph = connector
            .connect_graph(&GraphStoreConfig::default())
            .await
            .unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIM));
        let lexical = Arc::new(LexicalIndex::new());

        let chunks = chunks();
        vector.ensure_collection(DIM).await.unwrap();
        let mut points = Vec::new();
        for chunk in &chunks {
            points.push(VectorPoint {
                id: chunk.id.clone(),
                vector: embedder.embed(&chunk.content).await.unwrap(),
                chunk: chunk.clone(),
            });
        }
        vector.upsert(points).await.unwrap();
        let document = WebDocument {
            url: "https://docs.example/book".to_string(),
            title: "Book".to_string(),
            text: String::new(),
        };
        graph.upsert_document(&document, &chunks).await.unwrap();
        lexical.add_chunks(&chunks).await;

        Stores {
            vector,
            graph,
            lexical,
            embedder,
        }
    }

    #[tokio::test]
    async fn test_all_sources_fused() {
        let stores = seeded().await;
        let retriever = HybridRetriever::new(
            RetrievalSettings::default(),
            stores.embedder,
            stores.vector,
        )
        .with_graph_store(stores.graph)
        .with_lexical_index(stores.lexical);

        assert!(retriever.graph_enabled());
        assert!(retriever.lexical_enabled());

        let results = retriever.search("borrow checker reference", 3).await.unwrap();
        assert_eq!(results[0].chunk_id, "chunk-1");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| r.retrieval_mode == RetrievalMode::Hybrid));
    }

    #[tokio::test]
    async fn test_zero_weights_disable_sources() {
        let stores = seeded().await;
        let settings = RetrievalSettings::from_config(&RetrievalConfig {
            lexical_weight: 0.0,
            ..Default::default()
        })
        .with_graph_weight(0.0);

        let retriever = HybridRetriever::new(settings, stores.embedder, stores.vector)
            .with_graph_store(stores.graph)
            .with_lexical_index(stores.lexical);

        assert!(!retriever.graph_enabled());
        assert!(!retriever.lexical_enabled());
        assert!(!retriever.search("cargo crates", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_source_degrades() {
        let stores = seeded().await;
        stores.graph.close().await.unwrap();

        let retriever = HybridRetriever::new(
            RetrievalSettings::default(),
            stores.embedder,
            stores.vector,
        )
        .with_graph_store(stores.graph);

        let results = retriever.search("cargo registry", 2).await.unwrap();
        assert_eq!(results[0].chunk_id, "chunk-2");
    }

    #[tokio::test]
    async fn test_all_sources_failed_is_error() {
        let stores = seeded().await;
        stores.vector.close().await.unwrap();

        let retriever = HybridRetriever::new(
            RetrievalSettings::default(),
            stores.embedder,
            stores.vector,
        );
        let err = retriever.search("cargo", 2).await.unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_min_score_filter() {
        let stores = seeded().await;
        let settings = RetrievalSettings {
            min_score: 1.0,
            ..Default::default()
        };
        let retriever = HybridRetriever::new(settings, stores.embedder, stores.vector)
            .with_lexical_index(stores.lexical);

        let results = retriever.search("ownership memory", 3).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
