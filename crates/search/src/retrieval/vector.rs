//! Vector similarity search
//!
//! Provides semantic search via embedding similarity

use super::{RetrievalMode, RetrievedChunk, Retriever, SearchRequest};
use siteforge_common::backends::VectorStore;
use siteforge_common::errors::Result;
use siteforge_common::Embedder;
use std::sync::Arc;
use tracing::debug;

/// Vector retriever over a borrowed vector store handle
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>> {
        let embedding = match &request.query_embedding {
            Some(embedding) => Arc::clone(embedding),
            None => Arc::new(self.embedder.embed(&request.query).await?),
        };

        let hits = self.store.search(&embedding, request.limit).await?;
        debug!(count = hits.len(), "Vector search completed");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk::from_chunk(hit.chunk, hit.score, RetrievalMode::Vector))
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_common::backends::{BackendConnector, MemoryBackend, MemoryConnector, VectorPoint};
    use siteforge_common::config::VectorStoreConfig;
    use siteforge_common::embeddings::MockEmbedder;
    use siteforge_common::models::ContentChunk;

    fn chunk(id: &str, content: &str) -> ContentChunk {
        ContentChunk {
            id: id.to_string(),
            source_url: "https://docs.example/page".to_string(),
            title: "Page".to_string(),
            content: content.to_string(),
            position: 0,
        }
    }

    #[tokio::test]
    async fn test_closest_chunk_first() {
        let connector = MemoryConnector::new(MemoryBackend::new());
        let store = connector
            .connect_vector(&VectorStoreConfig::default())
            .await
            .unwrap();
        let embedder = Arc::new(MockEmbedder::new(64));
        store.ensure_collection(64).await.unwrap();

        let texts = [
            ("a", "tokio runtime drives async tasks"),
            ("b", "postgres stores relational rows"),
        ];
        let mut points = Vec::new();
        for (id, text) in texts {
            points.push(VectorPoint {
                id: id.to_string(),
                vector: embedder.embed(text).await.unwrap(),
                chunk: chunk(id, text),
            });
        }
        store.upsert(points).await.unwrap();

        let retriever = VectorRetriever::new(store, embedder);
        let results = retriever
            .retrieve(&SearchRequest::new("async tokio tasks", 2))
            .await
            .unwrap();

        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results[0].retrieval_mode, RetrievalMode::Vector);
    }
}
