//! Graph retrieval: chunks that mention the query's key terms

use super::{RetrievalMode, RetrievedChunk, Retriever, SearchRequest};
use siteforge_common::backends::GraphStore;
use siteforge_common::errors::Result;
use siteforge_common::text::key_terms;
use std::sync::Arc;
use tracing::debug;

const MAX_QUERY_TERMS: usize = 16;

pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
}

impl GraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Retriever for GraphRetriever {
    async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>> {
        let terms = key_terms(&request.query, MAX_QUERY_TERMS);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self.store.related_chunks(&terms, request.limit).await?;
        debug!(terms = terms.len(), count = hits.len(), "Graph search completed");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk::from_chunk(hit.chunk, hit.score, RetrievalMode::Graph))
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_common::backends::{BackendConnector, MemoryBackend, MemoryConnector};
    use siteforge_common::config::GraphStoreConfig;
    use siteforge_common::models::{ContentChunk, WebDocument};

    #[tokio::test]
    async fn test_term_overlap_ranking() {
        let connector = MemoryConnector::new(MemoryBackend::new());
        let store = connector
            .connect_graph(&GraphStoreConfig::default())
            .await
            .unwrap();

        let document = WebDocument {
            url: "https://docs.example/".to_string(),
            title: "Docs".to_string(),
            text: String::new(),
        };
        let chunks = vec![
            ContentChunk {
                id: "c0".to_string(),
                source_url: document.url.clone(),
                title: "Docs".to_string(),
                content: "borrow checker rules".to_string(),
                position: 0,
            },
            ContentChunk {
                id: "c1".to_string(),
                source_url: document.url.clone(),
                title: "Docs".to_string(),
                content: "the borrow checker enforces lifetimes".to_string(),
                position: 1,
            },
        ];
        store.upsert_document(&document, &chunks).await.unwrap();

        let retriever = GraphRetriever::new(store);
        let results = retriever
            .retrieve(&SearchRequest::new("borrow checker lifetimes", 5))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "c1");
        assert_eq!(results[0].retrieval_mode, RetrievalMode::Graph);
    }

    #[tokio::test]
    async fn test_stop_words_only_query() {
        let connector = MemoryConnector::new(MemoryBackend::new());
        let store = connector
            .connect_graph(&GraphStoreConfig::default())
            .await
            .unwrap();
        let retriever = GraphRetriever::new(store);

        let results = retriever
            .retrieve(&SearchRequest::new("what is the", 5))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
