//! Multi-source retrieval
//!
//! Provides three retrieval sources:
//! - Vector search (semantic similarity via embeddings)
//! - Graph search (chunks that mention the query's key terms)
//! - Lexical search (BM25 over an in-memory index)
//!
//! and a hybrid retriever that fuses them with weighted RRF.

mod fusion;
mod graph;
mod hybrid;
mod lexical;
mod vector;

pub use fusion::{FusionResult, RRFusion};
pub use graph::GraphRetriever;
pub use hybrid::{HybridRetriever, RetrievalSettings};
pub use lexical::{LexicalIndex, LexicalRetriever};
pub use vector::VectorRetriever;

use siteforge_common::errors::Result;
use siteforge_common::models::{RetrievedChunk, RetrievalMode};
use std::sync::Arc;

/// Search request shared by every source
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Query embedding, computed once by the hybrid retriever
    pub query_embedding: Option<Arc<Vec<f32>>>,

    /// Maximum results to return
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            query_embedding: None,
            limit,
        }
    }
}

/// Common trait for all retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks matching the query, best first
    async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>>;

    /// Get the retrieval mode
    fn mode(&self) -> RetrievalMode;
}
