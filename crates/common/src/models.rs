//! Shared data model passed between the sub-pipelines

use serde::{Deserialize, Serialize};

use crate::plan::Step;

/// Which retriever produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Vector,
    Graph,
    Lexical,
    Hybrid,
    Auxiliary,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Vector => "vector",
            RetrievalMode::Graph => "graph",
            RetrievalMode::Lexical => "lexical",
            RetrievalMode::Hybrid => "hybrid",
            RetrievalMode::Auxiliary => "auxiliary",
        }
    }
}

/// A stored unit of page content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub position: usize,
}

/// A converted page ready for chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDocument {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// A piece of evidence returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub position: usize,
    pub score: f32,
    pub retrieval_mode: RetrievalMode,
}

impl RetrievedChunk {
    pub fn from_chunk(chunk: ContentChunk, score: f32, mode: RetrievalMode) -> Self {
        Self {
            chunk_id: chunk.id,
            source_url: chunk.source_url,
            title: chunk.title,
            content: chunk.content,
            position: chunk.position,
            score,
            retrieval_mode: mode,
        }
    }
}

/// Outcome of ingesting one start URL.
///
/// Page-level failures are listed in `failed_documents`; a report with no
/// chunks and a non-empty failure list is a complete failure, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub url: String,
    pub chunks_ingested: usize,
    pub failed_documents: Vec<String>,
    pub documents_processed: usize,
    pub duration_ms: u64,
}

impl IngestionReport {
    pub fn is_success(&self) -> bool {
        self.chunks_ingested > 0 && self.failed_documents.is_empty()
    }

    /// A report for a start URL that never produced content
    pub fn failed(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            failed_documents: vec![url.clone()],
            url,
            ..Default::default()
        }
    }
}

/// Answer plus the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub results: Vec<RetrievedChunk>,
    pub quality: f32,
    pub iterations: usize,
    pub plan: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionReport>,
}

impl QueryResult {
    pub fn num_results(&self) -> usize {
        self.results.len()
    }
}
