//! Text chunking module
//!
//! Splits page text into semantic chunks for embedding.

use siteforge_common::config::IngestionConfig;
use siteforge_common::models::{ContentChunk, WebDocument};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;
use uuid::Uuid;

use crate::errors::IngestionError;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size (smaller chunks are dropped)
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
            min_chunk_size: 40,
        }
    }
}

impl From<&IngestionConfig> for ChunkingConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_size: config.min_chunk_size,
        }
    }
}

/// Text chunker backed by `text-splitter`
pub struct Chunker {
    splitter: TextSplitter<text_splitter::Characters>,
    min_chunk_size: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self, IngestionError> {
        let chunk_config = ChunkConfig::new(config.chunk_size.max(1))
            .with_overlap(config.chunk_overlap)
            .map_err(|e| IngestionError::Chunking(e.to_string()))?;

        Ok(Self {
            splitter: TextSplitter::new(chunk_config),
            min_chunk_size: config.min_chunk_size,
        })
    }

    /// Split text into `(byte_offset, chunk)` pairs.
    ///
    /// Chunks shorter than the minimum are dropped, except that a text shorter
    /// than the minimum as a whole is kept as a single chunk.
    pub fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() < self.min_chunk_size {
            return vec![text];
        }

        let chunks: Vec<&str> = self
            .splitter
            .chunk_indices(text)
            .map(|(_, chunk)| chunk)
            .filter(|chunk| chunk.chars().count() >= self.min_chunk_size)
            .collect();

        debug!(
            input_len = text.len(),
            chunk_count = chunks.len(),
            "Text chunked"
        );

        if chunks.is_empty() {
            // every piece was a fragment; keep them rather than lose the page
            return self.splitter.chunks(text).collect();
        }
        chunks
    }

    /// Chunk a document into stored content units with stable ids
    pub fn chunk_document(&self, document: &WebDocument) -> Vec<ContentChunk> {
        self.split(&document.text)
            .into_iter()
            .enumerate()
            .map(|(position, content)| ContentChunk {
                id: chunk_id(&document.url, position),
                source_url: document.url.clone(),
                title: document.title.clone(),
                content: content.to_string(),
                position,
            })
            .collect()
    }
}

/// Deterministic id so re-ingesting a page overwrites its chunks
pub fn chunk_id(url: &str, position: usize) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{url}#{position}").as_bytes()).to_string()
}
