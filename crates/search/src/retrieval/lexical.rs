//! BM25 lexical search over an in-memory index
//!
//! The ingestion pipeline feeds chunks into a shared [`LexicalIndex`]; the
//! retriever ranks them with Okapi BM25.

use super::{RetrievalMode, RetrievedChunk, Retriever, SearchRequest};
use siteforge_common::backends::ScoredChunk;
use siteforge_common::errors::Result;
use siteforge_common::models::ContentChunk;
use siteforge_common::text::tokenize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const K1: f32 = 1.2;
const B: f32 = 0.75;

struct IndexedChunk {
    chunk: ContentChunk,
    term_freqs: HashMap<String, u32>,
    length: usize,
}

#[derive(Default)]
struct IndexData {
    chunks: HashMap<String, IndexedChunk>,
    doc_freqs: HashMap<String, usize>,
    total_length: usize,
}

impl IndexData {
    fn remove(&mut self, id: &str) {
        if let Some(old) = self.chunks.remove(id) {
            self.total_length -= old.length;
            for term in old.term_freqs.keys() {
                if let Some(df) = self.doc_freqs.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freqs.remove(term);
                    }
                }
            }
        }
    }

    fn insert(&mut self, chunk: &ContentChunk) {
        self.remove(&chunk.id);

        let tokens = tokenize(&chunk.content);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_default() += 1;
        }
        for term in term_freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_default() += 1;
        }

        self.total_length += tokens.len();
        self.chunks.insert(
            chunk.id.clone(),
            IndexedChunk {
                chunk: chunk.clone(),
                term_freqs,
                length: tokens.len(),
            },
        );
    }
}

/// Shared BM25 index, written by ingestion and read by retrieval
#[derive(Default)]
pub struct LexicalIndex {
    data: RwLock<IndexData>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index chunks, replacing any chunk already stored under the same id
    pub async fn add_chunks(&self, chunks: &[ContentChunk]) {
        let mut data = self.data.write().await;
        for chunk in chunks {
            data.insert(chunk);
        }
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Rank indexed chunks against `query`, best first
    pub async fn search(&self, query: &str, limit: usize) -> Vec<ScoredChunk> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        let data = self.data.read().await;
        if terms.is_empty() || data.chunks.is_empty() {
            return Vec::new();
        }

        let n = data.chunks.len() as f32;
        let avg_length = (data.total_length as f32 / n).max(1.0);

        let idf: Vec<(&String, f32)> = terms
            .iter()
            .filter_map(|term| {
                data.doc_freqs.get(term).map(|&df| {
                    let df = df as f32;
                    (term, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
                })
            })
            .collect();
        if idf.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<ScoredChunk> = data
            .chunks
            .values()
            .filter_map(|indexed| {
                let norm = K1 * (1.0 - B + B * indexed.length as f32 / avg_length);
                let score: f32 = idf
                    .iter()
                    .filter_map(|(term, idf)| {
                        indexed.term_freqs.get(*term).map(|&tf| {
                            let tf = tf as f32;
                            idf * tf * (K1 + 1.0) / (tf + norm)
                        })
                    })
                    .sum();
                (score > 0.0).then(|| ScoredChunk {
                    chunk: indexed.chunk.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(limit);
        hits
    }
}

/// Retriever over a [`LexicalIndex`]
pub struct LexicalRetriever {
    index: Arc<LexicalIndex>,
}

impl LexicalRetriever {
    pub fn new(index: Arc<LexicalIndex>) -> Self {
        Self { index }
    }
}

#[async_trait::async_trait]
impl Retriever for LexicalRetriever {
    async fn retrieve(&self, request: &SearchRequest) -> Result<Vec<RetrievedChunk>> {
        let hits = self.index.search(&request.query, request.limit).await;
        debug!(count = hits.len(), "Lexical search completed");

        // squash unbounded BM25 into 0..1
        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit.score / (hit.score + 1.0);
                RetrievedChunk::from_chunk(hit.chunk, score, RetrievalMode::Lexical)
            })
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Lexical
    }
}
