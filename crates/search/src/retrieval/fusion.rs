//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Is robust to outliers
//!
//! Each source contributes `weight / (k + rank)` for every chunk it returned.

use siteforge_common::models::{RetrievedChunk, RetrievalMode};
use std::collections::HashMap;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f32,

    /// Weight for vector results
    pub vector_weight: f32,

    /// Weight for graph results
    pub graph_weight: f32,

    /// Weight for lexical results
    pub lexical_weight: f32,

    /// Weight for auxiliary retrievers
    pub auxiliary_weight: f32,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 0.6,
            graph_weight: 0.3,
            lexical_weight: 0.1,
            auxiliary_weight: 0.2,
        }
    }
}

/// Result of fusion
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub chunk: RetrievedChunk,
    /// 1-based rank in each source that returned the chunk
    pub source_ranks: Vec<(RetrievalMode, usize)>,
    pub rrf_score: f32,
}

impl RRFusion {
    /// Create with custom weights
    pub fn with_weights(vector_weight: f32, graph_weight: f32, lexical_weight: f32) -> Self {
        Self {
            vector_weight,
            graph_weight,
            lexical_weight,
            ..Default::default()
        }
    }

    pub fn with_k(mut self, k: f32) -> Self {
        self.k = k;
        self
    }

    /// Weight applied to a source
    pub fn weight(&self, mode: RetrievalMode) -> f32 {
        match mode {
            RetrievalMode::Vector => self.vector_weight,
            RetrievalMode::Graph => self.graph_weight,
            RetrievalMode::Lexical => self.lexical_weight,
            RetrievalMode::Auxiliary => self.auxiliary_weight,
            RetrievalMode::Hybrid => 0.0,
        }
    }

    /// Fuse ranked lists from several sources.
    ///
    /// Sources with a non-positive weight are ignored. Scores are normalised so
    /// the best result has score 1.0.
    pub fn fuse(
        &self,
        sources: Vec<(RetrievalMode, Vec<RetrievedChunk>)>,
        limit: usize,
    ) -> Vec<FusionResult> {
        let mut fused: HashMap<String, FusionResult> = HashMap::new();

        for (mode, chunks) in sources {
            let weight = self.weight(mode);
            if weight <= 0.0 {
                continue;
            }

            for (index, chunk) in chunks.into_iter().enumerate() {
                let rank = index + 1;
                let contribution = weight / (self.k + rank as f32);

                fused
                    .entry(chunk.chunk_id.clone())
                    .and_modify(|r| {
                        r.rrf_score += contribution;
                        r.source_ranks.push((mode, rank));
                    })
                    .or_insert_with(|| FusionResult {
                        chunk,
                        source_ranks: vec![(mode, rank)],
                        rrf_score: contribution,
                    });
            }
        }

        let mut results: Vec<FusionResult> = fused.into_values().collect();

        // Sort by RRF score descending, ties broken by id for stable output
        results.sort_by(|a, b| {
            b.rrf_score
                .total_cmp(&a.rrf_score)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(limit);

        // Normalize scores to 0-1 range
        if let Some(max_score) = results.first().map(|r| r.rrf_score) {
            if max_score > 0.0 {
                for result in &mut results {
                    result.rrf_score /= max_score;
                }
            }
        }

        for result in &mut results {
            result.chunk.score = result.rrf_score;
            result.chunk.retrieval_mode = RetrievalMode::Hybrid;
        }

        results
    }
}
