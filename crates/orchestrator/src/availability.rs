//! Graph availability and the fusion weights that follow from it

use serde::Serialize;
use siteforge_common::backends::GraphStore;
use siteforge_common::config::RetrievalConfig;
use std::sync::Arc;

/// The two graph handles: one for queries, one for ingestion writes
#[derive(Clone)]
pub struct GraphHandles {
    pub query: Arc<dyn GraphStore>,
    pub ingest: Arc<dyn GraphStore>,
}

/// Why the graph store is not in use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("graph store unavailable: {reason}")]
pub struct Unavailable {
    pub reason: String,
}

impl Unavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outcome of connecting the optional graph store
pub type GraphAvailability = Result<GraphHandles, Unavailable>;

/// Fusion weights actually applied by retrieval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectiveWeights {
    pub vector: f32,
    pub graph: f32,
    pub lexical: f32,
}

/// Configured weights, with the graph weight forced to zero when the graph
/// store is unavailable. Negative weights count as zero.
pub fn effective_weights(config: &RetrievalConfig, graph: &GraphAvailability) -> EffectiveWeights {
    EffectiveWeights {
        vector: config.vector_weight.max(0.0),
        graph: match graph {
            Ok(_) => config.graph_weight.max(0.0),
            Err(_) => 0.0,
        },
        lexical: config.lexical_weight.max(0.0),
    }
}
