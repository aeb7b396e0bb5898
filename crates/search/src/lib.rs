//! Retrieval sub-pipeline: vector, graph and lexical search fused with
//! weighted reciprocal rank fusion.

pub mod retrieval;

pub use retrieval::{
    FusionResult, GraphRetriever, HybridRetriever, LexicalIndex, LexicalRetriever, RRFusion,
    RetrievalSettings, Retriever, SearchRequest, VectorRetriever,
};
