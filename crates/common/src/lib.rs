//! SiteForge Common Library
//!
//! Shared code for all SiteForge crates including:
//! - Step plans and the web-ingestion plan rewriter
//! - Vector and graph store handles with explicit ownership
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod backends;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod plan;
pub mod text;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use models::{IngestionReport, QueryResult, RetrievedChunk, RetrievalMode};
pub use plan::{ExecutionMode, Step, StepKind, StepPlan};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
