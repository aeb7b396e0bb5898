//! Backend handles
//!
//! Every remote store is reached through a handle that wraps one connection and
//! records whether it owns that connection. `close` only releases owned
//! connections and is idempotent, so callers can close handles in any order
//! without double-freeing a shared connection.
//!
//! Two realisations are provided:
//! - [`HttpConnector`]: Qdrant REST API and the Neo4j transactional HTTP API
//! - [`MemoryConnector`]: process-local stores for development and tests

pub mod memory;
pub mod neo4j;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::{BackendProvider, GraphStoreConfig, VectorStoreConfig};
use crate::errors::{AppError, Result};
use crate::models::{ContentChunk, WebDocument};

pub use memory::{MemoryBackend, MemoryConnector};
pub use neo4j::Neo4jStore;
pub use qdrant::QdrantStore;

/// Lifecycle shared by every backend handle
#[async_trait]
pub trait BackendHandle: Send + Sync {
    /// Diagnostic name, e.g. `qdrant:siteforge_default`
    fn name(&self) -> &str;

    /// Whether `close` releases the underlying connection
    fn owns_connection(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Release the connection if owned. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// A vector with the chunk it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub chunk: ContentChunk,
}

/// A chunk with a backend-specific relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: ContentChunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: BackendHandle {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or replace points, returns the number written
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<usize>;

    /// Nearest neighbours by cosine similarity
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>>;
}

#[async_trait]
pub trait GraphStore: BackendHandle {
    /// Write the document, its chunks and the terms each chunk mentions
    async fn upsert_document(&self, document: &WebDocument, chunks: &[ContentChunk]) -> Result<()>;

    /// Chunks mentioning any of `terms`, scored by the fraction of terms matched
    async fn related_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>>;
}

/// Opens handles from configuration
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect_vector(&self, config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>>;

    async fn connect_graph(&self, config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>>;
}

/// Production connector talking HTTP to Qdrant and Neo4j
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn connect_vector(&self, config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
        let store = QdrantStore::connect(config).await?;
        Ok(Arc::new(store))
    }

    async fn connect_graph(&self, config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
        let store = Neo4jStore::connect(config).await?;
        Ok(Arc::new(store))
    }
}

/// Connector matching the configured providers.
///
/// Both stores must use the same provider; a memory connector gets a fresh
/// [`MemoryBackend`].
pub fn connector_for(
    vector: &VectorStoreConfig,
    graph: &GraphStoreConfig,
) -> Result<Arc<dyn BackendConnector>> {
    match (vector.provider, graph.provider) {
        (BackendProvider::Http, BackendProvider::Http) => Ok(Arc::new(HttpConnector)),
        (BackendProvider::Memory, BackendProvider::Memory) => {
            Ok(Arc::new(MemoryConnector::new(MemoryBackend::new())))
        }
        (v, g) => Err(AppError::Configuration {
            message: format!("vector provider {v:?} and graph provider {g:?} must match"),
        }),
    }
}

/// Bound a connection attempt so an unreachable host fails fast
pub async fn connect_with_timeout<T, F>(backend: &str, limit: Duration, attempt: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(AppError::ConnectTimeout {
            backend: backend.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// One connection plus its ownership flag.
///
/// `release` hands the connection back exactly once, and only when owned; the
/// handle refuses further use afterwards.
pub struct ManagedConnection<C> {
    name: String,
    owns: bool,
    closed: AtomicBool,
    inner: RwLock<Option<C>>,
}

impl<C: Clone + Send + Sync> ManagedConnection<C> {
    pub fn owned(name: impl Into<String>, connection: C) -> Self {
        Self::with_ownership(name, connection, true)
    }

    pub fn borrowed(name: impl Into<String>, connection: C) -> Self {
        Self::with_ownership(name, connection, false)
    }

    fn with_ownership(name: impl Into<String>, connection: C, owns: bool) -> Self {
        Self {
            name: name.into(),
            owns,
            closed: AtomicBool::new(false),
            inner: RwLock::new(Some(connection)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owns(&self) -> bool {
        self.owns
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current connection, or an error once closed
    pub async fn get(&self) -> Result<C> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::BackendUnavailable {
                backend: self.name.clone(),
                message: "handle is closed".to_string(),
            })
    }

    /// Mark closed. Returns the connection on the first call of an owning
    /// handle, `None` otherwise.
    pub async fn release(&self) -> Option<C> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let connection = self.inner.write().await.take();
        if self.owns {
            connection
        } else {
            None
        }
    }
}
