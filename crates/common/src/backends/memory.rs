//! Process-local vector and graph stores.
//!
//! A [`MemoryBackend`] plays the role of the physical database: every handle
//! the [`MemoryConnector`] opens shares its data, and the backend keeps a
//! ledger of opened and released connections so shutdown can be audited.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{
    BackendConnector, BackendHandle, GraphStore, ManagedConnection, ScoredChunk, VectorPoint,
    VectorStore,
};
use crate::config::{GraphStoreConfig, VectorStoreConfig};
use crate::errors::{AppError, Result};
use crate::models::{ContentChunk, WebDocument};
use crate::text::key_terms;

const TERMS_PER_CHUNK: usize = 32;

#[derive(Default)]
struct GraphData {
    documents: BTreeMap<String, String>,
    chunks: HashMap<String, ContentChunk>,
    mentions: HashMap<String, HashSet<String>>,
}

/// Shared state behind every memory handle
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, BTreeMap<String, VectorPoint>>>,
    graph: RwLock<GraphData>,
    next_id: AtomicUsize,
    opened: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open(&self, kind: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("memory-{kind}#{id}")
    }

    async fn record_open(&self, session: &str) {
        self.opened.lock().await.push(session.to_string());
    }

    async fn record_release(&self, session: &str) {
        self.released.lock().await.push(session.to_string());
    }

    /// Sessions opened so far, in order
    pub async fn opened_sessions(&self) -> Vec<String> {
        self.opened.lock().await.clone()
    }

    /// Sessions released so far, in order; duplicates mean a double close
    pub async fn released_sessions(&self) -> Vec<String> {
        self.released.lock().await.clone()
    }

    /// Opened sessions not yet released
    pub async fn open_sessions(&self) -> usize {
        let opened = self.opened.lock().await;
        let released = self.released.lock().await;
        opened.iter().filter(|s| !released.contains(s)).count()
    }

    /// Points stored in a collection
    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

/// Session token: the shared backend plus the session label
#[derive(Clone)]
struct Session {
    backend: Arc<MemoryBackend>,
    label: String,
}

async fn release(connection: &ManagedConnection<Session>) {
    if let Some(session) = connection.release().await {
        session.backend.record_release(&session.label).await;
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

pub struct MemoryVectorStore {
    connection: ManagedConnection<Session>,
    collection: String,
}

#[async_trait]
impl BackendHandle for MemoryVectorStore {
    fn name(&self) -> &str {
        self.connection.name()
    }

    fn owns_connection(&self) -> bool {
        self.connection.owns()
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn close(&self) -> Result<()> {
        release(&self.connection).await;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, _dimension: usize) -> Result<()> {
        let session = self.connection.get().await?;
        session
            .backend
            .collections
            .write()
            .await
            .entry(self.collection.clone())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<usize> {
        let session = self.connection.get().await?;
        let mut collections = session.backend.collections.write().await;
        let collection = collections.entry(self.collection.clone()).or_default();
        let count = points.len();
        for point in points {
            collection.insert(point.id.clone(), point);
        }
        Ok(count)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let session = self.connection.get().await?;
        let collections = session.backend.collections.read().await;
        let Some(collection) = collections.get(&self.collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredChunk> = collection
            .values()
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: cosine(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

pub struct MemoryGraphStore {
    connection: ManagedConnection<Session>,
}

impl MemoryGraphStore {
    /// A non-owning handle on the same session; closing it releases nothing
    pub async fn borrowed_view(&self) -> Result<Self> {
        let session = self.connection.get().await?;
        Ok(Self {
            connection: ManagedConnection::borrowed(
                format!("{} (borrowed)", self.connection.name()),
                session,
            ),
        })
    }
}

#[async_trait]
impl BackendHandle for MemoryGraphStore {
    fn name(&self) -> &str {
        self.connection.name()
    }

    fn owns_connection(&self) -> bool {
        self.connection.owns()
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn close(&self) -> Result<()> {
        release(&self.connection).await;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_document(&self, document: &WebDocument, chunks: &[ContentChunk]) -> Result<()> {
        let session = self.connection.get().await?;
        let mut graph = session.backend.graph.write().await;

        graph
            .documents
            .insert(document.url.clone(), document.title.clone());
        for chunk in chunks {
            for term in key_terms(&chunk.content, TERMS_PER_CHUNK) {
                graph
                    .mentions
                    .entry(term)
                    .or_default()
                    .insert(chunk.id.clone());
            }
            graph.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn related_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.connection.get().await?;
        let graph = session.backend.graph.read().await;

        let mut matches: HashMap<&str, usize> = HashMap::new();
        let distinct: HashSet<&String> = terms.iter().collect();
        for term in &distinct {
            if let Some(chunk_ids) = graph.mentions.get(*term) {
                for id in chunk_ids {
                    *matches.entry(id.as_str()).or_default() += 1;
                }
            }
        }

        let total = terms.len() as f32;
        let mut hits: Vec<ScoredChunk> = matches
            .into_iter()
            .filter_map(|(id, count)| {
                graph.chunks.get(id).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score: count as f32 / total,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.chunk.position.cmp(&b.chunk.position))
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Opens handles on a [`MemoryBackend`]; either store can be taken offline
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    vector_reachable: AtomicBool,
    graph_reachable: AtomicBool,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            vector_reachable: AtomicBool::new(true),
            graph_reachable: AtomicBool::new(true),
        }
    }

    pub fn backend(&self) -> Arc<MemoryBackend> {
        Arc::clone(&self.backend)
    }

    pub fn set_vector_reachable(&self, reachable: bool) {
        self.vector_reachable.store(reachable, Ordering::Release);
    }

    pub fn set_graph_reachable(&self, reachable: bool) {
        self.graph_reachable.store(reachable, Ordering::Release);
    }

    async fn session(&self, kind: &str) -> Session {
        let label = self.backend.open(kind);
        self.backend.record_open(&label).await;
        Session {
            backend: Arc::clone(&self.backend),
            label,
        }
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect_vector(&self, config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
        if !self.vector_reachable.load(Ordering::Acquire) {
            return Err(AppError::BackendUnavailable {
                backend: format!("memory-vector:{}", config.collection),
                message: "vector store is offline".to_string(),
            });
        }
        let session = self.session("vector").await;
        Ok(Arc::new(MemoryVectorStore {
            connection: ManagedConnection::owned(session.label.clone(), session),
            collection: config.collection.clone(),
        }))
    }

    async fn connect_graph(&self, config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
        if !self.graph_reachable.load(Ordering::Acquire) {
            return Err(AppError::BackendUnavailable {
                backend: format!("memory-graph:{}", config.database),
                message: "graph store is offline".to_string(),
            });
        }
        let session = self.session("graph").await;
        Ok(Arc::new(MemoryGraphStore {
            connection: ManagedConnection::owned(session.label.clone(), session),
        }))
    }
}
