use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join, join_all};
use siteforge_common::backends::{
    BackendConnector, BackendHandle, GraphStore, MemoryBackend, MemoryConnector, ScoredChunk,
    VectorPoint, VectorStore,
};
use siteforge_common::config::{AppConfig, BackendProvider, GraphStoreConfig, VectorStoreConfig};
use siteforge_common::embeddings::MockEmbedder;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::{ContentChunk, WebDocument};
use siteforge_orchestrator::{Orchestrator, OrchestratorBuilder};
use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html>
<head><title>Traits</title></head>
<body>
  <p>Traits define shared behaviour that types can implement.</p>
  <p>Trait objects allow dynamic dispatch through a vtable pointer.</p>
  <p>Generic functions use trait bounds to constrain their type parameters.</p>
</body>
</html>"#;

fn config(storage: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.vector_store.provider = BackendProvider::Memory;
    config.graph_store.provider = BackendProvider::Memory;
    config.storage.path = storage.path().join("state");
    config.embedding.dimension = 64;
    config.synthesis.enabled = false;
    config
}

fn builder(storage: &TempDir, connector: Arc<dyn BackendConnector>) -> OrchestratorBuilder {
    Orchestrator::builder(config(storage))
        .connector(connector)
        .embedder(Arc::new(MockEmbedder::new(64)))
}

async fn page_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/traits"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn builds_with_every_backend_and_answers() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(MemoryConnector::new(Arc::clone(&backend)));
    let orchestrator = builder(&storage, connector).build().await.unwrap();

    assert!(storage.path().join("state").is_dir());
    let status = orchestrator.status();
    assert!(status.graph_enabled);
    assert!(status.lexical_enabled);
    assert!(!status.synthesis_enabled);
    assert_eq!(status.weights.graph, 0.3);
    // 2 graph + 2 vector
    assert_eq!(backend.open_sessions().await, 4);

    let server = page_server().await;
    let report = orchestrator
        .ingest(&format!("{}/traits", server.uri()))
        .await
        .unwrap();
    assert!(report.chunks_ingested > 0);
    assert!(report.failed_documents.is_empty());

    let result = orchestrator.query("How do trait objects dispatch?").await.unwrap();
    assert!(!result.answer.is_empty());
    assert!(!result.results.is_empty());

    orchestrator.close().await;
}

#[tokio::test]
async fn unreachable_graph_degrades_to_vector_only() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(MemoryConnector::new(Arc::clone(&backend)));
    connector.set_graph_reachable(false);

    let orchestrator = builder(&storage, connector).build().await.unwrap();

    assert!(!orchestrator.graph_enabled());
    assert_eq!(orchestrator.effective_weights().graph, 0.0);
    assert_eq!(backend.open_sessions().await, 2);

    let server = page_server().await;
    orchestrator
        .ingest(&format!("{}/traits", server.uri()))
        .await
        .unwrap();
    let result = orchestrator.query("What are traits?").await.unwrap();
    assert!(!result.results.is_empty());

    orchestrator.close().await;
    assert_eq!(backend.open_sessions().await, 0);
}

#[tokio::test]
async fn disabled_graph_is_never_contacted() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(MemoryConnector::new(Arc::clone(&backend)));

    let mut config = config(&storage);
    config.graph_store.enabled = false;
    let orchestrator = Orchestrator::builder(config)
        .connector(connector)
        .embedder(Arc::new(MockEmbedder::new(64)))
        .build()
        .await
        .unwrap();

    assert!(!orchestrator.graph_enabled());
    let opened = backend.opened_sessions().await;
    assert!(opened.iter().all(|s| s.starts_with("memory-vector")));
    orchestrator.close().await;
}

#[tokio::test]
async fn zero_lexical_weight_disables_lexical() {
    let storage = tempfile::tempdir().unwrap();
    let connector = Arc::new(MemoryConnector::new(MemoryBackend::new()));

    let mut config = config(&storage);
    config.retrieval.lexical_weight = 0.0;
    let orchestrator = Orchestrator::builder(config)
        .connector(connector)
        .embedder(Arc::new(MockEmbedder::new(64)))
        .build()
        .await
        .unwrap();

    assert!(!orchestrator.status().lexical_enabled);
    orchestrator.close().await;
}

#[tokio::test]
async fn unreachable_vector_store_fails_without_leaks() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(MemoryConnector::new(Arc::clone(&backend)));
    connector.set_vector_reachable(false);

    let err = builder(&storage, connector).build().await.err().unwrap();
    assert!(matches!(err, AppError::BackendUnavailable { .. }));

    // the graph sessions opened before the failure were released
    assert_eq!(backend.opened_sessions().await.len(), 2);
    assert_eq!(backend.open_sessions().await, 0);
}

#[tokio::test]
async fn unreachable_http_graph_degrades() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let vectors = Arc::new(MemoryConnector::new(Arc::clone(&backend)));

    // real HTTP graph connector against a closed port
    let connector = Arc::new(SplitConnector { vectors });
    let mut config = config(&storage);
    config.graph_store.host = "127.0.0.1".to_string();
    config.graph_store.port = 1;
    config.graph_store.connect_timeout_secs = 2;

    let orchestrator = Orchestrator::builder(config)
        .connector(connector)
        .embedder(Arc::new(MockEmbedder::new(64)))
        .build()
        .await
        .unwrap();
    assert!(!orchestrator.graph_enabled());
    orchestrator.close().await;
}

/// Vector handles from memory, graph handles over HTTP
struct SplitConnector {
    vectors: Arc<MemoryConnector>,
}

#[async_trait]
impl BackendConnector for SplitConnector {
    async fn connect_vector(&self, config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
        self.vectors.connect_vector(config).await
    }

    async fn connect_graph(&self, config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
        siteforge_common::backends::HttpConnector
            .connect_graph(config)
            .await
    }
}

// ---------------------------------------------------------------------------
// Close auditing: every handle is wrapped so close calls can be counted
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CloseLog {
    calls: Mutex<HashMap<String, usize>>,
}

impl CloseLog {
    async fn record(&self, name: &str) {
        *self.calls.lock().await.entry(name.to_string()).or_default() += 1;
    }

    async fn snapshot(&self) -> HashMap<String, usize> {
        self.calls.lock().await.clone()
    }
}

struct CountingVector {
    inner: Arc<dyn VectorStore>,
    log: Arc<CloseLog>,
}

#[async_trait]
impl BackendHandle for CountingVector {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn owns_connection(&self) -> bool {
        self.inner.owns_connection()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.log.record(self.inner.name()).await;
        self.inner.close().await
    }
}

#[async_trait]
impl VectorStore for CountingVector {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        self.inner.ensure_collection(dimension).await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<usize> {
        self.inner.upsert(points).await
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        self.inner.search(vector, limit).await
    }
}

struct CountingGraph {
    inner: Arc<dyn GraphStore>,
    log: Arc<CloseLog>,
    fail_close: bool,
}

#[async_trait]
impl BackendHandle for CountingGraph {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn owns_connection(&self) -> bool {
        self.inner.owns_connection()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.log.record(self.inner.name()).await;
        self.inner.close().await?;
        if self.fail_close {
            return Err(AppError::backend("graph", "close timed out"));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for CountingGraph {
    async fn upsert_document(&self, document: &WebDocument, chunks: &[ContentChunk]) -> Result<()> {
        self.inner.upsert_document(document, chunks).await
    }

    async fn related_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>> {
        self.inner.related_chunks(terms, limit).await
    }
}

struct CountingConnector {
    inner: MemoryConnector,
    log: Arc<CloseLog>,
    graph_connects: AtomicUsize,
    fail_first_graph_close: bool,
}

impl CountingConnector {
    fn new(backend: Arc<MemoryBackend>, fail_first_graph_close: bool) -> Self {
        Self {
            inner: MemoryConnector::new(backend),
            log: Arc::new(CloseLog::default()),
            graph_connects: AtomicUsize::new(0),
            fail_first_graph_close,
        }
    }
}

#[async_trait]
impl BackendConnector for CountingConnector {
    async fn connect_vector(&self, config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(CountingVector {
            inner: self.inner.connect_vector(config).await?,
            log: Arc::clone(&self.log),
        }))
    }

    async fn connect_graph(&self, config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
        let n = self.graph_connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingGraph {
            inner: self.inner.connect_graph(config).await?,
            log: Arc::clone(&self.log),
            fail_close: self.fail_first_graph_close && n == 0,
        }))
    }
}

#[tokio::test]
async fn close_twice_closes_each_handle_once() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(CountingConnector::new(Arc::clone(&backend), false));
    let log = Arc::clone(&connector.log);

    let orchestrator = builder(&storage, connector).build().await.unwrap();
    orchestrator.close().await;
    orchestrator.close().await;

    let calls = log.snapshot().await;
    assert_eq!(calls.len(), 4);
    assert!(calls.values().all(|&n| n == 1), "close counts: {calls:?}");

    let released = backend.released_sessions().await;
    assert_eq!(released.len(), 4);
    assert_eq!(backend.open_sessions().await, 0);

    // release order: ingestion vector, retrieval vector, graph query, graph ingest
    let opened = backend.opened_sessions().await;
    assert_eq!(released, vec![
        opened[2].clone(),
        opened[3].clone(),
        opened[0].clone(),
        opened[1].clone(),
    ]);

    assert!(orchestrator.status().closed);
    let err = orchestrator.query("anything").await.unwrap_err();
    assert!(matches!(err, AppError::PipelineClosed));
    let err = orchestrator.ingest("http://127.0.0.1:1/").await.unwrap_err();
    assert!(matches!(err, AppError::PipelineClosed));
}

#[tokio::test]
async fn failing_close_does_not_stop_the_rest() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(CountingConnector::new(Arc::clone(&backend), true));
    let log = Arc::clone(&connector.log);

    let orchestrator = builder(&storage, connector).build().await.unwrap();
    orchestrator.close().await;

    assert_eq!(log.snapshot().await.len(), 4);
    assert_eq!(backend.open_sessions().await, 0);
}

#[tokio::test]
async fn drop_closes_open_orchestrator() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(MemoryConnector::new(Arc::clone(&backend)));

    let orchestrator = builder(&storage, connector).build().await.unwrap();
    drop(orchestrator);

    // the close runs on a spawned task
    for _ in 0..50 {
        if backend.open_sessions().await == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(backend.open_sessions().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_and_ingest_then_close_once() {
    let storage = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let connector = Arc::new(CountingConnector::new(Arc::clone(&backend), false));
    let log = Arc::clone(&connector.log);
    let orchestrator = builder(&storage, connector).build().await.unwrap();

    let server = page_server().await;
    let url = format!("{}/traits", server.uri());
    let questions = [
        "What are traits?",
        "How do trait objects dispatch?",
        "What do trait bounds constrain?",
        "Which types can implement shared behaviour?",
        "What is a vtable pointer?",
    ];

    let (answers, report) = join(
        join_all(questions.iter().map(|q| orchestrator.query(q))),
        orchestrator.ingest(&url),
    )
    .await;

    assert_eq!(answers.len(), questions.len());
    for answer in answers {
        assert!(!answer.unwrap().answer.is_empty());
    }
    assert!(report.unwrap().chunks_ingested > 0);

    // later queries see the ingested page
    let result = orchestrator.query("How do trait objects dispatch?").await.unwrap();
    assert!(!result.results.is_empty());

    orchestrator.close().await;
    let calls = log.snapshot().await;
    assert_eq!(calls.len(), 4);
    assert!(calls.values().all(|&n| n == 1), "close counts: {calls:?}");
    assert_eq!(backend.released_sessions().await.len(), 4);
    assert_eq!(backend.open_sessions().await, 0);
}
