use std::sync::Arc;

use siteforge_common::backends::{BackendConnector, MemoryBackend, MemoryConnector};
use siteforge_common::config::{GraphStoreConfig, IngestionConfig, VectorStoreConfig};
use siteforge_common::embeddings::MockEmbedder;
use siteforge_common::errors::AppError;
use siteforge_common::pipeline::IngestionPipeline;
use siteforge_ingestion::WebIngestionPipeline;
use siteforge_search::LexicalIndex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const THREE_PARAGRAPHS: &str = r#"<html>
<head><title>Ownership in Rust</title></head>
<body>
  <p>Ownership is a set of rules that govern how a Rust program manages memory.</p>
  <p>Each value in Rust has an owner, and there can only be one owner at a time.</p>
  <p>When the owner goes out of scope, the value will be dropped automatically.</p>
</body>
</html>"#;

async fn page_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ownership"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(THREE_PARAGRAPHS, "text/html"))
        .mount(&server)
        .await;
    server
}

struct Fixture {
    backend: Arc<MemoryBackend>,
    connector: MemoryConnector,
    lexical: Arc<LexicalIndex>,
}

impl Fixture {
    fn new() -> Self {
        let backend = MemoryBackend::new();
        Self {
            connector: MemoryConnector::new(Arc::clone(&backend)),
            backend,
            lexical: Arc::new(LexicalIndex::new()),
        }
    }

    async fn pipeline(&self) -> WebIngestionPipeline {
        let vector = self
            .connector
            .connect_vector(&VectorStoreConfig::default())
            .await
            .unwrap();
        let graph = self
            .connector
            .connect_graph(&GraphStoreConfig::default())
            .await
            .unwrap();
        WebIngestionPipeline::new(
            &IngestionConfig::default(),
            Arc::new(MockEmbedder::new(64)),
            vector,
        )
        .unwrap()
        .with_graph_store(graph)
        .with_lexical_index(Arc::clone(&self.lexical))
    }
}

#[tokio::test]
async fn reachable_page_is_chunked_and_stored() {
    let server = page_server().await;
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline().await;

    let url = format!("{}/ownership", server.uri());
    let report = pipeline.ingest_url(&url).await.unwrap();

    assert!(report.chunks_ingested > 0);
    assert!(report.failed_documents.is_empty());
    assert_eq!(report.documents_processed, 1);
    assert_eq!(
        fixture.backend.point_count(&VectorStoreConfig::default().collection).await,
        report.chunks_ingested
    );
    assert!(!fixture.lexical.search("owner scope", 5).await.is_empty());
}

#[tokio::test]
async fn reingest_overwrites_points() {
    let server = page_server().await;
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline().await;
    let url = format!("{}/ownership", server.uri());

    let first = pipeline.ingest_url(&url).await.unwrap();
    pipeline.ingest_url(&url).await.unwrap();

    assert_eq!(
        fixture.backend.point_count(&VectorStoreConfig::default().collection).await,
        first.chunks_ingested
    );
}

#[tokio::test]
async fn unreachable_url_is_reported_not_raised() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline().await;

    let url = "http://127.0.0.1:1/page";
    let report = pipeline.ingest_url(url).await.unwrap();

    assert_eq!(report.chunks_ingested, 0);
    assert!(report.failed_documents.iter().any(|u| u == url));
}

#[tokio::test]
async fn empty_page_is_a_failed_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body><script>x()</script></body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let pipeline = fixture.pipeline().await;
    let url = format!("{}/blank", server.uri());
    let report = pipeline.ingest_url(&url).await.unwrap();

    assert_eq!(report.chunks_ingested, 0);
    assert_eq!(report.failed_documents, vec![url]);
}

#[tokio::test]
async fn graph_write_failure_does_not_fail_the_page() {
    let server = page_server().await;
    let fixture = Fixture::new();

    let vector = fixture
        .connector
        .connect_vector(&VectorStoreConfig::default())
        .await
        .unwrap();
    let graph = fixture
        .connector
        .connect_graph(&GraphStoreConfig::default())
        .await
        .unwrap();
    graph.close().await.unwrap();

    let pipeline = WebIngestionPipeline::new(
        &IngestionConfig::default(),
        Arc::new(MockEmbedder::new(64)),
        vector,
    )
    .unwrap()
    .with_graph_store(graph);

    let report = pipeline
        .ingest_url(&format!("{}/ownership", server.uri()))
        .await
        .unwrap();
    assert!(report.chunks_ingested > 0);
}

#[tokio::test]
async fn vector_store_failure_propagates() {
    let server = page_server().await;
    let fixture = Fixture::new();

    let vector = fixture
        .connector
        .connect_vector(&VectorStoreConfig::default())
        .await
        .unwrap();
    vector.close().await.unwrap();

    let pipeline = WebIngestionPipeline::new(
        &IngestionConfig::default(),
        Arc::new(MockEmbedder::new(64)),
        vector,
    )
    .unwrap();

    let err = pipeline
        .ingest_url(&format!("{}/ownership", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BackendUnavailable { .. }));
}

#[tokio::test]
async fn close_releases_vector_handle_once() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline().await;

    assert!(pipeline.owns_vector_store());
    assert!(!pipeline.owns_graph_store());

    pipeline.close().await.unwrap();
    pipeline.close().await.unwrap();

    // vector released, graph still open because the pipeline never owned it
    let released = fixture.backend.released_sessions().await;
    assert_eq!(released.len(), 1);
    assert!(released[0].starts_with("memory-vector"));
    assert_eq!(fixture.backend.open_sessions().await, 1);

    let err = pipeline.ingest_url("http://127.0.0.1:1/").await.unwrap_err();
    assert!(matches!(err, AppError::PipelineClosed));
}
