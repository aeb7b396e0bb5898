use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use siteforge_common::backends::{MemoryBackend, MemoryConnector};
use siteforge_common::config::{AppConfig, BackendProvider};
use siteforge_common::embeddings::MockEmbedder;
use siteforge_gateway::{create_router, AppState};
use siteforge_orchestrator::Orchestrator;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html>
<head><title>Closures</title></head>
<body>
  <p>Closures are anonymous functions that can capture their environment.</p>
  <p>A move closure takes ownership of the values it captures.</p>
</body>
</html>"#;

struct TestApp {
    router: Router,
    orchestrator: Arc<Orchestrator>,
    _storage: TempDir,
}

async fn app(graph_reachable: bool) -> TestApp {
    app_with(graph_reachable, |_| {}).await
}

async fn app_with(graph_reachable: bool, tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let storage = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.vector_store.provider = BackendProvider::Memory;
    config.graph_store.provider = BackendProvider::Memory;
    config.storage.path = storage.path().to_path_buf();
    config.synthesis.enabled = false;
    tweak(&mut config);

    let connector = Arc::new(MemoryConnector::new(MemoryBackend::new()));
    connector.set_graph_reachable(graph_reachable);
    let orchestrator = Arc::new(
        Orchestrator::builder(config.clone())
            .connector(connector)
            .embedder(Arc::new(MockEmbedder::new(64)))
            .build()
            .await
            .unwrap(),
    );

    let state = AppState::new(Arc::new(config), Arc::clone(&orchestrator));
    TestApp {
        router: create_router(state),
        orchestrator,
        _storage: storage,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_for_job(router: &Router, job_id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(router, get(&format!("/ingest/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "done" || body["status"] == "error" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn health_reports_pipeline_status() {
    let app = app(true).await;
    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["graph_enabled"], true);
    assert_eq!(body["closed"], false);
    app.orchestrator.close().await;
}

#[tokio::test]
async fn health_shows_degraded_graph() {
    let app = app(false).await;
    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["graph_enabled"], false);
    assert_eq!(body["weights"]["graph"], 0.0);
    app.orchestrator.close().await;
}

#[tokio::test]
async fn ingest_job_runs_in_background_then_query_answers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/closures"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
        .mount(&server)
        .await;

    let app = app(true).await;
    let url = format!("{}/closures", server.uri());
    let (status, body) = send(&app.router, post_json("/ingest", json!({ "url": url }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&app.router, &job_id).await;
    assert_eq!(job["status"], "done");
    assert_eq!(job["url"], url.as_str());
    assert!(job["chunks_ingested"].as_u64().unwrap() > 0);

    let (status, body) = send(
        &app.router,
        post_json(
            "/query",
            json!({ "query": "What does a move closure do?", "max_iterations": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["num_results"].as_u64().unwrap() > 0);
    assert_eq!(body["iterations"], 1);
    assert!(body["answer"].as_str().unwrap().contains("closure"));
    app.orchestrator.close().await;
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = app(true).await;
    let (status, body) = send(
        &app.router,
        get("/ingest/6f1c2a9e-4d55-4c1b-9a43-0b7f1e2d3c4b"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");
    app.orchestrator.close().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let app = app(true).await;

    let (status, _) = send(&app.router, post_json("/ingest", json!({ "url": "not a url" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, post_json("/query", json!({ "query": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json("/query", json!({ "query": "ok", "min_quality_threshold": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.orchestrator.close().await;
}

#[tokio::test]
async fn closed_pipeline_is_unavailable() {
    let app = app(true).await;
    app.orchestrator.close().await;

    let (status, _) = send(&app.router, post_json("/query", json!({ "query": "anything" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, body) = send(&app.router, get("/health")).await;
    assert_eq!(body["status"], "closed");

    let (status, body) = send(
        &app.router,
        post_json("/ingest", json!({ "url": "https://docs.example/" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "error");
}

#[tokio::test]
async fn finished_jobs_are_dropped_after_retention() {
    let app = app_with(true, |config| config.server.job_retention_secs = 0).await;

    let (_, body) = send(
        &app.router,
        post_json("/ingest", json!({ "url": "http://127.0.0.1:1/" })),
    )
    .await;
    let first = body["job_id"].as_str().unwrap().to_string();
    let job = wait_for_job(&app.router, &first).await;
    assert!(job["completed_at"].is_string());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let (status, _) = send(
        &app.router,
        post_json("/ingest", json!({ "url": "http://127.0.0.1:1/" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app.router, get(&format!("/ingest/{first}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");
    app.orchestrator.close().await;
}
