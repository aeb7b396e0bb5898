//! Neo4j graph store over the transactional HTTP endpoint
//!
//! Graph model:
//! `(:Document {url, title})-[:HAS_CHUNK]->(:Chunk {id, content, position})-[:MENTIONS]->(:Term {name})`

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{BackendHandle, GraphStore, ManagedConnection, ScoredChunk};
use crate::config::GraphStoreConfig;
use crate::errors::{AppError, Result};
use crate::models::{ContentChunk, WebDocument};
use crate::text::key_terms;

/// Terms linked to each chunk
const TERMS_PER_CHUNK: usize = 32;

const UPSERT_DOCUMENT: &str = "\
MERGE (d:Document {url: $url})
SET d.title = $title
WITH d
UNWIND $chunks AS chunk
MERGE (c:Chunk {id: chunk.id})
SET c.content = chunk.content, c.position = chunk.position, c.url = $url, c.title = $title
MERGE (d)-[:HAS_CHUNK]->(c)
WITH c, chunk
UNWIND chunk.terms AS term
MERGE (t:Term {name: term})
MERGE (c)-[:MENTIONS]->(t)";

const RELATED_CHUNKS: &str = "\
MATCH (t:Term)<-[:MENTIONS]-(c:Chunk)
WHERE t.name IN $terms
WITH c, count(DISTINCT t) AS matches
RETURN c.id, c.url, c.title, c.content, c.position, matches
ORDER BY matches DESC, c.position ASC
LIMIT $limit";

#[derive(Clone)]
struct Session {
    client: Client,
    username: String,
    password: String,
}

/// Handle to one Neo4j database
pub struct Neo4jStore {
    connection: ManagedConnection<Session>,
    endpoint: String,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl Neo4jStore {
    /// Open a session and run `RETURN 1` to prove the credentials work
    pub async fn connect(config: &GraphStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let store = Self {
            connection: ManagedConnection::owned(
                format!("neo4j:{}", config.database),
                Session {
                    client,
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
            ),
            endpoint: format!("{}/db/{}/tx/commit", config.base_url(), config.database),
        };

        store
            .run("RETURN 1", json!({}))
            .await
            .map_err(|e| AppError::BackendUnavailable {
                backend: store.connection.name().to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(endpoint = %store.endpoint, "Connected to Neo4j");
        Ok(store)
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>> {
        let session = self.connection.get().await?;

        let response = session
            .client
            .post(&self.endpoint)
            .basic_auth(&session.username, Some(&session.password))
            .json(&json!({
                "statements": [{ "statement": statement, "parameters": parameters }]
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::backend(
                self.connection.name(),
                format!("transaction returned {}", status),
            ));
        }

        let body: TxResponse = response.json().await.map_err(|e| {
            AppError::backend(self.connection.name(), format!("invalid response: {}", e))
        })?;

        if let Some(error) = body.errors.first() {
            return Err(AppError::backend(
                self.connection.name(),
                format!("{}: {}", error.code, error.message),
            ));
        }

        Ok(body
            .results
            .into_iter()
            .flat_map(|r| r.data.into_iter().map(|d| d.row))
            .collect())
    }
}

fn chunk_from_row(row: &[Value]) -> Option<(ContentChunk, u64)> {
    Some((
        ContentChunk {
            id: row.first()?.as_str()?.to_string(),
            source_url: row.get(1)?.as_str().unwrap_or_default().to_string(),
            title: row.get(2)?.as_str().unwrap_or_default().to_string(),
            content: row.get(3)?.as_str().unwrap_or_default().to_string(),
            position: row.get(4)?.as_u64().unwrap_or_default() as usize,
        },
        row.get(5)?.as_u64()?,
    ))
}

#[async_trait]
impl BackendHandle for Neo4jStore {
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
        if self.connection.release().await.is_some() {
            tracing::debug!(backend = %self.name(), "Neo4j session released");
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn upsert_document(&self, document: &WebDocument, chunks: &[ContentChunk]) -> Result<()> {
        let chunks: Vec<Value> = chunks
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "content": c.content,
                    "position": c.position,
                    "terms": key_terms(&c.content, TERMS_PER_CHUNK),
                })
            })
            .collect();

        self.run(
            UPSERT_DOCUMENT,
            json!({ "url": document.url, "title": document.title, "chunks": chunks }),
        )
        .await?;
        Ok(())
    }

    async fn related_chunks(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self
            .run(RELATED_CHUNKS, json!({ "terms": terms, "limit": limit }))
            .await?;

        let total = terms.len() as f32;
        Ok(rows
            .iter()
            .filter_map(|row| chunk_from_row(row))
            .map(|(chunk, matches)| ScoredChunk {
                chunk,
                score: matches as f32 / total,
            })
            .collect())
    }
}
