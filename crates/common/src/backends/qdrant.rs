//! Qdrant vector store over its REST API

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{BackendHandle, ManagedConnection, ScoredChunk, VectorPoint, VectorStore};
use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use crate::models::ContentChunk;

/// Handle to one Qdrant collection
pub struct QdrantStore {
    connection: ManagedConnection<Client>,
    base_url: String,
    collection: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<ContentChunk>,
}

impl QdrantStore {
    /// Build a client and check that the API answers
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = header::HeaderValue::from_str(key).map_err(|e| AppError::Configuration {
                message: format!("invalid vector store api key: {}", e),
            })?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let base_url = config.base_url();
        let name = format!("qdrant:{}", config.collection);

        let response = client
            .get(format!("{}/collections", base_url))
            .send()
            .await
            .map_err(|e| AppError::BackendUnavailable {
                backend: name.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AppError::BackendUnavailable {
                backend: name,
                message: format!("health check returned {}", response.status()),
            });
        }

        tracing::debug!(url = %base_url, collection = %config.collection, "Connected to Qdrant");

        Ok(Self {
            connection: ManagedConnection::owned(name, client),
            base_url,
            collection: config.collection.clone(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn error(&self, message: impl Into<String>) -> AppError {
        AppError::backend(self.connection.name(), message)
    }
}

#[async_trait]
impl BackendHandle for QdrantStore {
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
            // dropping the client tears down its pool
            tracing::debug!(backend = %self.name(), "Qdrant connection released");
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let client = self.connection.get().await?;

        let existing = client.get(self.collection_url()).send().await?;
        match existing.status() {
            s if s.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            s => return Err(self.error(format!("collection lookup returned {}", s))),
        }

        let response = client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;

        // a concurrent creator may have won the race
        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::info!(collection = %self.collection, dimension, "Vector collection ready");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(self.error(format!("create collection returned {}: {}", status, body)))
        }
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let client = self.connection.get().await?;
        let count = points.len();

        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.chunk }))
                .collect::<Vec<Value>>()
        });
        let url = format!("{}/points?wait=true", self.collection_url());

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_secs(5)))
            .build();

        retry(policy, || async {
            let response = client
                .put(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(self.error(e.to_string())))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if status.is_server_error() {
                tracing::warn!(status = %status, "Qdrant upsert failed, retrying");
                Err(backoff::Error::transient(self.error(format!("upsert returned {}", status))))
            } else {
                let text = response.text().await.unwrap_or_default();
                Err(backoff::Error::permanent(
                    self.error(format!("upsert returned {}: {}", status, text)),
                ))
            }
        })
        .await?;

        Ok(count)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let client = self.connection.get().await?;

        let response = client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error(format!("search returned {}", response.status())));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("invalid search response: {}", e)))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                hit.payload.map(|chunk| ScoredChunk {
                    chunk,
                    score: hit.score,
                })
            })
            .collect())
    }
}
