//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible endpoints (text-embedding-3-small, text-embedding-3-large)
//! - A deterministic hashing embedder for local runs and tests

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::text::tokenize;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
    batch_size: usize,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
            timeout_ms: config.timeout_secs * 1000,
        })
    }

    /// Make request with retry.
    ///
    /// Timeouts, connection failures, 429 and 5xx responses are retried with
    /// exponential backoff, at most `max_retries` attempts in total. Any other
    /// failure is returned straight away.
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let started = std::time::Instant::now();

            match self.make_request(texts).await {
                Ok(embeddings) => {
                    crate::metrics::record_embedding(
                        started.elapsed().as_secs_f64(),
                        &self.model,
                        texts.len(),
                        true,
                    );
                    Ok(embeddings)
                }
                Err(failure) => {
                    crate::metrics::record_embedding(0.0, &self.model, texts.len(), false);
                    match failure {
                        backoff::Error::Transient { err, .. } if attempt < self.max_retries => {
                            tracing::warn!(
                                attempt,
                                max_retries = self.max_retries,
                                error = %err,
                                "Embedding request failed, retrying"
                            );
                            Err(backoff::Error::transient(err))
                        }
                        backoff::Error::Transient { err, .. } | backoff::Error::Permanent(err) => {
                            tracing::warn!(attempt, error = %err, "Embedding request failed");
                            Err(backoff::Error::permanent(err))
                        }
                    }
                }
            }
        })
        .await
    }

    async fn make_request(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, backoff::Error<AppError>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                backoff::Error::transient(if e.is_timeout() {
                    AppError::EmbeddingTimeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    AppError::EmbeddingError {
                        message: format!("Request failed: {}", e),
                    }
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            };
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        if result.data.len() != texts.len() {
            return Err(backoff::Error::permanent(AppError::EmbeddingError {
                message: format!(
                    "Expected {} embeddings, received {}",
                    texts.len(),
                    result.data.len()
                ),
            }));
        }

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Feature-hashing embedder.
///
/// Each token is hashed into a bucket with a signed weight, then the vector is
/// L2-normalised. Texts that share vocabulary land close together, which is
/// enough for local runs and for exercising the retrieval path in tests.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_embed(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "OpenAI API key required for the openai embedding provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(384);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 384);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(384);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic_and_similarity_aware() {
        let embedder = MockEmbedder::new(256);
        let a = embedder.embed("rust ownership and borrowing").await.unwrap();
        let b = embedder.embed("rust ownership and borrowing").await.unwrap();
        let c = embedder.embed("borrowing rules in rust").await.unwrap();
        let d = embedder.embed("tomato gardening tips").await.unwrap();

        assert_eq!(a, b);
        assert!(cosine(&a, &c) > cosine(&a, &d));
    }

    #[test]
    fn test_openai_without_key_is_configuration_error() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        let err = create_embedder(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    fn openai_config(server: &MockServer, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            api_base: Some(server.uri()),
            dimension: 3,
            timeout_secs: 5,
            max_retries,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_openai_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAIEmbedder::new("bad-key".into(), &openai_config(&server, 4)).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { ref message } if message.contains("401")));
    }

    #[tokio::test]
    async fn test_openai_server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAIEmbedder::new("key".into(), &openai_config(&server, 3)).unwrap();
        let embedding = embedder.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_retries_stop_at_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let embedder = OpenAIEmbedder::new("key".into(), &openai_config(&server, 2)).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { ref message } if message.contains("500")));
    }

    #[test]
    fn test_large_max_retries_is_accepted() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            api_key: Some("key".to_string()),
            max_retries: 64,
            ..Default::default()
        };
        assert!(create_embedder(&config).is_ok());
    }
}
