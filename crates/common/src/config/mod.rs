//! Configuration management for SiteForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Vector store (Qdrant) configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Graph store (Neo4j) configuration
    #[serde(default)]
    pub graph_store: GraphStoreConfig,

    /// Retrieval fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Web ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Answer synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Agentic query loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Local auxiliary storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long a finished ingest job stays pollable
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,

    /// Finished ingest jobs kept at most; the oldest go first
    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,
}

/// Backend implementation used for the stores
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendProvider {
    /// Remote services over HTTP (Qdrant REST, Neo4j transactional API)
    Http,
    /// Process-local stores, for development and tests
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_provider")]
    pub provider: BackendProvider,

    #[serde(default = "default_vector_host")]
    pub host: String,

    #[serde(default = "default_vector_port")]
    pub port: u16,

    /// Collection holding the web content
    #[serde(default = "default_collection")]
    pub collection: String,

    /// API key sent as `api-key` header (optional)
    pub api_key: Option<String>,

    /// Connection attempt timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_backend_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphStoreConfig {
    /// Set to false to skip the graph store entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_provider")]
    pub provider: BackendProvider,

    #[serde(default = "default_graph_host")]
    pub host: String,

    /// HTTP port of the transactional Cypher endpoint
    #[serde(default = "default_graph_port")]
    pub port: u16,

    #[serde(default = "default_graph_user")]
    pub username: String,

    #[serde(default = "default_graph_password")]
    pub password: String,

    #[serde(default = "default_graph_database")]
    pub database: String,

    /// Connection attempt timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_backend_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// RRF weight for vector results
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// RRF weight for graph results (forced to 0 when the graph store is down)
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,

    /// RRF weight for lexical results; 0 disables lexical retrieval
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Results returned per retrieval step
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum normalised fused score
    #[serde(default)]
    pub min_score: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks shorter than this are dropped
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Link depth followed from the start URL (0 = start page only)
    #[serde(default)]
    pub max_depth: u32,

    /// Maximum pages fetched per ingest
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Page fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    /// Enable LLM answer synthesis
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_synthesis_endpoint")]
    pub endpoint: String,

    pub api_key: Option<String>,

    #[serde(default = "default_synthesis_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Answer-improvement passes per query
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Quality score below which another pass is attempted
    #[serde(default = "default_min_quality")]
    pub min_quality_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory for auxiliary state (query history)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8001 }
fn default_request_timeout() -> u64 { 120 }
fn default_job_retention() -> u64 { 3600 }
fn default_max_finished_jobs() -> usize { 1000 }
fn default_provider() -> BackendProvider { BackendProvider::Http }
fn default_vector_host() -> String { "localhost".to_string() }
fn default_vector_port() -> u16 { 6333 }
fn default_collection() -> String { "siteforge_default".to_string() }
fn default_connect_timeout() -> u64 { 5 }
fn default_backend_request_timeout() -> u64 { 30 }
fn default_graph_host() -> String { "localhost".to_string() }
fn default_graph_port() -> u16 { 7474 }
fn default_graph_user() -> String { "neo4j".to_string() }
fn default_graph_password() -> String { "password".to_string() }
fn default_graph_database() -> String { "neo4j".to_string() }
fn default_vector_weight() -> f32 { 0.6 }
fn default_graph_weight() -> f32 { 0.3 }
fn default_lexical_weight() -> f32 { 0.1 }
fn default_rrf_k() -> f32 { 60.0 }
fn default_top_k() -> usize { 10 }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 150 }
fn default_min_chunk_size() -> usize { 40 }
fn default_max_pages() -> usize { 10 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_user_agent() -> String { concat!("SiteForge/", env!("CARGO_PKG_VERSION")).to_string() }
fn default_embedding_provider() -> String { "mock".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_synthesis_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_synthesis_model() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> usize { 800 }
fn default_temperature() -> f32 { 0.2 }
fn default_synthesis_timeout() -> u64 { 60 }
fn default_max_iterations() -> usize { 2 }
fn default_min_quality() -> f32 { 0.5 }
fn default_storage_path() -> PathBuf { PathBuf::from("data/siteforge") }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "siteforge".to_string() }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            job_retention_secs: default_job_retention(),
            max_finished_jobs: default_max_finished_jobs(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            host: default_vector_host(),
            port: default_vector_port(),
            collection: default_collection(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_backend_request_timeout(),
        }
    }
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_provider(),
            host: default_graph_host(),
            port: default_graph_port(),
            username: default_graph_user(),
            password: default_graph_password(),
            database: default_graph_database(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_backend_request_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            graph_weight: default_graph_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_depth: 0,
            max_pages: default_max_pages(),
            request_timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_synthesis_endpoint(),
            api_key: None,
            model: default_synthesis_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_synthesis_timeout(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            min_quality_threshold: default_min_quality(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__GRAPH_STORE__PASSWORD=secret
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.server.job_retention_secs)
    }
}

impl VectorStoreConfig {
    /// Base URL of the REST API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl GraphStoreConfig {
    /// Base URL of the HTTP API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingestion: IngestionConfig::default(),
            embedding: EmbeddingConfig::default(),
            synthesis: SynthesisConfig::default(),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.vector_store.port, 6333);
        assert_eq!(config.vector_store.collection, "siteforge_default");
        assert_eq!(config.agent.max_iterations, 2);
        assert!((config.retrieval.vector_weight - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_base_urls() {
        let config = AppConfig::default();
        assert_eq!(config.vector_store.base_url(), "http://localhost:6333");
        assert_eq!(config.graph_store.base_url(), "http://localhost:7474");
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let json = serde_json::json!({
            "vector_store": { "collection": "docs", "provider": "memory" },
            "retrieval": { "lexical_weight": 0.0 }
        });
        let config: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.vector_store.collection, "docs");
        assert_eq!(config.vector_store.provider, BackendProvider::Memory);
        assert_eq!(config.vector_store.port, 6333);
        assert_eq!(config.retrieval.lexical_weight, 0.0);
        assert_eq!(config.retrieval.top_k, 10);
    }
}
