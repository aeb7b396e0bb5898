//! Error types for SiteForge
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::PlanError;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidPlan,

    // Resource errors (4xxx)
    JobNotFound,

    // Backend errors (7xxx)
    BackendUnavailable,
    BackendError,
    ConnectTimeout,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,
    CrawlError,
    SynthesisError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    PipelineClosed,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidPlan => 1005,

            ErrorCode::JobNotFound => 4004,

            ErrorCode::BackendUnavailable => 7002,
            ErrorCode::BackendError => 7004,
            ErrorCode::ConnectTimeout => 7005,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::CrawlError => 8007,
            ErrorCode::SynthesisError => 8008,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::PipelineClosed => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid step plan: {0}")]
    Plan(#[from] PlanError),

    // Resource errors
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    // Backend errors
    #[error("Backend {backend} unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Backend {backend} error: {message}")]
    Backend { backend: String, message: String },

    #[error("Connection to {backend} timed out after {timeout_ms}ms")]
    ConnectTimeout { backend: String, timeout_ms: u64 },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Crawl failed for {url}: {message}")]
    Crawl { url: String, message: String },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline has been closed")]
    PipelineClosed,
}

impl AppError {
    /// Backend failure with the backend name attached
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Plan(_) => ErrorCode::InvalidPlan,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::Backend { .. } => ErrorCode::BackendError,
            AppError::ConnectTimeout { .. } => ErrorCode::ConnectTimeout,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::Crawl { .. } => ErrorCode::CrawlError,
            AppError::Synthesis { .. } => ErrorCode::SynthesisError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::PipelineClosed => ErrorCode::PipelineClosed,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::Plan(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::JobNotFound { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Backend { .. } |
            AppError::EmbeddingError { .. } |
            AppError::EmbeddingTimeout { .. } |
            AppError::Crawl { .. } |
            AppError::Synthesis { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::BackendUnavailable { .. } |
            AppError::ConnectTimeout { .. } |
            AppError::PipelineClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
