//! Ingestion error types

use siteforge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Unsupported content type {content_type} at {url}")]
    NotHtml { url: String, content_type: String },

    #[error("No extractable text at {url}")]
    EmptyDocument { url: String },

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl IngestionError {
    /// URL the failure belongs to, for page-level errors
    pub fn url(&self) -> Option<&str> {
        match self {
            IngestionError::InvalidUrl { url, .. }
            | IngestionError::Fetch { url, .. }
            | IngestionError::NotHtml { url, .. }
            | IngestionError::EmptyDocument { url } => Some(url),
            _ => None,
        }
    }
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Chunking(message) => AppError::Configuration { message },
            IngestionError::Client(e) => AppError::HttpClient(e),
            other => AppError::Crawl {
                url: other.url().unwrap_or_default().to_string(),
                message: other.to_string(),
            },
        }
    }
}
