//! Query history
//!
//! Each completed query is appended as one JSON line to
//! `<storage>/query_history.jsonl`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use siteforge_common::errors::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const HISTORY_FILE: &str = "query_history.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,
    /// sha256 of the query text, hex encoded
    pub fingerprint: String,
    pub iterations: usize,
    pub quality: f32,
    pub result_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(query: &str, iterations: usize, quality: f32, result_count: usize) -> Self {
        Self {
            query: query.to_string(),
            fingerprint: hex::encode(Sha256::digest(query.as_bytes())),
            iterations,
            quality,
            result_count,
            timestamp: Utc::now(),
        }
    }
}

pub struct QueryMemory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QueryMemory {
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        Self {
            path: storage_dir.as_ref().join(HISTORY_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, record: &QueryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every record written so far, oldest first. Unparseable lines are skipped.
    pub async fn history(&self) -> Result<Vec<QueryRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
