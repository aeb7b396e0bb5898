//! Background ingest jobs
//!
//! `POST /ingest` returns immediately; the crawl runs on a spawned task and
//! its progress is tracked here. Pending and running jobs are always kept.
//! A finished job stays pollable for the retention window, and only the
//! newest `max_finished` finished jobs are kept. Expired jobs are pruned
//! whenever a new job is registered.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use siteforge_common::models::IngestionReport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub url: String,
    pub chunks_ingested: usize,
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestJob {
    fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Error)
    }
}

const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_FINISHED: usize = 1000;

/// Process-scoped job table, shared through the router state
#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, IngestJob>>>,
    retention: Duration,
    max_finished: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION, DEFAULT_MAX_FINISHED)
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration, max_finished: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
            max_finished,
        }
    }

    /// Jobs currently held, finished or not
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Drop finished jobs past the retention window, then the oldest finished
    /// jobs beyond `max_finished`
    fn prune(&self, jobs: &mut HashMap<Uuid, IngestJob>, now: DateTime<Utc>) {
        let expired_before = ChronoDuration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        jobs.retain(|_, job| match (job.completed_at, expired_before) {
            (Some(done), Some(cutoff)) => done >= cutoff,
            _ => true,
        });

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|job| job.is_finished())
            .map(|job| (job.completed_at.unwrap_or(job.created_at), job.job_id))
            .collect();
        if finished.len() <= self.max_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_finished;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
        tracing::debug!(evicted = excess, "Evicted finished ingest jobs");
    }

    /// Register a pending job for `url`
    pub async fn create(&self, url: &str) -> Uuid {
        let job_id = Uuid::new_v4();
        let job = IngestJob {
            job_id,
            status: JobStatus::Pending,
            url: url.to_string(),
            chunks_ingested: 0,
            failed: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut jobs = self.jobs.write().await;
        self.prune(&mut jobs, job.created_at);
        jobs.insert(job_id, job);
        job_id
    }

    pub async fn get(&self, job_id: Uuid) -> Option<IngestJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn mark_running(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Running;
        }
    }

    pub async fn complete(&self, job_id: Uuid, report: &IngestionReport) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Done;
            job.chunks_ingested = report.chunks_ingested;
            job.failed = report.failed_documents.clone();
            job.completed_at = Some(Utc::now());
        }
    }

    pub async fn fail(&self, job_id: Uuid, error: impl Into<String>) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Error;
            job.error = Some(error.into());
            job.completed_at = Some(Utc::now());
        }
    }
}
