//! Step handlers for the built-in step kinds

use async_trait::async_trait;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::{IngestionReport, RetrievedChunk, RetrievalMode};
use siteforge_common::pipeline::{AuxiliaryRetriever, IngestionPipeline};
use siteforge_common::plan::Step;
use siteforge_search::HybridRetriever;
use std::sync::Arc;
use tracing::{info, warn};

use crate::executor::{ExecutionState, StepHandler, StepOutput};
use crate::synthesizer::AnswerSynthesizer;

/// RETRIEVAL: fused search plus any auxiliary retrievers
pub struct RetrievalHandler {
    retriever: Arc<HybridRetriever>,
    auxiliary: Vec<Arc<dyn AuxiliaryRetriever>>,
    top_k: usize,
}

impl RetrievalHandler {
    pub fn new(retriever: Arc<HybridRetriever>, top_k: usize) -> Self {
        Self {
            retriever,
            auxiliary: Vec::new(),
            top_k: top_k.max(1),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Vec<Arc<dyn AuxiliaryRetriever>>) -> Self {
        self.auxiliary = auxiliary;
        self
    }
}

#[async_trait]
impl StepHandler for RetrievalHandler {
    async fn run(&self, step: &Step, state: &ExecutionState) -> Result<StepOutput> {
        let query = step.param_str("query").unwrap_or(&state.query);
        let limit = step
            .parameters
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .unwrap_or(self.top_k);

        let mut evidence = self.retriever.search(query, limit).await?;

        for auxiliary in &self.auxiliary {
            match auxiliary.retrieve(query, limit).await {
                Ok(chunks) => {
                    for mut chunk in chunks {
                        if evidence.iter().any(|c| c.chunk_id == chunk.chunk_id) {
                            continue;
                        }
                        chunk.retrieval_mode = RetrievalMode::Auxiliary;
                        evidence.push(chunk);
                    }
                }
                Err(e) => {
                    warn!(retriever = auxiliary.name(), error = %e, "Auxiliary retriever failed");
                    siteforge_common::metrics::record_retrieval_error(auxiliary.name());
                }
            }
        }

        Ok(StepOutput::Evidence(evidence))
    }
}

/// SYNTHESIS: answer from the evidence gathered so far
pub struct SynthesisHandler {
    synthesizer: Arc<AnswerSynthesizer>,
}

impl SynthesisHandler {
    pub fn new(synthesizer: Arc<AnswerSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl StepHandler for SynthesisHandler {
    async fn run(&self, _step: &Step, state: &ExecutionState) -> Result<StepOutput> {
        let evidence: &[RetrievedChunk] = &state.evidence;
        let answer = self.synthesizer.synthesize(&state.query, evidence).await;
        Ok(StepOutput::Answer(answer))
    }
}

/// WEB_INGESTION: fetch the URL named in the query before retrieval runs.
///
/// Ingestion problems never fail the query; they come back as a failed
/// report so retrieval can still use what is already indexed.
pub struct WebIngestionHandler {
    pipeline: Arc<dyn IngestionPipeline>,
}

impl WebIngestionHandler {
    pub fn new(pipeline: Arc<dyn IngestionPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StepHandler for WebIngestionHandler {
    async fn run(&self, step: &Step, _state: &ExecutionState) -> Result<StepOutput> {
        let url = step.param_str("url").ok_or_else(|| AppError::Validation {
            message: "web ingestion step has no url".to_string(),
            field: Some(step.id.clone()),
        })?;

        let report = match self.pipeline.ingest_url(url).await {
            Ok(report) => report,
            Err(e) => {
                warn!(%url, error = %e, "Web ingestion failed, continuing with indexed content");
                IngestionReport::failed(url)
            }
        };
        info!(
            %url,
            chunks = report.chunks_ingested,
            failed = report.failed_documents.len(),
            "Web ingestion step finished"
        );
        Ok(StepOutput::Ingestion(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use siteforge_common::plan::WEB_INGESTION;

    struct FailingPipeline;

    #[async_trait]
    impl IngestionPipeline for FailingPipeline {
        async fn ingest_url(&self, url: &str) -> Result<IngestionReport> {
            Err(AppError::BackendUnavailable {
                backend: "vector".to_string(),
                message: format!("cannot store {url}"),
            })
        }

        fn owns_vector_store(&self) -> bool {
            true
        }

        fn owns_graph_store(&self) -> bool {
            false
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingestion_error_becomes_failed_report() {
        let handler = WebIngestionHandler::new(Arc::new(FailingPipeline));
        let step = Step::new("step_0", WEB_INGESTION, "ingest")
            .with_parameter("url", json!("http://127.0.0.1:1/page"));

        let output = handler.run(&step, &ExecutionState::new("q")).await.unwrap();
        let StepOutput::Ingestion(report) = output else {
            panic!("expected an ingestion report");
        };
        assert_eq!(report.chunks_ingested, 0);
        assert_eq!(report.failed_documents, vec!["http://127.0.0.1:1/page".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_url_is_invalid() {
        let handler = WebIngestionHandler::new(Arc::new(FailingPipeline));
        let step = Step::new("step_0", WEB_INGESTION, "ingest");
        let err = handler.run(&step, &ExecutionState::new("q")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
