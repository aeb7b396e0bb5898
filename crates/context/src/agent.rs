//! Agentic query pipeline
//!
//! plan → execute → critique, repeated with a refined query until the answer
//! is good enough or the iteration budget runs out. The best pass wins.

use siteforge_common::errors::Result;
use siteforge_common::models::{IngestionReport, QueryResult};
use siteforge_common::pipeline::{AuxiliaryRetriever, IngestionPipeline};
use siteforge_common::plan::{StepKind, WEB_INGESTION};
use siteforge_search::HybridRetriever;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::critic::QualityCritic;
use crate::executor::PlanExecutor;
use crate::handlers::{RetrievalHandler, SynthesisHandler, WebIngestionHandler};
use crate::memory::{QueryMemory, QueryRecord};
use crate::planner::QueryPlanner;
use crate::refiner::QueryRefiner;
use crate::synthesizer::AnswerSynthesizer;

pub struct AgenticPipeline {
    planner: QueryPlanner,
    executor: PlanExecutor,
    critic: QualityCritic,
    refiner: QueryRefiner,
    memory: Option<QueryMemory>,
}

impl AgenticPipeline {
    /// Wire the built-in handlers. Without an ingestion pipeline, URLs in
    /// queries are not fetched.
    pub fn new(
        retriever: Arc<HybridRetriever>,
        synthesizer: Arc<AnswerSynthesizer>,
        ingestion: Option<Arc<dyn IngestionPipeline>>,
        auxiliary: Vec<Arc<dyn AuxiliaryRetriever>>,
    ) -> Self {
        let top_k = retriever.settings().top_k;
        let mut executor = PlanExecutor::new()
            .register(
                StepKind::RETRIEVAL,
                Arc::new(RetrievalHandler::new(retriever, top_k).with_auxiliary(auxiliary)),
            )
            .register(StepKind::SYNTHESIS, Arc::new(SynthesisHandler::new(synthesizer)));
        if let Some(pipeline) = ingestion {
            executor = executor.register(WEB_INGESTION, Arc::new(WebIngestionHandler::new(pipeline)));
        }

        Self {
            planner: QueryPlanner::new(top_k),
            executor,
            critic: QualityCritic::new(),
            refiner: QueryRefiner::default(),
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: QueryMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Run the query loop. At least one pass always runs; web ingestion only
    /// on the first.
    #[instrument(skip(self))]
    pub async fn process_query(
        &self,
        text: &str,
        max_iterations: usize,
        min_quality_threshold: f32,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let max_iterations = max_iterations.max(1);
        let fetch_urls = self.executor.handles(&WEB_INGESTION);

        let mut current_query = text.to_string();
        let mut best: Option<QueryResult> = None;
        let mut ingestion: Option<IngestionReport> = None;
        let mut iterations = 0;

        for iteration in 0..max_iterations {
            iterations = iteration + 1;
            let plan = self.planner.plan(&current_query, fetch_urls && iteration == 0)?;
            let state = self.executor.execute(&plan, &current_query).await?;
            if state.ingestion.is_some() {
                ingestion = state.ingestion.clone();
            }

            let answer = state.answer.unwrap_or_default();
            let quality = self.critic.score(text, &state.evidence, &answer);
            debug!(iteration = iterations, quality, results = state.evidence.len(), "Pass scored");

            let improved = best.as_ref().map_or(true, |b| quality > b.quality);
            let evidence = state.evidence;
            let refined = if quality >= min_quality_threshold || iterations == max_iterations {
                None
            } else {
                self.refiner.refine(&current_query, &evidence)
            };

            if improved {
                best = Some(QueryResult {
                    answer,
                    results: evidence,
                    quality,
                    iterations: 0,
                    plan: plan.into_steps(),
                    ingestion: None,
                });
            }

            if quality >= min_quality_threshold {
                break;
            }
            match refined {
                Some(next) => current_query = next,
                None => break,
            }
        }

        let mut result = best.unwrap_or_else(|| QueryResult {
            answer: String::new(),
            results: Vec::new(),
            quality: 0.0,
            iterations: 0,
            plan: Vec::new(),
            ingestion: None,
        });
        result.iterations = iterations;
        result.ingestion = ingestion;

        siteforge_common::metrics::record_query(
            started.elapsed().as_secs_f64(),
            result.iterations,
            result.num_results(),
        );
        info!(
            iterations = result.iterations,
            quality = result.quality,
            results = result.num_results(),
            "Query processed"
        );

        if let Some(memory) = &self.memory {
            let record =
                QueryRecord::new(text, result.iterations, result.quality, result.num_results());
            if let Err(e) = memory.record(&record).await {
                warn!(error = %e, "Failed to append query history");
            }
        }

        Ok(result)
    }
}
