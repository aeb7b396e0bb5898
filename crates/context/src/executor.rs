//! Plan executor
//!
//! Runs a [`StepPlan`] batch by batch. Inside a batch, sequential steps run one
//! at a time first, then parallel steps run concurrently against the state
//! they leave behind. Step kinds are dispatched through a registry of
//! [`StepHandler`]s.

use async_trait::async_trait;
use futures::future::join_all;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::{IngestionReport, RetrievedChunk};
use siteforge_common::plan::{ExecutionMode, Step, StepKind, StepPlan};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// What a step produced
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Ingestion(IngestionReport),
    Evidence(Vec<RetrievedChunk>),
    Answer(String),
    Empty,
}

/// Accumulated results of the steps run so far
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub query: String,
    pub outputs: BTreeMap<String, StepOutput>,
    pub evidence: Vec<RetrievedChunk>,
    pub answer: Option<String>,
    pub ingestion: Option<IngestionReport>,
}

impl ExecutionState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    fn apply(&mut self, step_id: &str, output: StepOutput) {
        match &output {
            StepOutput::Ingestion(report) => self.ingestion = Some(report.clone()),
            StepOutput::Evidence(chunks) => {
                for chunk in chunks {
                    if !self.evidence.iter().any(|c| c.chunk_id == chunk.chunk_id) {
                        self.evidence.push(chunk.clone());
                    }
                }
            }
            StepOutput::Answer(answer) => self.answer = Some(answer.clone()),
            StepOutput::Empty => {}
        }
        self.outputs.insert(step_id.to_string(), output);
    }
}

/// Executes one kind of step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, step: &Step, state: &ExecutionState) -> Result<StepOutput>;
}

#[derive(Default, Clone)]
pub struct PlanExecutor {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl PlanExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: &StepKind) -> bool {
        self.handlers.contains_key(kind)
    }

    fn handler(&self, step: &Step) -> Result<&Arc<dyn StepHandler>> {
        self.handlers
            .get(&step.kind)
            .ok_or_else(|| AppError::Validation {
                message: format!("no handler registered for step kind {}", step.kind),
                field: Some(step.id.clone()),
            })
    }

    async fn run_step(&self, step: &Step, state: &ExecutionState) -> Result<StepOutput> {
        let started = Instant::now();
        let output = self.handler(step)?.run(step, state).await?;
        debug!(
            step = %step.id,
            kind = %step.kind,
            duration_ms = started.elapsed().as_millis() as u64,
            "Step finished"
        );
        Ok(output)
    }

    /// Run every step of `plan` in dependency order
    #[instrument(skip(self, plan), fields(steps = plan.len()))]
    pub async fn execute(&self, plan: &StepPlan, query: &str) -> Result<ExecutionState> {
        let batches = plan.batches()?;

        // fail before running anything if a kind has no handler
        for step in plan.steps() {
            self.handler(step)?;
        }

        let mut state = ExecutionState::new(query);
        for batch in batches {
            let (parallel, sequential): (Vec<&Step>, Vec<&Step>) = batch
                .into_iter()
                .partition(|s| s.execution_mode == ExecutionMode::Parallel);

            for step in sequential {
                let output = self.run_step(step, &state).await?;
                state.apply(&step.id, output);
            }

            let snapshot = &state;
            let results =
                join_all(parallel.iter().map(|step| self.run_step(step, snapshot))).await;
            for (step, result) in parallel.into_iter().zip(results) {
                state.apply(&step.id, result?);
            }
        }

        Ok(state)
    }
}
