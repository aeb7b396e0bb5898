//! Query planner
//!
//! Every query gets the same base plan, retrieve then synthesize. A query that
//! names a URL additionally gets a web-ingestion step in front, on the first
//! pass only.

use serde_json::json;
use siteforge_common::errors::Result;
use siteforge_common::plan::{prepend_web_ingestion_step, step_id, Step, StepKind, StepPlan};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    top_k: usize,
}

impl QueryPlanner {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    /// `step_0 RETRIEVAL -> step_1 SYNTHESIS`
    pub fn base_plan(&self, query: &str) -> Vec<Step> {
        vec![
            Step::new(step_id(0), StepKind::RETRIEVAL, "Retrieve evidence for the query")
                .with_parameter("query", json!(query))
                .with_parameter("top_k", json!(self.top_k))
                .with_estimate(200, 0.0),
            Step::new(step_id(1), StepKind::SYNTHESIS, "Synthesize an answer from the evidence")
                .with_dependencies([step_id(0)])
                .with_estimate(1500, 0.01),
        ]
    }

    /// Validated plan for `query`. With `allow_web_ingestion` a URL in the
    /// query adds a web-ingestion prerequisite.
    pub fn plan(&self, query: &str, allow_web_ingestion: bool) -> Result<StepPlan> {
        let base = self.base_plan(query);
        let steps = if allow_web_ingestion {
            let rewritten = prepend_web_ingestion_step(query, &base, 0)?;
            if let Some(id) = &rewritten.inserted_step_id {
                debug!(step = %id, "Web ingestion step inserted");
            }
            rewritten.steps
        } else {
            base
        };
        Ok(StepPlan::try_new(steps)?)
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(10)
    }
}
