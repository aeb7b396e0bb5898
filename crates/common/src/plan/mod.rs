//! Step plans
//!
//! A plan is an ordered list of [`Step`]s whose `dependencies` form a DAG.
//! Step kinds are open: any component may mint a new [`StepKind`] without
//! touching this module.

pub mod rewrite;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;

pub use rewrite::{detect_url, prepend_web_ingestion_step, RewrittenPlan, WEB_INGESTION};

/// Errors raised while building or validating a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("malformed step id {id:?}: expected a numeric suffix")]
    MalformedStepId { id: String },

    #[error("duplicate step id {id}")]
    DuplicateStepId { id: String },

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step {id} depends on itself")]
    SelfDependency { id: String },

    #[error("dependency cycle among steps {steps:?}")]
    Cycle { steps: Vec<String> },
}

/// Kind of work a step performs.
///
/// A thin string tag rather than a closed enum, so new kinds can be declared
/// next to the code that handles them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKind(Cow<'static, str>);

impl StepKind {
    pub const INGESTION: StepKind = StepKind::from_static("ingestion");
    pub const RETRIEVAL: StepKind = StepKind::from_static("retrieval");
    pub const SYNTHESIS: StepKind = StepKind::from_static("synthesis");
    pub const VERIFICATION: StepKind = StepKind::from_static("verification");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduling hint for the plan executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// A single unit of work in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub estimated_time_ms: u64,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_required() -> bool {
    true
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            parameters: BTreeMap::new(),
            dependencies: Vec::new(),
            execution_mode: ExecutionMode::Sequential,
            estimated_time_ms: 0,
            estimated_cost: 0.0,
            priority: 0,
            required: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_estimate(mut self, time_ms: u64, cost: f64) -> Self {
        self.estimated_time_ms = time_ms;
        self.estimated_cost = cost;
        self
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Canonical id for the `n`th step
pub fn step_id(n: u64) -> String {
    format!("step_{n}")
}

/// Numeric suffix after the last `_` of a step id
pub fn step_index(id: &str) -> Result<u64, PlanError> {
    id.rsplit_once('_')
        .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
        .ok_or_else(|| PlanError::MalformedStepId { id: id.to_string() })
}

/// An ordered, validated-on-demand collection of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    steps: Vec<Step>,
}

impl StepPlan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build a plan and validate it in one go
    pub fn try_new(steps: Vec<Step>) -> Result<Self, PlanError> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check id uniqueness, referential integrity and acyclicity
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStepId { id: step.id.clone() });
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(PlanError::SelfDependency { id: step.id.clone() });
                }
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.batches().map(|_| ())
    }

    /// Topological layering (Kahn). Each batch only depends on earlier batches;
    /// steps keep plan order inside a batch.
    pub fn batches(&self) -> Result<Vec<Vec<&Step>>, PlanError> {
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.dependencies {
                dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
        }

        let mut batches = Vec::new();
        let mut done = 0;
        while done < self.steps.len() {
            let batch: Vec<&Step> = self
                .steps
                .iter()
                .filter(|s| remaining.get(s.id.as_str()) == Some(&0))
                .collect();

            if batch.is_empty() {
                let mut steps: Vec<String> = remaining.keys().map(|id| id.to_string()).collect();
                steps.sort();
                return Err(PlanError::Cycle { steps });
            }

            for step in &batch {
                remaining.remove(step.id.as_str());
                if let Some(children) = dependents.get(step.id.as_str()) {
                    for child in children {
                        if let Some(count) = remaining.get_mut(child) {
                            *count = count.saturating_sub(1);
                        }
                    }
                }
            }
            done += batch.len();
            batches.push(batch);
        }

        Ok(batches)
    }
}

impl From<Vec<Step>> for StepPlan {
    fn from(steps: Vec<Step>) -> Self {
        Self::new(steps)
    }
}
