//! SiteForge Context Engine
//!
//! The query side of the pipeline:
//! - Query planning (with the web-ingestion rewrite)
//! - Plan execution over a registry of step handlers
//! - Answer synthesis, quality scoring and query refinement
//! - Query history

pub mod agent;
pub mod critic;
pub mod executor;
pub mod handlers;
pub mod memory;
pub mod planner;
pub mod refiner;
pub mod synthesizer;

pub use agent::AgenticPipeline;
pub use critic::QualityCritic;
pub use executor::{ExecutionState, PlanExecutor, StepHandler, StepOutput};
pub use handlers::{RetrievalHandler, SynthesisHandler, WebIngestionHandler};
pub use memory::{QueryMemory, QueryRecord};
pub use planner::QueryPlanner;
pub use refiner::QueryRefiner;
pub use synthesizer::AnswerSynthesizer;
