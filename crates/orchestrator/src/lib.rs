//! SiteForge Orchestrator
//!
//! Assembles every backend handle and sub-pipeline from one [`AppConfig`],
//! exposes `ingest` and `query`, and tears everything down exactly once.
//!
//! [`AppConfig`]: siteforge_common::AppConfig

pub mod availability;
pub mod orchestrator;

pub use availability::{effective_weights, EffectiveWeights, GraphAvailability, GraphHandles, Unavailable};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, PipelineStatus};
