//! API handlers module

pub mod health;
pub mod jobs;
pub mod query;
