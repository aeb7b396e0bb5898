//! SiteForge Ingestion
//!
//! Turns a start URL into stored, searchable chunks:
//! 1. Crawls same-host pages breadth-first
//! 2. Converts HTML to plain text
//! 3. Chunks and embeds the text
//! 4. Writes vectors, graph nodes and lexical postings

pub mod chunker;
pub mod crawler;
pub mod errors;
pub mod html;
pub mod pipeline;

pub use errors::IngestionError;
pub use pipeline::WebIngestionPipeline;
