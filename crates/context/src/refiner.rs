//! Query refiner
//!
//! Broadens a query that scored poorly with terms taken from its best
//! evidence, so the next pass retrieves around what was already found.

use siteforge_common::models::RetrievedChunk;
use siteforge_common::text::{key_terms, tokenize};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct QueryRefiner {
    max_new_terms: usize,
    evidence_window: usize,
}

impl Default for QueryRefiner {
    fn default() -> Self {
        Self {
            max_new_terms: 3,
            evidence_window: 2,
        }
    }
}

impl QueryRefiner {
    pub fn new(max_new_terms: usize) -> Self {
        Self {
            max_new_terms,
            ..Default::default()
        }
    }

    /// The query plus up to `max_new_terms` unseen terms from the top evidence.
    /// `None` when there is nothing new to add.
    pub fn refine(&self, query: &str, evidence: &[RetrievedChunk]) -> Option<String> {
        let known: HashSet<String> = tokenize(query).into_iter().collect();

        let mut added = Vec::new();
        for chunk in evidence.iter().take(self.evidence_window) {
            for term in key_terms(&chunk.content, usize::MAX) {
                if added.len() == self.max_new_terms {
                    break;
                }
                if !known.contains(&term) && !added.contains(&term) {
                    added.push(term);
                }
            }
        }

        if added.is_empty() {
            None
        } else {
            Some(format!("{} {}", query.trim(), added.join(" ")))
        }
    }
}
