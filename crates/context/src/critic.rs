//! Quality critic
//!
//! Scores a pass in [0, 1] from how much of the question the evidence covers,
//! how strongly it was ranked and how much of the answer is grounded in it.

use siteforge_common::models::RetrievedChunk;
use siteforge_common::text::key_terms;
use std::collections::HashSet;

const COVERAGE_WEIGHT: f32 = 0.5;
const RELEVANCE_WEIGHT: f32 = 0.3;
const GROUNDING_WEIGHT: f32 = 0.2;
const MAX_TERMS: usize = 32;
const TOP_RESULTS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityCritic;

impl QualityCritic {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, question: &str, evidence: &[RetrievedChunk], answer: &str) -> f32 {
        if evidence.is_empty() {
            return 0.0;
        }

        let evidence_terms: HashSet<String> = evidence
            .iter()
            .flat_map(|c| key_terms(&c.content, usize::MAX))
            .collect();

        let coverage = fraction_known(&key_terms(question, MAX_TERMS), &evidence_terms)
            // questions made only of stop words carry no signal
            .unwrap_or(0.5);

        let top: Vec<f32> = evidence
            .iter()
            .take(TOP_RESULTS)
            .map(|c| c.score.clamp(0.0, 1.0))
            .collect();
        let relevance = top.iter().sum::<f32>() / top.len() as f32;

        let grounding =
            fraction_known(&key_terms(answer, MAX_TERMS), &evidence_terms).unwrap_or(0.0);

        (coverage * COVERAGE_WEIGHT + relevance * RELEVANCE_WEIGHT + grounding * GROUNDING_WEIGHT)
            .clamp(0.0, 1.0)
    }
}

fn fraction_known(terms: &[String], known: &HashSet<String>) -> Option<f32> {
    if terms.is_empty() {
        return None;
    }
    let hits = terms.iter().filter(|t| known.contains(*t)).count();
    Some(hits as f32 / terms.len() as f32)
}
