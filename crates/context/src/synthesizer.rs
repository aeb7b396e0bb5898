//! Answer synthesizer
//!
//! Provides:
//! - Evidence-grounded answers from an OpenAI-compatible chat endpoint
//! - An extractive fallback when no model is configured
//! - Citation extraction

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use siteforge_common::config::SynthesisConfig;
use siteforge_common::errors::{AppError, Result};
use siteforge_common::models::RetrievedChunk;
use siteforge_common::text::tokenize;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation pattern"));

/// Evidence passed to the model
const MAX_CONTEXTS: usize = 8;
/// Sentences kept by the extractive answer
const MAX_SENTENCES: usize = 3;

/// Citation in a synthesized answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based index into the evidence list
    pub index: usize,
    pub source_url: String,
    pub title: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

struct LlmClient {
    client: reqwest::Client,
    api_key: String,
}

pub struct AnswerSynthesizer {
    config: SynthesisConfig,
    llm: Option<LlmClient>,
}

impl AnswerSynthesizer {
    /// The model is only called when synthesis is enabled and a key is set
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let llm = match (&config.api_key, config.enabled) {
            (Some(key), true) if !key.is_empty() => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()
                    .map_err(|e| AppError::Internal {
                        message: format!("Failed to create HTTP client: {e}"),
                    })?;
                Some(LlmClient {
                    client,
                    api_key: key.clone(),
                })
            }
            _ => None,
        };

        Ok(Self {
            config: config.clone(),
            llm,
        })
    }

    /// Extractive-only synthesizer
    pub fn extractive() -> Self {
        Self {
            config: SynthesisConfig {
                enabled: false,
                ..Default::default()
            },
            llm: None,
        }
    }

    pub fn uses_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Answer `question` from `evidence`. A failed model call falls back to
    /// the extractive answer.
    pub async fn synthesize(&self, question: &str, evidence: &[RetrievedChunk]) -> String {
        if evidence.is_empty() {
            return "No relevant content has been indexed for this question yet.".to_string();
        }

        if let Some(llm) = &self.llm {
            match self.call_llm(llm, question, evidence).await {
                Ok(answer) => return answer,
                Err(e) => warn!(error = %e, "LLM synthesis failed, using extractive answer"),
            }
        }
        extractive_answer(question, evidence)
    }

    fn build_prompt(question: &str, evidence: &[RetrievedChunk]) -> String {
        let mut prompt = format!(
            "Answer the question based ONLY on the numbered web excerpts below. \
             If they do not contain the answer, say so. \
             Cite excerpts inline as [1], [2].\n\nQuestion: {question}\n\nExcerpts:\n"
        );
        for (i, chunk) in evidence.iter().take(MAX_CONTEXTS).enumerate() {
            prompt.push_str(&format!(
                "\n[{}] {} ({})\n{}\n",
                i + 1,
                chunk.title,
                chunk.source_url,
                chunk.content
            ));
        }
        prompt.push_str("\nAnswer:");
        prompt
    }

    async fn call_llm(
        &self,
        llm: &LlmClient,
        question: &str,
        evidence: &[RetrievedChunk],
    ) -> Result<String> {
        let prompt = Self::build_prompt(question, evidence);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a careful assistant answering from web content.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = llm
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&llm.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Synthesis {
                message: format!("LLM API error {status}: {body}"),
            });
        }

        let chat: ChatResponse = response.json().await?;
        let answer = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AppError::Synthesis {
                message: "Empty response from LLM".to_string(),
            })?;

        debug!(citations = extract_citations(&answer, evidence).len(), "LLM answer received");
        Ok(answer)
    }
}

/// Citations like `[2]` that point at real evidence, deduplicated, in order
pub fn extract_citations(answer: &str, evidence: &[RetrievedChunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for cap in CITATION.captures_iter(answer) {
        let Some(index) = cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        if index == 0 || index > evidence.len() || citations.iter().any(|c| c.index == index) {
            continue;
        }
        let chunk = &evidence[index - 1];
        citations.push(Citation {
            index,
            source_url: chunk.source_url.clone(),
            title: chunk.title.clone(),
        });
    }
    citations.sort_by_key(|c| c.index);
    citations
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().count() > 20)
        .collect()
}

/// The evidence sentences sharing most terms with the question, each cited
fn extractive_answer(question: &str, evidence: &[RetrievedChunk]) -> String {
    let terms: HashSet<String> = tokenize(question).into_iter().collect();

    let mut scored: Vec<(usize, usize, usize, &str)> = Vec::new();
    for (chunk_index, chunk) in evidence.iter().take(MAX_CONTEXTS).enumerate() {
        for (sentence_index, sentence) in split_sentences(&chunk.content).into_iter().enumerate() {
            let overlap = tokenize(sentence)
                .into_iter()
                .collect::<HashSet<_>>()
                .intersection(&terms)
                .count();
            scored.push((overlap, chunk_index, sentence_index, sentence));
        }
    }

    // most overlap first, then evidence rank, then reading order
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let picked: Vec<String> = scored
        .into_iter()
        .take(MAX_SENTENCES)
        .map(|(_, chunk_index, _, sentence)| format!("{sentence} [{}]", chunk_index + 1))
        .collect();

    if picked.is_empty() {
        // every chunk was shorter than a sentence
        let first = &evidence[0];
        return format!("{} [1]", first.content.trim());
    }
    picked.join(" ")
}
