//! Web-ingestion plan rewriting
//!
//! When a query mentions a URL, the page has to be ingested before anything
//! retrieves from the index. [`prepend_web_ingestion_step`] inserts that
//! prerequisite at the front of an existing plan, shifts every id by one and
//! points the previously unconstrained retrieval steps at the new step.

use super::{step_id, step_index, ExecutionMode, PlanError, Step, StepKind, StepPlan};
use regex_lite::Regex;
use serde_json::json;
use std::sync::LazyLock;

/// Fetch, convert and index a web page before it is queried
pub const WEB_INGESTION: StepKind = StepKind::from_static("web_ingestion");

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("URL pattern is valid"));

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\'', '"', '<', '>'];

/// Output of [`prepend_web_ingestion_step`]
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenPlan {
    pub steps: Vec<Step>,
    /// Id of the inserted step, `None` when the query had no URL
    pub inserted_step_id: Option<String>,
}

/// First URL in `query`, with trailing sentence punctuation removed.
///
/// `\S` in the pattern only excludes ASCII whitespace, so each match is cut
/// again at the first Unicode space (U+00A0, U+3000, ...).
pub fn detect_url(query: &str) -> Option<String> {
    let mut rest = query;
    while let Some(found) = URL_PATTERN.find(rest) {
        let matched = found.as_str();
        let end = matched.find(char::is_whitespace).unwrap_or(matched.len());
        let candidate = &matched[..end];

        // a bare scheme followed by a Unicode space is not a URL
        let scheme_end = candidate.find("://").map_or(candidate.len(), |i| i + 3);
        if candidate.len() > scheme_end {
            return Some(candidate.trim_end_matches(TRAILING_PUNCTUATION).to_string());
        }
        rest = &rest[found.start() + end..];
    }
    None
}

/// Id with its numeric suffix incremented, prefix untouched
fn shift_id(id: &str) -> Result<String, PlanError> {
    let index = step_index(id)?;
    // step_index succeeded, so there is an underscore
    let prefix = id.rsplit_once('_').map(|(p, _)| p).unwrap_or("step");
    let next = index
        .checked_add(1)
        .ok_or_else(|| PlanError::MalformedStepId { id: id.to_string() })?;
    Ok(format!("{prefix}_{next}"))
}

/// Insert a web-ingestion step ahead of `steps` if `query` contains a URL.
///
/// The inserted step gets id `step_{counter_start}`. Inputs are never mutated.
/// The rewritten plan is validated before it is returned, so an id collision,
/// a dangling dependency or a cycle surfaces as a [`PlanError`].
pub fn prepend_web_ingestion_step(
    query: &str,
    steps: &[Step],
    counter_start: u64,
) -> Result<RewrittenPlan, PlanError> {
    let Some(url) = detect_url(query) else {
        return Ok(RewrittenPlan {
            steps: steps.to_vec(),
            inserted_step_id: None,
        });
    };

    let web_id = step_id(counter_start);
    let web_step = Step::new(
        web_id.clone(),
        WEB_INGESTION,
        format!("Ingest web content from {url}"),
    )
    .with_mode(ExecutionMode::Sequential)
    .with_parameter("url", json!(url));

    let mut rewritten = Vec::with_capacity(steps.len() + 1);
    rewritten.push(web_step);

    for step in steps {
        let id = shift_id(&step.id)?;

        let mut dependencies = step
            .dependencies
            .iter()
            .map(|dep| shift_id(dep))
            .collect::<Result<Vec<_>, _>>()?;

        if step.kind == StepKind::RETRIEVAL && step.dependencies.is_empty() {
            dependencies.push(web_id.clone());
        }

        rewritten.push(Step {
            id,
            dependencies,
            ..step.clone()
        });
    }

    let plan = StepPlan::try_new(rewritten)?;
    Ok(RewrittenPlan {
        steps: plan.into_steps(),
        inserted_step_id: Some(web_id),
    })
}
