//! Same-host breadth-first crawler.
//!
//! Starts at one URL, follows links on the same host up to `max_depth` hops and
//! stops after `max_pages` fetches. Pages that cannot be fetched are reported
//! back as failures rather than errors.

use futures::future::join_all;
use reqwest::{header, Client};
use siteforge_common::config::IngestionConfig;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::errors::IngestionError;
use crate::html::extract_links;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub depth: u32,
}

/// Pages fetched plus the ones that failed
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<FetchedPage>,
    pub failures: Vec<IngestionError>,
}

pub struct Crawler {
    client: Client,
    max_depth: u32,
    max_pages: usize,
}

impl Crawler {
    pub fn new(config: &IngestionConfig) -> Result<Self, IngestionError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_depth: config.max_depth,
            max_pages: config.max_pages.max(1),
        })
    }

    #[instrument(skip(self), fields(max_depth = self.max_depth, max_pages = self.max_pages))]
    pub async fn crawl(&self, start_url: &str) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();

        let start = match Url::parse(start_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                outcome.failures.push(IngestionError::InvalidUrl {
                    url: start_url.to_string(),
                    message: format!("unsupported scheme {}", url.scheme()),
                });
                return outcome;
            }
            Err(e) => {
                outcome.failures.push(IngestionError::InvalidUrl {
                    url: start_url.to_string(),
                    message: e.to_string(),
                });
                return outcome;
            }
        };
        let host = start.host_str().unwrap_or_default().to_string();

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![start];
        let mut depth = 0;
        let mut fetched = 0;

        while !frontier.is_empty() && fetched < self.max_pages {
            let mut level = Vec::new();
            for url in frontier.drain(..) {
                if level.len() + fetched >= self.max_pages {
                    break;
                }
                if visited.insert(url.as_str().to_string()) {
                    level.push(url);
                }
            }
            fetched += level.len();

            let results = join_all(level.iter().map(|url| self.fetch(url))).await;

            let mut next = Vec::new();
            for (url, result) in level.into_iter().zip(results) {
                match result {
                    Ok(html) => {
                        if depth < self.max_depth {
                            next.extend(
                                extract_links(&url, &html)
                                    .into_iter()
                                    .filter(|link| link.host_str() == Some(host.as_str()))
                                    .filter(|link| !visited.contains(link.as_str())),
                            );
                        }
                        outcome.pages.push(FetchedPage {
                            url: url.to_string(),
                            html,
                            depth,
                        });
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Page fetch failed");
                        outcome.failures.push(e);
                    }
                }
            }

            frontier = next;
            depth += 1;
        }

        info!(
            pages = outcome.pages.len(),
            failures = outcome.failures.len(),
            "Crawl completed"
        );
        outcome
    }

    async fn fetch(&self, url: &Url) -> Result<String, IngestionError> {
        debug!(%url, "Fetching page");
        let fetch_error = |message: String| IngestionError::Fetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let ct = content_type.to_ascii_lowercase();
            if !(ct.starts_with("text/") || ct.contains("html") || ct.contains("xml")) {
                return Err(IngestionError::NotHtml {
                    url: url.to_string(),
                    content_type: content_type.to_string(),
                });
            }
        }

        response
            .text()
            .await
            .map_err(|e| fetch_error(format!("body read failed: {e}")))
    }
}
