//! One aggregation run: fetch every endpoint, normalize, rank, summarize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::feed::{
    default_placeholders, normalize, rank, Article, FeedEndpoint, FeedSource, FetchResult,
};
use crate::summary::SummaryBatcher;

/// Failure of a whole run. Per-endpoint and per-article failures never
/// surface here; they are logged and degraded around.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("All {attempted} feed sources failed")]
    AllSourcesFailed { attempted: usize },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub max_articles: usize,
    pub placeholders: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            max_concurrent_fetches: 16,
            max_articles: 50,
            placeholders: default_placeholders(),
        }
    }
}

/// Fetches every endpoint with at most `concurrency` requests in flight.
///
/// Results come back in endpoint order regardless of completion order, which
/// keeps ranking tie-breaks deterministic. Failures are logged here and
/// returned to the caller for exclusion.
pub async fn fetch_all(
    source: &dyn FeedSource,
    endpoints: &[FeedEndpoint],
    timeout: Duration,
    concurrency: usize,
) -> Vec<FetchResult> {
    let fetches: Vec<_> = endpoints
        .iter()
        .map(|endpoint| async move {
            let result = source.fetch(endpoint, timeout).await;
            if let Err(e) = &result {
                tracing::warn!(endpoint = %endpoint.url, error = %e, "Feed fetch failed");
            }
            FetchResult {
                endpoint: endpoint.clone(),
                result,
            }
        })
        .collect();
    stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Display name for a feed: its title, else the endpoint host, else the URL.
pub fn source_name(feed_title: Option<&str>, endpoint: &FeedEndpoint) -> String {
    feed_title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            url::Url::parse(&endpoint.url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        })
        .unwrap_or_else(|| endpoint.url.clone())
}

/// Fetcher × N, then normalizer, ranker and batcher.
///
/// Holds no state between runs apart from the batcher's summary memo.
pub struct Pipeline {
    source: Arc<dyn FeedSource>,
    batcher: SummaryBatcher,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(source: Arc<dyn FeedSource>, batcher: SummaryBatcher, config: PipelineConfig) -> Self {
        Self {
            source,
            batcher,
            config,
        }
    }

    /// Runs one aggregation over `endpoints`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AllSourcesFailed`] only when there was at least one
    /// endpoint and every fetch failed. An empty endpoint list yields an
    /// empty article list.
    pub async fn run(&self, endpoints: &[FeedEndpoint]) -> Result<Vec<Article>, PipelineError> {
        let started = Instant::now();

        let results = fetch_all(
            self.source.as_ref(),
            endpoints,
            self.config.fetch_timeout,
            self.config.max_concurrent_fetches,
        )
        .await;

        let failed = results.iter().filter(|r| r.result.is_err()).count();
        if !endpoints.is_empty() && failed == endpoints.len() {
            tracing::error!(attempted = failed, "Every feed source failed");
            return Err(PipelineError::AllSourcesFailed { attempted: failed });
        }

        let merged: Vec<Article> = results
            .into_iter()
            .filter_map(|r| r.result.ok().map(|feed| (r.endpoint, feed)))
            .flat_map(|(endpoint, feed)| {
                let name = source_name(feed.title.as_deref(), &endpoint);
                let placeholders = &self.config.placeholders;
                feed.entries
                    .into_iter()
                    .map(move |entry| normalize(entry, &name, placeholders))
            })
            .collect();

        let merged_count = merged.len();
        let ranked = rank(merged, self.config.max_articles);
        let articles = self.batcher.enrich(ranked).await;

        tracing::info!(
            endpoints = endpoints.len(),
            failed,
            merged = merged_count,
            articles = articles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );

        Ok(articles)
    }
}
