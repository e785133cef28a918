use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use lru::LruCache;
use sha2::{Digest, Sha256};

use super::client::{SummarizationError, Summarizer};
use super::prompt::build_prompt;
use crate::feed::Article;
use crate::util::truncate_chars;

/// Fallback text when an article has neither a summary nor a snippet.
pub const UNAVAILABLE_SUMMARY: &str = "(Summary unavailable. Open the original article.)";

/// Maximum characters of snippet reused as a fallback summary.
pub const FALLBACK_SNIPPET_CHARS: usize = 280;

/// Deterministic summary used whenever the service cannot provide one.
pub fn fallback_summary(snippet: &str) -> String {
    let snippet = snippet.trim();
    if snippet.is_empty() {
        UNAVAILABLE_SUMMARY.to_string()
    } else {
        truncate_chars(snippet, FALLBACK_SNIPPET_CHARS).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Calls issued together; never more than this many outstanding
    pub batch_size: usize,
    /// Sleep between consecutive batches (not after the last)
    pub pause: Duration,
    /// Budget for one summarization call, retries included
    pub call_timeout: Duration,
    /// Remembered real summaries; 0 disables the memo
    pub memo_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            pause: Duration::from_millis(300),
            call_timeout: Duration::from_secs(20),
            memo_capacity: 512,
        }
    }
}

type MemoKey = [u8; 32];

/// Fills in article summaries in rate-limited batches.
///
/// Articles are never dropped or reordered; every article leaves
/// [`SummaryBatcher::enrich`] with `summary` set, either from the service,
/// from the memo, or from [`fallback_summary`].
pub struct SummaryBatcher {
    summarizer: Arc<dyn Summarizer>,
    config: BatchConfig,
    memo: Option<Mutex<LruCache<MemoKey, String>>>,
}

impl SummaryBatcher {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: BatchConfig) -> Self {
        let memo = NonZeroUsize::new(config.memo_capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            summarizer,
            config: BatchConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            memo,
        }
    }

    pub fn summarizer_name(&self) -> &'static str {
        self.summarizer.name()
    }

    pub async fn enrich(&self, mut articles: Vec<Article>) -> Vec<Article> {
        let mut pending = Vec::new();
        let mut memo_hits = 0usize;

        for (index, article) in articles.iter_mut().enumerate() {
            if article.summary.is_some() {
                continue;
            }
            match self.memo_get(article) {
                Some(summary) => {
                    article.summary = Some(summary);
                    memo_hits += 1;
                }
                None => pending.push(index),
            }
        }

        let batches = pending.len().div_ceil(self.config.batch_size);
        tracing::debug!(
            summarizer = self.summarizer.name(),
            articles = articles.len(),
            memo_hits,
            pending = pending.len(),
            batches,
            "Enriching articles"
        );

        let mut fallbacks = 0usize;
        // Only batches that reached the service count against its rate limit
        let mut pause_before_next = false;
        for batch in pending.chunks(self.config.batch_size) {
            if pause_before_next {
                tokio::time::sleep(self.config.pause).await;
            }

            let prompts: Vec<String> = batch.iter().map(|&i| build_prompt(&articles[i])).collect();
            let results = join_all(prompts.iter().map(|prompt| self.summarize_one(prompt))).await;
            pause_before_next = results
                .iter()
                .any(|r| !matches!(r, Err(SummarizationError::Unconfigured)));

            for (&index, result) in batch.iter().zip(results) {
                let article = &mut articles[index];
                match result {
                    Ok(summary) => {
                        self.memo_put(article, &summary);
                        article.summary = Some(summary);
                    }
                    Err(e) => {
                        if !matches!(e, SummarizationError::Unconfigured) {
                            tracing::warn!(link = %article.link, error = %e, "Summarization failed, using fallback");
                        }
                        fallbacks += 1;
                        article.summary = Some(fallback_summary(&article.snippet));
                    }
                }
            }
        }

        if fallbacks > 0 {
            tracing::info!(fallbacks, total = articles.len(), "Some summaries fell back to snippets");
        }

        articles
    }

    async fn summarize_one(&self, prompt: &str) -> Result<String, SummarizationError> {
        let text = tokio::time::timeout(self.config.call_timeout, self.summarizer.summarize(prompt))
            .await
            .map_err(|_| SummarizationError::Timeout)??;

        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizationError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    fn memo_key(article: &Article) -> MemoKey {
        let mut hasher = Sha256::new();
        hasher.update(article.link.as_bytes());
        hasher.update([0u8]);
        hasher.update(article.title.as_bytes());
        hasher.finalize().into()
    }

    fn memo_get(&self, article: &Article) -> Option<String> {
        let memo = self.memo.as_ref()?;
        let mut memo = memo.lock().unwrap_or_else(PoisonError::into_inner);
        memo.get(&Self::memo_key(article)).cloned()
    }

    fn memo_put(&self, article: &Article, summary: &str) {
        if let Some(memo) = &self.memo {
            let mut memo = memo.lock().unwrap_or_else(PoisonError::into_inner);
            memo.put(Self::memo_key(article), summary.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Summarizer that records concurrency and fails for chosen titles.
    #[derive(Default)]
    struct ScriptedSummarizer {
        delay: Duration,
        fail_titles: Vec<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let title = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Article title: "))
                .unwrap_or_default();
            if self.fail_titles.iter().any(|t| t == title) {
                return Err(SummarizationError::HttpStatus(500));
            }
            Ok(format!("Summary of {title}"))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(&self, _prompt: &str) -> Result<String, SummarizationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn article(n: usize, snippet: &str) -> Article {
        Article {
            title: format!("Story {n}"),
            link: format!("https://news.example.com/{n}"),
            published_at: None,
            source_name: "Example".into(),
            snippet: snippet.into(),
            summary: None,
            image: String::new(),
        }
    }

    fn articles(n: usize) -> Vec<Article> {
        (1..=n).map(|i| article(i, &format!("Snippet {i}"))).collect()
    }

    fn batcher(summarizer: Arc<dyn Summarizer>) -> SummaryBatcher {
        SummaryBatcher::new(summarizer, BatchConfig::default())
    }

    #[test]
    fn test_fallback_summary() {
        assert_eq!(fallback_summary(""), UNAVAILABLE_SUMMARY);
        assert_eq!(fallback_summary("   "), UNAVAILABLE_SUMMARY);
        assert_eq!(fallback_summary("Short snippet"), "Short snippet");

        let long = "a".repeat(1000);
        assert_eq!(fallback_summary(&long).chars().count(), FALLBACK_SNIPPET_CHARS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_of_five_fails() {
        let summarizer = Arc::new(ScriptedSummarizer {
            fail_titles: vec!["Story 3".into()],
            ..Default::default()
        });
        let enriched = batcher(summarizer).enrich(articles(5)).await;

        assert_eq!(enriched.len(), 5);
        let titles: Vec<_> = enriched.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Story 1", "Story 2", "Story 3", "Story 4", "Story 5"]);

        assert_eq!(enriched[0].summary.as_deref(), Some("Summary of Story 1"));
        assert_eq!(enriched[2].summary.as_deref(), Some("Snippet 3"));
        assert_eq!(enriched[4].summary.as_deref(), Some("Summary of Story 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_batch_size() {
        let summarizer = Arc::new(ScriptedSummarizer {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        batcher(summarizer.clone()).enrich(articles(10)).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 10);
        assert_eq!(summarizer.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_batches_only() {
        let summarizer = Arc::new(ScriptedSummarizer {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let start = Instant::now();
        batcher(summarizer).enrich(articles(5)).await;

        // Two batches of 100ms with one 300ms pause, none after the last batch
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_falls_back() {
        let batcher = SummaryBatcher::new(
            Arc::new(SlowSummarizer),
            BatchConfig {
                call_timeout: Duration::from_secs(20),
                ..BatchConfig::default()
            },
        );
        let start = Instant::now();
        let enriched = batcher.enrich(vec![article(1, "")]).await;

        assert_eq!(enriched[0].summary.as_deref(), Some(UNAVAILABLE_SUMMARY));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_existing_summaries_untouched() {
        let summarizer = Arc::new(ScriptedSummarizer::default());
        let mut input = articles(2);
        input[0].summary = Some("Already here".into());

        let enriched = batcher(summarizer.clone()).enrich(input).await;
        assert_eq!(enriched[0].summary.as_deref(), Some("Already here"));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memo_skips_repeat_calls() {
        let summarizer = Arc::new(ScriptedSummarizer::default());
        let batcher = batcher(summarizer.clone());

        batcher.enrich(articles(3)).await;
        let second = batcher.enrich(articles(3)).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(second[1].summary.as_deref(), Some("Summary of Story 2"));
    }

    #[tokio::test]
    async fn test_fallbacks_are_not_memoised() {
        let summarizer = Arc::new(ScriptedSummarizer {
            fail_titles: vec!["Story 1".into()],
            ..Default::default()
        });
        let batcher = batcher(summarizer.clone());

        batcher.enrich(articles(1)).await;
        batcher.enrich(articles(1)).await;
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_service_gives_fallbacks() {
        let batcher = batcher(Arc::new(crate::summary::DisabledSummarizer));
        let enriched = batcher.enrich(vec![article(1, "Snippet"), article(2, "")]).await;
        assert_eq!(enriched[0].summary.as_deref(), Some("Snippet"));
        assert_eq!(enriched[1].summary.as_deref(), Some(UNAVAILABLE_SUMMARY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_service_skips_batch_pauses() {
        let batcher = batcher(Arc::new(crate::summary::DisabledSummarizer));
        let start = Instant::now();
        let enriched = batcher.enrich(articles(50)).await;

        assert_eq!(enriched.len(), 50);
        assert!(enriched.iter().all(|a| a.summary.is_some()));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
