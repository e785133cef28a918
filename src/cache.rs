//! Per-category stale-while-revalidate cache in front of the pipeline.
//!
//! Each category key owns a [`Slot`]: the current entry plus an optional
//! in-flight run. Runs are `Shared` futures driven by a spawned task, so
//! concurrent triggers coalesce into one pipeline execution and a run always
//! completes even if every waiting reader goes away.
//!
//! State per key:
//!
//! ```text
//! Empty --first read (awaited)--> Fresh --TTL--> Stale --read--> Refreshing
//!                                   ^                              |
//!                                   +---------- success -----------+
//!                                          (failure: back to Stale)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::feed::{normalize_key, Article, FeedEndpoint, Registry};
use crate::pipeline::{Pipeline, PipelineError};

/// One computed result for a category key. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(skip)]
    pub key: String,
    pub articles: Vec<Article>,
    pub computed_at: DateTime<Utc>,
    #[serde(skip)]
    pub fingerprint: String,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, articles: Vec<Article>, computed_at: DateTime<Utc>) -> Self {
        let fingerprint = fingerprint(&articles);
        Self {
            key: key.into(),
            articles,
            computed_at,
            fingerprint,
        }
    }
}

/// SHA-256 over the ordered `(link, title, summary)` triples, hex encoded.
pub fn fingerprint(articles: &[Article]) -> String {
    let mut hasher = Sha256::new();
    for article in articles {
        for field in [
            article.link.as_str(),
            article.title.as_str(),
            article.summary.as_deref().unwrap_or_default(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never computed successfully
    Empty,
    /// Younger than the TTL
    Fresh,
    /// At or past the TTL with no run in flight
    Stale,
    /// Serving the previous entry while a run is in flight
    Refreshing,
}

type RunResult = Result<Arc<CacheEntry>, PipelineError>;
type Run = Shared<BoxFuture<'static, RunResult>>;

struct Stored {
    entry: Arc<CacheEntry>,
    at: Instant,
}

#[derive(Default)]
struct Slot {
    current: RwLock<Option<Arc<Stored>>>,
    inflight: Mutex<Option<Run>>,
}

impl Slot {
    fn current(&self) -> Option<Arc<Stored>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn inflight(&self) -> MutexGuard<'_, Option<Run>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Monotonic clock anchored to wall time at creation.
///
/// Wall-clock jumps (NTP, VM resume) cannot move `computed_at` backwards.
struct Clock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed()).unwrap_or(chrono::Duration::zero());
        self.wall + elapsed
    }
}

struct Inner {
    pipeline: Arc<Pipeline>,
    registry: Arc<Registry>,
    ttl: Duration,
    clock: Clock,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

/// Owns one slot per category key and coordinates refreshes.
///
/// Cloning is cheap; clones share the same slots.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(pipeline: Arc<Pipeline>, registry: Arc<Registry>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                registry,
                ttl,
                clock: Clock::new(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    /// Reads the entry for `category`.
    ///
    /// - Unknown category: `Ok(None)`, and no slot is created.
    /// - Empty: runs the pipeline (or joins the in-flight run) and waits.
    /// - Fresh: returns immediately.
    /// - Stale/Refreshing: returns the previous entry immediately, making sure
    ///   one background run is in flight.
    ///
    /// # Errors
    ///
    /// Only when there is no entry at all and the run failed.
    pub async fn get(&self, category: &str) -> Result<Option<Arc<CacheEntry>>, PipelineError> {
        let key = normalize_key(category);
        let Some(endpoints) = self.inner.registry.resolve(&key) else {
            tracing::debug!(category = %key, "Unknown category requested");
            return Ok(None);
        };

        let slot = self.slot(&key);
        match slot.current() {
            Some(stored) => {
                if stored.at.elapsed() >= self.inner.ttl {
                    // Detached: the spawned task drives the run
                    let _ = self.start_run(&key, &slot, endpoints);
                }
                Ok(Some(Arc::clone(&stored.entry)))
            }
            None => self.start_run(&key, &slot, endpoints).await.map(Some),
        }
    }

    /// Current state of `category`'s slot. Unknown keys report `Empty`.
    pub fn state(&self, category: &str) -> CacheState {
        let key = normalize_key(category);
        let slot = {
            let slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&key) {
                Some(slot) => Arc::clone(slot),
                None => return CacheState::Empty,
            }
        };

        let refreshing = slot.inflight().is_some();
        match slot.current() {
            None => CacheState::Empty,
            Some(_) if refreshing => CacheState::Refreshing,
            Some(stored) if stored.at.elapsed() < self.inner.ttl => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    /// Starts background runs for every registry key that has no entry yet.
    ///
    /// Returns the number of runs started or joined.
    pub fn prewarm(&self) -> usize {
        let keys: Vec<String> = self.inner.registry.keys().map(str::to_string).collect();
        let mut started = 0;
        for key in keys {
            let Some(endpoints) = self.inner.registry.resolve(&key) else {
                continue;
            };
            let slot = self.slot(&key);
            if slot.current().is_none() {
                let _ = self.start_run(&key, &slot, endpoints);
                started += 1;
            }
        }
        tracing::info!(keys = started, "Prewarming cache");
        started
    }

    /// Keys that currently hold an entry, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.current().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Returns the in-flight run for `slot`, starting one if there is none.
    fn start_run(&self, key: &str, slot: &Arc<Slot>, endpoints: &[FeedEndpoint]) -> Run {
        let mut inflight = slot.inflight();
        if let Some(run) = inflight.as_ref() {
            tracing::debug!(category = %key, "Joining in-flight run");
            return run.clone();
        }

        tracing::debug!(category = %key, endpoints = endpoints.len(), "Starting pipeline run");

        let inner = Arc::clone(&self.inner);
        let run_slot = Arc::clone(slot);
        let key = key.to_string();
        let endpoints = endpoints.to_vec();

        let run: Run = async move {
            let outcome = match inner.pipeline.run(&endpoints).await {
                Ok(articles) => Ok(inner.commit(&key, &run_slot, articles)),
                Err(e) => {
                    tracing::warn!(category = %key, error = %e, "Refresh failed, keeping previous entry");
                    Err(e)
                }
            };
            *run_slot.inflight() = None;
            outcome
        }
        .boxed()
        .shared();

        *inflight = Some(run.clone());
        drop(inflight);

        tokio::spawn(run.clone());
        run
    }
}

impl Inner {
    /// Publishes a new entry; `computed_at` never moves backwards per key.
    fn commit(&self, key: &str, slot: &Slot, articles: Vec<Article>) -> Arc<CacheEntry> {
        let mut current = slot.current.write().unwrap_or_else(PoisonError::into_inner);

        let mut computed_at = self.clock.now();
        if let Some(previous) = current.as_ref() {
            computed_at = computed_at.max(previous.entry.computed_at);
        }

        let entry = Arc::new(CacheEntry::new(key, articles, computed_at));
        *current = Some(Arc::new(Stored {
            entry: Arc::clone(&entry),
            at: Instant::now(),
        }));

        tracing::info!(
            category = %key,
            articles = entry.articles.len(),
            computed_at = %entry.computed_at,
            "Cache entry replaced"
        );
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedSource, FetchError, ParsedFeed, RawEntry};
    use crate::pipeline::PipelineConfig;
    use crate::summary::{BatchConfig, DisabledSummarizer, SummaryBatcher};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(30);

    /// Every fetch yields one entry titled after the call number.
    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl FeedSource for CountingSource {
        async fn fetch(&self, endpoint: &FeedEndpoint, _timeout: Duration) -> Result<ParsedFeed, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::HttpStatus(503));
            }
            Ok(ParsedFeed {
                title: Some("Counter".into()),
                entries: vec![RawEntry {
                    title: Some(format!("run {n}")),
                    link: Some(format!("{}/{n}", endpoint.url)),
                    ..Default::default()
                }],
            })
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::from_endpoints(vec![
            FeedEndpoint::new("https://tech.example.com/feed", Some("tech")),
            FeedEndpoint::new("https://world.example.com/feed", Some("world")),
        ]))
    }

    fn cache_with(source: Arc<CountingSource>) -> CacheManager {
        let batcher = SummaryBatcher::new(Arc::new(DisabledSummarizer), BatchConfig::default());
        let pipeline = Pipeline::new(source, batcher, PipelineConfig::default());
        CacheManager::new(Arc::new(pipeline), registry(), TTL)
    }

    async fn settle(cache: &CacheManager, key: &str) {
        while cache.state(key) == CacheState::Refreshing {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_timeline() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source.clone());

        // t=0: computed on first read
        assert_eq!(cache.state("tech"), CacheState::Empty);
        let first = cache.get("tech").await.unwrap().unwrap();
        assert_eq!(first.articles[0].title, "run 1");
        assert_eq!(cache.state("tech"), CacheState::Fresh);

        // t=10: same entry, no work
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = cache.get("tech").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // t=31: old data served instantly, refresh scheduled
        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(cache.state("tech"), CacheState::Stale);
        let stale = cache.get("tech").await.unwrap().unwrap();
        assert_eq!(stale.computed_at, first.computed_at);
        assert_eq!(stale.articles[0].title, "run 1");
        assert_eq!(cache.state("tech"), CacheState::Refreshing);

        settle(&cache, "tech").await;
        let fresh = cache.get("tech").await.unwrap().unwrap();
        assert_eq!(fresh.articles[0].title, "run 2");
        assert!(fresh.computed_at - first.computed_at >= chrono::Duration::seconds(31));
        assert_ne!(fresh.fingerprint, first.fingerprint);
        assert_eq!(cache.state("tech"), CacheState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_reads_share_one_run() {
        let source = Arc::new(CountingSource {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let cache = cache_with(source.clone());

        let reads = futures::future::join_all((0..5).map(|_| cache.get("tech"))).await;
        let entries: Vec<_> = reads.into_iter().map(|r| r.unwrap().unwrap()).collect();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reads_coalesce_into_one_refresh() {
        let source = Arc::new(CountingSource {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let cache = cache_with(source.clone());
        cache.get("tech").await.unwrap();

        tokio::time::advance(TTL).await;
        for _ in 0..5 {
            cache.get("tech").await.unwrap();
        }
        settle(&cache, "tech").await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_entry() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source.clone());
        let first = cache.get("tech").await.unwrap().unwrap();

        source.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(TTL).await;
        cache.get("tech").await.unwrap();
        settle(&cache, "tech").await;

        assert_eq!(cache.state("tech"), CacheState::Stale);
        let after = cache.get("tech").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &after));

        // The read above retried; recovery publishes new data
        source.failing.store(false, Ordering::SeqCst);
        settle(&cache, "tech").await;
        cache.get("tech").await.unwrap();
        settle(&cache, "tech").await;
        let recovered = cache.get("tech").await.unwrap().unwrap();
        assert!(recovered.computed_at >= first.computed_at);
        assert_ne!(recovered.articles[0].title, first.articles[0].title);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_failure_surfaces_error() {
        let source = Arc::new(CountingSource::default());
        source.failing.store(true, Ordering::SeqCst);
        let cache = cache_with(source);

        let result = cache.get("tech").await;
        assert_eq!(result, Err(PipelineError::AllSourcesFailed { attempted: 1 }));
        assert_eq!(cache.state("tech"), CacheState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_category_creates_no_entry() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source.clone());

        assert_eq!(cache.get("astrology").await.unwrap(), None);
        assert!(cache.cached_keys().is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent_and_normalized() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source);

        cache.get(" TECH ").await.unwrap();
        assert_eq!(cache.state("tech"), CacheState::Fresh);
        assert_eq!(cache.state("world"), CacheState::Empty);
        assert_eq!(cache.cached_keys(), vec!["tech".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_abandoned_reader() {
        let source = Arc::new(CountingSource {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let cache = cache_with(source);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.get("tech")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.state("tech"), CacheState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prewarm_fills_every_key() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source);

        assert_eq!(cache.prewarm(), 3); // all, tech, world
        for key in ["all", "tech", "world"] {
            while cache.state(key) != CacheState::Fresh {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        assert_eq!(cache.cached_keys(), vec!["all", "tech", "world"]);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let article = |title: &str| Article {
            title: title.into(),
            link: "https://example.com".into(),
            published_at: None,
            source_name: "S".into(),
            snippet: String::new(),
            summary: Some("sum".into()),
            image: String::new(),
        };
        assert_eq!(fingerprint(&[article("a")]), fingerprint(&[article("a")]));
        assert_ne!(fingerprint(&[article("a")]), fingerprint(&[article("b")]));
        assert_eq!(fingerprint(&[]).len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_computed_at_never_moves_backwards() {
        let source = Arc::new(CountingSource::default());
        let cache = cache_with(source.clone());

        // An entry stamped ahead of the clock, as after a wall-clock step back
        let ahead = Utc::now() + chrono::Duration::hours(1);
        let slot = cache.slot("tech");
        *slot.current.write().unwrap() = Some(Arc::new(Stored {
            entry: Arc::new(CacheEntry::new("tech", Vec::new(), ahead)),
            at: Instant::now(),
        }));

        let committed = cache.inner.commit("tech", &slot, Vec::new());
        assert_eq!(committed.computed_at, ahead);

        // The same holds for a regular background refresh
        tokio::time::advance(TTL).await;
        cache.get("tech").await.unwrap().unwrap();
        settle(&cache, "tech").await;
        let refreshed = cache.get("tech").await.unwrap().unwrap();
        assert_eq!(refreshed.articles[0].title, "run 1");
        assert_eq!(refreshed.computed_at, ahead);
    }
}
