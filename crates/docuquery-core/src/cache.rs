//! Cache layer over a [`ResultCache`] backend.
//!
//! Cache failures never reach callers: a failed, slow or undecodable `get` is a miss and
//! a failed or slow `set` is a no-op. All of them are counted as cache errors.
//!
//! Lookups are counted per [`CacheScope`] so read traffic from the query service does
//! not move the ingestion hit ratio.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::metrics::PipelineMetrics;
use crate::traits::ResultCache;
use crate::types::ExtractionResult;

/// Default time-to-live for cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default upper bound on one backend command.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

/// Which path a lookup is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Ingest,
    Query,
}

/// Typed, failure-absorbing wrapper around a cache backend.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn ResultCache>,
    metrics: Arc<PipelineMetrics>,
    ttl: Duration,
    timeout: Duration,
    scope: CacheScope,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn ResultCache>, metrics: Arc<PipelineMetrics>, ttl: Duration) -> Self {
        Self {
            backend,
            metrics,
            ttl,
            timeout: DEFAULT_CACHE_TIMEOUT,
            scope: CacheScope::Ingest,
        }
    }

    /// Bound every backend command by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same backend, with lookups counted as query traffic.
    pub fn for_queries(&self) -> Self {
        Self {
            scope: CacheScope::Query,
            ..self.clone()
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend()
    }

    /// Look up the cached result for a content hash.
    pub async fn get(&self, key: &str) -> Option<ExtractionResult> {
        let raw = match self.bounded("GET", self.backend.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.record_miss();
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, code = e.code().as_str(), "Cache get failed, treating as miss");
                self.metrics.record_cache_error();
                self.record_miss();
                return None;
            }
        };

        match serde_json::from_str::<ExtractionResult>(&raw) {
            Ok(result) => {
                debug!(key, "Cache hit");
                self.record_hit();
                Some(result)
            }
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache entry, treating as miss");
                self.metrics.record_cache_error();
                self.record_miss();
                None
            }
        }
    }

    /// Replace the cached result for a content hash.
    pub async fn set(&self, key: &str, result: &ExtractionResult) {
        if let Err(e) = self.try_set(key, result).await {
            warn!(key, error = %e, code = e.code().as_str(), "Cache set failed, skipping");
            self.metrics.record_cache_error();
        }
    }

    async fn try_set(&self, key: &str, result: &ExtractionResult) -> CacheResult<()> {
        let value = serde_json::to_string(result)?;
        self.bounded("SET", self.backend.set(key, value, self.ttl)).await
    }

    async fn bounded<T>(
        &self,
        command: &str,
        call: impl std::future::Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        tokio::time::timeout(self.timeout, call).await.map_err(|_| {
            CacheError::Unavailable(format!(
                "{command} timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
    }

    fn record_hit(&self) {
        match self.scope {
            CacheScope::Ingest => self.metrics.record_cache_hit(),
            CacheScope::Query => self.metrics.record_query_cache_hit(),
        }
    }

    fn record_miss(&self) {
        match self.scope {
            CacheScope::Ingest => self.metrics.record_cache_miss(),
            CacheScope::Query => self.metrics.record_query_cache_miss(),
        }
    }
}

/// Cache backend that stores nothing. Used when no cache is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl ResultCache for NoopCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockResultCache;
    use crate::types::{ExtractionMethod, ExtractionStatus, PageSource, PageText};
    use chrono::Utc;

    fn sample() -> ExtractionResult {
        ExtractionResult::from_pages(
            "abc",
            vec![PageText::new(1, "hello", 0.9, PageSource::Direct)],
            ExtractionMethod::Direct,
            ExtractionStatus::Complete,
            3,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades_to_miss() {
        let mut backend = MockResultCache::new();
        backend
            .expect_get()
            .returning(|_| Err(CacheError::Unavailable("connection refused".into())));
        backend
            .expect_set()
            .returning(|_, _, _| Err(CacheError::Unavailable("connection refused".into())));
        backend.expect_backend().return_const("mock");

        let metrics = Arc::new(PipelineMetrics::new());
        let cache = CacheLayer::new(Arc::new(backend), metrics.clone(), DEFAULT_CACHE_TTL);

        assert!(cache.get("abc").await.is_none());
        cache.set("abc", &sample()).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_errors, 2);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss() {
        let mut backend = MockResultCache::new();
        backend
            .expect_get()
            .returning(|_| Ok(Some("{not json".to_string())));

        let metrics = Arc::new(PipelineMetrics::new());
        let cache = CacheLayer::new(Arc::new(backend), metrics.clone(), DEFAULT_CACHE_TTL);

        assert!(cache.get("abc").await.is_none());
        assert_eq!(metrics.snapshot().cache_errors, 1);
    }

    #[tokio::test]
    async fn test_hit_decodes_result() {
        let stored = serde_json::to_string(&sample()).unwrap();
        let mut backend = MockResultCache::new();
        backend
            .expect_get()
            .withf(|key| key == "abc")
            .returning(move |_| Ok(Some(stored.clone())));

        let metrics = Arc::new(PipelineMetrics::new());
        let cache = CacheLayer::new(Arc::new(backend), metrics.clone(), DEFAULT_CACHE_TTL);

        let hit = cache.get("abc").await.unwrap();
        assert_eq!(hit.text, "hello");
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }

    /// Backend that accepts commands and never answers.
    struct StalledCache;

    #[async_trait]
    impl ResultCache for StalledCache {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
            std::future::pending().await
        }

        fn backend(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out_as_miss() {
        let metrics = Arc::new(PipelineMetrics::new());
        let cache = CacheLayer::new(Arc::new(StalledCache), metrics.clone(), DEFAULT_CACHE_TTL)
            .with_timeout(Duration::from_millis(200));

        assert!(cache.get("abc").await.is_none());
        cache.set("abc", &sample()).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_errors, 2);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_query_scope_has_own_counters() {
        let stored = serde_json::to_string(&sample()).unwrap();
        let mut backend = MockResultCache::new();
        backend
            .expect_get()
            .returning(move |key| Ok((key == "abc").then(|| stored.clone())));

        let metrics = Arc::new(PipelineMetrics::new());
        let ingest = CacheLayer::new(Arc::new(backend), metrics.clone(), DEFAULT_CACHE_TTL);
        let query = ingest.for_queries();
        assert_eq!(query.scope(), CacheScope::Query);

        assert!(query.get("abc").await.is_some());
        assert!(query.get("other").await.is_none());
        assert!(ingest.get("other").await.is_none());

        let snap = metrics.snapshot();
        assert_eq!(snap.query_cache_hits, 1);
        assert_eq!(snap.query_cache_misses, 1);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hit_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_noop_cache() {
        let metrics = Arc::new(PipelineMetrics::new());
        let cache = CacheLayer::new(Arc::new(NoopCache), metrics, DEFAULT_CACHE_TTL);
        cache.set("abc", &sample()).await;
        assert!(cache.get("abc").await.is_none());
        assert_eq!(cache.backend_name(), "noop");
    }
}
