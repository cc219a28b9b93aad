//! Service and store doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docuquery_core::error::{CacheResult, ServiceResult, StoreResult};
use docuquery_core::memory::{InMemoryMetadataStore, InMemoryPayloadStore, InMemoryResultCache};
use docuquery_core::traits::{ExtractedDocument, ExtractedPage, OcrPage, OcrRequest};
use docuquery_core::types::AttemptOutcome;
use docuquery_core::{
    CacheError, CacheLayer, ExtractionResult, ExtractionService, IngestionPipeline,
    MetadataRecord, MetadataStore, OcrService, PipelineConfig, PipelineMetrics, ResultCache,
    RetryPolicy, ServiceError, ServiceKind, StoreError, WriteOutcome,
};
use uuid::Uuid;

/// Page text long enough to pass the minimum character check.
pub fn long_text(label: &str) -> String {
    format!("{label}: the quick brown fox jumps over the lazy dog, twice over.")
}

#[derive(Clone)]
pub enum ExtractBehavior {
    Pages(Vec<ExtractedPage>),
    Fail(ServiceError),
    Sleep(Duration),
    /// Return these pages, waiting `Duration` on the first call only.
    SlowFirst(Vec<ExtractedPage>, Duration),
    /// Fail the first `n` calls, then return the pages.
    FailFirst(u32, Vec<ExtractedPage>),
}

pub struct FakeExtractor {
    behavior: ExtractBehavior,
    pub calls: AtomicU32,
}

impl FakeExtractor {
    pub fn new(behavior: ExtractBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    pub fn pages(pages: Vec<ExtractedPage>) -> Arc<Self> {
        Self::new(ExtractBehavior::Pages(pages))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionService for FakeExtractor {
    async fn extract(&self, _payload: &[u8], _mime_type: &str) -> ServiceResult<ExtractedDocument> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ExtractBehavior::Pages(pages) => Ok(ExtractedDocument {
                pages: pages.clone(),
                ..Default::default()
            }),
            ExtractBehavior::Fail(err) => Err(err.clone()),
            ExtractBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(ExtractedDocument::default())
            }
            ExtractBehavior::SlowFirst(pages, delay) => {
                if call == 0 {
                    tokio::time::sleep(*delay).await;
                }
                Ok(ExtractedDocument {
                    pages: pages.clone(),
                    ..Default::default()
                })
            }
            ExtractBehavior::FailFirst(failures, pages) => {
                if call < *failures {
                    Err(ServiceError::permanent(ServiceKind::Extraction, "corrupt upload"))
                } else {
                    Ok(ExtractedDocument {
                        pages: pages.clone(),
                        ..Default::default()
                    })
                }
            }
        }
    }
}

#[derive(Clone)]
pub enum OcrBehavior {
    /// Recognize every request with this confidence.
    Text(f32),
    /// Fail requests for these pages, recognize the rest.
    FailPages(Vec<u32>, ServiceError),
    Fail(ServiceError),
}

pub struct FakeOcr {
    behavior: OcrBehavior,
    pub calls: AtomicU32,
    pub pages_seen: std::sync::Mutex<Vec<Option<u32>>>,
}

impl FakeOcr {
    pub fn new(behavior: OcrBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            pages_seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(OcrBehavior::Text(0.92))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pages_seen(&self) -> Vec<Option<u32>> {
        let mut pages = self.pages_seen.lock().unwrap().clone();
        pages.sort();
        pages
    }
}

#[async_trait]
impl OcrService for FakeOcr {
    async fn recognize(&self, request: OcrRequest) -> ServiceResult<OcrPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages_seen.lock().unwrap().push(request.page);
        let recognized = || OcrPage {
            text: format!("ocr text of page {:?}", request.page),
            confidence: 0.92,
        };
        match &self.behavior {
            OcrBehavior::Text(confidence) => Ok(OcrPage {
                confidence: *confidence,
                ..recognized()
            }),
            OcrBehavior::FailPages(pages, err) => match request.page {
                Some(page) if pages.contains(&page) => Err(err.clone()),
                _ => Ok(recognized()),
            },
            OcrBehavior::Fail(err) => Err(err.clone()),
        }
    }
}

/// Cache backend that is never reachable.
pub struct UnreachableCache;

#[async_trait]
impl ResultCache for UnreachableCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

/// OCR service that records how many calls overlap.
pub struct TrackingOcr {
    delay: Duration,
    in_flight: AtomicU32,
    pub peak: AtomicU32,
    pub calls: AtomicU32,
}

impl TrackingOcr {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        })
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrService for TrackingOcr {
    async fn recognize(&self, request: OcrRequest) -> ServiceResult<OcrPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(OcrPage {
            text: format!("ocr text of page {:?}", request.page),
            confidence: 0.9,
        })
    }
}

/// Cache backend that accepts commands and never answers.
pub struct StalledCache;

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

/// Metadata store whose first `failures` writes fail.
pub struct FlakyStore {
    inner: InMemoryMetadataStore,
    failures: AtomicU32,
    pub writes: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryMetadataStore::new(),
            failures: AtomicU32::new(failures),
            writes: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn record_attempt(
        &self,
        document_id: &str,
        outcome: &AttemptOutcome,
    ) -> StoreResult<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::unavailable("connection reset"));
        }
        self.inner.record_attempt(document_id, outcome).await
    }

    async fn get_latest(&self, document_id: &str) -> StoreResult<Option<MetadataRecord>> {
        self.inner.get_latest(document_id).await
    }

    async fn load_result(&self, result_ref: Uuid) -> StoreResult<Option<ExtractionResult>> {
        self.inner.load_result(result_ref).await
    }

    async fn list_failed(&self, limit: usize) -> StoreResult<Vec<MetadataRecord>> {
        self.inner.list_failed(limit).await
    }

    async fn quarantine(&self, document_id: &str, reason: &str) -> StoreResult<bool> {
        self.inner.quarantine(document_id, reason).await
    }
}

pub fn transient_timeout(service: ServiceKind) -> ServiceError {
    ServiceError::timeout(service, Duration::from_secs(30))
}

/// Pipeline assembly with in-memory backends and zero-delay retries.
pub struct Harness {
    pub pipeline: Arc<IngestionPipeline>,
    pub metrics: Arc<PipelineMetrics>,
    pub cache: Arc<InMemoryResultCache>,
    pub store: Arc<InMemoryMetadataStore>,
    pub payloads: Arc<InMemoryPayloadStore>,
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig::default().with_retry(RetryPolicy::immediate())
}

pub fn harness(extractor: Arc<FakeExtractor>, ocr: Arc<FakeOcr>) -> Harness {
    harness_with(extractor, ocr, test_config())
}

pub fn harness_with(
    extractor: Arc<dyn ExtractionService>,
    ocr: Arc<dyn OcrService>,
    config: PipelineConfig,
) -> Harness {
    let metrics = Arc::new(PipelineMetrics::new());
    let cache = Arc::new(InMemoryResultCache::new());
    let store = Arc::new(InMemoryMetadataStore::new());
    let payloads = Arc::new(InMemoryPayloadStore::new());
    let pipeline = IngestionPipeline::new(
        extractor,
        ocr,
        CacheLayer::new(cache.clone(), metrics.clone(), Duration::from_secs(3600)),
        store.clone(),
        metrics.clone(),
        config,
    )
    .with_payload_store(payloads.clone());
    Harness {
        pipeline: Arc::new(pipeline),
        metrics,
        cache,
        store,
        payloads,
    }
}

/// Poll until `check` passes or two seconds elapse.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
