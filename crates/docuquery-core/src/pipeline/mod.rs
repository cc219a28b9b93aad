//! Ingestion pipeline.
//!
//! Orchestrates one document from acceptance to a persisted [`ExtractionResult`]:
//!
//! 1. Acceptance gate (size, MIME type, declared hash, non-empty). No external calls.
//! 2. Cache lookup by content hash.
//! 3. Text-layer extraction, then OCR for the pages that need it. Images go straight to
//!    OCR; an extraction failure falls back to whole-document OCR.
//! 4. Metadata write, then cache write. The cache only ever receives the result the
//!    metadata store chose as the winner. A failed metadata write is retried in the
//!    background and never fails the ingestion.
//!
//! When a payload store is attached, the payloads of failed documents are kept so the
//! reprocessing sweep can ingest them again.

mod merge;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheLayer;
use crate::config::PipelineConfig;
use crate::error::{ExtractionError, IngestResult, ServiceError, ServiceKind, ServiceResult, StoreError};
use crate::metrics::PipelineMetrics;
use crate::traits::{
    ExtractedDocument, ExtractionService, MetadataStore, OcrPage, OcrRequest, OcrService,
    PayloadStore,
};
use crate::types::{AttemptOutcome, Document, ExtractionResult, PageSource, PageText, WriteOutcome};

use merge::{merge_page, method_for, needs_ocr, status_for};

/// The document ingestion pipeline.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct IngestionPipeline {
    extractor: Arc<dyn ExtractionService>,
    ocr: Arc<dyn OcrService>,
    cache: CacheLayer,
    store: Arc<dyn MetadataStore>,
    payloads: Option<Arc<dyn PayloadStore>>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn ExtractionService>,
        ocr: Arc<dyn OcrService>,
        cache: CacheLayer,
        store: Arc<dyn MetadataStore>,
        metrics: Arc<PipelineMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            ocr,
            cache,
            store,
            payloads: None,
            metrics,
            config,
        }
    }

    /// Keep payloads of failed documents in `payloads` for later reprocessing.
    pub fn with_payload_store(mut self, payloads: Arc<dyn PayloadStore>) -> Self {
        self.payloads = Some(payloads);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn payload_store(&self) -> Option<&Arc<dyn PayloadStore>> {
        self.payloads.as_ref()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Ingest a document and return its extraction result.
    #[instrument(skip(self, document), fields(document_id = %document.id(), mime_type = %document.mime_type(), size = document.size()))]
    pub async fn ingest(&self, document: Document) -> IngestResult<ExtractionResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        self.metrics.record_attempt();

        if let Err(e) = self.accept(&document) {
            warn!(code = e.code().as_str(), error = %e, "Document rejected");
            self.metrics.record_failure(e.code());
            return Err(e);
        }

        if let Some(cached) = self.cache.get(document.id()).await {
            info!(result_id = %cached.id, "Served from cache");
            self.record(
                document.id(),
                AttemptOutcome::cache_served(&document, &cached, started_at),
            )
            .await;
            self.metrics.record_success(started.elapsed());
            return Ok(cached);
        }

        match self.extract(&document, started_at, started).await {
            Ok(result) => {
                info!(
                    result_id = %result.id,
                    method = %result.method,
                    status = %result.status,
                    pages = result.page_count(),
                    duration_ms = result.duration_ms,
                    "Document ingested"
                );
                let result = self.commit(&document, result).await;
                self.release_payload(document.id()).await;
                self.metrics.record_success(started.elapsed());
                Ok(result)
            }
            Err(e) => {
                warn!(code = e.code().as_str(), error = %e, "Ingestion failed");
                self.metrics.record_failure(e.code());
                self.record(
                    document.id(),
                    AttemptOutcome::failed(&document, &e, started_at, started.elapsed()),
                )
                .await;
                self.retain_payload(&document).await;
                Err(e)
            }
        }
    }

    /// Ingest with an overall deadline.
    ///
    /// When the deadline elapses, in-flight calls are dropped, a `timed_out` attempt is
    /// recorded and [`ExtractionError::DeadlineExceeded`] is returned.
    #[instrument(skip(self, document), fields(document_id = %document.id()))]
    pub async fn ingest_with_deadline(
        &self,
        document: Document,
        deadline: Duration,
    ) -> IngestResult<ExtractionResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        let handle = document.clone();

        match tokio::time::timeout(deadline, self.ingest(document)).await {
            Ok(result) => result,
            Err(_) => {
                let err = ExtractionError::DeadlineExceeded {
                    document_id: handle.id().to_string(),
                    deadline,
                };
                warn!(error = %err, "Ingestion deadline exceeded");
                self.metrics.record_failure(err.code());
                self.record(
                    handle.id(),
                    AttemptOutcome::failed(&handle, &err, started_at, started.elapsed()),
                )
                .await;
                self.retain_payload(&handle).await;
                Err(err)
            }
        }
    }

    fn accept(&self, document: &Document) -> IngestResult<()> {
        if document.size() > self.config.max_payload_bytes {
            return Err(ExtractionError::PayloadTooLarge {
                size: document.size(),
                limit: self.config.max_payload_bytes,
            });
        }
        if !self.config.accepts_mime(document.mime_type()) {
            return Err(ExtractionError::UnsupportedType(document.mime_type().to_string()));
        }
        if let Some(declared) = document.integrity_mismatch() {
            return Err(ExtractionError::IntegrityMismatch {
                declared: declared.to_string(),
                computed: document.id().to_string(),
            });
        }
        if document.size() == 0 {
            return Err(ExtractionError::EmptyPayload);
        }
        Ok(())
    }

    async fn extract(
        &self,
        document: &Document,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> IngestResult<ExtractionResult> {
        let (pages, ocr_failures) = if document.kind().is_image() {
            debug!("Image document, skipping text extraction");
            let page = self.call_ocr(document, None).await.map_err(|cause| {
                ExtractionError::Failed {
                    document_id: document.id().to_string(),
                    cause,
                    ocr_cause: None,
                }
            })?;
            (vec![ocr_page(1, page)], 0)
        } else {
            match self.call_extraction(document).await {
                Ok(extracted) => self.ocr_low_pages(document, extracted).await?,
                Err(cause) => {
                    warn!(error = %cause, "Extraction failed, falling back to whole-document OCR");
                    match self.call_ocr(document, None).await {
                        Ok(page) => (vec![ocr_page(1, page)], 0),
                        Err(ocr_cause) => {
                            return Err(ExtractionError::Failed {
                                document_id: document.id().to_string(),
                                cause,
                                ocr_cause: Some(ocr_cause),
                            })
                        }
                    }
                }
            }
        };

        let method = method_for(&pages);
        let status = status_for(&pages, ocr_failures);
        Ok(ExtractionResult::from_pages(
            document.id(),
            pages,
            method,
            status,
            started.elapsed().as_millis() as u64,
            started_at,
        ))
    }

    /// OCR the pages that need it and merge them with the direct text.
    ///
    /// Returns the merged pages and the number of failed OCR calls.
    async fn ocr_low_pages(
        &self,
        document: &Document,
        extracted: ExtractedDocument,
    ) -> IngestResult<(Vec<PageText>, usize)> {
        let (low, high): (Vec<_>, Vec<_>) = extracted
            .pages
            .into_iter()
            .partition(|page| needs_ocr(page, &self.config));
        debug!(low_pages = low.len(), high_pages = high.len(), "Extraction complete");

        let mut pages: Vec<PageText> = high
            .into_iter()
            .map(|p| PageText::new(p.number, p.text, p.confidence, PageSource::Direct))
            .collect();
        if low.is_empty() {
            return Ok((pages, 0));
        }

        // `buffered` keeps page order and caps the calls in flight.
        let calls: Vec<_> = low
            .iter()
            .map(|page| self.call_ocr(document, Some(page.number)))
            .collect();
        let outcomes: Vec<_> = stream::iter(calls)
        .buffered(self.config.ocr_concurrency.max(1))
        .collect()
        .await;

        let mut failures = Vec::new();
        for (page, outcome) in low.into_iter().zip(outcomes) {
            match outcome {
                Ok(ocr) => pages.push(merge_page(page, Some(ocr))),
                Err(e) => {
                    warn!(page = page.number, error = %e, "OCR failed for page, keeping direct text");
                    failures.push(e);
                    pages.push(merge_page(page, None));
                }
            }
        }

        // Nothing usable from either stage.
        if pages.iter().all(PageText::is_blank) {
            if let Some(ocr_cause) = failures.into_iter().next() {
                return Err(ExtractionError::Failed {
                    document_id: document.id().to_string(),
                    cause: ServiceError::permanent(
                        ServiceKind::Extraction,
                        "document has no text layer",
                    ),
                    ocr_cause: Some(ocr_cause),
                });
            }
            return Ok((pages, 0));
        }

        let failure_count = failures.len();
        Ok((pages, failure_count))
    }

    async fn call_extraction(&self, document: &Document) -> ServiceResult<ExtractedDocument> {
        let extracted = self
            .config
            .retry
            .run("extraction", || async {
                let started = Instant::now();
                let result = self
                    .extractor
                    .extract(document.payload(), document.mime_type())
                    .await;
                self.metrics.extraction_latency.observe(started.elapsed());
                result
            })
            .await?;

        if extracted.pages.is_empty() {
            return Err(ServiceError::permanent(
                ServiceKind::Extraction,
                "extraction returned no pages",
            ));
        }
        Ok(extracted)
    }

    async fn call_ocr(&self, document: &Document, page: Option<u32>) -> ServiceResult<OcrPage> {
        self.config
            .retry
            .run("ocr", || async {
                let request = OcrRequest {
                    document_id: document.id().to_string(),
                    payload: document.payload().clone(),
                    mime_type: document.mime_type().to_string(),
                    page,
                };
                let started = Instant::now();
                let result = self.ocr.recognize(request).await;
                self.metrics.ocr_latency.observe(started.elapsed());
                result
            })
            .await
    }

    /// Record a fresh result, then cache whichever result the store kept.
    ///
    /// Returns the winning result. When a newer attempt already holds the pointer, that
    /// attempt's result is returned and cached instead of `result`.
    async fn commit(&self, document: &Document, result: ExtractionResult) -> ExtractionResult {
        let outcome = AttemptOutcome::extracted(document, result.clone());
        match self.record(document.id(), outcome).await {
            Some(write) => publish(&self.store, &self.cache, document.id(), write, result).await,
            // Still pending in the background; the retry publishes once the store decides.
            None => result,
        }
    }

    /// Write an attempt to the metadata store, retrying in the background on failure.
    ///
    /// Returns `None` when the write was handed to the background retry.
    async fn record(&self, document_id: &str, outcome: AttemptOutcome) -> Option<WriteOutcome> {
        match self.store.record_attempt(document_id, &outcome).await {
            Ok(write) => {
                debug!(kind = %outcome.kind, ?write, "Metadata recorded");
                Some(write)
            }
            Err(e) => {
                warn!(error = %e, code = e.code().as_str(), "Metadata write failed, retrying in background");
                self.metrics.record_metadata_retry();
                self.spawn_metadata_retry(document_id.to_string(), outcome);
                None
            }
        }
    }

    fn spawn_metadata_retry(&self, document_id: String, outcome: AttemptOutcome) {
        let store = self.store.clone();
        let cache = self.cache.clone();
        let retry = self.config.retry.clone();

        tokio::spawn(async move {
            let written = retry
                .run_when(
                    "metadata_write",
                    || store.record_attempt(&document_id, &outcome),
                    |_: &StoreError| true,
                )
                .await;
            match written {
                Ok(write) => {
                    info!(document_id = %document_id, ?write, "Background metadata write succeeded");
                    if let Some(result) = outcome.result {
                        publish(&store, &cache, &document_id, write, result).await;
                    }
                }
                Err(e) => tracing::error!(
                    document_id = %document_id,
                    error = %e,
                    "Background metadata write gave up"
                ),
            }
        });
    }

    async fn retain_payload(&self, document: &Document) {
        let Some(payloads) = &self.payloads else {
            return;
        };
        if let Err(e) = payloads.put(document).await {
            warn!(error = %e, "Could not keep payload for reprocessing");
        }
    }

    async fn release_payload(&self, document_id: &str) {
        let Some(payloads) = &self.payloads else {
            return;
        };
        if let Err(e) = payloads.remove(document_id).await {
            debug!(error = %e, "Could not drop kept payload");
        }
    }
}

/// Cache the result the metadata store settled on and return it.
///
/// `Applied` caches `result`. `Superseded` loads the record's current result and caches
/// that; if it cannot be loaded nothing is cached and `result` is returned.
async fn publish(
    store: &Arc<dyn MetadataStore>,
    cache: &CacheLayer,
    document_id: &str,
    write: WriteOutcome,
    result: ExtractionResult,
) -> ExtractionResult {
    if write == WriteOutcome::Applied {
        cache.set(document_id, &result).await;
        return result;
    }

    match winning_result(store, document_id).await {
        Ok(Some(winner)) => {
            debug!(winner = %winner.id, discarded = %result.id, "Newer result holds the pointer");
            cache.set(document_id, &winner).await;
            winner
        }
        Ok(None) => result,
        Err(e) => {
            warn!(error = %e, "Could not load winning result, leaving cache untouched");
            result
        }
    }
}

async fn winning_result(
    store: &Arc<dyn MetadataStore>,
    document_id: &str,
) -> Result<Option<ExtractionResult>, StoreError> {
    let Some(result_ref) = store
        .get_latest(document_id)
        .await?
        .and_then(|record| record.result_ref)
    else {
        return Ok(None);
    };
    store.load_result(result_ref).await
}

fn ocr_page(number: u32, page: OcrPage) -> PageText {
    PageText::new(number, page.text, page.confidence, PageSource::Ocr)
}
