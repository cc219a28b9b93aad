//! Integration tests for the query service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use docuquery_core::memory::InMemoryMetadataStore;
use docuquery_core::traits::ExtractedPage;
use docuquery_core::{
    CacheLayer, Document, ErrorCode, ExtractionStatus, IngestionPipeline, PipelineMetrics,
    QueryError, QueryService, ServiceKind,
};

#[tokio::test]
async fn test_query_reads_cache_first() {
    let extractor = FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("cached"), 0.9)]);
    let h = harness(extractor.clone(), FakeOcr::ok());
    let doc = Document::new(b"%PDF cached".to_vec(), "application/pdf");
    let ingested = h.pipeline.ingest(doc.clone()).await.unwrap();

    let query = QueryService::new(
        CacheLayer::new(h.cache.clone(), h.metrics.clone(), Duration::from_secs(60)),
        h.store.clone(),
    );
    let result = query.query(doc.id()).await.unwrap();

    assert_eq!(result, ingested);
    assert_eq!(extractor.calls(), 1);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.query_cache_hits, 1);
    assert_eq!(snapshot.cache_hits, 0);
}

#[tokio::test]
async fn test_query_falls_back_to_store_and_backfills_cache() {
    let h = harness(
        FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("durable"), 0.9)]),
        FakeOcr::ok(),
    );
    let doc = Document::new(b"%PDF durable".to_vec(), "application/pdf");
    let ingested = h.pipeline.ingest(doc.clone()).await.unwrap();

    // A cold cache, as after a cache restart.
    let cold = Arc::new(docuquery_core::memory::InMemoryResultCache::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let query = QueryService::new(
        CacheLayer::new(cold.clone(), metrics.clone(), Duration::from_secs(60)),
        h.store.clone(),
    );

    let result = query.query(doc.id()).await.unwrap();
    assert_eq!(result.id, ingested.id);
    assert_eq!(cold.len(), 1);

    let again = query.query(doc.id()).await.unwrap();
    assert_eq!(again.id, ingested.id);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.query_cache_hits, 1);
    assert_eq!(snapshot.query_cache_misses, 1);
}

#[tokio::test]
async fn test_query_never_ingests() {
    let extractor = FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("x"), 0.9)]);
    let h = harness(extractor.clone(), FakeOcr::ok());
    let query = QueryService::new(
        CacheLayer::new(h.cache.clone(), h.metrics.clone(), Duration::from_secs(60)),
        h.store.clone(),
    );

    let err = query.query("unknown-document").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn test_failed_document_is_not_found_but_has_history() {
    let metrics = Arc::new(PipelineMetrics::new());
    let store = Arc::new(InMemoryMetadataStore::new());
    let cache = CacheLayer::new(
        Arc::new(docuquery_core::NoopCache),
        metrics.clone(),
        Duration::from_secs(60),
    );
    let pipeline = IngestionPipeline::new(
        FakeExtractor::new(ExtractBehavior::Fail(transient_timeout(ServiceKind::Extraction))),
        FakeOcr::new(OcrBehavior::Fail(transient_timeout(ServiceKind::Ocr))),
        cache.clone(),
        store.clone(),
        metrics,
        test_config(),
    );
    let doc = Document::new(b"%PDF broken".to_vec(), "application/pdf");
    assert!(pipeline.ingest(doc.clone()).await.is_err());

    let query = QueryService::new(cache, store);
    assert!(matches!(query.query(doc.id()).await, Err(QueryError::NotFound(_))));

    let history = query.history(doc.id()).await.unwrap();
    assert_eq!(history.status, ExtractionStatus::Failed);
    assert_eq!(history.attempts.len(), 1);
    assert_eq!(history.attempts[0].error_code.as_deref(), Some("SVC_003"));
}
