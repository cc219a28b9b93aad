//! Integration tests for the ingest worker pool.

mod common;

use common::*;
use docuquery_core::traits::ExtractedPage;
use docuquery_core::{Document, ExtractionError, IngestWorkerPool, WorkerConfig};

fn docs(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| Document::new(format!("%PDF document {i}").into_bytes(), "application/pdf"))
        .collect()
}

#[tokio::test]
async fn test_batch_preserves_order() {
    let extractor = FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("batch"), 0.9)]);
    let h = harness(extractor.clone(), FakeOcr::ok());
    let pool = IngestWorkerPool::new(h.pipeline.clone(), WorkerConfig::default().with_max_concurrent(2));

    let input = docs(5);
    let ids: Vec<String> = input.iter().map(|d| d.id().to_string()).collect();
    let results = pool.ingest_batch(input).await;

    assert_eq!(results.len(), 5);
    for (result, id) in results.iter().zip(&ids) {
        assert_eq!(&result.as_ref().unwrap().document_id, id);
    }
    assert_eq!(extractor.calls(), 5);
    assert_eq!(h.store.record_count(), 5);
    assert_eq!(pool.available_workers(), 2);
}

#[tokio::test]
async fn test_batch_over_limit_is_rejected_per_document() {
    let extractor = FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("limit"), 0.9)]);
    let h = harness(extractor.clone(), FakeOcr::ok());
    let pool = IngestWorkerPool::new(h.pipeline.clone(), WorkerConfig::default());

    let results = pool.ingest_batch(docs(12)).await;

    assert_eq!(results.len(), 12);
    assert!(results[..10].iter().all(Result::is_ok));
    assert!(results[10..]
        .iter()
        .all(|r| matches!(r, Err(ExtractionError::BatchLimitExceeded { limit: 10, .. }))));
    assert_eq!(extractor.calls(), 10);
}

#[tokio::test]
async fn test_submit_runs_in_background() {
    let h = harness(
        FakeExtractor::pages(vec![ExtractedPage::new(1, long_text("submit"), 0.9)]),
        FakeOcr::ok(),
    );
    let pool = IngestWorkerPool::new(h.pipeline.clone(), WorkerConfig::default().with_max_concurrent(1));

    let handle = pool.submit(docs(1).remove(0));
    let result = handle.await.unwrap();
    tokio_test::assert_ok!(result);
}
