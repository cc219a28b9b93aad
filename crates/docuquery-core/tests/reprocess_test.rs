//! Integration tests for the failed-document sweep.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use docuquery_core::traits::ExtractedPage;
use docuquery_core::{
    Document, ExtractionStatus, IngestWorkerPool, MetadataStore, PayloadStore, ReprocessConfig,
    ReprocessScheduler, ReprocessSweep, ServiceError, ServiceKind, WorkerConfig,
};

fn pdf(bytes: &[u8]) -> Document {
    Document::new(bytes.to_vec(), "application/pdf")
}

fn blank_ocr() -> Arc<FakeOcr> {
    FakeOcr::new(OcrBehavior::Fail(ServiceError::permanent(
        ServiceKind::Ocr,
        "blank scan",
    )))
}

fn sweep(h: &Harness, config: ReprocessConfig) -> ReprocessSweep {
    let workers = IngestWorkerPool::new(
        h.pipeline.clone(),
        WorkerConfig::default().with_max_concurrent(2),
    );
    ReprocessSweep::new(workers, h.payloads.clone(), config)
}

#[tokio::test]
async fn test_sweep_recovers_failed_document() {
    let pages = vec![ExtractedPage::new(1, long_text("recovered"), 0.95)];
    let h = harness(
        FakeExtractor::new(ExtractBehavior::FailFirst(1, pages)),
        blank_ocr(),
    );
    let doc = pdf(b"%PDF flaky upstream");
    assert!(h.pipeline.ingest(doc.clone()).await.is_err());

    let report = sweep(&h, ReprocessConfig::default()).run_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.quarantined, 0);

    let record = h.store.get_latest(doc.id()).await.unwrap().unwrap();
    assert_eq!(record.status, ExtractionStatus::Complete);
    assert!(h.payloads.is_empty());
    assert_eq!(h.metrics.snapshot().reprocessed, 1);
}

#[tokio::test]
async fn test_sweep_quarantines_after_repeated_failures() {
    let h = harness(
        FakeExtractor::new(ExtractBehavior::Fail(ServiceError::permanent(
            ServiceKind::Extraction,
            "corrupt upload",
        ))),
        blank_ocr(),
    );
    let doc = pdf(b"%PDF never parses");
    for _ in 0..3 {
        assert!(h.pipeline.ingest(doc.clone()).await.is_err());
    }

    let report = sweep(&h, ReprocessConfig::default()).run_once().await.unwrap();

    assert_eq!(report.quarantined, 1);
    assert_eq!(report.resubmitted, 0);
    let record = h.store.get_latest(doc.id()).await.unwrap().unwrap();
    assert!(record.is_quarantined());
    assert!(h.payloads.get(doc.id()).await.unwrap().is_none());
    assert_eq!(h.metrics.snapshot().quarantined, 1);

    // Quarantined records are not picked up again.
    let again = sweep(&h, ReprocessConfig::default()).run_once().await.unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn test_sweep_retries_below_the_failure_limit() {
    let h = harness(
        FakeExtractor::new(ExtractBehavior::Fail(ServiceError::permanent(
            ServiceKind::Extraction,
            "corrupt upload",
        ))),
        blank_ocr(),
    );
    let doc = pdf(b"%PDF still broken");
    assert!(h.pipeline.ingest(doc.clone()).await.is_err());

    let report = sweep(&h, ReprocessConfig::default()).run_once().await.unwrap();

    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.recovered, 0);
    let record = h.store.get_latest(doc.id()).await.unwrap().unwrap();
    assert_eq!(record.failures_since_success(), 2);
    assert!(!record.is_quarantined());
    assert!(h.payloads.get(doc.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweep_quarantines_when_payload_is_gone() {
    let h = harness(
        FakeExtractor::new(ExtractBehavior::Fail(ServiceError::permanent(
            ServiceKind::Extraction,
            "corrupt upload",
        ))),
        blank_ocr(),
    );
    let doc = pdf(b"%PDF lost payload");
    assert!(h.pipeline.ingest(doc.clone()).await.is_err());
    h.payloads.remove(doc.id()).await.unwrap();

    let report = sweep(&h, ReprocessConfig::default()).run_once().await.unwrap();

    assert_eq!(report.quarantined, 1);
    assert_eq!(report.resubmitted, 0);
}

#[tokio::test]
async fn test_sweep_respects_batch_size() {
    let h = harness(
        FakeExtractor::new(ExtractBehavior::Fail(ServiceError::permanent(
            ServiceKind::Extraction,
            "corrupt upload",
        ))),
        blank_ocr(),
    );
    for i in 0..5 {
        let doc = pdf(format!("%PDF broken {i}").as_bytes());
        assert!(h.pipeline.ingest(doc).await.is_err());
    }

    let config = ReprocessConfig {
        batch_size: 2,
        ..ReprocessConfig::default()
    };
    let report = sweep(&h, config).run_once().await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.resubmitted, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_runs_sweeps() {
    let pages = vec![ExtractedPage::new(1, long_text("scheduled"), 0.95)];
    let h = harness(
        FakeExtractor::new(ExtractBehavior::FailFirst(1, pages)),
        blank_ocr(),
    );
    let doc = pdf(b"%PDF picked up later");
    assert!(h.pipeline.ingest(doc.clone()).await.is_err());

    let config = ReprocessConfig {
        interval_secs: 1,
        ..ReprocessConfig::default()
    };
    let mut scheduler = ReprocessScheduler::new(Arc::new(sweep(&h, config)))
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    let recovered = tokio::time::timeout(Duration::from_secs(10), async {
        while !h.payloads.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    scheduler.shutdown().await.unwrap();

    assert!(recovered.is_ok(), "sweep never ran");
    let record = h.store.get_latest(doc.id()).await.unwrap().unwrap();
    assert_eq!(record.status, ExtractionStatus::Complete);
}
