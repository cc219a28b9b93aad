//! Periodic re-ingestion of failed documents.
//!
//! A sweep lists records whose latest attempt failed, re-submits their kept payloads to
//! the worker pool and quarantines documents that kept failing. [`ReprocessScheduler`]
//! runs sweeps on a fixed interval with tokio-cron-scheduler.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};

use crate::config::ReprocessConfig;
use crate::error::StoreResult;
use crate::metrics::PipelineMetrics;
use crate::traits::{MetadataStore, PayloadStore};
use crate::types::{Document, MetadataRecord};
use crate::worker::IngestWorkerPool;

/// Counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Failed records looked at.
    pub examined: usize,
    /// Documents submitted for another attempt.
    pub resubmitted: usize,
    /// Resubmitted documents that now have a result.
    pub recovered: usize,
    pub quarantined: usize,
    /// Skipped because a previous sweep is still running.
    pub skipped: bool,
}

/// One pass over failed documents.
pub struct ReprocessSweep {
    workers: IngestWorkerPool,
    store: Arc<dyn MetadataStore>,
    payloads: Arc<dyn PayloadStore>,
    metrics: Arc<PipelineMetrics>,
    config: ReprocessConfig,
    running: Mutex<()>,
}

impl ReprocessSweep {
    pub fn new(
        workers: IngestWorkerPool,
        payloads: Arc<dyn PayloadStore>,
        config: ReprocessConfig,
    ) -> Self {
        let pipeline = workers.pipeline();
        let store = pipeline.store().clone();
        let metrics = pipeline.metrics().clone();
        Self {
            workers,
            store,
            payloads,
            metrics,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReprocessConfig {
        &self.config
    }

    /// Run one sweep. Overlapping calls return immediately with `skipped` set.
    pub async fn run_once(&self) -> StoreResult<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Previous sweep still running");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let failed = self.store.list_failed(self.config.batch_size).await?;
        let mut report = SweepReport {
            examined: failed.len(),
            ..SweepReport::default()
        };

        let mut documents = Vec::new();
        for record in failed {
            if let Some(document) = self.triage(&record, &mut report).await {
                documents.push(document);
            }
        }

        report.resubmitted = documents.len();
        let handles: Vec<_> = documents
            .into_iter()
            .map(|document| {
                self.metrics.record_reprocessed();
                self.workers.submit(document)
            })
            .collect();
        report.recovered = join_all(handles)
            .await
            .into_iter()
            .filter(|outcome| matches!(outcome, Ok(Ok(_))))
            .count();

        if report.examined > 0 {
            info!(
                examined = report.examined,
                resubmitted = report.resubmitted,
                recovered = report.recovered,
                quarantined = report.quarantined,
                "Reprocessing sweep complete"
            );
        }
        Ok(report)
    }

    /// Decide what to do with one failed record; returns the document to resubmit.
    async fn triage(&self, record: &MetadataRecord, report: &mut SweepReport) -> Option<Document> {
        let failures = record.failures_since_success();
        if failures >= self.config.max_failed_attempts {
            self.quarantine(
                &record.document_id,
                &format!("Extraction failed after {failures} attempts"),
                report,
            )
            .await;
            return None;
        }

        match self.payloads.get(&record.document_id).await {
            Ok(Some(document)) => Some(document),
            Ok(None) => {
                self.quarantine(&record.document_id, "Payload no longer available", report)
                    .await;
                None
            }
            Err(e) => {
                warn!(document_id = %record.document_id, error = %e, "Could not load kept payload");
                None
            }
        }
    }

    async fn quarantine(&self, document_id: &str, reason: &str, report: &mut SweepReport) {
        match self.store.quarantine(document_id, reason).await {
            Ok(true) => {
                warn!(document_id, reason, "Document quarantined");
                self.metrics.record_quarantined();
                report.quarantined += 1;
                if let Err(e) = self.payloads.remove(document_id).await {
                    debug!(document_id, error = %e, "Could not drop quarantined payload");
                }
            }
            Ok(false) => debug!(document_id, "Record vanished before quarantine"),
            Err(e) => warn!(document_id, error = %e, "Quarantine failed"),
        }
    }
}

/// Runs [`ReprocessSweep::run_once`] on a fixed interval.
///
/// Call [`start`](Self::start) to begin periodic execution.
pub struct ReprocessScheduler {
    scheduler: JobScheduler,
    sweep: Arc<ReprocessSweep>,
}

impl ReprocessScheduler {
    pub async fn new(sweep: Arc<ReprocessSweep>) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler, sweep })
    }

    pub fn sweep(&self) -> &Arc<ReprocessSweep> {
        &self.sweep
    }

    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        let sweep = self.sweep.clone();
        let interval = sweep.config().interval();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let sweep = sweep.clone();
            Box::pin(async move {
                if let Err(e) = sweep.run_once().await {
                    error!(error = %e, code = e.code().as_str(), "Reprocessing sweep failed");
                }
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!(interval_secs = interval.as_secs(), "Reprocessing scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        info!("Shutting down reprocessing scheduler");
        self.scheduler.shutdown().await
    }
}
