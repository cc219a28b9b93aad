//! Bounded worker pool for concurrent ingestion.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::{ExtractionError, IngestResult};
use crate::pipeline::IngestionPipeline;
use crate::types::{Document, ExtractionResult};

/// Runs ingestions on a bounded number of permits, each under the pipeline deadline.
#[derive(Clone)]
pub struct IngestWorkerPool {
    pipeline: Arc<IngestionPipeline>,
    permits: Arc<Semaphore>,
    config: WorkerConfig,
}

impl IngestWorkerPool {
    pub fn new(pipeline: Arc<IngestionPipeline>, config: WorkerConfig) -> Self {
        let workers = config.max_concurrent.max(1);
        info!(workers, max_batch_size = config.max_batch_size, "Starting ingest worker pool");
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(workers)),
            config,
        }
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Permits not currently held by an ingestion.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    fn deadline(&self) -> Duration {
        self.pipeline.config().deadline()
    }

    /// Ingest one document once a worker is free.
    pub async fn ingest(&self, document: Document) -> IngestResult<ExtractionResult> {
        run(self.pipeline.clone(), self.permits.clone(), document, self.deadline()).await
    }

    /// Spawn an ingestion and return its handle.
    pub fn submit(&self, document: Document) -> JoinHandle<IngestResult<ExtractionResult>> {
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();
        let deadline = self.deadline();
        tokio::spawn(run(pipeline, permits, document, deadline))
    }

    /// Ingest a batch concurrently, one result per input in input order.
    ///
    /// Documents beyond `max_batch_size` are not processed and get an error entry.
    pub async fn ingest_batch(&self, documents: Vec<Document>) -> Vec<IngestResult<ExtractionResult>> {
        let limit = self.config.max_batch_size;
        let handles: Vec<_> = documents
            .into_iter()
            .enumerate()
            .map(|(idx, doc)| {
                if idx < limit {
                    Ok(self.submit(doc))
                } else {
                    Err(doc)
                }
            })
            .collect();

        join_all(handles.into_iter().map(|entry| async move {
            match entry {
                Ok(handle) => handle
                    .await
                    .unwrap_or_else(|e| Err(ExtractionError::Internal(format!("ingest task failed: {e}")))),
                Err(doc) => Err(ExtractionError::BatchLimitExceeded {
                    document_id: doc.id().to_string(),
                    limit,
                }),
            }
        }))
        .await
    }
}

async fn run(
    pipeline: Arc<IngestionPipeline>,
    permits: Arc<Semaphore>,
    document: Document,
    deadline: Duration,
) -> IngestResult<ExtractionResult> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| ExtractionError::Internal("worker pool closed".into()))?;
    debug!(document_id = %document.id(), "Worker acquired");
    pipeline.ingest_with_deadline(document, deadline).await
}
