//! Server state management.

use std::sync::Arc;

use docuquery_core::config::ReprocessConfig;
use docuquery_core::{IngestWorkerPool, PayloadStore, PipelineMetrics, QueryService, ReprocessSweep};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub workers: IngestWorkerPool,
    pub query: QueryService,
    pub metrics: Arc<PipelineMetrics>,
    pub payloads: Arc<dyn PayloadStore>,
}

impl AppState {
    pub fn new(
        workers: IngestWorkerPool,
        query: QueryService,
        payloads: Arc<dyn PayloadStore>,
    ) -> Self {
        let metrics = workers.pipeline().metrics().clone();
        Self {
            workers,
            query,
            metrics,
            payloads,
        }
    }

    /// Sweep that re-ingests failed documents through this state's worker pool.
    pub fn reprocess_sweep(&self, config: ReprocessConfig) -> ReprocessSweep {
        ReprocessSweep::new(self.workers.clone(), self.payloads.clone(), config)
    }

    /// Largest request body the upload route accepts: a full batch of maximum-size
    /// files plus room for multipart framing.
    pub fn upload_body_limit(&self) -> usize {
        let per_file = self.workers.pipeline().config().max_payload_bytes;
        per_file
            .saturating_mul(self.workers.max_batch_size().max(1))
            .saturating_add(64 * 1024)
    }
}
