//! Factory for wiring the pipeline, worker pool and query service from configuration.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use docuquery_core::config::DocuqueryConfig;
use docuquery_core::error::{ConfigError, StoreError};
use docuquery_core::traits::{
    ExtractionService, MetadataStore, OcrService, PayloadStore, ResultCache,
};
use docuquery_core::{CacheLayer, IngestWorkerPool, IngestionPipeline, PipelineMetrics, QueryService};
use docuquery_extractors::ExtractorFactory;
use docuquery_stores::StoreFactory;

use crate::state::AppState;

/// Errors that prevent the server from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Metadata store unavailable at startup: {0}")]
    Store(#[from] StoreError),
}

/// Create the application state with real service clients and backends.
pub async fn create_state(config: &DocuqueryConfig) -> Result<AppState, StartupError> {
    let extractor = ExtractorFactory::extraction(config)?;
    let ocr = ExtractorFactory::ocr(config)?;
    let cache = StoreFactory::cache(&config.cache).await;
    let stores = StoreFactory::durable(&config.database).await?;

    info!(
        extraction = extractor.name(),
        ocr = ocr.name(),
        cache = cache.backend(),
        "Backends ready"
    );
    Ok(build_state(
        extractor,
        ocr,
        cache,
        stores.metadata,
        stores.payloads,
        config,
    ))
}

/// Assemble the application state from already-built collaborators.
pub fn build_state(
    extractor: Arc<dyn ExtractionService>,
    ocr: Arc<dyn OcrService>,
    cache: Arc<dyn ResultCache>,
    store: Arc<dyn MetadataStore>,
    payloads: Arc<dyn PayloadStore>,
    config: &DocuqueryConfig,
) -> AppState {
    let metrics = Arc::new(PipelineMetrics::new());
    let cache = CacheLayer::new(cache, metrics.clone(), config.cache.ttl())
        .with_timeout(config.cache.operation_timeout());

    let pipeline = IngestionPipeline::new(
        extractor,
        ocr,
        cache.clone(),
        store.clone(),
        metrics,
        config.pipeline.clone(),
    )
    .with_payload_store(payloads.clone());
    let workers = IngestWorkerPool::new(Arc::new(pipeline), config.workers.clone());
    let query = QueryService::new(cache, store);

    AppState::new(workers, query, payloads)
}
