//! docuquery-core - Core library for docuquery.
//!
//! This crate provides the types, service traits, ingestion pipeline and query service
//! of the docuquery document ingestion pipeline. Backends for the external services
//! live in `docuquery-extractors` and `docuquery-stores`.
//!
//! # Example
//!
//! ```ignore
//! use docuquery_core::{CacheLayer, Document, IngestionPipeline, PipelineConfig, PipelineMetrics};
//!
//! let metrics = Arc::new(PipelineMetrics::new());
//! let cache = CacheLayer::new(cache_backend, metrics.clone(), config.cache.ttl());
//! let pipeline = IngestionPipeline::new(extractor, ocr, cache, store, metrics, config.pipeline);
//!
//! let result = pipeline.ingest(Document::new(bytes, "application/pdf")).await?;
//! println!("{} pages via {}", result.page_count(), result.method);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod reprocess;
pub mod retry;
pub mod traits;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use cache::{CacheLayer, CacheScope, NoopCache};
pub use config::{DocuqueryConfig, PipelineConfig, ReprocessConfig, WorkerConfig};
pub use error::{
    CacheError, ConfigError, ErrorCode, ExtractionError, QueryError, ServiceError, ServiceKind,
    StoreError,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::IngestionPipeline;
pub use query::QueryService;
pub use reprocess::{ReprocessScheduler, ReprocessSweep, SweepReport};
pub use retry::RetryPolicy;
pub use traits::{ExtractionService, MetadataStore, OcrService, PayloadStore, ResultCache};
pub use types::{
    AttemptKind, AttemptOutcome, Document, DocumentKind, ExtractionMethod, ExtractionResult,
    ExtractionStatus, MetadataRecord, PageText, ProcessingAttempt, WriteOutcome,
};
pub use worker::IngestWorkerPool;
