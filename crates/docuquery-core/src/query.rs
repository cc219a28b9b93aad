//! Read path: cache first, metadata store second. Never triggers ingestion.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::cache::CacheLayer;
use crate::error::QueryError;
use crate::traits::MetadataStore;
use crate::types::{ExtractionResult, MetadataRecord};

/// Query access to extraction results and processing history.
#[derive(Clone)]
pub struct QueryService {
    cache: CacheLayer,
    store: Arc<dyn MetadataStore>,
}

impl QueryService {
    /// Lookups through `cache` are counted as query traffic.
    pub fn new(cache: CacheLayer, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            cache: cache.for_queries(),
            store,
        }
    }

    /// Latest extraction result for a document.
    ///
    /// A durable hit is written back to the cache.
    #[instrument(skip(self))]
    pub async fn query(&self, document_id: &str) -> Result<ExtractionResult, QueryError> {
        if let Some(result) = self.cache.get(document_id).await {
            return Ok(result);
        }

        let record = self
            .store
            .get_latest(document_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(document_id.to_string()))?;

        let Some(result_ref) = record.result_ref else {
            debug!(status = %record.status, "Record has no stored result");
            return Err(QueryError::NotFound(document_id.to_string()));
        };

        let result = self.store.load_result(result_ref).await?.ok_or_else(|| {
            warn!(%result_ref, "Record points at a missing result");
            QueryError::NotFound(document_id.to_string())
        })?;

        self.cache.set(document_id, &result).await;
        Ok(result)
    }

    /// Metadata record with the full attempt history.
    #[instrument(skip(self))]
    pub async fn history(&self, document_id: &str) -> Result<MetadataRecord, QueryError> {
        self.store
            .get_latest(document_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(document_id.to_string()))
    }
}
