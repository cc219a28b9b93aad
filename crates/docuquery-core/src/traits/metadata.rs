//! Metadata store trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{AttemptOutcome, Document, ExtractionResult, MetadataRecord, WriteOutcome};

/// Durable store of per-document metadata records and extraction results.
///
/// Implementations serialize writes per document id and resolve concurrent writers
/// with [`MetadataRecord::apply`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Record one processing attempt, persisting its result if it carries one.
    async fn record_attempt(
        &self,
        document_id: &str,
        outcome: &AttemptOutcome,
    ) -> StoreResult<WriteOutcome>;

    /// Latest record for a document.
    async fn get_latest(&self, document_id: &str) -> StoreResult<Option<MetadataRecord>>;

    /// Load a persisted extraction result by its storage reference.
    async fn load_result(&self, result_ref: Uuid) -> StoreResult<Option<ExtractionResult>>;

    /// Records whose latest attempt failed and that are not quarantined, oldest first.
    async fn list_failed(&self, limit: usize) -> StoreResult<Vec<MetadataRecord>>;

    /// Take a document out of automatic reprocessing. Returns `false` for an unknown id.
    async fn quarantine(&self, document_id: &str, reason: &str) -> StoreResult<bool>;
}

/// Keeps the payloads of documents that may be ingested again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Store or replace the payload of a document.
    async fn put(&self, document: &Document) -> StoreResult<()>;

    async fn get(&self, document_id: &str) -> StoreResult<Option<Document>>;

    async fn remove(&self, document_id: &str) -> StoreResult<()>;
}
