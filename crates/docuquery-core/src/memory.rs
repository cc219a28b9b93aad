//! In-memory [`ResultCache`], [`MetadataStore`] and [`PayloadStore`] implementations.
//!
//! Used by tests and for running the server without Redis or PostgreSQL. Maps sit
//! behind `std::sync::RwLock`; no lock is held across an await point.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{CacheError, CacheResult, StoreError, StoreResult};
use crate::traits::{MetadataStore, PayloadStore, ResultCache};
use crate::types::{AttemptOutcome, Document, ExtractionResult, MetadataRecord, WriteOutcome};

/// In-memory cache honoring per-entry TTL.
#[derive(Default)]
pub struct InMemoryResultCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired or not.
    pub fn stored(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|(_, expires)| *expires > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))?;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))?;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// In-memory metadata store. All writes are serialized by a single lock.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<String, MetadataRecord>>,
    results: RwLock<HashMap<Uuid, ExtractionResult>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents with a record.
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of persisted extraction results.
    pub fn result_count(&self) -> usize {
        self.results.read().map(|r| r.len()).unwrap_or(0)
    }
}

fn poisoned() -> StoreError {
    StoreError::operation("metadata lock poisoned")
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn record_attempt(
        &self,
        document_id: &str,
        outcome: &AttemptOutcome,
    ) -> StoreResult<WriteOutcome> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if let Some(result) = &outcome.result {
            self.results
                .write()
                .map_err(|_| poisoned())?
                .insert(result.id, result.clone());
        }

        let record = records
            .entry(document_id.to_string())
            .or_insert_with(|| MetadataRecord::first_seen(document_id, outcome));
        Ok(record.apply(outcome))
    }

    async fn get_latest(&self, document_id: &str) -> StoreResult<Option<MetadataRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(document_id).cloned())
    }

    async fn load_result(&self, result_ref: Uuid) -> StoreResult<Option<ExtractionResult>> {
        let results = self.results.read().map_err(|_| poisoned())?;
        Ok(results.get(&result_ref).cloned())
    }

    async fn list_failed(&self, limit: usize) -> StoreResult<Vec<MetadataRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut failed: Vec<_> = records
            .values()
            .filter(|r| r.needs_reprocessing())
            .cloned()
            .collect();
        failed.sort_by_key(|r| r.updated_at);
        failed.truncate(limit);
        Ok(failed)
    }

    async fn quarantine(&self, document_id: &str, reason: &str) -> StoreResult<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(match records.get_mut(document_id) {
            Some(record) => {
                record.quarantined_at = Some(Utc::now());
                record.last_error = Some(reason.to_string());
                true
            }
            None => false,
        })
    }
}

/// In-memory payload store.
#[derive(Default)]
pub struct InMemoryPayloadStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, document: &Document) -> StoreResult<()> {
        self.documents
            .write()
            .map_err(|_| poisoned())?
            .insert(document.id().to_string(), document.clone());
        Ok(())
    }

    async fn get(&self, document_id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| poisoned())?
            .get(document_id)
            .cloned())
    }

    async fn remove(&self, document_id: &str) -> StoreResult<()> {
        self.documents.write().map_err(|_| poisoned())?.remove(document_id);
        Ok(())
    }
}
