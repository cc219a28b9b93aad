//! PostgreSQL metadata store using deadpool connection pooling.
//!
//! # Schema
//!
//! - `documents`: one row per document id holding the latest-result pointer
//! - `extraction_results`: immutable results as JSONB, keyed by result id
//! - `processing_attempts`: append-only attempt history, one row per attempt id
//! - `document_payloads`: payloads of failed documents awaiting another attempt
//!
//! Writes for one document are serialized with `SELECT .. FOR UPDATE` on its
//! `documents` row inside a transaction; the winner is decided by
//! [`MetadataRecord::apply`]. Replaying an attempt id already on record writes nothing.
//!
//! # Example
//!
//! ```ignore
//! use docuquery_stores::PostgresMetadataStore;
//!
//! let store = PostgresMetadataStore::new(&config.database).await?;
//! let record = store.get_latest(&document_id).await?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

use docuquery_core::config::DatabaseConfig;
use docuquery_core::error::{StoreError, StoreResult};
use docuquery_core::traits::{MetadataStore, PayloadStore};
use docuquery_core::types::{
    AttemptKind, AttemptOutcome, Document, ExtractionMethod, ExtractionResult, ExtractionStatus,
    MetadataRecord, ProcessingAttempt, WriteOutcome,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    document_id   TEXT PRIMARY KEY,
    mime_type     TEXT NOT NULL,
    size_bytes    BIGINT NOT NULL,
    status        TEXT NOT NULL,
    method        TEXT,
    result_ref    UUID,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error    TEXT,
    first_seen_at TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS extraction_results (
    id           UUID PRIMARY KEY,
    document_id  TEXT NOT NULL,
    result       JSONB NOT NULL,
    extracted_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS extraction_results_document_idx
    ON extraction_results (document_id);

CREATE TABLE IF NOT EXISTS processing_attempts (
    attempt_id   UUID PRIMARY KEY,
    document_id  TEXT NOT NULL REFERENCES documents (document_id),
    kind         TEXT NOT NULL,
    status       TEXT NOT NULL,
    method       TEXT,
    result_ref   UUID,
    error_code   TEXT,
    error        TEXT,
    attempted_at TIMESTAMPTZ NOT NULL,
    duration_ms  BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS processing_attempts_document_idx
    ON processing_attempts (document_id, attempted_at);

ALTER TABLE documents ADD COLUMN IF NOT EXISTS quarantined_at TIMESTAMPTZ;

CREATE INDEX IF NOT EXISTS documents_failed_idx
    ON documents (updated_at) WHERE status = 'failed' AND quarantined_at IS NULL;

CREATE TABLE IF NOT EXISTS document_payloads (
    document_id TEXT PRIMARY KEY,
    mime_type   TEXT NOT NULL,
    file_name   TEXT,
    payload     BYTEA NOT NULL,
    received_at TIMESTAMPTZ NOT NULL
);
"#;

const DOCUMENT_COLUMNS: &str = "document_id, mime_type, size_bytes, status, method, result_ref, \
     attempt_count, last_error, first_seen_at, updated_at, quarantined_at";

const SELECT_ATTEMPTS: &str = "SELECT attempt_id, kind, status, method, result_ref, error_code, error, \
     attempted_at, duration_ms FROM processing_attempts WHERE document_id = $1 \
     ORDER BY attempted_at, attempt_id";

/// PostgreSQL-backed [`MetadataStore`].
pub struct PostgresMetadataStore {
    pool: Pool,
    max_connections: usize,
}

impl PostgresMetadataStore {
    /// Create the pool and make sure the schema exists.
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        let pg_config = tokio_postgres::Config::from_str(&config.url)
            .map_err(|e| StoreError::operation(format!("Invalid PostgreSQL connection URL: {e}")))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(config.max_connections.max(1))
            .wait_timeout(Some(Duration::from_secs(30)))
            .create_timeout(Some(Duration::from_secs(10)))
            .recycle_timeout(Some(Duration::from_secs(10)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::operation(format!("Failed to create connection pool: {e}")))?;

        let store = Self {
            pool,
            max_connections: config.max_connections,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        let client = self.get_client().await?;
        client.batch_execute(SCHEMA).await.map_err(map_pg_error)?;
        info!("Metadata schema ready");
        Ok(())
    }

    async fn get_client(&self) -> StoreResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| {
            if e.to_string().contains("timeout") {
                StoreError::unavailable(format!(
                    "Connection pool exhausted (timeout waiting for connection, max {}): {e}",
                    self.max_connections
                ))
            } else {
                StoreError::unavailable(format!("Failed to get connection from pool: {e}"))
            }
        })
    }

    async fn load_record<C: GenericClient>(
        client: &C,
        document_id: &str,
        for_update: bool,
    ) -> StoreResult<Option<MetadataRecord>> {
        let mut query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = $1");
        if for_update {
            query.push_str(" FOR UPDATE");
        }

        let Some(row) = client
            .query_opt(query.as_str(), &[&document_id])
            .await
            .map_err(map_pg_error)?
        else {
            return Ok(None);
        };

        Self::with_attempts(client, &row).await.map(Some)
    }

    async fn with_attempts<C: GenericClient>(client: &C, row: &Row) -> StoreResult<MetadataRecord> {
        let document_id: String = row.try_get("document_id").map_err(map_pg_error)?;
        let attempts = client
            .query(SELECT_ATTEMPTS, &[&document_id])
            .await
            .map_err(map_pg_error)?
            .iter()
            .map(attempt_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        record_from_row(row, attempts)
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn record_attempt(
        &self,
        document_id: &str,
        outcome: &AttemptOutcome,
    ) -> StoreResult<WriteOutcome> {
        let mut client = self.get_client().await?;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        let seed = MetadataRecord::first_seen(document_id, outcome);
        tx.execute(
            "INSERT INTO documents (document_id, mime_type, size_bytes, status, first_seen_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (document_id) DO NOTHING",
            &[
                &seed.document_id,
                &seed.mime_type,
                &(seed.size_bytes as i64),
                &seed.status.to_string(),
                &seed.first_seen_at,
                &seed.updated_at,
            ],
        )
        .await
        .map_err(map_pg_error)?;

        let mut record = Self::load_record(&tx, document_id, true)
            .await?
            .ok_or_else(|| StoreError::Conflict {
                document_id: document_id.to_string(),
                message: "document row vanished inside transaction".to_string(),
            })?;
        if record.has_attempt(outcome.attempt_id) {
            let write = record.apply(outcome);
            tx.rollback().await.map_err(map_pg_error)?;
            debug!(document_id, attempt_id = %outcome.attempt_id, ?write, "Attempt already recorded");
            return Ok(write);
        }
        let write = record.apply(outcome);

        if let Some(result) = &outcome.result {
            let json = serde_json::to_value(result)?;
            tx.execute(
                "INSERT INTO extraction_results (id, document_id, result, extracted_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
                &[&result.id, &document_id, &json, &result.extracted_at],
            )
            .await
            .map_err(map_pg_error)?;
        }

        tx.execute(
            "UPDATE documents SET status = $2, method = $3, result_ref = $4, attempt_count = $5, \
             last_error = $6, first_seen_at = $7, updated_at = $8, quarantined_at = $9 \
             WHERE document_id = $1",
            &[
                &document_id,
                &record.status.to_string(),
                &record.method.map(|m| m.to_string()),
                &record.result_ref,
                &(record.attempt_count as i32),
                &record.last_error,
                &record.first_seen_at,
                &record.updated_at,
                &record.quarantined_at,
            ],
        )
        .await
        .map_err(map_pg_error)?;

        let attempt = outcome.to_attempt();
        tx.execute(
            "INSERT INTO processing_attempts (attempt_id, document_id, kind, status, method, result_ref, \
             error_code, error, attempted_at, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ON CONFLICT (attempt_id) DO NOTHING",
            &[
                &attempt.attempt_id,
                &document_id,
                &attempt.kind.to_string(),
                &attempt.status.to_string(),
                &attempt.method.map(|m| m.to_string()),
                &attempt.result_ref,
                &attempt.error_code,
                &attempt.error,
                &attempt.attempted_at,
                &(attempt.duration_ms as i64),
            ],
        )
        .await
        .map_err(map_pg_error)?;

        tx.commit().await.map_err(map_pg_error)?;
        debug!(document_id, kind = %attempt.kind, ?write, "Attempt recorded");
        Ok(write)
    }

    async fn get_latest(&self, document_id: &str) -> StoreResult<Option<MetadataRecord>> {
        let client = self.get_client().await?;
        Self::load_record(&client, document_id, false).await
    }

    async fn load_result(&self, result_ref: Uuid) -> StoreResult<Option<ExtractionResult>> {
        let client = self.get_client().await?;
        let row = client
            .query_opt(
                "SELECT result FROM extraction_results WHERE id = $1",
                &[&result_ref],
            )
            .await
            .map_err(map_pg_error)?;

        match row {
            Some(row) => {
                let json: serde_json::Value = row.try_get(0).map_err(map_pg_error)?;
                Ok(Some(serde_json::from_value(json)?))
            }
            None => Ok(None),
        }
    }

    async fn list_failed(&self, limit: usize) -> StoreResult<Vec<MetadataRecord>> {
        let client = self.get_client().await?;
        let rows = client
            .query(
                format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE status = $1 AND quarantined_at IS NULL \
                     ORDER BY updated_at LIMIT $2"
                )
                .as_str(),
                &[&ExtractionStatus::Failed.to_string(), &(limit as i64)],
            )
            .await
            .map_err(map_pg_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::with_attempts(&client, row).await?);
        }
        Ok(records)
    }

    async fn quarantine(&self, document_id: &str, reason: &str) -> StoreResult<bool> {
        let client = self.get_client().await?;
        let updated = client
            .execute(
                "UPDATE documents SET quarantined_at = now(), last_error = $2 WHERE document_id = $1",
                &[&document_id, &reason],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl PayloadStore for PostgresMetadataStore {
    async fn put(&self, document: &Document) -> StoreResult<()> {
        let client = self.get_client().await?;
        client
            .execute(
                "INSERT INTO document_payloads (document_id, mime_type, file_name, payload, received_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (document_id) DO UPDATE SET mime_type = EXCLUDED.mime_type, \
                 file_name = EXCLUDED.file_name, received_at = EXCLUDED.received_at",
                &[
                    &document.id(),
                    &document.mime_type(),
                    &document.file_name(),
                    &&document.payload()[..],
                    &document.received_at(),
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn get(&self, document_id: &str) -> StoreResult<Option<Document>> {
        let client = self.get_client().await?;
        let Some(row) = client
            .query_opt(
                "SELECT mime_type, file_name, payload, received_at FROM document_payloads \
                 WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(map_pg_error)?
        else {
            return Ok(None);
        };

        let mime_type: String = row.try_get("mime_type").map_err(map_pg_error)?;
        let file_name: Option<String> = row.try_get("file_name").map_err(map_pg_error)?;
        let payload: Vec<u8> = row.try_get("payload").map_err(map_pg_error)?;
        let received_at: DateTime<Utc> = row.try_get("received_at").map_err(map_pg_error)?;

        let mut document = Document::new(payload, mime_type).with_received_at(received_at);
        if let Some(file_name) = file_name {
            document = document.with_file_name(file_name);
        }
        if document.id() != document_id {
            return Err(StoreError::operation(format!(
                "stored payload for {document_id} hashes to {}",
                document.id()
            )));
        }
        Ok(Some(document))
    }

    async fn remove(&self, document_id: &str) -> StoreResult<()> {
        let client = self.get_client().await?;
        client
            .execute(
                "DELETE FROM document_payloads WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }
}

fn map_pg_error(e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE || *code == SqlState::T_R_DEADLOCK_DETECTED => {
            StoreError::Conflict {
                document_id: String::new(),
                message: e.to_string(),
            }
        }
        _ if e.is_closed() => StoreError::unavailable(e.to_string()),
        _ => StoreError::operation(e.to_string()),
    }
}

fn parse_column<T: FromStr>(row: &Row, column: &str) -> StoreResult<T> {
    let raw: String = row.try_get(column).map_err(map_pg_error)?;
    raw.parse()
        .map_err(|_| StoreError::operation(format!("unexpected {column} value '{raw}'")))
}

fn parse_optional<T: FromStr>(row: &Row, column: &str) -> StoreResult<Option<T>> {
    let raw: Option<String> = row.try_get(column).map_err(map_pg_error)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|_| StoreError::operation(format!("unexpected {column} value '{raw}'")))
    })
    .transpose()
}

fn record_from_row(row: &Row, attempts: Vec<ProcessingAttempt>) -> StoreResult<MetadataRecord> {
    let size_bytes: i64 = row.try_get("size_bytes").map_err(map_pg_error)?;
    let attempt_count: i32 = row.try_get("attempt_count").map_err(map_pg_error)?;
    let first_seen_at: DateTime<Utc> = row.try_get("first_seen_at").map_err(map_pg_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(map_pg_error)?;

    Ok(MetadataRecord {
        document_id: row.try_get("document_id").map_err(map_pg_error)?,
        mime_type: row.try_get("mime_type").map_err(map_pg_error)?,
        size_bytes: size_bytes.max(0) as u64,
        status: parse_column::<ExtractionStatus>(row, "status")?,
        method: parse_optional::<ExtractionMethod>(row, "method")?,
        result_ref: row.try_get("result_ref").map_err(map_pg_error)?,
        attempt_count: attempt_count.max(0) as u32,
        last_error: row.try_get("last_error").map_err(map_pg_error)?,
        first_seen_at,
        updated_at,
        quarantined_at: row.try_get("quarantined_at").map_err(map_pg_error)?,
        attempts,
    })
}

fn attempt_from_row(row: &Row) -> StoreResult<ProcessingAttempt> {
    let duration_ms: i64 = row.try_get("duration_ms").map_err(map_pg_error)?;
    Ok(ProcessingAttempt {
        attempt_id: row.try_get("attempt_id").map_err(map_pg_error)?,
        kind: parse_column::<AttemptKind>(row, "kind")?,
        status: parse_column::<ExtractionStatus>(row, "status")?,
        method: parse_optional::<ExtractionMethod>(row, "method")?,
        result_ref: row.try_get("result_ref").map_err(map_pg_error)?,
        error_code: row.try_get("error_code").map_err(map_pg_error)?,
        error: row.try_get("error").map_err(map_pg_error)?,
        attempted_at: row.try_get("attempted_at").map_err(map_pg_error)?,
        duration_ms: duration_ms.max(0) as u64,
    })
}
