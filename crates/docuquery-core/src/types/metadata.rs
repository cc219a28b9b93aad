//! Durable metadata records and processing attempt history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{Document, ExtractionMethod, ExtractionResult, ExtractionStatus};
use crate::error::ExtractionError;

/// What a processing attempt ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptKind {
    /// A new result was produced by the extraction/OCR services.
    Extracted,
    /// An existing cached result was returned.
    CacheServed,
    /// Extraction and OCR both failed.
    Failed,
    /// The per-ingestion deadline elapsed.
    TimedOut,
}

/// Code and message of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub code: String,
    pub message: String,
}

impl From<&ExtractionError> for ErrorSummary {
    fn from(err: &ExtractionError) -> Self {
        Self {
            code: err.code().as_str().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything the metadata store needs to record one attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub attempt_id: Uuid,
    pub kind: AttemptKind,
    pub status: ExtractionStatus,
    pub method: Option<ExtractionMethod>,
    /// New result to persist; present only for `Extracted`.
    pub result: Option<ExtractionResult>,
    /// Result returned from cache; present only for `CacheServed`.
    pub served_result: Option<Uuid>,
    pub error: Option<ErrorSummary>,
    pub mime_type: String,
    pub size_bytes: u64,
    /// When the attempt started. Orders concurrent writers.
    pub attempted_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AttemptOutcome {
    fn base(document: &Document, kind: AttemptKind, status: ExtractionStatus) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            kind,
            status,
            method: None,
            result: None,
            served_result: None,
            error: None,
            mime_type: document.mime_type().to_string(),
            size_bytes: document.size() as u64,
            attempted_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A fresh extraction. The attempt timestamp is the result's `extracted_at`.
    pub fn extracted(document: &Document, result: ExtractionResult) -> Self {
        let mut outcome = Self::base(document, AttemptKind::Extracted, result.status);
        outcome.method = Some(result.method);
        outcome.attempted_at = result.extracted_at;
        outcome.duration_ms = result.duration_ms;
        outcome.result = Some(result);
        outcome
    }

    /// A result served from cache without calling any service.
    pub fn cache_served(document: &Document, result: &ExtractionResult, started_at: DateTime<Utc>) -> Self {
        let mut outcome = Self::base(document, AttemptKind::CacheServed, result.status);
        outcome.method = Some(result.method);
        outcome.served_result = Some(result.id);
        outcome.attempted_at = started_at;
        outcome
    }

    /// A failure after all retries and fallbacks.
    pub fn failed(
        document: &Document,
        error: &ExtractionError,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let kind = match error {
            ExtractionError::DeadlineExceeded { .. } => AttemptKind::TimedOut,
            _ => AttemptKind::Failed,
        };
        let mut outcome = Self::base(document, kind, ExtractionStatus::Failed);
        outcome.error = Some(ErrorSummary::from(error));
        outcome.attempted_at = started_at;
        outcome.duration_ms = elapsed.as_millis() as u64;
        outcome
    }

    /// Whether this attempt competes for the latest-result pointer.
    pub fn moves_pointer(&self) -> bool {
        self.kind != AttemptKind::CacheServed
    }

    /// History row for this attempt.
    pub fn to_attempt(&self) -> ProcessingAttempt {
        ProcessingAttempt {
            attempt_id: self.attempt_id,
            kind: self.kind,
            status: self.status,
            method: self.method,
            result_ref: self
                .result
                .as_ref()
                .map(|r| r.id)
                .or(self.served_result),
            error_code: self.error.as_ref().map(|e| e.code.clone()),
            error: self.error.as_ref().map(|e| e.message.clone()),
            attempted_at: self.attempted_at,
            duration_ms: self.duration_ms,
        }
    }
}

/// One entry of a document's append-only processing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingAttempt {
    pub attempt_id: Uuid,
    pub kind: AttemptKind,
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ExtractionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Result of recording an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The record reflects this attempt.
    Applied,
    /// A newer attempt already won; only history was appended.
    Superseded,
}

/// Durable record for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub document_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Status of the latest attempt that moved the pointer.
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ExtractionMethod>,
    /// Storage reference of the winning result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<Uuid>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set when the document was taken out of automatic reprocessing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantined_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    /// Timestamp of the attempt that currently holds the pointer.
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: Vec<ProcessingAttempt>,
}

impl MetadataRecord {
    /// Empty record for a document seen for the first time.
    pub fn first_seen(document_id: impl Into<String>, outcome: &AttemptOutcome) -> Self {
        Self {
            document_id: document_id.into(),
            mime_type: outcome.mime_type.clone(),
            size_bytes: outcome.size_bytes,
            status: outcome.status,
            method: None,
            result_ref: None,
            attempt_count: 0,
            last_error: None,
            quarantined_at: None,
            first_seen_at: outcome.attempted_at,
            updated_at: outcome.attempted_at,
            attempts: Vec::new(),
        }
    }

    /// Fold an attempt into the record using last-writer-wins by attempt timestamp.
    ///
    /// The attempt is always appended to history. Only a pointer-moving attempt at least
    /// as new as the current holder changes status, method and result reference.
    ///
    /// Applying an attempt that is already in the history changes nothing, so a write
    /// replayed after a lost acknowledgement reports the same outcome again.
    pub fn apply(&mut self, outcome: &AttemptOutcome) -> WriteOutcome {
        // Compare stored timestamps only; a backend may have truncated their precision.
        if let Some(recorded) = self.attempts.iter().find(|a| a.attempt_id == outcome.attempt_id) {
            return if !outcome.moves_pointer() || recorded.attempted_at >= self.updated_at {
                WriteOutcome::Applied
            } else {
                WriteOutcome::Superseded
            };
        }

        let pointer_held = self.attempts.iter().any(|a| a.kind != AttemptKind::CacheServed);
        self.attempt_count += 1;
        self.attempts.push(outcome.to_attempt());
        if outcome.attempted_at < self.first_seen_at {
            self.first_seen_at = outcome.attempted_at;
        }

        if !outcome.moves_pointer() {
            return WriteOutcome::Applied;
        }
        if pointer_held && outcome.attempted_at < self.updated_at {
            return WriteOutcome::Superseded;
        }

        self.status = outcome.status;
        self.method = outcome.method;
        self.updated_at = outcome.attempted_at;
        match (&outcome.result, &outcome.error) {
            (Some(result), _) => {
                self.result_ref = Some(result.id);
                self.last_error = None;
                self.quarantined_at = None;
            }
            (None, Some(error)) => {
                self.last_error = Some(error.message.clone());
            }
            (None, None) => {}
        }

        WriteOutcome::Applied
    }

    pub fn has_attempt(&self, attempt_id: Uuid) -> bool {
        self.attempts.iter().any(|a| a.attempt_id == attempt_id)
    }

    /// Failed or timed-out attempts since the last fresh extraction.
    pub fn failures_since_success(&self) -> u32 {
        let last_success = self
            .attempts
            .iter()
            .filter(|a| a.kind == AttemptKind::Extracted)
            .map(|a| a.attempted_at)
            .max();
        self.attempts
            .iter()
            .filter(|a| matches!(a.kind, AttemptKind::Failed | AttemptKind::TimedOut))
            .filter(|a| last_success.map_or(true, |at| a.attempted_at > at))
            .count() as u32
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined_at.is_some()
    }

    /// Whether the periodic sweep should pick this document up.
    pub fn needs_reprocessing(&self) -> bool {
        self.status == ExtractionStatus::Failed && !self.is_quarantined()
    }

    /// Most recent attempt by timestamp.
    pub fn latest_attempt(&self) -> Option<&ProcessingAttempt> {
        self.attempts.iter().max_by_key(|a| a.attempted_at)
    }
}
