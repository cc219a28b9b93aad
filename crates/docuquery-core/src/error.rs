//! Error types for docuquery operations.
//!
//! Each layer has its own error enum so that callers can tell apart what must be
//! surfaced (`ExtractionError`, `QueryError`) from what is absorbed internally
//! (`CacheError` always degrades, `ServiceError::Transient` is retried). All of them map
//! onto a stable [`ErrorCode`] that is used for metrics labels and persisted attempt
//! history.

use std::time::Duration;

use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Result type for external service calls (extraction, OCR).
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for cache backends.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for metadata store backends.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for the ingestion pipeline.
pub type IngestResult<T> = Result<T, ExtractionError>;

/// Which external service produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceKind {
    Extraction,
    Ocr,
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    // Acceptance (VAL_xxx)
    PayloadTooLarge,
    UnsupportedType,
    IntegrityMismatch,
    EmptyPayload,
    BatchLimitExceeded,

    // External services (SVC_xxx)
    TransientService,
    PermanentService,
    ServiceTimeout,
    DeadlineExceeded,

    // Cache (CACHE_xxx)
    CacheUnavailable,
    CacheCorrupted,

    // Metadata store (META_xxx)
    MetadataWriteConflict,
    MetadataUnavailable,
    MetadataOperationFailed,

    // Query (QRY_xxx)
    NotFound,

    Configuration,
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PayloadTooLarge => "VAL_001",
            ErrorCode::UnsupportedType => "VAL_002",
            ErrorCode::IntegrityMismatch => "VAL_003",
            ErrorCode::EmptyPayload => "VAL_004",
            ErrorCode::BatchLimitExceeded => "VAL_005",
            ErrorCode::TransientService => "SVC_001",
            ErrorCode::PermanentService => "SVC_002",
            ErrorCode::ServiceTimeout => "SVC_003",
            ErrorCode::DeadlineExceeded => "SVC_004",
            ErrorCode::CacheUnavailable => "CACHE_001",
            ErrorCode::CacheCorrupted => "CACHE_002",
            ErrorCode::MetadataWriteConflict => "META_001",
            ErrorCode::MetadataUnavailable => "META_002",
            ErrorCode::MetadataOperationFailed => "META_003",
            ErrorCode::NotFound => "QRY_001",
            ErrorCode::Configuration => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }

    /// Snake-case label used for metric series.
    pub fn label(&self) -> &'static str {
        self.into()
    }
}

/// Errors returned by the extraction and OCR clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Payload exceeds the configured maximum. Never retried.
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Transient failure (5xx, connection reset). Retried per policy.
    #[error("Transient {service} error: {message}")]
    Transient { service: ServiceKind, message: String },

    /// Permanent failure (malformed payload, 4xx). Never retried.
    #[error("Permanent {service} error: {message}")]
    Permanent { service: ServiceKind, message: String },

    /// The call did not complete within its timeout. Retried per policy.
    #[error("{service} call timed out after {elapsed:?}")]
    Timeout { service: ServiceKind, elapsed: Duration },
}

impl ServiceError {
    pub fn transient(service: ServiceKind, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    pub fn permanent(service: ServiceKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            service,
            message: message.into(),
        }
    }

    pub fn timeout(service: ServiceKind, elapsed: Duration) -> Self {
        Self::Timeout { service, elapsed }
    }

    /// Whether the retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Transient { .. } => ErrorCode::TransientService,
            Self::Permanent { .. } => ErrorCode::PermanentService,
            Self::Timeout { .. } => ErrorCode::ServiceTimeout,
        }
    }
}

/// Errors from a cache backend. Never surfaced to pipeline callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend could not be reached or rejected the command.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::CacheUnavailable,
            Self::Serialization(_) => ErrorCode::CacheCorrupted,
        }
    }
}

/// Errors from a metadata store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached (pool exhausted, connection refused).
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    /// Concurrent write could not be serialized.
    #[error("Metadata write conflict for document '{document_id}': {message}")]
    Conflict { document_id: String, message: String },

    /// Query or statement failed.
    #[error("Metadata store operation failed: {0}")]
    Operation(String),

    /// Stored result could not be encoded or decoded.
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::MetadataUnavailable,
            Self::Conflict { .. } => ErrorCode::MetadataWriteConflict,
            Self::Operation(_) | Self::Serialization(_) => ErrorCode::MetadataOperationFailed,
        }
    }
}

/// Errors surfaced by the ingestion pipeline.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Document rejected at acceptance; nothing was called.
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// MIME type is not in the accepted set.
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// Declared content hash does not match the payload.
    #[error("Content hash mismatch: declared {declared}, computed {computed}")]
    IntegrityMismatch { declared: String, computed: String },

    /// Payload has no bytes.
    #[error("Empty payload")]
    EmptyPayload,

    /// Extraction and OCR both failed; carries the original cause.
    #[error("Extraction failed for document '{document_id}': {cause}")]
    Failed {
        document_id: String,
        #[source]
        cause: ServiceError,
        ocr_cause: Option<ServiceError>,
    },

    /// The per-ingestion deadline elapsed before processing finished.
    #[error("Deadline of {deadline:?} exceeded while ingesting document '{document_id}'")]
    DeadlineExceeded {
        document_id: String,
        deadline: Duration,
    },

    /// Document was past the batch size limit and was not processed.
    #[error("Document '{document_id}' exceeds the batch limit of {limit}")]
    BatchLimitExceeded { document_id: String, limit: usize },

    /// Worker task panicked or the pool was closed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::UnsupportedType(_) => ErrorCode::UnsupportedType,
            Self::IntegrityMismatch { .. } => ErrorCode::IntegrityMismatch,
            Self::EmptyPayload => ErrorCode::EmptyPayload,
            Self::Failed { ocr_cause, cause, .. } => {
                ocr_cause.as_ref().map(ServiceError::code).unwrap_or(cause.code())
            }
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::BatchLimitExceeded { .. } => ErrorCode::BatchLimitExceeded,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the document was turned away before being accepted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. }
                | Self::UnsupportedType(_)
                | Self::IntegrityMismatch { .. }
                | Self::EmptyPayload
                | Self::BatchLimitExceeded { .. }
        )
    }
}

/// Errors surfaced by the query service.
#[derive(Error, Debug)]
pub enum QueryError {
    /// No completed extraction exists for the document.
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Store(e) => e.code(),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::PayloadTooLarge.as_str(), "VAL_001");
        assert_eq!(ErrorCode::CacheUnavailable.as_str(), "CACHE_001");
        assert_eq!(ErrorCode::NotFound.as_str(), "QRY_001");
    }

    #[test]
    fn test_error_code_label() {
        assert_eq!(ErrorCode::TransientService.label(), "transient_service");
        assert_eq!(ErrorCode::MetadataWriteConflict.label(), "metadata_write_conflict");
    }

    #[test]
    fn test_service_error_retryable() {
        assert!(ServiceError::transient(ServiceKind::Ocr, "502").is_retryable());
        assert!(ServiceError::timeout(ServiceKind::Extraction, Duration::from_secs(30)).is_retryable());
        assert!(!ServiceError::permanent(ServiceKind::Extraction, "bad pdf").is_retryable());
        assert!(!ServiceError::PayloadTooLarge { size: 2, limit: 1 }.is_retryable());
    }

    #[test]
    fn test_failed_code_prefers_ocr_cause() {
        let err = ExtractionError::Failed {
            document_id: "abc".to_string(),
            cause: ServiceError::permanent(ServiceKind::Extraction, "bad"),
            ocr_cause: Some(ServiceError::timeout(ServiceKind::Ocr, Duration::from_secs(60))),
        };
        assert_eq!(err.code(), ErrorCode::ServiceTimeout);
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_rejections() {
        assert!(ExtractionError::EmptyPayload.is_rejection());
        assert!(ExtractionError::UnsupportedType("video/mp4".into()).is_rejection());
        assert!(!ExtractionError::DeadlineExceeded {
            document_id: "x".into(),
            deadline: Duration::from_secs(1)
        }
        .is_rejection());
    }
}
