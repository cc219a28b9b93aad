//! Input documents and content hashing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute the content hash used as document identifier and cache key.
///
/// Lowercase hex SHA-256 of the raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Normalize a MIME type: lowercase, parameters stripped.
pub fn normalize_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Coarse document category derived from its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Image,
    Text,
    Unknown,
}

impl DocumentKind {
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = normalize_mime(mime_type);
        match mime.as_str() {
            "application/pdf" => DocumentKind::Pdf,
            m if m.starts_with("image/") => DocumentKind::Image,
            m if m.starts_with("text/") => DocumentKind::Text,
            _ => DocumentKind::Unknown,
        }
    }

    /// Image documents carry no extractable text layer.
    pub fn is_image(&self) -> bool {
        matches!(self, DocumentKind::Image)
    }
}

/// An immutable document submitted for ingestion.
///
/// The identifier is the content hash of the payload, so two documents with the same
/// bytes share cache entries and metadata records.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    payload: Arc<[u8]>,
    mime_type: String,
    file_name: Option<String>,
    declared_hash: Option<String>,
    received_at: DateTime<Utc>,
}

impl Document {
    /// Create a document from raw bytes and a declared MIME type.
    pub fn new(payload: impl Into<Arc<[u8]>>, mime_type: impl AsRef<str>) -> Self {
        let payload = payload.into();
        Self {
            id: content_hash(&payload),
            payload,
            mime_type: normalize_mime(mime_type.as_ref()),
            file_name: None,
            declared_hash: None,
            received_at: Utc::now(),
        }
    }

    /// Attach the original file name (informational only).
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Attach a hash computed by the uploader, checked at acceptance.
    pub fn with_declared_hash(mut self, hash: impl Into<String>) -> Self {
        self.declared_hash = Some(hash.into().to_ascii_lowercase());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Content hash of the payload.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Arc<[u8]> {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn declared_hash(&self) -> Option<&str> {
        self.declared_hash.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::from_mime(&self.mime_type)
    }

    /// Returns the declared hash when it disagrees with the computed one.
    pub fn integrity_mismatch(&self) -> Option<&str> {
        self.declared_hash
            .as_deref()
            .filter(|declared| *declared != self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_document_id_is_content_hash() {
        let doc = Document::new(b"hello".to_vec(), "application/pdf");
        assert_eq!(doc.id(), content_hash(b"hello"));
        assert_eq!(doc.size(), 5);
    }

    #[test]
    fn test_mime_normalization() {
        let doc = Document::new(b"x".to_vec(), "Text/Plain; charset=utf-8");
        assert_eq!(doc.mime_type(), "text/plain");
        assert_eq!(doc.kind(), DocumentKind::Text);
    }

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(DocumentKind::from_mime("application/pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_mime("image/png"), DocumentKind::Image);
        assert_eq!(DocumentKind::from_mime("video/mp4"), DocumentKind::Unknown);
        assert!(DocumentKind::Image.is_image());
    }

    #[test]
    fn test_integrity_mismatch() {
        let doc = Document::new(b"abc".to_vec(), "application/pdf");
        let ok = doc.clone().with_declared_hash(content_hash(b"abc").to_uppercase());
        assert!(ok.integrity_mismatch().is_none());

        let bad = doc.with_declared_hash("deadbeef");
        assert_eq!(bad.integrity_mismatch(), Some("deadbeef"));
    }
}
