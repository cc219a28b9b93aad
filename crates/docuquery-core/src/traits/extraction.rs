//! Extraction and OCR service traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;

/// One page as returned by the extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
    /// Service-reported or derived confidence in [0.0, 1.0].
    pub confidence: f32,
    /// The page carries no text layer (scanned image).
    pub image_only: bool,
}

impl ExtractedPage {
    pub fn new(number: u32, text: impl Into<String>, confidence: f32) -> Self {
        let text = text.into();
        let image_only = text.trim().is_empty();
        Self {
            number,
            text,
            confidence: confidence.clamp(0.0, 1.0),
            image_only,
        }
    }
}

/// Structured output of the extraction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
    /// Service-provided metadata (title, author, producer...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Text-layer extraction service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extract per-page text from a document payload.
    async fn extract(&self, payload: &[u8], mime_type: &str) -> ServiceResult<ExtractedDocument>;

    /// Service name for logging.
    fn name(&self) -> &'static str {
        "extraction"
    }
}

/// A single OCR request for a whole document or one page of it.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document_id: String,
    pub payload: Arc<[u8]>,
    pub mime_type: String,
    /// 1-based page to recognize; `None` recognizes the whole document.
    pub page: Option<u32>,
}

/// Recognized text of one OCR request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    pub text: String,
    pub confidence: f32,
}

/// Optical character recognition service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Recognize text for the requested document or page.
    async fn recognize(&self, request: OcrRequest) -> ServiceResult<OcrPage>;

    fn name(&self) -> &'static str {
        "ocr"
    }
}
