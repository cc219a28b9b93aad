//! Extraction results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// How the text of a result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExtractionMethod {
    /// Text layer only.
    Direct,
    /// Every page recognized by OCR.
    Ocr,
    /// Direct text with OCR for some pages.
    Hybrid,
}

/// Completion state of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExtractionStatus {
    Complete,
    Partial,
    Failed,
}

/// Origin of a single page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    Direct,
    Ocr,
}

/// Text of one page with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
    /// Reliability estimate in [0.0, 1.0].
    pub confidence: f32,
    pub source: PageSource,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>, confidence: f32, source: PageSource) -> Self {
        Self {
            number,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// The outcome of extracting one document version.
///
/// Written once and never edited; a newer extraction produces a new result with a new
/// `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Durable storage reference.
    pub id: Uuid,
    /// Content hash of the source document.
    pub document_id: String,
    /// All page texts joined by newlines.
    pub text: String,
    pub pages: Vec<PageText>,
    pub method: ExtractionMethod,
    pub status: ExtractionStatus,
    pub duration_ms: u64,
    /// Start of the attempt that produced this result.
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    /// Assemble a result from ordered pages.
    pub fn from_pages(
        document_id: impl Into<String>,
        mut pages: Vec<PageText>,
        method: ExtractionMethod,
        status: ExtractionStatus,
        duration_ms: u64,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        pages.sort_by_key(|p| p.number);
        let text = pages
            .iter()
            .map(|p| p.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            id: Uuid::new_v4(),
            document_id: document_id.into(),
            text,
            pages,
            method,
            status,
            duration_ms,
            extracted_at,
        }
    }

    /// Per-page confidence scores in page order.
    pub fn confidences(&self) -> Vec<f32> {
        self.pages.iter().map(|p| p.confidence).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.status == ExtractionStatus::Complete
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}
