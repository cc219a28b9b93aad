//! docuquery-extractors - HTTP clients for text extraction and OCR.
//!
//! Implements [`ExtractionService`](docuquery_core::ExtractionService) against an Apache
//! Tika server and [`OcrService`](docuquery_core::OcrService) against an OCR endpoint
//! accepting multipart uploads. Extra OCR endpoints form an [`OcrChain`] tried in order.
//!
//! # Example
//!
//! ```ignore
//! use docuquery_extractors::ExtractorFactory;
//!
//! let extractor = ExtractorFactory::extraction(&config)?;
//! let ocr = ExtractorFactory::ocr(&config)?;
//! let doc = extractor.extract(&pdf_bytes, "application/pdf").await?;
//! ```

mod chain;
mod factory;
mod http;
mod ocr;
mod tika;

pub use chain::OcrChain;
pub use factory::ExtractorFactory;
pub use ocr::HttpOcrClient;
pub use tika::{page_confidence, parse_xhtml, TikaExtractionClient};
