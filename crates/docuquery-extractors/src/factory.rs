//! Factory for creating extraction and OCR clients.

use std::sync::Arc;

use docuquery_core::config::DocuqueryConfig;
use docuquery_core::error::ConfigError;
use docuquery_core::traits::{ExtractionService, OcrService};

use crate::{HttpOcrClient, OcrChain, TikaExtractionClient};

/// Factory for creating service clients from configuration.
pub struct ExtractorFactory;

impl ExtractorFactory {
    /// Create the text extraction client.
    pub fn extraction(config: &DocuqueryConfig) -> Result<Arc<dyn ExtractionService>, ConfigError> {
        Ok(Arc::new(TikaExtractionClient::new(
            &config.extraction,
            config.pipeline.max_payload_bytes,
            config.pipeline.min_page_chars,
        )?))
    }

    /// Create the OCR client, chained with the fallback endpoints when any are configured.
    pub fn ocr(config: &DocuqueryConfig) -> Result<Arc<dyn OcrService>, ConfigError> {
        let limit = config.pipeline.max_payload_bytes;
        let primary = Arc::new(HttpOcrClient::new(&config.ocr, limit)?);
        if config.ocr_fallbacks.is_empty() {
            return Ok(primary);
        }

        let mut chain = OcrChain::new(primary);
        for fallback in &config.ocr_fallbacks {
            chain = chain.with_fallback(Arc::new(HttpOcrClient::new(fallback, limit)?));
        }
        Ok(Arc::new(chain))
    }
}
