//! OCR fallback chain.
//!
//! Requests go to each configured OCR service in order until one returns text. A blank
//! page from every service is returned as is; otherwise the chain fails with the first
//! retryable error seen, or the last error when none was retryable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use docuquery_core::error::{ServiceError, ServiceKind, ServiceResult};
use docuquery_core::traits::{OcrPage, OcrRequest, OcrService};

/// Ordered list of OCR services tried until one recognizes text.
pub struct OcrChain {
    services: Vec<Arc<dyn OcrService>>,
}

impl OcrChain {
    pub fn new(primary: Arc<dyn OcrService>) -> Self {
        Self {
            services: vec![primary],
        }
    }

    pub fn with_fallback(mut self, service: Arc<dyn OcrService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl OcrService for OcrChain {
    async fn recognize(&self, request: OcrRequest) -> ServiceResult<OcrPage> {
        let mut blank = None;
        let mut retryable: Option<ServiceError> = None;
        let mut last = None;

        for (position, service) in self.services.iter().enumerate() {
            match service.recognize(request.clone()).await {
                Ok(page) if !page.text.trim().is_empty() => {
                    if position > 0 {
                        info!(service = service.name(), page = ?request.page, "OCR fallback recognized text");
                    }
                    return Ok(page);
                }
                Ok(page) => {
                    debug!(service = service.name(), page = ?request.page, "Blank OCR result");
                    blank.get_or_insert(page);
                }
                Err(e) => {
                    warn!(service = service.name(), page = ?request.page, error = %e, "OCR service failed");
                    if e.is_retryable() && retryable.is_none() {
                        retryable = Some(e);
                    } else {
                        last = Some(e);
                    }
                }
            }
        }

        if let Some(page) = blank {
            return Ok(page);
        }
        Err(retryable
            .or(last)
            .unwrap_or_else(|| ServiceError::permanent(ServiceKind::Ocr, "no OCR service configured")))
    }

    fn name(&self) -> &'static str {
        "ocr-chain"
    }
}
