//! HTTP OCR client.
//!
//! Posts the document as multipart `file` (with an optional 1-based `page` field) and
//! expects `{"text": "...", "confidence": 0.93}` back. `confidence` may be omitted.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use docuquery_core::config::ServiceEndpointConfig;
use docuquery_core::error::{ConfigError, ServiceError, ServiceKind, ServiceResult};
use docuquery_core::traits::{OcrPage, OcrRequest, OcrService};

use crate::http::{status_error, transport_error};

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
    confidence: Option<f32>,
}

impl From<OcrResponse> for OcrPage {
    fn from(response: OcrResponse) -> Self {
        let confidence = response
            .confidence
            .unwrap_or(if response.text.trim().is_empty() { 0.0 } else { 1.0 });
        OcrPage {
            text: response.text,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// OCR client for a multipart upload endpoint.
pub struct HttpOcrClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    max_payload_bytes: usize,
}

impl HttpOcrClient {
    pub fn new(config: &ServiceEndpointConfig, max_payload_bytes: usize) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(&config.url)
            .map_err(|e| ConfigError::Invalid(format!("ocr url '{}': {e}", config.url)))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            timeout: config.timeout(),
            max_payload_bytes,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl OcrService for HttpOcrClient {
    #[instrument(skip(self, request), fields(document_id = %request.document_id, page = ?request.page))]
    async fn recognize(&self, request: OcrRequest) -> ServiceResult<OcrPage> {
        let size = request.payload.len();
        if size > self.max_payload_bytes {
            return Err(ServiceError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        // Every page request of a document shares one payload allocation.
        let body = Bytes::from_owner(request.payload.clone());
        let file = Part::stream_with_length(body, size as u64)
            .file_name(request.document_id.clone())
            .mime_str(&request.mime_type)
            .map_err(|e| ServiceError::permanent(ServiceKind::Ocr, format!("invalid MIME type: {e}")))?;
        let mut form = Form::new().part("file", file);
        if let Some(page) = request.page {
            form = form.text("page", page.to_string());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(ServiceKind::Ocr, e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(ServiceKind::Ocr, e, self.timeout))?;
        if !status.is_success() {
            return Err(status_error(
                ServiceKind::Ocr,
                status,
                &body,
                size,
                self.max_payload_bytes,
            ));
        }

        let parsed: OcrResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::permanent(ServiceKind::Ocr, format!("undecodable response: {e}"))
        })?;
        let page = OcrPage::from(parsed);
        debug!(chars = page.text.len(), confidence = page.confidence, "OCR complete");
        Ok(page)
    }

    fn name(&self) -> &'static str {
        "http-ocr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> OcrPage {
        OcrPage::from(serde_json::from_str::<OcrResponse>(json).unwrap())
    }

    #[test]
    fn test_missing_confidence_defaults() {
        assert_eq!(parse(r#"{"text": "hello"}"#).confidence, 1.0);
        assert_eq!(parse(r#"{"text": "  "}"#).confidence, 0.0);
        assert_eq!(parse(r#"{}"#).text, "");
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(parse(r#"{"text": "x", "confidence": 97.0}"#).confidence, 1.0);
        assert_eq!(parse(r#"{"text": "x", "confidence": 0.42}"#).confidence, 0.42);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = HttpOcrClient::new(&ServiceEndpointConfig::new("::nope", 60), 10);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }
}
