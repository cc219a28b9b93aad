//! Apache Tika extraction client.
//!
//! Documents are sent with `PUT {url}/tika` and `Accept: text/html`. Tika answers with
//! XHTML where each page of a paginated format is wrapped in `<div class="page">`. The
//! response is read with a streaming XML reader and split into pages on those elements.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use docuquery_core::config::ServiceEndpointConfig;
use docuquery_core::error::{ConfigError, ServiceError, ServiceKind, ServiceResult};
use docuquery_core::traits::{ExtractedDocument, ExtractedPage, ExtractionService};

use crate::http::{status_error, transport_error};

/// Extraction client for an Apache Tika server.
pub struct TikaExtractionClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    max_payload_bytes: usize,
    min_page_chars: usize,
}

impl TikaExtractionClient {
    /// Create a client for the Tika server at `config.url`.
    pub fn new(
        config: &ServiceEndpointConfig,
        max_payload_bytes: usize,
        min_page_chars: usize,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.url)
            .map_err(|e| ConfigError::Invalid(format!("extraction url '{}': {e}", config.url)))?;
        let endpoint = base
            .join("tika")
            .map_err(|e| ConfigError::Invalid(format!("extraction url '{}': {e}", config.url)))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            timeout: config.timeout(),
            max_payload_bytes,
            min_page_chars,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ExtractionService for TikaExtractionClient {
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    async fn extract(&self, payload: &[u8], mime_type: &str) -> ServiceResult<ExtractedDocument> {
        if payload.len() > self.max_payload_bytes {
            return Err(ServiceError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }

        let response = self
            .client
            .put(self.endpoint.clone())
            .header(CONTENT_TYPE, mime_type)
            .header(ACCEPT, "text/html")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| transport_error(ServiceKind::Extraction, e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(ServiceKind::Extraction, e, self.timeout))?;
        if !status.is_success() {
            return Err(status_error(
                ServiceKind::Extraction,
                status,
                &body,
                payload.len(),
                self.max_payload_bytes,
            ));
        }

        let document = parse_xhtml(&body, self.min_page_chars)?;
        debug!(pages = document.pages.len(), "Tika extraction complete");
        Ok(document)
    }

    fn name(&self) -> &'static str {
        "tika"
    }
}

/// Parse a Tika XHTML response into pages and metadata.
///
/// A response without page elements is one page holding the whole body. Malformed
/// markup is a permanent extraction error.
pub fn parse_xhtml(xhtml: &str, min_page_chars: usize) -> ServiceResult<ExtractedDocument> {
    let mut reader = Reader::from_str(xhtml);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut pages = PageCollector::default();
    let mut metadata = HashMap::new();
    let mut in_head = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            ServiceError::permanent(
                ServiceKind::Extraction,
                format!("malformed XHTML at byte {}: {e}", reader.buffer_position()),
            )
        })?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"head" => in_head = true,
                b"div" if is_page(&e) => pages.open(),
                b"div" => pages.nest(),
                b"br" => pages.push("\n"),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"meta" => {
                    if let Some((name, content)) = meta_entry(&e) {
                        metadata.insert(name, content);
                    }
                }
                b"div" if is_page(&e) => {
                    pages.open();
                    pages.close();
                }
                b"br" => pages.push("\n"),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"head" => in_head = false,
                b"div" => pages.close(),
                b"p" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"li" | b"tr" => {
                    pages.push("\n")
                }
                _ => {}
            },
            Event::Text(t) if !in_head => {
                let text = t
                    .unescape_with(html_entity)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned().into());
                pages.push(&text);
            }
            Event::CData(c) if !in_head => pages.push(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
    }

    let pages = pages
        .finish()
        .into_iter()
        .zip(1u32..)
        .map(|(raw, number)| {
            let text = normalize_text(&raw);
            let confidence = page_confidence(&text, min_page_chars);
            ExtractedPage::new(number, text, confidence)
        })
        .collect();

    Ok(ExtractedDocument { pages, metadata })
}

/// Accumulates body text, switching buffers at page elements.
#[derive(Default)]
struct PageCollector {
    /// Text outside any page element.
    loose: String,
    pages: Vec<String>,
    current: Option<String>,
    /// Open `div` elements inside the current page, the page itself included.
    depth: usize,
}

impl PageCollector {
    fn open(&mut self) {
        if let Some(page) = self.current.take() {
            self.pages.push(page);
        }
        self.current = Some(String::new());
        self.depth = 1;
    }

    fn nest(&mut self) {
        if self.current.is_some() {
            self.depth += 1;
        }
    }

    fn close(&mut self) {
        if self.current.is_some() && self.depth <= 1 {
            self.depth = 0;
            self.pages.extend(self.current.take());
            return;
        }
        self.depth = self.depth.saturating_sub(1);
        self.push("\n");
    }

    fn push(&mut self, text: &str) {
        match self.current.as_mut() {
            Some(page) => page.push_str(text),
            // Trailing text after the last page belongs to it.
            None => match self.pages.last_mut() {
                Some(page) => page.push_str(text),
                None => self.loose.push_str(text),
            },
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.pages.extend(self.current.take());
        if self.pages.is_empty() {
            vec![self.loose]
        } else {
            self.pages
        }
    }
}

fn is_page(element: &BytesStart<'_>) -> bool {
    matches!(
        element.try_get_attribute("class"),
        Ok(Some(class)) if class
            .value
            .split(|b| b.is_ascii_whitespace())
            .any(|c| c == b"page")
    )
}

fn meta_entry(element: &BytesStart<'_>) -> Option<(String, String)> {
    let mut name = None;
    let mut content = None;
    for attr in element.attributes().flatten() {
        let value = attr.unescape_value().ok().map(Cow::into_owned);
        match attr.key.as_ref() {
            b"name" => name = value,
            b"content" => content = value,
            _ => {}
        }
    }
    Some((name?, content.unwrap_or_default()))
}

fn html_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some(" "),
        "shy" => Some(""),
        _ => None,
    }
}

/// Text-quality confidence of a page.
///
/// Ratio of printable characters scaled down for pages shorter than `min_page_chars`.
pub fn page_confidence(text: &str, min_page_chars: usize) -> f32 {
    let text = text.trim();
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }

    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .count();
    let ratio = printable as f32 / total as f32;
    let length_factor = if min_page_chars == 0 {
        1.0
    } else {
        (total as f32 / min_page_chars as f32).min(1.0)
    };
    ratio * length_factor
}

fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
