//! Page selection and merging of direct and OCR text.

use crate::config::PipelineConfig;
use crate::traits::{ExtractedPage, OcrPage};
use crate::types::{ExtractionMethod, ExtractionStatus, PageSource, PageText};

/// Whether a directly extracted page must be re-run through OCR.
pub(crate) fn needs_ocr(page: &ExtractedPage, config: &PipelineConfig) -> bool {
    page.image_only
        || page.confidence < config.confidence_threshold
        || page.text.trim().chars().count() < config.min_page_chars
}

/// Combine a direct page with the OCR outcome for the same page.
///
/// OCR text replaces the direct text when it is non-blank. A failed or blank OCR keeps
/// whatever the text layer had.
pub(crate) fn merge_page(direct: ExtractedPage, ocr: Option<OcrPage>) -> PageText {
    match ocr {
        Some(ocr) if !ocr.text.trim().is_empty() => {
            PageText::new(direct.number, ocr.text, ocr.confidence, PageSource::Ocr)
        }
        _ => PageText::new(direct.number, direct.text, direct.confidence, PageSource::Direct),
    }
}

/// `ocr` if every page came from OCR, `direct` if none did, `hybrid` otherwise.
pub(crate) fn method_for(pages: &[PageText]) -> ExtractionMethod {
    let ocr_pages = pages.iter().filter(|p| p.source == PageSource::Ocr).count();
    match ocr_pages {
        0 => ExtractionMethod::Direct,
        n if n == pages.len() => ExtractionMethod::Ocr,
        _ => ExtractionMethod::Hybrid,
    }
}

/// `partial` when an OCR call failed or a page ended up without text.
pub(crate) fn status_for(pages: &[PageText], ocr_failures: usize) -> ExtractionStatus {
    if ocr_failures > 0 || pages.is_empty() || pages.iter().any(PageText::is_blank) {
        ExtractionStatus::Partial
    } else {
        ExtractionStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_min_page_chars(5)
    }

    #[test]
    fn test_needs_ocr() {
        let config = config();
        assert!(!needs_ocr(&ExtractedPage::new(1, "plenty of text", 0.9), &config));
        assert!(needs_ocr(&ExtractedPage::new(1, "plenty of text", 0.3), &config));
        assert!(needs_ocr(&ExtractedPage::new(1, "abc", 0.9), &config));
        assert!(needs_ocr(&ExtractedPage::new(1, "   ", 1.0), &config));
    }

    #[test]
    fn test_merge_prefers_nonblank_ocr() {
        let direct = ExtractedPage::new(2, "garbled", 0.2);
        let merged = merge_page(
            direct.clone(),
            Some(OcrPage {
                text: "clean text".into(),
                confidence: 0.95,
            }),
        );
        assert_eq!(merged.source, PageSource::Ocr);
        assert_eq!(merged.text, "clean text");

        let kept = merge_page(
            direct,
            Some(OcrPage {
                text: " ".into(),
                confidence: 0.0,
            }),
        );
        assert_eq!(kept.source, PageSource::Direct);
        assert_eq!(kept.number, 2);
    }

    #[test]
    fn test_method_and_status() {
        let direct = PageText::new(1, "a", 0.9, PageSource::Direct);
        let ocr = PageText::new(2, "b", 0.9, PageSource::Ocr);
        let blank = PageText::new(3, "", 0.0, PageSource::Direct);

        assert_eq!(method_for(&[direct.clone()]), ExtractionMethod::Direct);
        assert_eq!(method_for(&[ocr.clone()]), ExtractionMethod::Ocr);
        assert_eq!(method_for(&[direct.clone(), ocr.clone()]), ExtractionMethod::Hybrid);

        assert_eq!(status_for(&[direct.clone(), ocr], 0), ExtractionStatus::Complete);
        assert_eq!(status_for(&[direct.clone()], 1), ExtractionStatus::Partial);
        assert_eq!(status_for(&[direct, blank], 0), ExtractionStatus::Partial);
    }
}
