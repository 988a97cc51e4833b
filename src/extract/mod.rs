//! Turns every kind of input into one normalized [`ExtractedContent`].

pub mod email;
pub mod html;
pub mod image;
pub mod links;
pub mod ocr;
pub mod preprocess;
pub mod web;

use std::sync::Arc;

use reqwest::Client;
use tracing::{info, instrument};

use crate::{
    cache::Cache,
    config::AppConfig,
    domain::{AnalysisRequest, ExtractedContent, SourceKind},
};

pub use self::image::{sniff_image_format, ImageFormat, ImageTextExtractor};
pub use ocr::{OcrEngine, OcrError, OcrOutput, TesseractOcr};
pub use web::{FetchedPage, WebContentFetcher};

pub const MAX_TEXT_CHARS: usize = 20_000;

pub struct ContentExtractor {
    web: WebContentFetcher,
    images: ImageTextExtractor,
}

impl ContentExtractor {
    pub fn new(
        config: &AppConfig,
        client: Client,
        cache: Cache,
        ocr_engine: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            web: WebContentFetcher::new(client, config.web.clone(), cache.clone()),
            images: ImageTextExtractor::new(ocr_engine, cache, config.ocr.language.clone()),
        }
    }

    /// Infallible: content problems are recorded as a degradation.
    #[instrument(skip_all, fields(kind = request.kind().as_str()))]
    pub async fn extract(&self, request: &AnalysisRequest) -> ExtractedContent {
        let content = match request {
            AnalysisRequest::Url { url } => self.web.extract(url).await,
            AnalysisRequest::Image { bytes, .. } => self.images.extract(bytes).await,
            AnalysisRequest::EmailFile { bytes, .. } => email::extract_email(bytes),
            AnalysisRequest::Text { text } => extract_text(text),
        };

        info!(
            target: "extract",
            source = content.source.as_str(),
            chars = content.text_len(),
            links = content.links.len(),
            confidence = content.confidence,
            degraded = content.degradation.is_some(),
            "content extracted"
        );
        content
    }
}

pub fn extract_text(text: &str) -> ExtractedContent {
    let text = truncate_chars(text.trim(), MAX_TEXT_CHARS);
    let mut collector = links::LinkCollector::new();
    collector.extend_from_text(&text);
    let (links, link_domains) = collector.into_parts();

    ExtractedContent {
        text,
        links,
        link_domains,
        ..ExtractedContent::new(SourceKind::Text)
    }
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
