use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::{Cache, Fingerprint, Namespace},
    domain::{Degradation, ExtractedContent, SourceKind},
};

use super::{
    links::LinkCollector,
    ocr::{OcrEngine, OcrError, OcrOutput},
    truncate_chars, MAX_TEXT_CHARS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

/// Identifies an image by its magic bytes; `None` for anything else.
pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        [b'B', b'M', ..] => Some(ImageFormat::Bmp),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::Webp),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        _ => None,
    }
}

pub struct ImageTextExtractor {
    engine: Arc<dyn OcrEngine>,
    cache: Cache,
    language: String,
}

impl ImageTextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, cache: Cache, language: impl Into<String>) -> Self {
        Self {
            engine,
            cache,
            language: language.into(),
        }
    }

    pub async fn extract(&self, bytes: &[u8]) -> ExtractedContent {
        let Some(format) = sniff_image_format(bytes) else {
            warn!(target: "ocr", bytes = bytes.len(), "upload is not a recognizable image");
            return ExtractedContent::degraded(SourceKind::Image, Degradation::UnreadableImage);
        };

        let fingerprint = Fingerprint::of(&[bytes, self.language.as_bytes()]);
        let output = match self.cache.get::<OcrOutput>(Namespace::Ocr, &fingerprint).await {
            Some(cached) => {
                debug!(target: "ocr", "OCR served from cache");
                cached
            }
            None => match self.engine.recognize(bytes, &self.language).await {
                Ok(output) => {
                    info!(
                        target: "ocr",
                        engine = self.engine.name(),
                        format = ?format,
                        chars = output.text.chars().count(),
                        confidence = output.confidence,
                        "image text recognized"
                    );
                    self.cache.put(Namespace::Ocr, &fingerprint, &output).await;
                    output
                }
                Err(err) => {
                    warn!(target: "ocr", engine = self.engine.name(), error = %err, "OCR degraded");
                    let reason = match err {
                        OcrError::Timeout(_) => Degradation::OcrTimeout,
                        other => Degradation::OcrFailed(other.to_string()),
                    };
                    return ExtractedContent::degraded(SourceKind::Image, reason);
                }
            },
        };

        // Engines pad blank regions with whitespace; none of it counts as text.
        let text = truncate_chars(output.text.trim(), MAX_TEXT_CHARS);
        let mut collector = LinkCollector::new();
        collector.extend_from_text(&text);
        let (links, link_domains) = collector.into_parts();

        ExtractedContent {
            text,
            links,
            link_domains,
            confidence: output.confidence.clamp(0.0, 1.0),
            ..ExtractedContent::new(SourceKind::Image)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::CacheConfig;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct CountingOcr {
        calls: AtomicUsize,
        result: Result<&'static str, ()>,
    }

    #[async_trait::async_trait]
    impl OcrEngine for CountingOcr {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn recognize(&self, _image: &[u8], _language: &str) -> Result<OcrOutput, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(text) => Ok(OcrOutput {
                    text: text.to_string(),
                    confidence: 0.9,
                }),
                Err(()) => Err(OcrError::Failed("engine crashed".into())),
            }
        }
    }

    fn extractor(result: Result<&'static str, ()>) -> (ImageTextExtractor, Arc<CountingOcr>) {
        let engine = Arc::new(CountingOcr {
            calls: AtomicUsize::new(0),
            result,
        });
        let cache = Cache::from_config(&CacheConfig::default());
        (
            ImageTextExtractor::new(engine.clone(), cache, "por+eng"),
            engine,
        )
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image_format(PNG), Some(ImageFormat::Png));
        assert_eq!(sniff_image_format(b"\xFF\xD8\xFF\xE0"), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_image_format(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(
            sniff_image_format(b"RIFF\0\0\0\0WEBPVP8 "),
            Some(ImageFormat::Webp)
        );
        assert_eq!(sniff_image_format(b"II*\0"), Some(ImageFormat::Tiff));
        assert_eq!(sniff_image_format(b""), None);
        assert_eq!(sniff_image_format(b"%PDF-1.7"), None);
    }

    #[tokio::test]
    async fn second_extraction_is_served_from_cache() {
        let (extractor, engine) = extractor(Ok("Pague em https://bit.ly/premio agora"));

        let first = extractor.extract(PNG).await;
        let second = extractor.extract(PNG).await;

        assert_eq!(first, second);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.link_domains, vec!["bit.ly"]);
        assert!((first.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn engine_failure_degrades_and_is_not_cached() {
        let (extractor, engine) = extractor(Err(()));

        let content = extractor.extract(PNG).await;
        assert!(matches!(content.degradation, Some(Degradation::OcrFailed(_))));
        assert_eq!(content.confidence, 0.0);

        extractor.extract(PNG).await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blank_recognition_yields_no_text() {
        let (blank, _) = extractor(Ok("  \n\t  "));
        let content = blank.extract(PNG).await;
        assert_eq!(content.text, "");
        assert!(!content.has_text());
        assert!(content.degradation.is_none());

        let (padded, _) = extractor(Ok("\n  Pix   \n"));
        assert_eq!(padded.extract(PNG).await.text, "Pix");
    }

    #[tokio::test]
    async fn unrecognized_bytes_never_reach_the_engine() {
        let (extractor, engine) = extractor(Ok("x"));
        let content = extractor.extract(b"not an image").await;
        assert_eq!(content.degradation, Some(Degradation::UnreadableImage));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
