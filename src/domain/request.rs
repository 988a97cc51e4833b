use std::path::Path;

use thiserror::Error;
use url::Url;

use super::content::SourceKind;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];
const EMAIL_EXTENSIONS: &[&str] = &["eml"];

/// One piece of user input to analyze. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    Url {
        url: String,
    },
    Image {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    EmailFile {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unsupported file type `{0}` (allowed: .png .jpg .jpeg .webp .bmp .eml)")]
    UnsupportedFileType(String),
    #[error("invalid URL `{0}`")]
    InvalidUrl(String),
    #[error("unsupported URL scheme `{0}` (only http and https are analyzed)")]
    UnsupportedScheme(String),
    #[error("input of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("declared content type `{declared}` does not match a {expected} upload")]
    ContentTypeMismatch {
        declared: String,
        expected: &'static str,
    },
    #[error("no text to analyze")]
    EmptyText,
}

impl AnalysisRequest {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::Image {
            bytes,
            content_type: None,
        }
    }

    pub fn email(bytes: Vec<u8>) -> Self {
        Self::EmailFile {
            bytes,
            content_type: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Maps an uploaded file onto a request variant by its extension.
    pub fn from_upload(file_name: &str, bytes: Vec<u8>) -> Result<Self, InputError> {
        let ext = Path::new(file_name.trim())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            let content_type = match ext.as_str() {
                "jpg" | "jpeg" => "image/jpeg".to_string(),
                other => format!("image/{other}"),
            };
            Ok(Self::Image {
                bytes,
                content_type: Some(content_type),
            })
        } else if EMAIL_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Self::EmailFile {
                bytes,
                content_type: Some("message/rfc822".to_string()),
            })
        } else {
            Err(InputError::UnsupportedFileType(file_name.to_string()))
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Url { .. } => SourceKind::Url,
            Self::Image { .. } => SourceKind::Image,
            Self::EmailFile { .. } => SourceKind::Email,
            Self::Text { .. } => SourceKind::Text,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Url { url } => url.len(),
            Self::Image { bytes, .. } | Self::EmailFile { bytes, .. } => bytes.len(),
            Self::Text { text } => text.len(),
        }
    }

    /// Rejects input that can never be analyzed. Corrupt images and
    /// unparsable emails are not rejected here: they degrade during extraction.
    pub fn validate(&self, max_input_bytes: usize) -> Result<(), InputError> {
        let size = self.size();
        if size > max_input_bytes {
            return Err(InputError::TooLarge {
                size,
                limit: max_input_bytes,
            });
        }

        match self {
            Self::Url { url } => {
                let parsed =
                    Url::parse(url.trim()).map_err(|_| InputError::InvalidUrl(url.clone()))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(InputError::UnsupportedScheme(parsed.scheme().to_string()));
                }
                if parsed.host_str().is_none() {
                    return Err(InputError::InvalidUrl(url.clone()));
                }
            }
            Self::Image { content_type, .. } => {
                check_content_type(content_type.as_deref(), "image", |ct| {
                    ct.starts_with("image/") || ct == "application/octet-stream"
                })?;
            }
            Self::EmailFile { content_type, .. } => {
                check_content_type(content_type.as_deref(), "email", |ct| {
                    ct == "message/rfc822"
                        || ct.starts_with("text/")
                        || ct == "application/octet-stream"
                })?;
            }
            Self::Text { text } => {
                if text.trim().is_empty() {
                    return Err(InputError::EmptyText);
                }
            }
        }
        Ok(())
    }
}

fn check_content_type(
    declared: Option<&str>,
    expected: &'static str,
    accepts: impl Fn(&str) -> bool,
) -> Result<(), InputError> {
    let Some(declared) = declared else {
        return Ok(());
    };
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.is_empty() || accepts(&essence) {
        Ok(())
    } else {
        Err(InputError::ContentTypeMismatch {
            declared: declared.to_string(),
            expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_dispatch_by_extension() {
        let image = AnalysisRequest::from_upload("Print.JPG", vec![1, 2, 3]).unwrap();
        assert_eq!(image.kind(), SourceKind::Image);
        assert!(matches!(
            image,
            AnalysisRequest::Image { content_type: Some(ref ct), .. } if ct == "image/jpeg"
        ));

        let email = AnalysisRequest::from_upload("aviso.eml", vec![]).unwrap();
        assert_eq!(email.kind(), SourceKind::Email);

        let err = AnalysisRequest::from_upload("contrato.pdf", vec![]).unwrap_err();
        assert_eq!(err, InputError::UnsupportedFileType("contrato.pdf".into()));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let request = AnalysisRequest::image(vec![0; 11]);
        assert_eq!(
            request.validate(10),
            Err(InputError::TooLarge { size: 11, limit: 10 })
        );
    }

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(AnalysisRequest::url("https://example.com/a").validate(1024).is_ok());
        assert_eq!(
            AnalysisRequest::url("ftp://example.com").validate(1024),
            Err(InputError::UnsupportedScheme("ftp".into()))
        );
        assert!(matches!(
            AnalysisRequest::url("not a url").validate(1024),
            Err(InputError::InvalidUrl(_))
        ));
    }

    #[test]
    fn declared_content_type_must_match_variant() {
        let request = AnalysisRequest::Image {
            bytes: vec![1],
            content_type: Some("application/pdf".into()),
        };
        assert!(matches!(
            request.validate(1024),
            Err(InputError::ContentTypeMismatch { expected: "image", .. })
        ));

        let ok = AnalysisRequest::Image {
            bytes: vec![1],
            content_type: Some("image/png; charset=binary".into()),
        };
        assert!(ok.validate(1024).is_ok());
    }

    #[test]
    fn empty_image_is_not_an_input_error() {
        assert!(AnalysisRequest::image(Vec::new()).validate(1024).is_ok());
        assert_eq!(
            AnalysisRequest::text("   ").validate(1024),
            Err(InputError::EmptyText)
        );
    }
}
