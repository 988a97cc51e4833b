use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Url,
    Image,
    Email,
    Text,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Image => "image",
            Self::Email => "email",
            Self::Text => "text",
        }
    }
}

/// Why extraction produced less than it could have. Never a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    #[error("page fetch timed out")]
    FetchTimeout,
    #[error("page fetch failed: {0}")]
    FetchFailed(String),
    #[error("payload exceeded the size cap")]
    Oversized,
    #[error("image could not be decoded")]
    UnreadableImage,
    #[error("text recognition failed: {0}")]
    OcrFailed(String),
    #[error("text recognition timed out")]
    OcrTimeout,
    #[error("email could not be parsed")]
    EmailUnparsable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub anchor_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailIdentity {
    pub display_name: Option<String>,
    pub address: Option<String>,
    pub domain: Option<String>,
    pub registered_domain: Option<String>,
}

/// What the fetched page looked like. `status` is `None` when no response
/// was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub requested_url: String,
    pub final_url: String,
    pub status: Option<u16>,
    pub title: Option<String>,
    pub redirected: bool,
}

impl PageSnapshot {
    pub fn unreachable(url: &str) -> Self {
        Self {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status: None,
            title: None,
            redirected: false,
        }
    }

    pub fn is_accessible(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

/// Normalized view of one input, shared read-only with every signal producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub source: SourceKind,
    pub text: String,
    pub links: Vec<Link>,
    pub link_domains: Vec<String>,
    pub sender: Option<MailIdentity>,
    pub reply_to: Option<MailIdentity>,
    pub subject: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub page: Option<PageSnapshot>,
    /// Extraction confidence in `[0, 1]` (OCR confidence for images).
    pub confidence: f64,
    pub degradation: Option<Degradation>,
}

impl ExtractedContent {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            text: String::new(),
            links: Vec::new(),
            link_domains: Vec::new(),
            sender: None,
            reply_to: None,
            subject: None,
            list_unsubscribe: None,
            page: None,
            confidence: 1.0,
            degradation: None,
        }
    }

    pub fn degraded(source: SourceKind, reason: Degradation) -> Self {
        Self {
            confidence: 0.0,
            degradation: Some(reason),
            ..Self::new(source)
        }
    }

    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn sender_registered_domain(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|s| s.registered_domain.as_deref())
    }

    pub fn reply_to_registered_domain(&self) -> Option<&str> {
        self.reply_to
            .as_ref()
            .and_then(|s| s.registered_domain.as_deref())
    }
}
