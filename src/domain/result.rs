use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    content::{Degradation, ExtractedContent, SourceKind},
    signal::Signal,
};

const SNIPPET_MAX_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Benign,
    Suspicious,
    Fraudulent,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Suspicious => "suspicious",
            Self::Fraudulent => "fraudulent",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of the extraction the caller gets to see next to the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSummary {
    pub source: SourceKind,
    pub text_length: usize,
    pub link_count: usize,
    pub confidence: f64,
    pub degradation: Option<Degradation>,
    pub subject: Option<String>,
    pub sender_domain: Option<String>,
    pub final_url: Option<String>,
    pub snippet: String,
}

impl From<&ExtractedContent> for ExtractionSummary {
    fn from(content: &ExtractedContent) -> Self {
        Self {
            source: content.source,
            text_length: content.text_len(),
            link_count: content.links.len(),
            confidence: content.confidence,
            degradation: content.degradation.clone(),
            subject: content.subject.clone(),
            sender_domain: content
                .sender
                .as_ref()
                .and_then(|s| s.domain.clone()),
            final_url: content.page.as_ref().map(|p| p.final_url.clone()),
            snippet: snippet(&content.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub score: f64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub insufficient_signal: bool,
    pub rationale: String,
    pub signals: Vec<Signal>,
    pub actions: Vec<String>,
    pub extraction: ExtractionSummary,
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(SNIPPET_MAX_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_truncates_long_text() {
        let mut content = ExtractedContent::new(SourceKind::Text);
        content.text = "á".repeat(1_500);
        let summary = ExtractionSummary::from(&content);
        assert_eq!(summary.text_length, 1_500);
        assert_eq!(summary.snippet.chars().count(), 1_001);
        assert!(summary.snippet.ends_with('…'));
    }

    #[test]
    fn verdict_labels_are_stable() {
        assert_eq!(serde_json::to_value(Verdict::Fraudulent).unwrap(), "fraudulent");
        assert_eq!(Verdict::Suspicious.to_string(), "suspicious");
        assert!(Verdict::Benign < Verdict::Suspicious);
    }
}
