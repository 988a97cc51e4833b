pub mod client;
pub mod inference;

use thiserror::Error;

pub use client::LlmClient;
pub use inference::{LlmJudgment, SignalSummary, PROMPT_VERSION};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("LLM endpoint answered with HTTP {0}")]
    Status(u16),
    #[error("LLM answer was empty")]
    EmptyResponse,
    #[error("LLM answer could not be parsed: {0}")]
    Unparsable(String),
    #[error("failed to encode the LLM request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl LlmError {
    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}
