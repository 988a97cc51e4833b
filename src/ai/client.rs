use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    cache::{Cache, Fingerprint, Namespace},
    config::LlmConfig,
    domain::{ExtractedContent, Signal, SignalCategory},
    signals::{ProducerError, SignalProducer},
};

use super::{
    inference::{build_request, parse_response, LlmJudgment, SignalSummary, PROMPT_VERSION},
    LlmError,
};

const SIGNAL_NAME: &str = "llm_judgment";
const RATIONALE_MAX_FLAGS: usize = 3;

/// One chat-completions call per distinct summary. Without a credential, or
/// when disabled, it produces nothing.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    cache: Cache,
}

impl LlmClient {
    pub fn new(http: Client, config: LlmConfig, cache: Cache) -> Self {
        Self {
            http,
            config,
            cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_available()
    }

    /// `Ok(None)` when the client is disabled or there is nothing to judge.
    pub async fn judge(&self, content: &ExtractedContent) -> Result<Option<LlmJudgment>, LlmError> {
        let Some(api_key) = self.config.api_key.as_deref().filter(|_| self.config.enabled) else {
            debug!(target: "llm", "LLM disabled or no API key configured; skipping");
            return Ok(None);
        };
        if !content.has_text() {
            debug!(target: "llm", "no text to judge; skipping");
            return Ok(None);
        }

        let summary = SignalSummary::from_content(content);
        let summary_json = serde_json::to_string(&summary)?;
        let fingerprint = Fingerprint::of(&[
            PROMPT_VERSION.as_bytes(),
            self.config.model.as_bytes(),
            summary_json.as_bytes(),
        ]);

        if let Some(cached) = self
            .cache
            .get::<LlmJudgment>(Namespace::Llm, &fingerprint)
            .await
        {
            debug!(target: "llm", "judgment served from cache");
            return Ok(Some(cached));
        }

        let request = build_request(&self.config, &summary_json);
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let judgment = parse_response(response).await?;
        info!(
            target: "llm",
            model = %self.config.model,
            label = %judgment.label,
            risk = judgment.risk_score,
            confidence = judgment.confidence,
            "LLM judgment received"
        );
        self.cache.put(Namespace::Llm, &fingerprint, &judgment).await;
        Ok(Some(judgment))
    }
}

impl LlmJudgment {
    pub fn to_signal(&self) -> Result<Signal, ProducerError> {
        let mut rationale = format!("LLM judged the content {} (risk {:.2})", self.label, self.risk_score);
        if !self.rationale.is_empty() {
            rationale.push_str(": ");
            rationale.push_str(&self.rationale);
        }
        let flags: Vec<&str> = self
            .red_flags
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .take(RATIONALE_MAX_FLAGS)
            .collect();
        if !flags.is_empty() {
            rationale.push_str(&format!(" [{}]", flags.join("; ")));
        }

        Ok(
            Signal::risk(SignalCategory::Llm, SIGNAL_NAME, self.risk_score, rationale)?
                .with_confidence(self.confidence)?,
        )
    }
}

#[async_trait]
impl SignalProducer for LlmClient {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn category(&self) -> SignalCategory {
        SignalCategory::Llm
    }

    async fn produce(&self, content: &ExtractedContent) -> Result<Vec<Signal>, ProducerError> {
        match self.judge(content).await? {
            Some(judgment) => Ok(vec![judgment.to_signal()?]),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CacheConfig, domain::Verdict, extract::extract_text};

    fn client(config: LlmConfig) -> LlmClient {
        LlmClient::new(
            Client::new(),
            config,
            Cache::from_config(&CacheConfig::default()),
        )
    }

    #[tokio::test]
    async fn without_api_key_nothing_is_produced() {
        let client = client(LlmConfig::default());
        assert!(!client.is_enabled());
        let signals = client
            .produce(&extract_text("Clique aqui e confirme sua senha"))
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn disabled_client_skips_even_with_key() {
        let client = client(LlmConfig {
            enabled: false,
            api_key: Some("sk-test".into()),
            api_url: "http://127.0.0.1:9/never-called".into(),
            ..LlmConfig::default()
        });
        assert!(client.judge(&extract_text("texto")).await.unwrap().is_none());
    }

    #[test]
    fn judgment_becomes_llm_signal() {
        let judgment = LlmJudgment {
            label: Verdict::Fraudulent,
            risk_score: 0.85,
            confidence: 0.7,
            rationale: "pede senha".into(),
            red_flags: vec!["urgência".into(), " ".into()],
        };
        let signal = judgment.to_signal().unwrap();
        assert_eq!(signal.category(), SignalCategory::Llm);
        assert_eq!(signal.weight(), 0.85);
        assert_eq!(signal.confidence(), 0.7);
        assert_eq!(
            signal.rationale(),
            "LLM judged the content fraudulent (risk 0.85): pede senha [urgência]"
        );
    }
}
