use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::LlmConfig,
    domain::{ExtractedContent, SourceKind, Verdict},
    extract::links::domain_matches,
    signals::heuristics::{TRACKING_DOMAINS, WHATSAPP_DOMAINS},
};

use super::LlmError;

/// Bumped whenever the prompt or the summary shape changes, so cached
/// judgments from an older prompt are never reused.
pub const PROMPT_VERSION: &str = "fraud-judge-v1";

const EXCERPT_MAX_CHARS: usize = 1_200;
const SUMMARY_MAX_DOMAINS: usize = 80;

const SYSTEM_PROMPT: &str = r#"You are an extremely cautious fraud analyst reviewing messages, web pages and images received by Brazilian users.
Mark "suspicious" ONLY when there are at least 2 consistent risk signals.
Mark "fraudulent" when there are at least 3 signals or critical technical evidence, such as brand impersonation (the message claims to come from a well-known brand but the sender or link domain is not official).
Relevant risk signals: urgency, requests for sensitive actions (passwords, tokens, codes, PIX, documents, selfies), WhatsApp links (wa.me), tracking/ESP domains, a diverging reply-to, brand impersonation, links to unofficial domains.
Benign signals (https 2xx without odd redirects, no sensitive request, formal corporate language) reduce the risk.
Answer STRICTLY with one JSON object:
{"label": "benign|suspicious|fraudulent", "risk_score": 0..1, "confidence": 0..1, "rationale": "...", "red_flags": ["..."]}"#;

/// Compact, model-facing description of one extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSummary {
    pub source_type: SourceKind,
    pub subject: Option<String>,
    pub from_registered_domain: Option<String>,
    pub reply_to_registered_domain: Option<String>,
    pub link_domains: Vec<String>,
    pub has_whatsapp_link: bool,
    pub has_tracking_domains: bool,
    pub has_list_unsubscribe: bool,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub https_2xx_no_chain: bool,
    pub ocr_text_len: Option<usize>,
    pub content_excerpt: String,
}

impl SignalSummary {
    pub fn from_content(content: &ExtractedContent) -> Self {
        let listed = |list: &[&str]| {
            content
                .link_domains
                .iter()
                .any(|host| list.iter().any(|listed| domain_matches(host, listed)))
        };
        let page = content.page.as_ref();

        Self {
            source_type: content.source,
            subject: content.subject.clone(),
            from_registered_domain: content.sender_registered_domain().map(str::to_string),
            reply_to_registered_domain: content.reply_to_registered_domain().map(str::to_string),
            link_domains: content
                .link_domains
                .iter()
                .take(SUMMARY_MAX_DOMAINS)
                .cloned()
                .collect(),
            has_whatsapp_link: listed(WHATSAPP_DOMAINS),
            has_tracking_domains: listed(TRACKING_DOMAINS),
            has_list_unsubscribe: content.list_unsubscribe.is_some(),
            final_url: page.map(|p| p.final_url.clone()),
            status_code: page.and_then(|p| p.status),
            https_2xx_no_chain: page.is_some_and(|p| {
                p.final_url.starts_with("https://") && p.is_accessible() && !p.redirected
            }),
            ocr_text_len: (content.source == SourceKind::Image).then(|| content.text_len()),
            content_excerpt: content.text.chars().take(EXCERPT_MAX_CHARS).collect(),
        }
    }
}

/// Normalized model answer, as cached in the `llm` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmJudgment {
    pub label: Verdict,
    pub risk_score: f64,
    pub confidence: f64,
    pub rationale: String,
    pub red_flags: Vec<String>,
}

pub fn build_request(config: &LlmConfig, summary_json: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".into(),
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: "user".into(),
                content: format!(
                    "Analyze the content and the signals below and classify the risk:\n\n{summary_json}"
                ),
            },
        ],
        temperature: config.temperature,
        top_p: 1.0,
        max_tokens: config.max_tokens,
        response_format: ResponseFormat {
            r#type: "json_object".into(),
        },
    }
}

pub async fn parse_response(response: Response) -> Result<LlmJudgment, LlmError> {
    let completion: ChatCompletionResponse = response
        .json()
        .await
        .map_err(|err| LlmError::Unparsable(format!("invalid completion body: {err}")))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|msg| msg.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)?;

    parse_judgment(&content)
}

/// Accepts a bare JSON object or the first `{` .. last `}` slice of a chatty
/// answer.
pub fn parse_judgment(raw: &str) -> Result<LlmJudgment, LlmError> {
    let raw = raw.trim();
    let parsed: RawJudgment = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(first_err) => {
            let slice = match (raw.find('{'), raw.rfind('}')) {
                (Some(start), Some(end)) if end > start => &raw[start..=end],
                _ => return Err(LlmError::Unparsable(first_err.to_string())),
            };
            serde_json::from_str(slice).map_err(|err| LlmError::Unparsable(err.to_string()))?
        }
    };

    let risk_score = number(parsed.risk_score.as_ref())
        .ok_or_else(|| LlmError::Unparsable("missing risk_score".into()))?;

    Ok(LlmJudgment {
        label: normalize_label(parsed.label.as_deref()),
        risk_score,
        confidence: number(parsed.confidence.as_ref()).unwrap_or(0.5),
        rationale: parsed.rationale.unwrap_or_default().trim().to_string(),
        red_flags: parsed.red_flags,
    })
}

fn normalize_label(label: Option<&str>) -> Verdict {
    match label.map(|l| l.trim().to_lowercase()).as_deref() {
        Some("suspeito" | "suspicious") => Verdict::Suspicious,
        Some("fraude" | "fraud" | "fraudulent" | "scam") => Verdict::Fraudulent,
        _ => Verdict::Benign,
    }
}

/// Numbers may come back as JSON numbers or numeric strings; clamped to `[0, 1]`.
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then(|| n.clamp(0.0, 1.0))
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    label: Option<String>,
    #[serde(alias = "risk_score_llm")]
    risk_score: Option<Value>,
    #[serde(alias = "confidence_llm")]
    confidence: Option<Value>,
    #[serde(alias = "explanation")]
    rationale: Option<String>,
    #[serde(default)]
    red_flags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: i32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatCompletionMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}
