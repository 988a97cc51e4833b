//! Deterministic rule set. Every rule is a pure function of the extracted
//! content (plus the read-only safebook) and fires at most once.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::{
    domain::{ExtractedContent, InvalidSignal, Polarity, Severity, Signal, SignalCategory, SourceKind},
    extract::links::{domain_matches, host_of, public_suffix, registered_domain},
};

use super::{safebook::Safebook, ProducerError, SignalProducer};

const COMMON_SENDER_TLDS: &[&str] = &["br", "com", "net", "gov", "org", "edu"];

const SHORTENER_DOMAINS: &[&str] = &[
    "bit.ly", "tinyurl.com", "t.co", "is.gd", "cutt.ly", "ow.ly", "buff.ly", "goo.gl",
];

pub(crate) const TRACKING_DOMAINS: &[&str] = &[
    "p-email.net",
    "pontaltech.com.br",
    "sendgrid.net",
    "mailchimpapp.com",
    "mandrillapp.com",
    "click.email",
    "emltrk.com",
];

pub(crate) const WHATSAPP_DOMAINS: &[&str] = &["wa.me", "whatsapp.com"];

const KNOWN_DOMAINS: &[&str] = &[
    "bb.com.br",
    "bancobrasil.com.br",
    "itau.com.br",
    "gmail.com",
    "outlook.com",
    "gov.br",
    "nubank.com.br",
    "bradesco.com.br",
];

const FORMAL_SIGNOFFS: &[&str] = &[
    "atenciosamente",
    "att.",
    "assinado digitalmente",
    "confidencialidade:",
    "assinatura eletrônica",
    "kind regards",
    "sincerely",
];

const SPARSE_OCR_CHARS: usize = 20;

static URGENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(urgente|bloquead[oa]|suspens[ao]|24h|2 horas|imediatamente|encerrada permanentemente|alerta severo|urgent|immediately|suspended)",
    )
    .expect("valid urgency regex")
});

static SENSITIVE_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(clique|confirm(?:e|ar)|atualiz(?:e|ar)|senha|token|c[oó]digo|pix|documento|foto|selfie|whatsapp|wa\.me|password|verify your)",
    )
    .expect("valid sensitive action regex")
});

static PRIZE_BAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(sorteio|pr[eê]mio|ganhador|ganhe|parab[eé]ns|clique\s+e\s+participe|clique\s+para\s+participar|resgat(?:e|ar)|receba\s+agora|participe|promo[cç][aã]o|vencedor)",
    )
    .expect("valid prize regex")
});

static HIGH_SEVERITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(sorteio|pr[eê]mio|ganhador|ganhe|parab[eé]ns|clique\s+e\s+participe|clique\s+para\s+participar|resgate|receba\s+agora|promo[cç][aã]o|vencedor|confirme\s+sua\s+senha|token|pix|atualize\s+sua\s+conta|bloqueado|suspenso)\b",
    )
    .expect("valid high severity regex")
});

/// Brands most often used as bait in promotional images.
static BAIT_BRANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(banco\s+do\s+brasil|bancodobrasil|bb|bradesco|ita[uú]|santander|caixa|nubank|tim|claro|vivo|oi)\b",
    )
    .expect("valid bait brand regex")
});

static PUNCTUATION_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[!?]{3,}").expect("valid punctuation regex"));

/// Anchor text that is itself a domain or URL, e.g. `www.bank.com.br/login`.
static DOMAIN_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?((?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,})(?:[/:?#]\S*)?$")
        .expect("valid domain regex")
});

struct RuleInput<'a> {
    content: &'a ExtractedContent,
    /// Subject, page title and body, lowercased.
    scan_lc: String,
    /// Final page host and sender domain, when present.
    own_hosts: Vec<String>,
    safebook: &'a Safebook,
}

struct Rule {
    name: &'static str,
    polarity: Polarity,
    weight: f64,
    severity: Severity,
    check: fn(&RuleInput<'_>) -> Option<String>,
}

const fn risk(name: &'static str, weight: f64, check: fn(&RuleInput<'_>) -> Option<String>) -> Rule {
    Rule {
        name,
        polarity: Polarity::Risk,
        weight,
        severity: Severity::Normal,
        check,
    }
}

const fn benign(name: &'static str, weight: f64, check: fn(&RuleInput<'_>) -> Option<String>) -> Rule {
    Rule {
        name,
        polarity: Polarity::Benign,
        weight,
        severity: Severity::Normal,
        check,
    }
}

static RULES: &[Rule] = &[
    risk("urgency_language", 0.22, urgency_language),
    risk("credential_request", 0.25, credential_request),
    risk("url_shortener", 0.18, url_shortener),
    risk("unreachable_link", 0.12, unreachable_link),
    risk("unusual_sender_tld", 0.15, unusual_sender_tld),
    risk("reply_to_mismatch", 0.12, reply_to_mismatch),
    risk("tracking_links", 0.06, tracking_links),
    risk("whatsapp_redirect", 0.10, whatsapp_redirect),
    risk("display_link_mismatch", 0.20, display_link_mismatch),
    risk("excessive_punctuation", 0.08, excessive_punctuation),
    risk("sparse_ocr_text", 0.05, sparse_ocr_text),
    risk("prize_bait", 0.22, prize_bait),
    risk("visual_prize_phishing", 0.18, visual_prize_phishing),
    Rule {
        severity: Severity::Critical,
        ..risk("branded_prize_image", 0.35, branded_prize_image)
    },
    Rule {
        severity: Severity::Elevated,
        ..risk("high_severity_terms", 0.08, high_severity_terms)
    },
    benign("stable_https", 0.15, stable_https),
    benign("known_domain", 0.20, known_domain),
    benign("allowlisted_domain", 0.30, allowlisted_domain),
    benign("allowlisted_phrase", 0.20, allowlisted_phrase),
    benign("formal_signature", 0.05, formal_signature),
];

fn urgency_language(input: &RuleInput<'_>) -> Option<String> {
    URGENCY
        .find(&input.scan_lc)
        .map(|m| format!("urgency or threat language (\"{}\")", m.as_str()))
}

fn credential_request(input: &RuleInput<'_>) -> Option<String> {
    SENSITIVE_ACTION
        .find(&input.scan_lc)
        .map(|m| format!("asks for a sensitive action or outside contact (\"{}\")", m.as_str()))
}

fn url_shortener(input: &RuleInput<'_>) -> Option<String> {
    find_link_domain(input.content, SHORTENER_DOMAINS)
        .map(|domain| format!("link shortener in use ({domain})"))
}

fn unreachable_link(input: &RuleInput<'_>) -> Option<String> {
    let page = input.content.page.as_ref()?;
    if page.is_accessible() {
        return None;
    }
    Some(match page.status {
        Some(status) => format!("linked page answered with HTTP {status}"),
        None => "linked page could not be reached".to_string(),
    })
}

fn unusual_sender_tld(input: &RuleInput<'_>) -> Option<String> {
    let domain = input.content.sender.as_ref()?.domain.as_deref()?;
    let suffix = public_suffix(domain)?;
    let tld = suffix.rsplit('.').next()?;
    (!COMMON_SENDER_TLDS.contains(&tld))
        .then(|| format!("sender domain {domain} uses an unusual TLD (.{tld})"))
}

fn reply_to_mismatch(input: &RuleInput<'_>) -> Option<String> {
    let sender = input.content.sender_registered_domain()?;
    let reply_to = input.content.reply_to_registered_domain()?;
    (sender != reply_to).then(|| format!("reply-to domain {reply_to} differs from sender {sender}"))
}

fn tracking_links(input: &RuleInput<'_>) -> Option<String> {
    find_link_domain(input.content, TRACKING_DOMAINS)
        .map(|domain| format!("tracking or bulk-mail links ({domain})"))
}

fn whatsapp_redirect(input: &RuleInput<'_>) -> Option<String> {
    find_link_domain(input.content, WHATSAPP_DOMAINS)
        .map(|domain| format!("redirects to a WhatsApp conversation ({domain})"))
}

fn display_link_mismatch(input: &RuleInput<'_>) -> Option<String> {
    input.content.links.iter().find_map(|link| {
        let anchor = link.anchor_text.as_deref()?.trim();
        let shown_host = DOMAIN_LIKE.captures(anchor)?.get(1)?.as_str().to_ascii_lowercase();
        let shown = registered_domain(&shown_host)?;
        let actual = registered_domain(&host_of(&link.href)?)?;
        (shown != actual).then(|| format!("link text shows {shown} but points to {actual}"))
    })
}

fn excessive_punctuation(input: &RuleInput<'_>) -> Option<String> {
    let text = &input.content.text;
    if let Some(run) = PUNCTUATION_RUN.find(text) {
        return Some(format!("excessive punctuation (\"{}\")", run.as_str()));
    }
    let chars = text.chars().count();
    let bangs = text.chars().filter(|c| *c == '!').count();
    (bangs >= 6 && bangs as f64 / chars.max(1) as f64 > 0.02)
        .then(|| format!("excessive punctuation ({bangs} exclamation marks)"))
}

fn sparse_ocr_text(input: &RuleInput<'_>) -> Option<String> {
    let len = input.content.text.trim().chars().count();
    (input.content.source == SourceKind::Image && len > 0 && len < SPARSE_OCR_CHARS)
        .then(|| format!("very little text recognized in the image ({len} characters)"))
}

fn prize_bait(input: &RuleInput<'_>) -> Option<String> {
    PRIZE_BAIT
        .find(&input.scan_lc)
        .map(|m| format!("prize, raffle or call-to-action bait (\"{}\")", m.as_str()))
}

fn visual_prize_phishing(input: &RuleInput<'_>) -> Option<String> {
    (input.content.source == SourceKind::Image && PRIZE_BAIT.is_match(&input.scan_lc))
        .then(|| "promotional image with prize bait (visual phishing)".to_string())
}

fn branded_prize_image(input: &RuleInput<'_>) -> Option<String> {
    if input.content.source != SourceKind::Image || !PRIZE_BAIT.is_match(&input.scan_lc) {
        return None;
    }
    BAIT_BRANDS.find(&input.scan_lc).map(|m| {
        format!(
            "image pairs brand \"{}\" with prize or call-to-action bait",
            m.as_str()
        )
    })
}

fn high_severity_terms(input: &RuleInput<'_>) -> Option<String> {
    HIGH_SEVERITY
        .find(&input.scan_lc)
        .map(|m| format!("high-risk term present (\"{}\")", m.as_str()))
}

fn stable_https(input: &RuleInput<'_>) -> Option<String> {
    let page = input.content.page.as_ref()?;
    (page.final_url.starts_with("https://") && page.is_accessible() && !page.redirected)
        .then(|| "stable https link (2xx, no redirect chain)".to_string())
}

fn known_domain(input: &RuleInput<'_>) -> Option<String> {
    input.own_hosts.iter().find_map(|host| {
        KNOWN_DOMAINS
            .iter()
            .find(|known| domain_matches(host, known))
            .map(|known| format!("known, expected domain ({known})"))
    })
}

fn allowlisted_domain(input: &RuleInput<'_>) -> Option<String> {
    input
        .own_hosts
        .iter()
        .find_map(|host| input.safebook.matching_domain(host))
        .map(|domain| format!("domain on the safebook ({domain})"))
}

fn allowlisted_phrase(input: &RuleInput<'_>) -> Option<String> {
    input
        .safebook
        .matching_phrase(&input.scan_lc)
        .map(|phrase| format!("phrase on the safebook (\"{phrase}\")"))
}

fn formal_signature(input: &RuleInput<'_>) -> Option<String> {
    FORMAL_SIGNOFFS
        .iter()
        .find(|signoff| input.scan_lc.contains(*signoff))
        .map(|_| "formal language or corporate signature".to_string())
}

fn find_link_domain<'a>(content: &'a ExtractedContent, list: &[&str]) -> Option<&'a str> {
    content
        .link_domains
        .iter()
        .map(String::as_str)
        .find(|host| list.iter().any(|listed| domain_matches(host, listed)))
}

pub struct HeuristicsEngine {
    safebook: Arc<Safebook>,
}

impl HeuristicsEngine {
    pub fn new(safebook: Arc<Safebook>) -> Self {
        Self { safebook }
    }

    /// Runs every rule in order; overlapping rules fire independently.
    pub fn evaluate(&self, content: &ExtractedContent) -> Result<Vec<Signal>, InvalidSignal> {
        let scan_lc = [
            content.subject.as_deref(),
            content.page.as_ref().and_then(|p| p.title.as_deref()),
            Some(content.text.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

        let own_hosts = [
            content.page.as_ref().and_then(|p| host_of(&p.final_url)),
            content.sender.as_ref().and_then(|s| s.domain.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let input = RuleInput {
            content,
            scan_lc,
            own_hosts,
            safebook: &self.safebook,
        };

        // Rules over OCR output inherit the recognition confidence.
        let confidence = match content.source {
            SourceKind::Image => content.confidence.clamp(0.0, 1.0),
            _ => 1.0,
        };

        let mut signals = Vec::new();
        for rule in RULES {
            let Some(rationale) = (rule.check)(&input) else {
                continue;
            };
            let signal = match rule.polarity {
                Polarity::Risk => Signal::risk(SignalCategory::Heuristics, rule.name, rule.weight, rationale),
                Polarity::Benign => {
                    Signal::benign(SignalCategory::Heuristics, rule.name, rule.weight, rationale)
                }
            }?
            .with_confidence(confidence)?
            .with_severity(rule.severity);
            signals.push(signal);
        }

        debug!(
            target: "pipeline",
            fired = ?signals.iter().map(Signal::name).collect::<Vec<_>>(),
            "heuristics evaluated"
        );
        Ok(signals)
    }
}

#[async_trait]
impl SignalProducer for HeuristicsEngine {
    fn name(&self) -> &'static str {
        "heuristics"
    }

    fn category(&self) -> SignalCategory {
        SignalCategory::Heuristics
    }

    async fn produce(&self, content: &ExtractedContent) -> Result<Vec<Signal>, ProducerError> {
        Ok(self.evaluate(content)?)
    }
}
