//! Brand impersonation checks: a known brand is claimed, but the mail or the
//! links come from somewhere else.

use std::{collections::BTreeMap, fs, path::Path};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    domain::{ExtractedContent, Severity, Signal, SignalCategory},
    extract::links::{domain_matches, host_of, public_suffix, registered_domain},
};

use super::{ProducerError, SignalProducer};

const SIGNAL_NAME: &str = "brand_impersonation";
const MENTIONED_LOOKALIKE: f64 = 0.75;
const MENTIONED_CRITICAL: f64 = 0.90;
const UNMENTIONED_LOOKALIKE: f64 = 0.85;
/// Targets shorter than this only count on an exact match.
const MIN_FUZZY_LEN: usize = 4;

/// Brand names that are also everyday words; they only count as a mention
/// when they appear in the sender display name.
const AMBIGUOUS_ALIASES: &[&str] = &["tim", "claro", "vivo", "oi", "caixa", "safra"];

const BUILTIN_BRANDS: &[(&str, &[(&str, &[&str])])] = &[
    (
        "telefonia",
        &[
            ("tim", &["tim.com.br", "tim.com"]),
            ("claro", &["claro.com.br"]),
            ("vivo", &["vivo.com.br"]),
            ("oi", &["oi.com.br"]),
        ],
    ),
    (
        "bancos",
        &[
            ("itau", &["itau.com.br"]),
            ("bradesco", &["bradesco.com.br"]),
            ("santander", &["santander.com.br"]),
            ("banco_do_brasil", &["bb.com.br"]),
            ("caixa", &["caixa.gov.br"]),
            ("nubank", &["nubank.com.br"]),
            ("btg_pactual", &["btgpactual.com"]),
            ("original", &["original.com.br"]),
            ("inter", &["bancointer.com.br"]),
        ],
    ),
    (
        "cartao_credito_e_pagamentos",
        &[
            ("c6bank", &["c6bank.com.br"]),
            ("pagseguro", &["pagseguro.com.br"]),
            ("mercado_pago", &["mercadopago.com", "mercadopago.com.br"]),
            ("paypal", &["paypal.com", "paypal.com.br"]),
            ("picpay", &["picpay.com"]),
        ],
    ),
    (
        "credito_e_emprestimos",
        &[
            ("serasa", &["serasa.com.br"]),
            ("bmg", &["bancobmg.com.br"]),
            ("safra", &["safra.com.br"]),
        ],
    ),
    (
        "planos_de_saude",
        &[
            ("amil", &["amil.com.br"]),
            ("unimed", &["unimed.coop.br"]),
            ("hapvida", &["hapvida.com.br"]),
            ("bradesco_saude", &["bradescoseguros.com.br"]),
            ("sulamerica", &["sulamericaseguros.com.br"]),
        ],
    ),
    (
        "varejo_digital_e_servicos",
        &[
            ("mercado_livre", &["mercadolivre.com.br"]),
            ("magalu", &["magazineluiza.com.br"]),
            ("americanas", &["americanas.com.br"]),
            ("submarino", &["submarino.com.br"]),
            ("shopee", &["shopee.com.br"]),
            ("amazon", &["amazon.com", "amazon.com.br"]),
        ],
    ),
];

const EXTRA_ALIASES: &[(&str, &[&str])] = &[
    ("itau", &["itaú"]),
    ("caixa", &["caixa econômica", "caixa economica"]),
    ("banco_do_brasil", &["bb"]),
    ("btg_pactual", &["btg"]),
    ("original", &["banco original"]),
    ("inter", &["banco inter"]),
    ("c6bank", &["c6 bank"]),
    ("mercado_pago", &["mercadopago"]),
    ("mercado_livre", &["mercadolivre"]),
    ("magalu", &["magazine luiza"]),
    ("bradesco_saude", &["bradesco saúde"]),
    ("sulamerica", &["sulamérica"]),
    ("bmg", &["banco bmg"]),
];

/// Keys whose plain spelling is too common a word to count as a mention.
const ALIAS_ONLY_KEYS: &[&str] = &["original", "inter"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brand {
    pub key: String,
    /// Lowercase spellings matched on word boundaries.
    pub aliases: Vec<String>,
    pub official_domains: Vec<String>,
}

impl Brand {
    pub fn new(key: &str, official_domains: &[&str]) -> Self {
        let key = key.trim().to_lowercase();
        let mut aliases = Vec::new();
        if !ALIAS_ONLY_KEYS.contains(&key.as_str()) {
            aliases.push(key.replace('_', " "));
        }
        if let Some((_, extra)) = EXTRA_ALIASES.iter().find(|(k, _)| *k == key) {
            aliases.extend(extra.iter().map(|a| a.to_string()));
        }
        aliases.dedup();

        Self {
            official_domains: official_domains
                .iter()
                .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            aliases,
            key,
        }
    }

    pub fn is_official(&self, domain: &str) -> bool {
        self.official_domains
            .iter()
            .any(|official| domain_matches(domain, official))
    }

    /// Spellings compared against domain labels: compacted key and aliases
    /// plus the label of every official domain.
    fn similarity_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = std::iter::once(self.key.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .map(|s| s.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
            .chain(self.official_domains.iter().map(|d| domain_label(d)))
            .filter(|t| !t.is_empty())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// A display name or subject naming the brand is an identity claim; the
    /// body only mentions it. Ambiguous words count in the display name only.
    fn mention_in(&self, display_name_lc: &str, subject_lc: &str, body_lc: &str) -> Option<Mention> {
        let plain = |alias: &String| !AMBIGUOUS_ALIASES.contains(&alias.as_str());
        if self.aliases.iter().any(|alias| {
            contains_word(display_name_lc, alias) || (plain(alias) && contains_word(subject_lc, alias))
        }) {
            return Some(Mention::Claimed);
        }
        self.aliases
            .iter()
            .any(|alias| plain(alias) && contains_word(body_lc, alias))
            .then_some(Mention::Body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mention {
    Claimed,
    Body,
}

/// Ordered list of protected brands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandBook {
    brands: Vec<Brand>,
}

impl BrandBook {
    pub fn new(brands: Vec<Brand>) -> Self {
        Self { brands }
    }

    pub fn builtin() -> Self {
        let brands = BUILTIN_BRANDS
            .iter()
            .flat_map(|(_, brands)| brands.iter())
            .map(|(key, domains)| Brand::new(key, domains))
            .collect();
        Self { brands }
    }

    /// Parses `{ "category": { "brand_key": ["domain", ...] } }`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let categories: BTreeMap<String, BTreeMap<String, Vec<String>>> = serde_json::from_str(raw)?;
        let brands = categories
            .into_values()
            .flat_map(BTreeMap::into_iter)
            .map(|(key, domains)| {
                let domains: Vec<&str> = domains.iter().map(String::as_str).collect();
                Brand::new(&key, &domains)
            })
            .collect();
        Ok(Self { brands })
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let book = Self::from_json(&raw).map_err(|e| format!("{}: {e}", path.display()))?;
        info!(target: "brand_guard", path = %path.display(), brands = book.brands.len(), "brand list loaded");
        Ok(book)
    }

    pub fn brands(&self) -> &[Brand] {
        &self.brands
    }
}

impl Default for BrandBook {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Finding {
    weight: f64,
    similarity: f64,
    severity: Severity,
    rationale: String,
}

pub struct BrandGuard {
    book: Result<BrandBook, String>,
}

impl BrandGuard {
    pub fn new(book: BrandBook) -> Self {
        Self { book: Ok(book) }
    }

    /// Uses the built-in list unless a path is configured. A configured list
    /// that cannot be read makes every evaluation fail.
    pub fn from_path(path: Option<&Path>) -> Self {
        let book = match path {
            None => Ok(BrandBook::builtin()),
            Some(path) => BrandBook::load(path).inspect_err(|err| {
                warn!(target: "brand_guard", error = %err, "brand list could not be loaded");
            }),
        };
        Self { book }
    }

    pub fn evaluate(&self, content: &ExtractedContent) -> Result<Option<Signal>, ProducerError> {
        let book = self
            .book
            .as_ref()
            .map_err(|reason| ProducerError::BrandList(reason.clone()))?;

        let Some(finding) = strongest_finding(book, content) else {
            return Ok(None);
        };
        debug!(
            target: "brand_guard",
            weight = finding.weight,
            similarity = finding.similarity,
            severity = ?finding.severity,
            "brand impersonation detected"
        );

        let signal = Signal::risk(
            SignalCategory::BrandGuard,
            SIGNAL_NAME,
            finding.weight.clamp(0.0, 1.0),
            finding.rationale,
        )?
        .with_confidence((0.5 + 0.5 * finding.similarity).clamp(0.0, 1.0))?
        .with_severity(finding.severity);
        Ok(Some(signal))
    }
}

#[async_trait]
impl SignalProducer for BrandGuard {
    fn name(&self) -> &'static str {
        "brand_guard"
    }

    fn category(&self) -> SignalCategory {
        SignalCategory::BrandGuard
    }

    async fn produce(&self, content: &ExtractedContent) -> Result<Vec<Signal>, ProducerError> {
        Ok(self.evaluate(content)?.into_iter().collect())
    }
}

fn strongest_finding(book: &BrandBook, content: &ExtractedContent) -> Option<Finding> {
    let display_name_lc = content
        .sender
        .as_ref()
        .and_then(|s| s.display_name.as_deref())
        .unwrap_or_default()
        .to_lowercase();
    let subject_lc = content.subject.as_deref().unwrap_or_default().to_lowercase();
    let body_lc = [
        content.page.as_ref().and_then(|p| p.title.as_deref()),
        Some(content.text.as_str()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n")
    .to_lowercase();

    let mail_domains: Vec<&str> = [
        content.sender_registered_domain(),
        content.reply_to_registered_domain(),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut web_domains: Vec<String> = Vec::new();
    let page_host = content.page.as_ref().and_then(|p| host_of(&p.final_url));
    for host in page_host.iter().chain(content.link_domains.iter()) {
        if let Some(domain) = registered_domain(host) {
            if !web_domains.contains(&domain) {
                web_domains.push(domain);
            }
        }
    }

    let mentioned: Vec<(&Brand, Mention)> = book
        .brands()
        .iter()
        .filter_map(|brand| {
            brand
                .mention_in(&display_name_lc, &subject_lc, &body_lc)
                .map(|mention| (brand, mention))
        })
        .collect();

    let mut best: Option<Finding> = None;
    let mut consider = |finding: Finding| {
        if best.as_ref().map_or(true, |b| finding.weight > b.weight) {
            best = Some(finding);
        }
    };

    if mentioned.is_empty() {
        for brand in book.brands() {
            let targets = brand.similarity_targets();
            for domain in mail_domains.iter().copied().chain(web_domains.iter().map(String::as_str)) {
                if brand.is_official(domain) {
                    continue;
                }
                let sim = similarity(domain, &targets);
                if sim >= UNMENTIONED_LOOKALIKE {
                    consider(Finding {
                        weight: 0.3 + 0.4 * sim,
                        similarity: sim,
                        severity: Severity::Normal,
                        rationale: format!(
                            "domain {domain} resembles brand '{}' (similarity {sim:.2})",
                            brand.key
                        ),
                    });
                }
            }
        }
        return best;
    }

    for (brand, mention) in mentioned {
        let targets = brand.similarity_targets();
        let official = brand.official_domains.join(", ");

        for domain in &mail_domains {
            if brand.is_official(domain) {
                continue;
            }
            let sim = similarity(domain, &targets);
            match mention {
                Mention::Claimed => consider(Finding {
                    weight: 0.6 + 0.35 * sim.max(0.0),
                    similarity: sim,
                    severity: Severity::Critical,
                    rationale: format!(
                        "brand '{}' is claimed but the mail comes from {domain}, outside the official domains ({official})",
                        brand.key
                    ),
                }),
                Mention::Body if sim >= MENTIONED_LOOKALIKE => consider(Finding {
                    weight: 0.4 + 0.5 * sim,
                    similarity: sim,
                    severity: Severity::Elevated,
                    rationale: format!(
                        "brand '{}' is mentioned and the mail comes from lookalike domain {domain} (similarity {sim:.2}; official: {official})",
                        brand.key
                    ),
                }),
                Mention::Body => {}
            }
        }

        for domain in &web_domains {
            if brand.is_official(domain) {
                continue;
            }
            let sim = similarity(domain, &targets);
            if sim >= MENTIONED_LOOKALIKE {
                consider(Finding {
                    weight: 0.4 + 0.5 * sim,
                    similarity: sim,
                    severity: if sim >= MENTIONED_CRITICAL {
                        Severity::Critical
                    } else {
                        Severity::Elevated
                    },
                    rationale: format!(
                        "brand '{}' is claimed but links to lookalike domain {domain} (similarity {sim:.2}; official: {official})",
                        brand.key
                    ),
                });
            }
        }
    }
    best
}

/// Best normalized Levenshtein between the domain's label (whole and split on
/// `-`/`.`) and any of the brand targets.
fn similarity(domain: &str, targets: &[String]) -> f64 {
    let label = domain_label(domain);
    let mut tokens: Vec<&str> = label
        .split(['-', '.'])
        .filter(|t| !t.is_empty())
        .collect();
    let compact: String = label.chars().filter(|c| c.is_alphanumeric()).collect();
    tokens.push(&label);
    tokens.push(&compact);

    tokens
        .iter()
        .flat_map(|token| targets.iter().map(move |target| token_similarity(token, target)))
        .fold(0.0, f64::max)
}

fn token_similarity(token: &str, target: &str) -> f64 {
    if token == target {
        return 1.0;
    }
    if token.chars().count() < MIN_FUZZY_LEN || target.chars().count() < MIN_FUZZY_LEN {
        return 0.0;
    }
    strsim::normalized_levenshtein(token, target)
}

/// `login.bancox-seguro.com.br` → `login.bancox-seguro`.
fn domain_label(domain: &str) -> String {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    match public_suffix(&domain) {
        Some(suffix) if domain.len() > suffix.len() + 1 && domain.ends_with(&suffix) => {
            domain[..domain.len() - suffix.len() - 1].to_string()
        }
        _ => domain,
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Link, MailIdentity, SourceKind};

    fn bancox_book() -> BrandBook {
        BrandBook::new(vec![Brand::new("bancox", &["bancox.com.br"])])
    }

    fn sender(display: &str, address: &str) -> MailIdentity {
        let domain = address.split('@').nth(1).unwrap().to_string();
        MailIdentity {
            display_name: Some(display.to_string()),
            address: Some(address.to_string()),
            registered_domain: registered_domain(&domain),
            domain: Some(domain),
        }
    }

    fn page_with_link(text: &str, href: &str) -> ExtractedContent {
        let mut content = ExtractedContent::new(SourceKind::Url);
        content.text = text.to_string();
        content.links = vec![Link {
            href: href.to_string(),
            anchor_text: None,
        }];
        content.link_domains = vec![host_of(href).unwrap()];
        content
    }

    #[test]
    fn mentioned_brand_with_lookalike_link_is_critical() {
        let guard = BrandGuard::new(bancox_book());
        let content = page_with_link(
            "Bem-vindo ao BancoX. Atualize seu cadastro.",
            "https://bancox-secure-login.net/entrar",
        );

        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.name(), "brand_impersonation");
        assert_eq!(signal.severity(), Severity::Critical);
        assert!((signal.weight() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn official_links_do_not_fire() {
        let guard = BrandGuard::new(bancox_book());
        let content = page_with_link("Bem-vindo ao BancoX", "https://www.bancox.com.br/login");
        assert!(guard.evaluate(&content).unwrap().is_none());
    }

    #[test]
    fn claimed_brand_from_foreign_sender_is_critical() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let mut content = ExtractedContent::new(SourceKind::Email);
        content.sender = Some(sender("Itaú Unibanco", "aviso@seguranca-conta.xyz"));
        content.text = "Sua conta foi bloqueada.".into();

        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.severity(), Severity::Critical);
        assert!(signal.weight() >= 0.6);
        assert!(signal.rationale().contains("itau"));
    }

    #[test]
    fn brand_named_in_the_subject_is_a_claim() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let mut content = ExtractedContent::new(SourceKind::Email);
        content.sender = Some(sender("Central de Avisos", "avisos@notificacoes-web.top"));
        content.subject = Some("Nubank: confirme seus dados".into());

        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.severity(), Severity::Critical);
        assert!(signal.rationale().contains("nubank"));
    }

    #[test]
    fn brand_mentioned_only_in_a_personal_mail_body_is_not_a_claim() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let mut content = ExtractedContent::new(SourceKind::Email);
        content.sender = Some(sender("Maria", "maria@gmail.com"));
        content.subject = Some("Livro".into());
        content.text = "Comprei o livro na Amazon ontem, chega semana que vem.".into();
        assert!(guard.evaluate(&content).unwrap().is_none());

        // A lookalike sender still counts, but below the critical band.
        content.sender = Some(sender("Maria", "pedidos@amazonn.com"));
        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.severity(), Severity::Elevated);
        assert!(signal.weight() < 0.9 + 1e-9);
    }

    #[test]
    fn official_sender_is_not_flagged() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let mut content = ExtractedContent::new(SourceKind::Email);
        content.sender = Some(sender("Itaú", "comunicado@emails.itau.com.br"));
        content.text = "Seu extrato mensal do Itaú está disponível.".into();
        assert!(guard.evaluate(&content).unwrap().is_none());
    }

    #[test]
    fn ambiguous_brand_words_need_a_display_name() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let mut content = ExtractedContent::new(SourceKind::Email);
        content.sender = Some(sender("Maria", "maria@gmail.com"));
        content.text = "Oi, claro que sim! Vivo dizendo isso.".into();
        assert!(guard.evaluate(&content).unwrap().is_none());

        content.sender = Some(sender("Claro", "fatura@claro-pagamentos.top"));
        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.severity(), Severity::Critical);
    }

    #[test]
    fn unmentioned_lookalike_is_a_normal_finding() {
        let guard = BrandGuard::new(BrandBook::builtin());
        let content = page_with_link("Confira as ofertas", "https://nubank-ofertas.com/promo");

        let signal = guard.evaluate(&content).unwrap().unwrap();
        assert_eq!(signal.severity(), Severity::Normal);
        assert!((signal.weight() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn unreadable_brand_list_fails_the_producer() {
        let guard = BrandGuard::from_path(Some(Path::new("/nonexistent/brands.json")));
        let content = ExtractedContent::new(SourceKind::Text);
        assert!(matches!(
            guard.evaluate(&content),
            Err(ProducerError::BrandList(_))
        ));
    }

    #[test]
    fn nested_json_brand_list() {
        let book = BrandBook::from_json(
            r#"{"bancos": {"itau": ["itau.com.br"]}, "varejo": {"loja_azul": ["lojaazul.com.br"]}}"#,
        )
        .unwrap();
        let keys: Vec<_> = book.brands().iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["itau", "loja_azul"]);
        assert!(book.brands()[0].aliases.contains(&"itaú".to_string()));
        assert!(book.brands()[1].aliases.contains(&"loja azul".to_string()));
    }

    #[test]
    fn word_boundaries_are_respected() {
        assert!(contains_word("bem-vindo ao bancox.", "bancox"));
        assert!(!contains_word("bancoxyz", "bancox"));
        assert!(contains_word("itaú unibanco", "itaú"));
        assert_eq!(domain_label("login.bancox-seguro.com.br"), "login.bancox-seguro");
    }
}
