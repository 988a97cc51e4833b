use std::{collections::HashSet, net::IpAddr};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::domain::Link;

pub const MAX_LINKS: usize = 300;
pub const MAX_LINK_DOMAINS: usize = 80;

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s)>'"]+"#).expect("valid url regex"));

/// Finds http(s) URLs in free text, trimming punctuation that belongs to the
/// surrounding sentence.
pub fn extract_urls(text: &str, limit: usize) -> Vec<String> {
    URL_REGEX
        .find_iter(text)
        .map(|m| trim_url_punctuation(m.as_str()))
        .filter(|url| url.len() > "https://".len())
        .take(limit)
        .collect()
}

/// Canonical form used for cache keys: http(s) only, no fragment.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

pub fn host_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    url.host_str()
        .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
        .filter(|host| !host.is_empty())
}

pub fn is_ip_host(host: &str) -> bool {
    host.trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
        .is_ok()
}

/// `login.secure.example.com.br` → `example.com.br`, using the public suffix list.
pub fn registered_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || is_ip_host(&host) {
        return None;
    }
    psl::domain_str(&host).map(str::to_string)
}

/// Public suffix of a host, e.g. `com.br` or `xyz`.
pub fn public_suffix(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || is_ip_host(&host) {
        return None;
    }
    psl::suffix_str(&host).map(str::to_string)
}

/// Whether `domain` is `official` or one of its subdomains.
pub fn domain_matches(domain: &str, official: &str) -> bool {
    let domain = domain.trim_end_matches('.');
    domain == official
        || domain
            .strip_suffix(official)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Ordered, de-duplicated links plus the distinct hosts they point to.
#[derive(Debug, Default)]
pub struct LinkCollector {
    links: Vec<Link>,
    domains: Vec<String>,
    seen_links: HashSet<String>,
    seen_domains: HashSet<String>,
}

impl LinkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, href: &str, anchor_text: Option<&str>) {
        let href = href.trim();
        if href.is_empty() || self.links.len() >= MAX_LINKS || !self.seen_links.insert(href.to_string())
        {
            return;
        }

        if let Some(host) = host_of(href) {
            if self.domains.len() < MAX_LINK_DOMAINS && self.seen_domains.insert(host.clone()) {
                self.domains.push(host);
            }
        }

        let anchor_text = anchor_text
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());
        self.links.push(Link {
            href: href.to_string(),
            anchor_text,
        });
    }

    pub fn extend_from_text(&mut self, text: &str) {
        for url in extract_urls(text, MAX_LINKS) {
            self.push(&url, None);
        }
    }

    pub fn into_parts(self) -> (Vec<Link>, Vec<String>) {
        (self.links, self.domains)
    }
}

fn trim_url_punctuation(raw: &str) -> String {
    let mut cleaned = raw.trim_end_matches(char::is_whitespace).to_string();
    while let Some(last) = cleaned.chars().last() {
        let should_trim = match last {
            ')' => !cleaned.contains('('),
            ']' => !cleaned.contains('['),
            '}' => !cleaned.contains('{'),
            ',' | '.' | '!' | '?' | ';' | ':' => true,
            _ => false,
        };
        if should_trim {
            cleaned.pop();
        } else {
            break;
        }
    }
    cleaned
}
