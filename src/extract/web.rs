use dom_smoothie::{Config as ReadabilityConfig, Readability, TextMode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    cache::{Cache, Fingerprint, Namespace},
    config::WebContentConfig,
    domain::{Degradation, ExtractedContent, Link, PageSnapshot, SourceKind},
};

use super::{
    html::{collapse_whitespace, parse_html},
    links::{normalize_url, LinkCollector},
    truncate_chars,
};

/// Confidence assigned to pages that answered with a non-2xx status.
const ERROR_PAGE_CONFIDENCE: f64 = 0.6;

/// Result of one fetch+parse, stored in the `url` cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub page: PageSnapshot,
    pub text: String,
    pub links: Vec<Link>,
}

pub struct WebContentFetcher {
    client: Client,
    config: WebContentConfig,
    cache: Cache,
}

impl WebContentFetcher {
    pub fn new(client: Client, config: WebContentConfig, cache: Cache) -> Self {
        Self {
            client,
            config,
            cache,
        }
    }

    pub async fn extract(&self, raw_url: &str) -> ExtractedContent {
        let Some(url) = normalize_url(raw_url) else {
            return ExtractedContent::degraded(
                SourceKind::Url,
                Degradation::FetchFailed("not an http(s) URL".into()),
            );
        };

        let fingerprint = Fingerprint::of_str(url.as_str());
        let fetched = match self.cache.get::<FetchedPage>(Namespace::Url, &fingerprint).await {
            Some(cached) => {
                debug!(target: "web", url = %url, "page served from cache");
                cached
            }
            None => match self.fetch(&url).await {
                Ok(page) => {
                    self.cache.put(Namespace::Url, &fingerprint, &page).await;
                    page
                }
                Err(reason) => {
                    warn!(target: "web", url = %url, reason = %reason, "page fetch degraded");
                    let mut content = ExtractedContent::degraded(SourceKind::Url, reason);
                    content.page = Some(PageSnapshot::unreachable(url.as_str()));
                    return content;
                }
            },
        };

        into_content(fetched)
    }

    /// Fetches and parses one page. Only a received response counts as a
    /// result; everything else is a degradation and is never cached.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, Degradation> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(fetch_degradation)?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let limit = self.config.max_page_bytes;

        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(Degradation::Oversized);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_degradation)? {
            if body.len() + chunk.len() > limit {
                return Err(Degradation::Oversized);
            }
            body.extend_from_slice(&chunk);
        }
        let html = String::from_utf8_lossy(&body);

        let parsed = parse_html(&html, Some(&final_url));
        let text = readable_text(&html, &final_url).unwrap_or(parsed.text);
        let text = truncate_chars(&text, self.config.content_max_length);

        let mut collector = LinkCollector::new();
        for (href, anchor_text) in &parsed.anchors {
            collector.push(href, anchor_text.as_deref());
        }
        collector.extend_from_text(&text);
        let (links, _) = collector.into_parts();

        info!(
            target: "web",
            url = %url,
            status,
            bytes = body.len(),
            links = links.len(),
            "page fetched"
        );

        Ok(FetchedPage {
            page: PageSnapshot {
                requested_url: url.to_string(),
                redirected: final_url != *url,
                final_url: final_url.to_string(),
                status: Some(status),
                title: parsed.title,
            },
            text,
            links,
        })
    }
}

fn into_content(fetched: FetchedPage) -> ExtractedContent {
    let mut collector = LinkCollector::new();
    for link in &fetched.links {
        collector.push(&link.href, link.anchor_text.as_deref());
    }
    let (links, link_domains) = collector.into_parts();

    let confidence = if fetched.page.is_accessible() {
        1.0
    } else {
        ERROR_PAGE_CONFIDENCE
    };

    ExtractedContent {
        text: fetched.text,
        links,
        link_domains,
        page: Some(fetched.page),
        confidence,
        ..ExtractedContent::new(SourceKind::Url)
    }
}

/// Main article text via readability; `None` when it finds nothing usable.
fn readable_text(html: &str, url: &Url) -> Option<String> {
    let config = ReadabilityConfig {
        text_mode: TextMode::Formatted,
        ..Default::default()
    };

    let mut readability = match Readability::new(html, Some(url.as_str()), Some(config)) {
        Ok(reader) => reader,
        Err(err) => {
            debug!(target: "web", error = %err, url = %url, "readability init failed");
            return None;
        }
    };

    match readability.parse() {
        Ok(article) => {
            let text = collapse_whitespace(&article.text_content);
            (!text.is_empty()).then_some(text)
        }
        Err(err) => {
            debug!(target: "web", error = %err, url = %url, "readability parse failed");
            None
        }
    }
}

fn fetch_degradation(err: reqwest::Error) -> Degradation {
    if err.is_timeout() {
        Degradation::FetchTimeout
    } else if err.is_connect() {
        Degradation::FetchFailed("could not connect (DNS or connection refused)".into())
    } else if err.is_redirect() {
        Degradation::FetchFailed("too many redirects".into())
    } else {
        Degradation::FetchFailed(err.to_string())
    }
}
