use mailparse::{
    addrparse_header, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail, SingleInfo,
};
use tracing::{debug, warn};

use crate::domain::{Degradation, ExtractedContent, MailIdentity, SourceKind};

use super::{
    html::{collapse_whitespace, parse_html, ParsedHtml},
    links::{registered_domain, LinkCollector},
    truncate_chars, MAX_TEXT_CHARS,
};

/// Parses a raw RFC 5322 message. Never fails: unparsable input degrades.
pub fn extract_email(bytes: &[u8]) -> ExtractedContent {
    let message = match parse_mail(bytes) {
        Ok(message) => message,
        Err(err) => {
            warn!(target: "email", bytes = bytes.len(), error = %err, "email could not be parsed");
            return ExtractedContent::degraded(SourceKind::Email, Degradation::EmailUnparsable);
        }
    };
    if message.headers.is_empty() {
        warn!(target: "email", bytes = bytes.len(), "email has no headers");
        return ExtractedContent::degraded(SourceKind::Email, Degradation::EmailUnparsable);
    }

    let sender = mail_identity(&message, "From");
    let reply_to = mail_identity(&message, "Reply-To");
    let subject = header_value(&message, "Subject");
    let list_unsubscribe = header_value(&message, "List-Unsubscribe")
        .or_else(|| header_value(&message, "List-Unsubscribe-Post"));

    let mut plain_parts: Vec<String> = Vec::new();
    let mut html_parts: Vec<ParsedHtml> = Vec::new();
    for part in message.parts().filter(|p| p.subparts.is_empty()) {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            continue;
        }
        let body = match part.get_body() {
            Ok(body) => body,
            Err(err) => {
                debug!(target: "email", mime = %part.ctype.mimetype, error = %err, "body part skipped");
                continue;
            }
        };
        match part.ctype.mimetype.as_str() {
            "text/plain" => {
                let body = body.trim();
                if !body.is_empty() {
                    plain_parts.push(body.to_string());
                }
            }
            "text/html" => html_parts.push(parse_html(&body, None)),
            _ => {}
        }
    }

    let plain_text = plain_parts.join("\n");
    let mut collector = LinkCollector::new();
    for parsed in &html_parts {
        for (href, anchor_text) in &parsed.anchors {
            collector.push(href, anchor_text.as_deref());
        }
    }
    collector.extend_from_text(&plain_text);
    let (links, link_domains) = collector.into_parts();

    let mut text = plain_text;
    for parsed in html_parts.iter().filter(|p| !p.text.is_empty()) {
        if collapse_whitespace(&text).contains(parsed.text.as_str()) {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&parsed.text);
    }

    debug!(
        target: "email",
        sender = sender.as_ref().and_then(|s| s.domain.as_deref()).unwrap_or("-"),
        links = links.len(),
        chars = text.chars().count(),
        "email parsed"
    );

    ExtractedContent {
        text: truncate_chars(text.trim(), MAX_TEXT_CHARS),
        links,
        link_domains,
        sender,
        reply_to,
        subject,
        list_unsubscribe,
        ..ExtractedContent::new(SourceKind::Email)
    }
}

fn header_value(message: &ParsedMail<'_>, name: &str) -> Option<String> {
    message
        .headers
        .get_first_value(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First mailbox of an address header, groups included.
fn mail_identity(message: &ParsedMail<'_>, name: &str) -> Option<MailIdentity> {
    let header = message.headers.get_first_header(name)?;
    let addresses = match addrparse_header(header) {
        Ok(list) => list,
        Err(err) => {
            debug!(target: "email", header = name, error = %err, "address header did not parse");
            return None;
        }
    };
    let first: SingleInfo = addresses.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.clone()),
        MailAddr::Group(group) => group.addrs.first().cloned(),
    })?;

    let display_name = first
        .display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let email = Some(first.addr.trim().to_ascii_lowercase()).filter(|a| !a.is_empty());
    let domain = email
        .as_deref()
        .and_then(|a| a.rsplit_once('@'))
        .map(|(_, domain)| domain.trim_end_matches('.').to_string())
        .filter(|d| !d.is_empty());
    let registered = domain.as_deref().and_then(registered_domain);

    if display_name.is_none() && email.is_none() {
        return None;
    }
    Some(MailIdentity {
        display_name,
        address: email,
        domain,
        registered_domain: registered,
    })
}
