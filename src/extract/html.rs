use dom_query::Document;
use url::Url;

/// Markup reduced to what the signal producers look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHtml {
    pub title: Option<String>,
    /// Visible text with `script`, `style` and `noscript` removed.
    pub text: String,
    /// Absolute http(s) anchors and their visible text, in document order.
    pub anchors: Vec<(String, Option<String>)>,
}

pub fn parse_html(html: &str, base: Option<&Url>) -> ParsedHtml {
    let document = Document::from(html);

    let title = collapse_whitespace(&document.select("title").text());
    document.select("script, style, noscript").remove();

    let anchors = document
        .select("a[href]")
        .iter()
        .filter_map(|anchor| {
            let href = anchor.attr("href")?;
            let href = resolve_href(href.trim(), base)?;
            let text = collapse_whitespace(&anchor.text());
            Some((href, (!text.is_empty()).then_some(text)))
        })
        .collect();

    let text = collapse_whitespace(&document.select("body").formatted_text());

    ParsedHtml {
        title: (!title.is_empty()).then_some(title),
        text,
        anchors,
    }
}

fn resolve_href(href: &str, base: Option<&Url>) -> Option<String> {
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> BancoX | Acesso </title>
        <style>.x { color: red }</style><script>var token = "segredo";</script></head>
        <body><h1>Bem-vindo ao BancoX</h1>
        <a href="https://bancox-secure-login.net/entrar">Acesse sua conta</a>
        <a href="/ajuda">Ajuda</a>
        <a href="mailto:sac@bancox.com.br">SAC</a>
        <noscript>habilite o javascript</noscript></body></html>"#;

    #[test]
    fn extracts_title_text_and_absolute_links() {
        let base = Url::parse("https://portal.example.com/inicio").unwrap();
        let parsed = parse_html(PAGE, Some(&base));

        assert_eq!(parsed.title.as_deref(), Some("BancoX | Acesso"));
        assert!(parsed.text.contains("Bem-vindo ao BancoX"));
        assert!(!parsed.text.contains("segredo"));
        assert!(!parsed.text.contains("habilite"));
        assert_eq!(
            parsed.anchors,
            vec![
                (
                    "https://bancox-secure-login.net/entrar".to_string(),
                    Some("Acesse sua conta".to_string())
                ),
                (
                    "https://portal.example.com/ajuda".to_string(),
                    Some("Ajuda".to_string())
                ),
            ]
        );
    }

    #[test]
    fn relative_links_are_dropped_without_base() {
        let parsed = parse_html(r#"<a href="/x">x</a>"#, None);
        assert!(parsed.anchors.is_empty());
        assert_eq!(parsed.title, None);
    }
}
