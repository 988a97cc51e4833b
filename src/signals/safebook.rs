use std::{fs, io::ErrorKind, path::Path};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use crate::{config::ConfigError, extract::links::domain_matches};

#[derive(Debug, Default, Deserialize)]
struct SafebookFile {
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    phrases: Vec<String>,
}

#[derive(Debug, Default)]
struct Entries {
    domains: Vec<String>,
    phrases: Vec<String>,
}

/// Operator allow-list of domains and phrases. Read once at startup and
/// only ever extended in memory.
#[derive(Debug, Default)]
pub struct Safebook {
    entries: RwLock<Entries>,
}

impl Safebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file is an empty safebook; a malformed one is fatal.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "safebook not found; starting empty");
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(ConfigError::Reference {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })
            }
        };

        let file: SafebookFile =
            serde_json::from_str(&raw).map_err(|err| ConfigError::Reference {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        let safebook = Self::new();
        for domain in &file.domains {
            safebook.add_domain(domain);
        }
        for phrase in &file.phrases {
            safebook.add_phrase(phrase);
        }
        info!(
            path = %path.display(),
            domains = file.domains.len(),
            phrases = file.phrases.len(),
            "safebook loaded"
        );
        Ok(safebook)
    }

    pub fn add_domain(&self, domain: &str) -> bool {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        let mut entries = self.entries.write();
        if entries.domains.contains(&domain) {
            return false;
        }
        entries.domains.push(domain);
        true
    }

    pub fn add_phrase(&self, phrase: &str) -> bool {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return false;
        }
        let mut entries = self.entries.write();
        if entries.phrases.contains(&phrase) {
            return false;
        }
        entries.phrases.push(phrase);
        true
    }

    /// First safebook domain that `host` equals or is a subdomain of.
    pub fn matching_domain(&self, host: &str) -> Option<String> {
        let host = host.trim().to_ascii_lowercase();
        self.entries
            .read()
            .domains
            .iter()
            .find(|domain| domain_matches(&host, domain))
            .cloned()
    }

    /// First safebook phrase contained in the already lowercased text.
    pub fn matching_phrase(&self, text_lc: &str) -> Option<String> {
        self.entries
            .read()
            .phrases
            .iter()
            .find(|phrase| text_lc.contains(phrase.as_str()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.entries.read();
        entries.domains.is_empty() && entries.phrases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn loads_domains_and_phrases_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"domains": ["Empresa.com.br"], "phrases": ["Comunicado Interno"]}}"#
        )
        .unwrap();

        let safebook = Safebook::load(file.path()).unwrap();
        assert_eq!(
            safebook.matching_domain("portal.empresa.com.br").as_deref(),
            Some("empresa.com.br")
        );
        assert_eq!(safebook.matching_domain("naoempresa.com.br"), None);
        assert!(safebook
            .matching_phrase("segue o comunicado interno de hoje")
            .is_some());
    }

    #[test]
    fn missing_file_is_empty_and_malformed_file_is_an_error() {
        let safebook = Safebook::load(Path::new("/nonexistent/safebook.json")).unwrap();
        assert!(safebook.is_empty());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            Safebook::load(file.path()),
            Err(ConfigError::Reference { .. })
        ));
    }

    #[test]
    fn additions_are_deduplicated() {
        let safebook = Safebook::new();
        assert!(safebook.add_domain("exemplo.org"));
        assert!(!safebook.add_domain(" EXEMPLO.org "));
        assert!(!safebook.add_phrase("   "));
    }
}
