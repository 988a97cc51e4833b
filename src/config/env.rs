use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub directories: DirectoryConfig,
    pub input: InputConfig,
    pub ocr: OcrConfig,
    pub web: WebContentConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub scoring: ScoringConfig,
    pub reference: ReferenceConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            logs_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub max_input_bytes: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

/// How many preprocessing variants and segmentation modes are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    Fast,
    Aggressive,
}

impl OcrMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "aggressive" | "full" => Some(Self::Aggressive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract language hint, e.g. `por+eng`.
    pub language: String,
    pub tesseract_cmd: PathBuf,
    pub mode: OcrMode,
    /// Scale factor applied before recognition; `1.0` keeps the original size.
    pub upscale: f32,
    /// Characters for the extra whitelisted pass; no such pass when unset.
    pub whitelist: Option<String>,
    /// Soft budget: no new recognition pass starts once it is spent.
    pub time_budget: Duration,
    /// Hard limit for the whole recognition of one image.
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "por+eng".to_string(),
            tesseract_cmd: PathBuf::from("tesseract"),
            mode: OcrMode::Fast,
            upscale: 2.0,
            whitelist: None,
            time_budget: Duration::from_millis(2_200),
            timeout: Duration::from_millis(20_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebContentConfig {
    pub fetch_timeout: Duration,
    pub max_page_bytes: usize,
    pub content_max_length: usize,
    pub max_redirects: usize,
}

impl Default for WebContentConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(8_000),
            max_page_bytes: 5 * 1024 * 1024,
            content_max_length: 20_000,
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub max_capacity_mb: u64,
    pub ocr_ttl: Duration,
    pub url_ttl: Duration,
    pub llm_ttl: Duration,
    pub sweep_cron: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            max_capacity_mb: 64,
            ocr_ttl: Duration::from_secs(86_400),
            url_ttl: Duration::from_secs(21_600),
            llm_ttl: Duration::from_secs(43_200),
            sweep_cron: "0 */10 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: i32,
    pub timeout: Duration,
}

impl LlmConfig {
    /// The client only runs when enabled and a credential is present.
    pub fn is_available(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_url: DEFAULT_LLM_API_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 700,
            timeout: Duration::from_millis(15_000),
        }
    }
}

/// Lower bounds of the `suspicious` and `fraudulent` bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub suspicious: f64,
    pub fraudulent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            suspicious: 0.35,
            fraudulent: 0.60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryWeights {
    pub heuristics: f64,
    pub brand_guard: f64,
    pub llm: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            heuristics: 0.40,
            brand_guard: 0.25,
            llm: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoringConfig {
    pub thresholds: Thresholds,
    pub weights: CategoryWeights,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Thresholds {
            suspicious,
            fraudulent,
        } = self.thresholds;
        if !(0.0..=1.0).contains(&suspicious) || !(0.0..=1.0).contains(&fraudulent) {
            return Err(ConfigError::invalid(
                "SCORE_*_THRESHOLD",
                "thresholds must lie in [0, 1]",
            ));
        }
        if suspicious <= 0.0 || suspicious >= fraudulent {
            return Err(ConfigError::invalid(
                "SCORE_*_THRESHOLD",
                format!(
                    "bands must satisfy 0 < suspicious < fraudulent (got {suspicious} and {fraudulent})"
                ),
            ));
        }

        let weights = [
            ("SCORE_WEIGHT_HEURISTICS", self.weights.heuristics),
            ("SCORE_WEIGHT_BRAND", self.weights.brand_guard),
            ("SCORE_WEIGHT_LLM", self.weights.llm),
        ];
        for (key, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::invalid(key, "weight must be a non-negative number"));
            }
        }
        if weights.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "SCORE_WEIGHT_*",
                "at least one category weight must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceConfig {
    pub brand_list_path: Option<PathBuf>,
    pub safebook_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to load reference file {path}: {reason}")]
    Reference { path: PathBuf, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
