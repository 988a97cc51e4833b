use std::{env, path::PathBuf, str::FromStr, time::Duration};

use super::env::{
    AppConfig, CacheBackendKind, CacheConfig, CategoryWeights, ConfigError, DirectoryConfig,
    InputConfig, LlmConfig, LoggingConfig, OcrConfig, OcrMode, ReferenceConfig, ScoringConfig, Thresholds,
    WebContentConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Scoring and cache-backend keys are strict: a malformed value is a
    /// startup error. Everything else falls back to its default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let logging = LoggingConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let directories = DirectoryConfig {
            logs_dir: get("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
        };

        let input_defaults = InputConfig::default();
        let input = InputConfig {
            max_input_bytes: parse_or(&get, "MAX_INPUT_MB", 0usize)
                .checked_mul(1024 * 1024)
                .filter(|bytes| *bytes > 0)
                .unwrap_or(input_defaults.max_input_bytes),
        };

        let ocr_defaults = OcrConfig::default();
        let ocr = OcrConfig {
            language: get("OCR_LANG").unwrap_or(ocr_defaults.language),
            tesseract_cmd: get("TESSERACT_CMD")
                .map(PathBuf::from)
                .unwrap_or(ocr_defaults.tesseract_cmd),
            mode: get("OCR_MODE")
                .and_then(|raw| OcrMode::parse(&raw))
                .unwrap_or(ocr_defaults.mode),
            upscale: get("OCR_UPSCALE")
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .map_or(ocr_defaults.upscale, |v| v.clamp(1.0, 4.0)),
            whitelist: get("OCR_WHITELIST").or(ocr_defaults.whitelist),
            time_budget: millis_or(&get, "OCR_TIME_BUDGET_MS", ocr_defaults.time_budget),
            timeout: millis_or(&get, "OCR_TIMEOUT_MS", ocr_defaults.timeout),
        };

        let web_defaults = WebContentConfig::default();
        let web = WebContentConfig {
            fetch_timeout: millis_or(&get, "WEBPAGE_FETCH_TIMEOUT", web_defaults.fetch_timeout),
            max_page_bytes: parse_or(&get, "WEBPAGE_MAX_BYTES", web_defaults.max_page_bytes),
            content_max_length: parse_or(
                &get,
                "WEBPAGE_CONTENT_MAX_LENGTH",
                web_defaults.content_max_length,
            ),
            max_redirects: web_defaults.max_redirects,
        };

        let cache_defaults = CacheConfig::default();
        let backend = match get("CACHE_BACKEND").as_deref().map(str::trim) {
            None => cache_defaults.backend,
            Some(v) if v.eq_ignore_ascii_case("memory") => CacheBackendKind::Memory,
            Some(v) if v.eq_ignore_ascii_case("disabled") || v.eq_ignore_ascii_case("none") => {
                CacheBackendKind::Disabled
            }
            Some(other) => {
                return Err(ConfigError::invalid(
                    "CACHE_BACKEND",
                    format!("unknown backend `{other}` (expected `memory` or `disabled`)"),
                ))
            }
        };
        let cache = CacheConfig {
            backend,
            max_capacity_mb: parse_or(&get, "CACHE_MAX_CAPACITY_MB", cache_defaults.max_capacity_mb),
            ocr_ttl: secs_or(&get, "CACHE_TTL_OCR_SECS", cache_defaults.ocr_ttl),
            url_ttl: secs_or(&get, "CACHE_TTL_URL_SECS", cache_defaults.url_ttl),
            llm_ttl: secs_or(&get, "CACHE_TTL_LLM_SECS", cache_defaults.llm_ttl),
            sweep_cron: get("CACHE_SWEEP_CRON").unwrap_or(cache_defaults.sweep_cron),
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            enabled: get("LLM_ENABLED")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(llm_defaults.enabled),
            api_key: get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            api_url: get("LLM_API_URL").unwrap_or(llm_defaults.api_url),
            model: get("LLM_MODEL").unwrap_or(llm_defaults.model),
            temperature: parse_or(&get, "LLM_TEMPERATURE", llm_defaults.temperature),
            max_tokens: llm_defaults.max_tokens,
            timeout: millis_or(&get, "LLM_TIMEOUT_MS", llm_defaults.timeout),
        };

        let threshold_defaults = Thresholds::default();
        let weight_defaults = CategoryWeights::default();
        let scoring = ScoringConfig {
            thresholds: Thresholds {
                suspicious: parse_strict(
                    &get,
                    "SCORE_SUSPICIOUS_THRESHOLD",
                    threshold_defaults.suspicious,
                )?,
                fraudulent: parse_strict(
                    &get,
                    "SCORE_FRAUD_THRESHOLD",
                    threshold_defaults.fraudulent,
                )?,
            },
            weights: CategoryWeights {
                heuristics: parse_strict(
                    &get,
                    "SCORE_WEIGHT_HEURISTICS",
                    weight_defaults.heuristics,
                )?,
                brand_guard: parse_strict(&get, "SCORE_WEIGHT_BRAND", weight_defaults.brand_guard)?,
                llm: parse_strict(&get, "SCORE_WEIGHT_LLM", weight_defaults.llm)?,
            },
        };
        scoring.validate()?;

        let reference = ReferenceConfig {
            brand_list_path: get("BRAND_LIST_PATH").map(PathBuf::from),
            safebook_path: get("SAFEBOOK_PATH").map(PathBuf::from),
        };

        Ok(Self {
            logging,
            directories,
            input,
            ocr,
            web,
            cache,
            llm,
            scoring,
            reference,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    get(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_strict<F>(get: &F, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ConfigError::invalid(key, format!("`{raw}` is not a number"))),
    }
}

fn millis_or<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn secs_or<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
