use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::{redirect::Policy, Client};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    ai::LlmClient,
    cache::Cache,
    config::AppConfig,
    domain::{AnalysisRequest, ExtractedContent, ExtractionSummary, InputError, ScoreResult, Signal},
    extract::{ContentExtractor, OcrEngine, TesseractOcr},
    infrastructure::shutdown::ShutdownListener,
    scoring::ScoringEngine,
    signals::{BrandBook, BrandGuard, HeuristicsEngine, Safebook, SignalProducer},
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("analysis cancelled by shutdown")]
    Cancelled,
}

/// Validates, extracts, fans out to every signal producer and scores.
pub struct FraudChecker {
    max_input_bytes: usize,
    extractor: ContentExtractor,
    producers: Vec<Arc<dyn SignalProducer>>,
    scoring: ScoringEngine,
    cache: Cache,
}

impl FraudChecker {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::builder(config.clone()).build()
    }

    pub fn builder(config: AppConfig) -> FraudCheckerBuilder {
        FraudCheckerBuilder::new(config)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<ScoreResult, InputError> {
        let started = Instant::now();
        request.validate(self.max_input_bytes)?;

        let content = Arc::new(self.extractor.extract(request).await);
        let signals = self.collect_signals(Arc::clone(&content)).await;
        let result = self
            .scoring
            .score(signals, ExtractionSummary::from(content.as_ref()));

        let stats = self.cache.stats();
        info!(
            target: "pipeline",
            kind = request.kind().as_str(),
            verdict = %result.verdict,
            score = result.score,
            confidence = result.confidence,
            signals = result.signals.len(),
            insufficient = result.insufficient_signal,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
        Ok(result)
    }

    /// Same as [`analyze`](Self::analyze), abandoned as soon as shutdown is
    /// triggered. Cache writes only follow completed work, so nothing partial
    /// is stored.
    pub async fn analyze_until(
        &self,
        request: &AnalysisRequest,
        shutdown: &mut ShutdownListener,
    ) -> Result<ScoreResult, AnalysisError> {
        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                info!(target: "pipeline", kind = request.kind().as_str(), "shutdown requested; analysis abandoned");
                Err(AnalysisError::Cancelled)
            }
            result = self.analyze(request) => result.map_err(AnalysisError::from),
        }
    }

    /// Runs every producer concurrently. A failing producer is logged and
    /// contributes nothing; the others are unaffected.
    pub async fn collect_signals(&self, content: Arc<ExtractedContent>) -> Vec<Signal> {
        let outcomes = join_all(self.producers.iter().map(|producer| {
            let content = Arc::clone(&content);
            async move { (producer.as_ref(), producer.produce(&content).await) }
        }))
        .await;

        let mut signals = Vec::new();
        for (producer, outcome) in outcomes {
            match outcome {
                Ok(produced) => signals.extend(produced),
                Err(err) => {
                    warn!(
                        target: "pipeline",
                        producer = producer.name(),
                        category = ?producer.category(),
                        error = %err,
                        "signal producer failed"
                    );
                }
            }
        }
        signals
    }
}

/// Assembles a [`FraudChecker`], letting callers swap in their own OCR
/// engine, cache, HTTP client or reference lists.
pub struct FraudCheckerBuilder {
    config: AppConfig,
    http: Option<Client>,
    cache: Option<Cache>,
    ocr: Option<Arc<dyn OcrEngine>>,
    brand_book: Option<BrandBook>,
    safebook: Option<Arc<Safebook>>,
}

impl FraudCheckerBuilder {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            http: None,
            cache: None,
            ocr: None,
            brand_book: None,
            safebook: None,
        }
    }

    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn brand_book(mut self, book: BrandBook) -> Self {
        self.brand_book = Some(book);
        self
    }

    pub fn safebook(mut self, safebook: Arc<Safebook>) -> Self {
        self.safebook = Some(safebook);
        self
    }

    pub fn build(self) -> Result<FraudChecker> {
        let config = self.config;
        config.scoring.validate()?;

        let http = match self.http {
            Some(client) => client,
            None => Client::builder()
                .user_agent(format!("fraud-checker/{}", env!("CARGO_PKG_VERSION")))
                .redirect(Policy::limited(config.web.max_redirects))
                .build()
                .context("failed to build the HTTP client")?,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Cache::from_config(&config.cache));
        let ocr = self
            .ocr
            .unwrap_or_else(|| Arc::new(TesseractOcr::new(config.ocr.clone())));

        let safebook = match self.safebook {
            Some(safebook) => safebook,
            None => Arc::new(match config.reference.safebook_path.as_deref() {
                Some(path) => Safebook::load(path)?,
                None => Safebook::new(),
            }),
        };
        let brand_guard = match self.brand_book {
            Some(book) => BrandGuard::new(book),
            None => BrandGuard::from_path(config.reference.brand_list_path.as_deref()),
        };
        let llm = LlmClient::new(http.clone(), config.llm.clone(), cache.clone());

        info!(
            target: "pipeline",
            cache = cache.backend_name(),
            ocr = ocr.name(),
            llm_enabled = llm.is_enabled(),
            safebook_empty = safebook.is_empty(),
            "fraud checker ready"
        );

        let producers: Vec<Arc<dyn SignalProducer>> = vec![
            Arc::new(HeuristicsEngine::new(safebook)),
            Arc::new(brand_guard),
            Arc::new(llm),
        ];

        Ok(FraudChecker {
            max_input_bytes: config.input.max_input_bytes,
            extractor: ContentExtractor::new(&config, http, cache.clone(), ocr),
            producers,
            scoring: ScoringEngine::new(config.scoring),
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::Verdict, infrastructure::shutdown::Shutdown};

    fn checker() -> FraudChecker {
        FraudChecker::builder(AppConfig::default()).build().unwrap()
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_extraction() {
        let err = checker()
            .analyze(&AnalysisRequest::url("javascript:alert(1)"))
            .await
            .unwrap_err();
        assert_eq!(err, InputError::UnsupportedScheme("javascript".into()));
    }

    #[tokio::test]
    async fn pasted_phishing_text_is_not_benign() {
        let result = checker()
            .analyze(&AnalysisRequest::text(
                "URGENTE: sua conta será bloqueada hoje. Confirme sua senha e o código do token em https://bit.ly/abc123",
            ))
            .await
            .unwrap();
        assert_ne!(result.verdict, Verdict::Benign);
        assert!(!result.signals.is_empty());
        assert!((0.0..=1.0).contains(&result.score));
    }

    #[tokio::test]
    async fn triggered_shutdown_cancels_analysis() {
        let (shutdown, mut listener) = Shutdown::new();
        shutdown.trigger();
        let err = checker()
            .analyze_until(&AnalysisRequest::text("olá"), &mut listener)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }

    #[test]
    fn invalid_scoring_config_fails_the_build() {
        let mut config = AppConfig::default();
        config.scoring.thresholds.suspicious = 0.9;
        assert!(FraudChecker::builder(config).build().is_err());
    }
}
