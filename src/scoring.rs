//! Pure fusion of signals into one score, verdict and explanation.
//!
//! Signals are first reduced within their category, then the present
//! categories are combined with the configured weight vector. Severity
//! floors and the verdict bands come last. Nothing here reads a clock or a
//! random source, so the same signals always give the same result.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    config::{ScoringConfig, Thresholds},
    domain::{ExtractionSummary, Polarity, ScoreResult, Severity, Signal, SignalCategory, Verdict},
};

const RATIONALE_MAX_REASONS: usize = 5;
/// Agreement term used when only one category spoke.
const SINGLE_CATEGORY_AGREEMENT: f64 = 0.5;

const FRAUDULENT_ACTIONS: &[&str] = &[
    "Do not click any link or open attachments.",
    "Do not reply to the sender.",
    "Report it to the provider's security or abuse team.",
    "If you shared any data, change your passwords and monitor your accounts.",
];

const SUSPICIOUS_ACTIONS: &[&str] = &[
    "Be wary: validate it on the official site or app.",
    "Avoid clicking until its legitimacy is confirmed.",
    "Check the sender, the domain and the spelling.",
];

const INSUFFICIENT_SIGNAL_ACTIONS: &[&str] = &[
    "Resubmit a sharper image or the complete original message.",
    "When in doubt, confirm through the official site or app.",
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct CategoryScore {
    category: SignalCategory,
    value: f64,
    weight: f64,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, signals: Vec<Signal>, extraction: ExtractionSummary) -> ScoreResult {
        let signals = dedup_by_rationale(signals);

        if signals.is_empty() {
            return insufficient_signal(extraction);
        }

        let categories = self.category_scores(&signals);
        let aggregate = weighted_mean(&categories);
        let score = self.apply_severity_floors(aggregate, &signals).clamp(0.0, 1.0);
        let verdict = self.verdict_for(score);
        let confidence = confidence(&signals, &categories);

        debug!(
            target: "scoring",
            signals = signals.len(),
            categories = ?categories.iter().map(|c| (c.category, c.value)).collect::<Vec<_>>(),
            aggregate,
            score,
            verdict = %verdict,
            "signals fused"
        );

        ScoreResult {
            score,
            verdict,
            confidence,
            insufficient_signal: false,
            rationale: rationale(verdict, score, &signals),
            actions: actions_for(verdict),
            signals,
            extraction,
        }
    }

    /// `< suspicious` benign, `< fraudulent` suspicious, otherwise fraudulent.
    pub fn verdict_for(&self, score: f64) -> Verdict {
        let Thresholds {
            suspicious,
            fraudulent,
        } = self.config.thresholds;
        if score < suspicious {
            Verdict::Benign
        } else if score < fraudulent {
            Verdict::Suspicious
        } else {
            Verdict::Fraudulent
        }
    }

    fn category_scores(&self, signals: &[Signal]) -> Vec<CategoryScore> {
        SignalCategory::ALL
            .into_iter()
            .filter_map(|category| {
                let members: Vec<&Signal> =
                    signals.iter().filter(|s| s.category() == category).collect();
                if members.is_empty() {
                    return None;
                }
                let benign: f64 = members
                    .iter()
                    .filter(|s| s.polarity() == Polarity::Benign)
                    .map(|s| s.weight())
                    .sum();
                let risks = members
                    .iter()
                    .filter(|s| s.polarity() == Polarity::Risk)
                    .map(|s| s.weight());
                let risk = match category {
                    SignalCategory::Heuristics => risks.sum::<f64>(),
                    SignalCategory::BrandGuard | SignalCategory::Llm => risks.fold(0.0, f64::max),
                };
                Some(CategoryScore {
                    category,
                    value: (risk - benign).clamp(0.0, 1.0),
                    weight: self.weight_of(category),
                })
            })
            .collect()
    }

    fn weight_of(&self, category: SignalCategory) -> f64 {
        let weights = self.config.weights;
        match category {
            SignalCategory::Heuristics => weights.heuristics,
            SignalCategory::BrandGuard => weights.brand_guard,
            SignalCategory::Llm => weights.llm,
        }
    }

    fn apply_severity_floors(&self, score: f64, signals: &[Signal]) -> f64 {
        let worst = signals
            .iter()
            .filter(|s| s.is_risk())
            .map(Signal::severity)
            .max()
            .unwrap_or_default();
        match worst {
            Severity::Normal => score,
            Severity::Elevated => score.max(self.config.thresholds.suspicious),
            Severity::Critical => score.max(self.config.thresholds.fraudulent),
        }
    }
}

fn dedup_by_rationale(signals: Vec<Signal>) -> Vec<Signal> {
    let mut seen = HashSet::new();
    signals
        .into_iter()
        .filter(|s| seen.insert(s.rationale().to_string()))
        .collect()
}

/// Weighted mean over the categories that produced anything. If every
/// present category has weight zero the plain mean is used instead.
fn weighted_mean(categories: &[CategoryScore]) -> f64 {
    let total_weight: f64 = categories.iter().map(|c| c.weight).sum();
    if total_weight > 0.0 {
        categories.iter().map(|c| c.weight * c.value).sum::<f64>() / total_weight
    } else {
        categories.iter().map(|c| c.value).sum::<f64>() / categories.len().max(1) as f64
    }
}

fn confidence(signals: &[Signal], categories: &[CategoryScore]) -> f64 {
    let mean_confidence =
        signals.iter().map(Signal::confidence).sum::<f64>() / signals.len().max(1) as f64;
    let agreement = if categories.len() > 1 {
        let (min, max) = categories
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), c| (lo.min(c.value), hi.max(c.value)));
        1.0 - (max - min)
    } else {
        SINGLE_CATEGORY_AGREEMENT
    };
    (0.6 * mean_confidence + 0.4 * agreement).clamp(0.0, 1.0)
}

fn rationale(verdict: Verdict, score: f64, signals: &[Signal]) -> String {
    let mut risks: Vec<&Signal> = signals.iter().filter(|s| s.is_risk()).collect();
    risks.sort_by(|a, b| {
        b.severity()
            .cmp(&a.severity())
            .then(b.weight().total_cmp(&a.weight()))
    });

    let reasons: Vec<&str> = if risks.is_empty() {
        signals
            .iter()
            .take(RATIONALE_MAX_REASONS)
            .map(Signal::rationale)
            .collect()
    } else {
        risks
            .iter()
            .take(RATIONALE_MAX_REASONS)
            .map(|s| s.rationale())
            .collect()
    };

    format!("{verdict} (score {score:.2}): {}", reasons.join("; "))
}

fn actions_for(verdict: Verdict) -> Vec<String> {
    let actions: &[&str] = match verdict {
        Verdict::Fraudulent => FRAUDULENT_ACTIONS,
        Verdict::Suspicious => SUSPICIOUS_ACTIONS,
        Verdict::Benign => &[],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

fn insufficient_signal(extraction: ExtractionSummary) -> ScoreResult {
    let rationale = match &extraction.degradation {
        Some(reason) => format!("insufficient signal: {reason}"),
        None => "insufficient signal: no evaluator found evidence either way".to_string(),
    };
    debug!(target: "scoring", rationale = %rationale, "no signals to fuse");

    ScoreResult {
        score: 0.0,
        verdict: Verdict::Benign,
        confidence: 0.0,
        insufficient_signal: true,
        rationale,
        signals: Vec::new(),
        actions: INSUFFICIENT_SIGNAL_ACTIONS
            .iter()
            .map(|a| a.to_string())
            .collect(),
        extraction,
    }
}
