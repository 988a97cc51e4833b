use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Heuristics,
    BrandGuard,
    Llm,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 3] = [Self::Heuristics, Self::BrandGuard, Self::Llm];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Evidence pointing towards fraud.
    Risk,
    /// Evidence pointing towards legitimacy; subtracted within its category.
    Benign,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    /// The verdict may not be `benign` while this signal is present.
    Elevated,
    /// The verdict is at least `fraudulent` while this signal is present.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidSignal {
    #[error("signal must have a name")]
    MissingName,
    #[error("signal `{name}` has weight {value} outside [0, 1]")]
    Weight { name: String, value: f64 },
    #[error("signal `{name}` has confidence {value} outside [0, 1]")]
    Confidence { name: String, value: f64 },
}

/// One named, weighted piece of evidence. Built only through the validating
/// constructors, so weight and confidence always lie in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    #[serde(rename = "source")]
    name: String,
    category: SignalCategory,
    polarity: Polarity,
    weight: f64,
    confidence: f64,
    severity: Severity,
    rationale: String,
}

impl Signal {
    pub fn risk(
        category: SignalCategory,
        name: impl Into<String>,
        weight: f64,
        rationale: impl Into<String>,
    ) -> Result<Self, InvalidSignal> {
        Self::build(category, Polarity::Risk, name.into(), weight, rationale.into())
    }

    pub fn benign(
        category: SignalCategory,
        name: impl Into<String>,
        weight: f64,
        rationale: impl Into<String>,
    ) -> Result<Self, InvalidSignal> {
        Self::build(category, Polarity::Benign, name.into(), weight, rationale.into())
    }

    fn build(
        category: SignalCategory,
        polarity: Polarity,
        name: String,
        weight: f64,
        rationale: String,
    ) -> Result<Self, InvalidSignal> {
        let signal = Self {
            name,
            category,
            polarity,
            weight,
            confidence: 1.0,
            severity: Severity::Normal,
            rationale,
        };
        signal.validate()?;
        Ok(signal)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self, InvalidSignal> {
        self.confidence = confidence;
        self.validate()?;
        Ok(self)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidSignal> {
        if self.name.trim().is_empty() {
            return Err(InvalidSignal::MissingName);
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(InvalidSignal::Weight {
                name: self.name.clone(),
                value: self.weight,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(InvalidSignal::Confidence {
                name: self.name.clone(),
                value: self.confidence,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> SignalCategory {
        self.category
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn is_risk(&self) -> bool {
        self.polarity == Polarity::Risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_weights_are_rejected() {
        let err = Signal::risk(SignalCategory::Heuristics, "x", 1.2, "r").unwrap_err();
        assert!(matches!(err, InvalidSignal::Weight { .. }));
        assert!(Signal::risk(SignalCategory::Heuristics, "x", f64::NAN, "r").is_err());
        assert!(Signal::risk(SignalCategory::Llm, "x", 0.5, "r")
            .unwrap()
            .with_confidence(-0.1)
            .is_err());
        assert_eq!(
            Signal::benign(SignalCategory::Heuristics, " ", 0.1, "r").unwrap_err(),
            InvalidSignal::MissingName
        );
    }

    #[test]
    fn serializes_source_weight_and_rationale() {
        let signal = Signal::risk(SignalCategory::BrandGuard, "brand_impersonation", 0.9, "why")
            .unwrap()
            .with_severity(Severity::Critical);
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["source"], "brand_impersonation");
        assert_eq!(json["weight"], 0.9);
        assert_eq!(json["rationale"], "why");
        assert_eq!(json["category"], "brand_guard");
        assert_eq!(json["severity"], "critical");
    }
}
