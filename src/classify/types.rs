//! Classification result types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of labels the classification service may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Phishing,
    Legit,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phishing => "phishing",
            Self::Legit => "legit",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "phishing" => Ok(Self::Phishing),
            "legit" => Ok(Self::Legit),
            other => Err(format!("invalid label: '{other}'")),
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Service,
    Cache,
}

/// A validated classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub explanation: String,
    pub source: ResultSource,
    pub model: String,
    pub latency_ms: Option<u64>,
    pub tokens_used: Option<u32>,
}

impl ClassificationResult {
    /// Probability-like phishing score: the confidence for a phishing verdict,
    /// its complement for a legit one.
    pub fn phishing_score(&self) -> f64 {
        match self.label {
            Label::Phishing => self.confidence,
            Label::Legit => 1.0 - self.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: Label, confidence: f64) -> ClassificationResult {
        ClassificationResult {
            label,
            confidence,
            explanation: String::new(),
            source: ResultSource::Service,
            model: "stub".into(),
            latency_ms: None,
            tokens_used: None,
        }
    }

    #[test]
    fn label_parses_case_insensitively() {
        assert_eq!("Phishing".parse::<Label>().unwrap(), Label::Phishing);
        assert_eq!(" legit ".parse::<Label>().unwrap(), Label::Legit);
        assert!("spam".parse::<Label>().is_err());
    }

    #[test]
    fn label_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Label::Phishing).unwrap(), "phishing");
    }

    #[test]
    fn phishing_score_follows_label() {
        assert!((result(Label::Phishing, 0.9).phishing_score() - 0.9).abs() < 1e-9);
        assert!((result(Label::Legit, 0.9).phishing_score() - 0.1).abs() < 1e-9);
    }
}
