//! Risk aggregation and the local heuristic scorer.

use crate::analysis::Features;
use crate::pipeline::types::RiskLevel;

/// Scores at or above this are high risk.
pub const HIGH_THRESHOLD: f64 = 0.85;
/// Scores at or above this (and below high) are medium risk.
pub const MEDIUM_THRESHOLD: f64 = 0.6;

const KEYWORD_WEIGHT: f64 = 0.15;
const KEYWORD_CAP: usize = 4;
const BLACKLIST_WEIGHT: f64 = 0.5;
const SHOUTING_WEIGHT: f64 = 0.1;
const SHOUTING_RATIO: f64 = 0.3;
const EXCLAMATION_WEIGHT: f64 = 0.05;
const EXCLAMATION_MIN: usize = 3;

/// Map a score onto a [`RiskLevel`]. Non-finite scores count as zero.
pub fn risk_level(score: f64) -> RiskLevel {
    let score = if score.is_finite() { score } else { 0.0 };
    if score >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Combine whatever scores are available: the highest wins, and no score at
/// all counts as `0.0`.
///
/// Service scores arrive via [`ClassificationResult::phishing_score`], so a
/// confident `legit` verdict contributes `1 - confidence` rather than its raw
/// confidence.
///
/// [`ClassificationResult::phishing_score`]: crate::classify::ClassificationResult::phishing_score
pub fn aggregate(scores: &[Option<f64>]) -> f64 {
    scores
        .iter()
        .flatten()
        .copied()
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 1.0))
        .fold(0.0, f64::max)
}

/// Heuristic phishing score from local signals only, in `[0, 1]`.
///
/// Used on its own in degraded mode, and alongside the service verdict
/// otherwise.
pub fn heuristic_score(suspicious_keywords: usize, blacklist_hit: bool, features: &Features) -> f64 {
    let mut score = KEYWORD_WEIGHT * suspicious_keywords.min(KEYWORD_CAP) as f64;
    if blacklist_hit {
        score += BLACKLIST_WEIGHT;
    }
    if features.uppercase_ratio > SHOUTING_RATIO {
        score += SHOUTING_WEIGHT;
    }
    if features.exclamation_count >= EXCLAMATION_MIN {
        score += EXCLAMATION_WEIGHT;
    }
    score.clamp(0.0, 1.0)
}
