//! Shared types for the scoring pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Features;
use crate::classify::ResultSource;

// ── Inbound message ─────────────────────────────────────────────────

/// A message as delivered by a mailbox, before any processing.
///
/// Owned by the orchestrator for one processing cycle; never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Mailbox-native identifier, used for acknowledgement.
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RawMessage {
    /// Build a message with a generated id and no headers.
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

// ── Risk level ──────────────────────────────────────────────────────

/// Three-valued aggregate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Output event ────────────────────────────────────────────────────

/// Label recorded when classification was attempted but produced nothing.
pub const UNAVAILABLE_LABEL: &str = "unavailable";

/// One record per processed message. Every text field holds its redacted
/// form. Classification fields are `None` when classification did not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub sender: String,
    pub sender_hash: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body_excerpt: String,
    pub urls: Vec<String>,
    pub suspicious_keywords: usize,
    pub url_in_blacklist: bool,

    pub classification_label: Option<String>,
    pub classification_confidence: Option<f64>,
    pub classification_explanation: Option<String>,
    pub classification_model: Option<String>,
    pub classification_source: Option<ResultSource>,
    pub classification_latency_ms: Option<u64>,
    pub classification_tokens_used: Option<u32>,
    pub classification_error: Option<String>,

    pub ml_prediction: Option<String>,
    pub ml_score: Option<f64>,
    pub ml_model: Option<String>,

    pub heuristic_score: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub features: Features,
}

impl EmailEvent {
    /// Whether a classification result (service or cache) is embedded.
    pub fn has_classification(&self) -> bool {
        self.classification_label
            .as_deref()
            .is_some_and(|l| l != UNAVAILABLE_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_builder() {
        let msg = RawMessage::new("a@x.com", vec!["b@y.com".into()], "Hi", "Body")
            .with_id("m-1")
            .with_header("message_id", "<abc@x.com>");
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.headers["message_id"], "<abc@x.com>");
    }

    #[test]
    fn raw_message_deserializes_with_defaults() {
        let msg: RawMessage = serde_json::from_str(
            r#"{"id": "1", "sender": "a@x.com", "subject": "s", "body": "b"}"#,
        )
        .unwrap();
        assert!(msg.recipients.is_empty());
        assert!(msg.headers.is_empty());
    }

    #[test]
    fn risk_level_orders_and_serializes() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(serde_json::to_value(RiskLevel::Medium).unwrap(), "medium");
    }
}
