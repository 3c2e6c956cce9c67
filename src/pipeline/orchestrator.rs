//! Scoring orchestrator: turns one raw message into one [`EmailEvent`].
//!
//! Flow per message:
//! 1. Scan the unredacted text (URLs, keywords, blacklist, features)
//! 2. Redact sender, recipients, subject, body and headers
//! 3. Classify the redacted excerpt (classify mode only)
//! 4. Aggregate service, heuristic and static scores into a risk level
//!
//! The orchestrator never persists events; callers hand them to a sink.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{ContentScanner, FeatureExtractor, PiiRedactor, sender_hash, truncate_excerpt};
use crate::classify::{ClassificationClient, ClassificationResult};
use crate::config::ProcessingMode;
use crate::error::{ConfigError, PipelineError};
use crate::pipeline::risk::{aggregate, heuristic_score, risk_level};
use crate::pipeline::types::{EmailEvent, RawMessage, UNAVAILABLE_LABEL};

/// Characters of redacted body kept in the event and sent for classification.
pub const EXCERPT_CHARS: usize = 2000;

/// Largest batch accepted by [`ScoringOrchestrator::score_batch`].
pub const MAX_BATCH: usize = 100;

/// Characters of an error message kept in the event explanation.
const ERROR_EXPLANATION_CHARS: usize = 100;

/// Verdict from a pre-trained static model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticScore {
    pub prediction: String,
    /// Probability that the message is phishing.
    pub probability: f64,
    pub model: String,
}

/// An optional offline scorer consulted alongside the service.
pub trait StaticScorer: Send + Sync {
    fn score(&self, subject: &str, body: &str) -> Option<StaticScore>;
}

/// Composes analysis, classification and risk aggregation.
pub struct ScoringOrchestrator {
    mode: ProcessingMode,
    client: Option<Arc<ClassificationClient>>,
    static_scorer: Option<Arc<dyn StaticScorer>>,
    redactor: PiiRedactor,
    scanner: ContentScanner,
    extractor: FeatureExtractor,
}

impl ScoringOrchestrator {
    /// Classify mode requires a client; degraded mode ignores one if given.
    pub fn new(
        mode: ProcessingMode,
        client: Option<Arc<ClassificationClient>>,
        scanner: ContentScanner,
    ) -> Result<Self, ConfigError> {
        if mode.classification_enabled() && client.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "LLM_API_KEY".to_string(),
                hint: "classify mode needs a classification client".to_string(),
            });
        }

        let client = if mode.classification_enabled() { client } else { None };
        Ok(Self {
            mode,
            client,
            static_scorer: None,
            redactor: PiiRedactor::new(),
            scanner,
            extractor: FeatureExtractor::new(),
        })
    }

    /// Heuristics only.
    pub fn degraded(scanner: ContentScanner) -> Self {
        Self {
            mode: ProcessingMode::Degraded,
            client: None,
            static_scorer: None,
            redactor: PiiRedactor::new(),
            scanner,
            extractor: FeatureExtractor::new(),
        }
    }

    pub fn with_static_scorer(mut self, scorer: Arc<dyn StaticScorer>) -> Self {
        self.static_scorer = Some(scorer);
        self
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn client(&self) -> Option<&Arc<ClassificationClient>> {
        self.client.as_ref()
    }

    /// Reject messages with nothing to score.
    pub fn validate(message: &RawMessage) -> Result<(), PipelineError> {
        if message.sender.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("sender is empty".into()));
        }
        if message.subject.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("subject is empty".into()));
        }
        if message.body.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("body is empty".into()));
        }
        Ok(())
    }

    /// Validate, then process.
    pub async fn score(&self, message: &RawMessage) -> Result<EmailEvent, PipelineError> {
        Self::validate(message)?;
        Ok(self.process(message).await)
    }

    /// Score each message independently; one bad entry does not affect the
    /// others.
    pub async fn score_batch(
        &self,
        messages: &[RawMessage],
    ) -> Result<Vec<Result<EmailEvent, PipelineError>>, PipelineError> {
        if messages.len() > MAX_BATCH {
            return Err(PipelineError::BatchTooLarge {
                size: messages.len(),
                max: MAX_BATCH,
            });
        }

        info!(count = messages.len(), "Scoring message batch");
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            let result = self.score(message).await;
            if let Err(e) = &result {
                warn!(id = %message.id, error = %e, "Batch entry rejected");
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Process one message. Never fails: classification problems are
    /// recorded in the event instead.
    pub async fn process(&self, message: &RawMessage) -> EmailEvent {
        // Scanning runs before redaction; redaction must not hide URLs.
        let features = self
            .extractor
            .extract(&message.subject, &message.body, &self.scanner);
        let urls = self.scanner.extract_urls(&message.body);
        let suspicious_keywords = self
            .scanner
            .count_suspicious_keywords(&format!("{} {}", message.subject, message.body));
        let url_in_blacklist = self.scanner.any_blacklisted(&urls);

        let sender = self.redactor.redact(&message.sender);
        let recipients = self.redactor.redact_all(&message.recipients);
        let subject = self.redactor.redact(&message.subject);
        let body_excerpt = truncate_excerpt(&self.redactor.redact(&message.body), EXCERPT_CHARS);
        let headers = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), self.redactor.redact(v)))
            .collect();

        let outcome = match &self.client {
            Some(client) => Some(
                client
                    .try_classify(&sender, &subject, &body_excerpt)
                    .await
                    .map_err(|e| e.to_string()),
            ),
            None => None,
        };

        let static_score = self
            .static_scorer
            .as_ref()
            .and_then(|s| s.score(&subject, &body_excerpt));

        let heuristic = heuristic_score(suspicious_keywords, url_in_blacklist, &features);
        let service_score = match &outcome {
            Some(Ok(result)) => Some(result.phishing_score()),
            _ => None,
        };
        let risk_score = aggregate(&[
            service_score,
            Some(heuristic),
            static_score.as_ref().map(|s| s.probability),
        ]);
        let risk = risk_level(risk_score);

        let mut event = EmailEvent {
            timestamp: Utc::now(),
            message_id: message.id.clone(),
            sender_hash: sender_hash(&message.sender),
            sender,
            recipients,
            subject,
            body_excerpt,
            urls,
            suspicious_keywords,
            url_in_blacklist,
            classification_label: None,
            classification_confidence: None,
            classification_explanation: None,
            classification_model: None,
            classification_source: None,
            classification_latency_ms: None,
            classification_tokens_used: None,
            classification_error: None,
            ml_prediction: static_score.as_ref().map(|s| s.prediction.clone()),
            ml_score: static_score.as_ref().map(|s| s.probability),
            ml_model: static_score.map(|s| s.model),
            heuristic_score: heuristic,
            risk_score,
            risk_level: risk,
            headers,
            features,
        };

        match outcome {
            Some(Ok(result)) => embed_result(&mut event, result),
            Some(Err(error)) => {
                let explanation: String = error.chars().take(ERROR_EXPLANATION_CHARS).collect();
                event.classification_label = Some(UNAVAILABLE_LABEL.to_string());
                event.classification_confidence = Some(0.0);
                event.classification_explanation = Some(format!("Error: {explanation}"));
                event.classification_model = self.client.as_ref().map(|c| c.model().to_string());
                event.classification_error = Some(error);
            }
            None => debug!(id = %message.id, "Classification skipped in degraded mode"),
        }

        info!(
            id = %event.message_id,
            sender = %event.sender,
            risk = %event.risk_level,
            score = event.risk_score,
            label = event.classification_label.as_deref().unwrap_or("-"),
            keywords = event.suspicious_keywords,
            blacklisted = event.url_in_blacklist,
            "Message scored"
        );
        event
    }
}

fn embed_result(event: &mut EmailEvent, result: ClassificationResult) {
    event.classification_label = Some(result.label.as_str().to_string());
    event.classification_confidence = Some(result.confidence);
    event.classification_explanation = Some(result.explanation);
    event.classification_model = Some(result.model);
    event.classification_source = Some(result.source);
    event.classification_latency_ms = result.latency_ms;
    event.classification_tokens_used = result.tokens_used;
}
