//! Classification prompt and response parsing.

use serde::Deserialize;

use crate::classify::types::Label;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest};

/// Body characters sent to the classification service.
pub const PROMPT_BODY_CHARS: usize = 1500;

/// Low temperature for stable verdicts.
const CLASSIFY_TEMPERATURE: f32 = 0.1;

const CLASSIFY_MAX_TOKENS: u32 = 500;

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are an experienced email security analyst who detects phishing.\n\n\
     TASK: Analyse the email provided and decide whether it is phishing.\n\n\
     Phishing signals to weigh:\n\
     - Urgency or threats (account locked, password expiring)\n\
     - Requests to verify personal or account details\n\
     - Suspicious links, or links that do not match the claimed organisation\n\
     - Spelling and grammar mistakes\n\
     - Sender impersonating a trusted organisation\n\
     - Requests for money transfers or payment\n\
     - Unrealistic prizes or rewards\n\
     - Psychological pressure\n\n\
     Respond with ONLY a JSON object, no other text:\n\
     {\"label\": \"phishing\" or \"legit\", \"confidence\": 0.0-1.0, \"explanation\": \"short reason, at most 100 words\"}"
        .to_string()
}

fn build_user_prompt(sender: &str, subject: &str, body: &str) -> String {
    let body_preview: String = body.chars().take(PROMPT_BODY_CHARS).collect();

    let mut prompt = String::with_capacity(body_preview.len() + 128);
    prompt.push_str(&format!("From: {sender}\n"));
    prompt.push_str(&format!("Subject: {subject}\n"));
    prompt.push_str(&format!("Body: {body_preview}"));
    prompt
}

/// Build the outbound request for one email. Inputs are expected to be
/// redacted already.
pub fn build_request(sender: &str, subject: &str, body: &str) -> CompletionRequest {
    CompletionRequest::new(vec![
        ChatMessage::system(build_system_prompt()),
        ChatMessage::user(build_user_prompt(sender, subject, body)),
    ])
    .with_temperature(CLASSIFY_TEMPERATURE)
    .with_max_tokens(CLASSIFY_MAX_TOKENS)
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawVerdict {
    label: String,
    confidence: Confidence,
    #[serde(default)]
    explanation: String,
}

/// Models sometimes quote the number (`"0.9"`); both forms are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Confidence {
    Number(f64),
    Text(String),
}

impl Confidence {
    fn value(&self) -> Result<f64, String> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("confidence {s:?} is not a number")),
        }
    }
}

/// A validated verdict as returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub label: Label,
    pub confidence: f64,
    pub explanation: String,
}

/// Parse and validate the service reply. Any deviation (no object, unknown
/// label, confidence outside `[0, 1]`) is an `InvalidResponse`.
pub fn parse_verdict(raw: &str, provider: &str) -> Result<Verdict, LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    };

    let json_str = extract_json_object(raw);
    let verdict: RawVerdict =
        serde_json::from_str(&json_str).map_err(|e| invalid(format!("JSON parse error: {e}")))?;

    let label = verdict.label.parse::<Label>().map_err(invalid)?;
    let confidence = verdict.confidence.value().map_err(invalid)?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(invalid(format!("confidence {confidence} outside [0, 1]")));
    }

    Ok(Verdict {
        label,
        confidence,
        explanation: verdict.explanation.trim().to_string(),
    })
}

/// Extract a JSON object from model output (handles markdown wrapping and
/// surrounding prose).
fn extract_json_object(text: &str) -> String {
    let mut trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_demands_json_verdict() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("\"label\""));
        assert!(prompt.contains("\"confidence\""));
        assert!(prompt.contains("phishing"));
        assert!(prompt.contains("legit"));
    }

    #[test]
    fn user_prompt_caps_body() {
        let body = "a".repeat(PROMPT_BODY_CHARS + 500);
        let prompt = build_user_prompt("[EMAIL_REDACTED]", "Hi", &body);
        assert!(prompt.starts_with("From: [EMAIL_REDACTED]\nSubject: Hi\nBody: "));
        assert_eq!(prompt.matches('a').count(), PROMPT_BODY_CHARS);
    }

    #[test]
    fn request_carries_sampling_settings() {
        let req = build_request("s", "t", "b");
        assert_eq!(req.temperature, Some(0.1));
        assert_eq!(req.max_tokens, Some(500));
        assert!(req.system_prompt().is_some());
        assert!(req.user_prompt().contains("Subject: t"));
    }

    #[test]
    fn parse_plain_object() {
        let v = parse_verdict(
            r#"{"label": "phishing", "confidence": 0.93, "explanation": "fake login"}"#,
            "stub",
        )
        .unwrap();
        assert_eq!(v.label, Label::Phishing);
        assert!((v.confidence - 0.93).abs() < 1e-9);
        assert_eq!(v.explanation, "fake login");
    }

    #[test]
    fn parse_fenced_with_prose() {
        let raw = "Here is my analysis:\n```json\n{\"label\": \"Legit\", \"confidence\": 0.8, \"explanation\": \"internal memo\"}\n```\nThanks.";
        let v = parse_verdict(raw, "stub").unwrap();
        assert_eq!(v.label, Label::Legit);
    }

    #[test]
    fn parse_bare_fence() {
        let raw = "```\n{\"label\": \"legit\", \"confidence\": 1.0}\n```";
        let v = parse_verdict(raw, "stub").unwrap();
        assert_eq!(v.confidence, 1.0);
        assert_eq!(v.explanation, "");
    }

    #[test]
    fn accepts_quoted_confidence() {
        let v = parse_verdict(r#"{"label": "phishing", "confidence": " 0.9"}"#, "stub").unwrap();
        assert!((v.confidence - 0.9).abs() < 1e-9);

        let err = parse_verdict(r#"{"label": "phishing", "confidence": "1.5"}"#, "stub")
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
        let err = parse_verdict(r#"{"label": "phishing", "confidence": "high"}"#, "stub")
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn rejects_unknown_label() {
        let err = parse_verdict(r#"{"label": "spam", "confidence": 0.5}"#, "stub").unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(parse_verdict(r#"{"label": "phishing", "confidence": 1.2}"#, "stub").is_err());
        assert!(parse_verdict(r#"{"label": "phishing", "confidence": -0.1}"#, "stub").is_err());
    }

    #[test]
    fn rejects_missing_fields_and_prose() {
        assert!(parse_verdict(r#"{"label": "phishing"}"#, "stub").is_err());
        assert!(parse_verdict("I think this is phishing.", "stub").is_err());
        assert!(parse_verdict("", "stub").is_err());
    }

    #[test]
    fn extract_outermost_object() {
        let input = "prefix {\"a\": {\"b\": 1}} suffix";
        assert_eq!(extract_json_object(input), "{\"a\": {\"b\": 1}}");
    }
}
