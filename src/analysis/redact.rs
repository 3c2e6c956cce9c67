//! PII redaction.
//!
//! Every value that leaves the process (cache, LLM call, event log, tracing
//! fields) passes through [`PiiRedactor::redact`] first.

use regex::Regex;

pub const EMAIL_PLACEHOLDER: &str = "[EMAIL_REDACTED]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE_REDACTED]";
pub const CARD_PLACEHOLDER: &str = "[CARD_REDACTED]";
pub const SSN_PLACEHOLDER: &str = "[SSN_REDACTED]";

/// Regex-based scrubber for emails, phone numbers, card numbers and SSNs.
#[derive(Debug, Clone)]
pub struct PiiRedactor {
    email: Regex,
    card: Regex,
    ssn: Regex,
    phones: Vec<Regex>,
}

impl PiiRedactor {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
            card: Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").expect("card pattern"),
            ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
            phones: vec![
                // +1 123 456 7890
                Regex::new(r"\+1\s*\d{3}\s*\d{3}\s*\d{4}\b").expect("intl phone pattern"),
                // (123) 456-7890
                Regex::new(r"\(\d{3}\)\s*\d{3}-\d{4}\b").expect("paren phone pattern"),
                // 123-456-7890
                Regex::new(r"\b\d{3}-\d{3}-\d{4}\b").expect("dash phone pattern"),
                // 123.456.7890
                Regex::new(r"\b\d{3}\.\d{3}\.\d{4}\b").expect("dot phone pattern"),
            ],
        }
    }

    /// Replace all recognised PII with fixed placeholder tokens.
    ///
    /// Card numbers are scrubbed before phone numbers so a 16-digit group is
    /// never half-consumed by a phone layout.
    pub fn redact(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = self.email.replace_all(text, EMAIL_PLACEHOLDER).into_owned();
        out = self.card.replace_all(&out, CARD_PLACEHOLDER).into_owned();
        out = self.ssn.replace_all(&out, SSN_PLACEHOLDER).into_owned();
        for phone in &self.phones {
            out = phone.replace_all(&out, PHONE_PLACEHOLDER).into_owned();
        }
        out
    }

    pub fn redact_all(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| self.redact(v)).collect()
    }
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_address() {
        let out = PiiRedactor::new().redact("contact me at a@b.com");
        assert!(out.contains(EMAIL_PLACEHOLDER));
        assert!(!out.contains("a@b.com"));
    }

    #[test]
    fn redacts_dashed_phone() {
        let out = PiiRedactor::new().redact("call 123-456-7890");
        assert!(out.contains(PHONE_PLACEHOLDER));
        assert!(!out.contains("7890"));
    }

    #[test]
    fn redacts_other_phone_layouts() {
        let r = PiiRedactor::new();
        for input in ["ring (555) 123-4567 now", "dial 555.123.4567", "intl +1 555 123 4567"] {
            let out = r.redact(input);
            assert!(out.contains(PHONE_PLACEHOLDER), "{input} -> {out}");
        }
    }

    #[test]
    fn redacts_card_numbers_with_and_without_separators() {
        let r = PiiRedactor::new();
        assert_eq!(r.redact("card 4111 1111 1111 1111"), "card [CARD_REDACTED]");
        assert_eq!(r.redact("card 4111-1111-1111-1111"), "card [CARD_REDACTED]");
        assert_eq!(r.redact("card 4111111111111111"), "card [CARD_REDACTED]");
    }

    #[test]
    fn redacts_ssn() {
        let out = PiiRedactor::new().redact("ssn 123-45-6789 on file");
        assert_eq!(out, "ssn [SSN_REDACTED] on file");
    }

    #[test]
    fn leaves_urls_alone() {
        let out = PiiRedactor::new().redact("visit http://example.com/login");
        assert_eq!(out, "visit http://example.com/login");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(PiiRedactor::new().redact(""), "");
    }

    #[test]
    fn redact_all_maps_each_value() {
        let out = PiiRedactor::new().redact_all(&["x@y.org".into(), "plain".into()]);
        assert_eq!(out, vec![EMAIL_PLACEHOLDER.to_string(), "plain".to_string()]);
    }
}
