//! Structural features derived from subject and body text.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::content::ContentScanner;

/// Read-only structural signals for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub subject_length: usize,
    pub body_length: usize,
    pub url_count: usize,
    pub has_html: bool,
    pub exclamation_count: usize,
    pub question_count: usize,
    /// Uppercase characters over total characters of the body.
    pub uppercase_ratio: f64,
    pub has_attachment_indicator: bool,
}

/// Computes [`Features`]. Lengths are counted in characters, not bytes.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    html_tag: Regex,
    attachment_hint: Regex,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            html_tag: Regex::new(r"<[^>]+>").expect("html pattern"),
            attachment_hint: Regex::new(r"(?i)attachment|attached|file|document")
                .expect("attachment pattern"),
        }
    }

    pub fn extract(&self, subject: &str, body: &str, scanner: &ContentScanner) -> Features {
        let body_length = body.chars().count();
        let uppercase = body.chars().filter(|c| c.is_uppercase()).count();
        let uppercase_ratio = if body_length == 0 {
            0.0
        } else {
            uppercase as f64 / body_length as f64
        };

        Features {
            subject_length: subject.chars().count(),
            body_length,
            url_count: scanner.extract_urls(body).len(),
            has_html: self.html_tag.is_match(body),
            exclamation_count: body.matches('!').count(),
            question_count: body.matches('?').count(),
            uppercase_ratio,
            has_attachment_indicator: self.attachment_hint.is_match(body),
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_basic_counts() {
        let f = FeatureExtractor::new().extract(
            "Hello",
            "WIN NOW!! see <b>attached</b> file? http://x.com",
            &ContentScanner::default(),
        );
        assert_eq!(f.subject_length, 5);
        assert_eq!(f.exclamation_count, 2);
        assert_eq!(f.question_count, 1);
        assert_eq!(f.url_count, 1);
        assert!(f.has_html);
        assert!(f.has_attachment_indicator);
        assert!(f.uppercase_ratio > 0.0 && f.uppercase_ratio < 1.0);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let f = FeatureExtractor::new().extract("", "", &ContentScanner::default());
        assert_eq!(f, Features::default());
    }

    #[test]
    fn lengths_count_characters() {
        let f = FeatureExtractor::new().extract("héllo", "ÀÉ", &ContentScanner::default());
        assert_eq!(f.subject_length, 5);
        assert_eq!(f.body_length, 2);
        assert!((f.uppercase_ratio - 1.0).abs() < f64::EPSILON);
    }
}
