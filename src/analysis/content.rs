//! URL extraction, suspicious-keyword counting and domain blacklist checks.

use std::collections::HashSet;

use regex::Regex;
use url::Url;

/// Phrases commonly seen in phishing and advance-fee mail.
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "urgent",
    "immediately",
    "verify",
    "confirm",
    "suspended",
    "expired",
    "click here",
    "act now",
    "limited time",
    "verify account",
    "update payment",
    "security alert",
    "unusual activity",
    "locked account",
    "winner",
    "congratulations",
    "prize",
    "free",
    "bonus",
    "claim",
    "lottery",
    "inheritance",
    "million",
    "bitcoin",
    "cryptocurrency",
    "investment",
    "prince",
    "nigeria",
    "transfer",
    "beneficiary",
    "confidential",
];

/// Domains blacklisted when no `URL_BLACKLIST` is configured.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "phishing-example.com",
    "malicious-site.net",
    "fake-bank.org",
    "scam-site.com",
    "secure-banking.vn-verify.com",
    "vn-verify.com",
];

/// Characters stripped from the tail of an extracted URL (sentence punctuation).
const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];

/// Stateless scanner over message text. Only the blacklist is configurable.
#[derive(Debug, Clone)]
pub struct ContentScanner {
    scheme_url: Regex,
    bare_www: Regex,
    blacklist: HashSet<String>,
}

impl ContentScanner {
    pub fn new<I, S>(blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blacklist = blacklist
            .into_iter()
            .map(|d| normalize_host(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();

        Self {
            scheme_url: Regex::new(r#"(?i)\bhttps?://[^\s<>"']+"#).expect("url pattern"),
            bare_www: Regex::new(r#"(?i)\bwww\.[^\s<>"']+"#).expect("www pattern"),
            blacklist,
        }
    }

    pub fn with_default_blacklist() -> Self {
        Self::new(DEFAULT_BLACKLIST.iter().copied())
    }

    /// Extract `http(s)://` and bare `www.` URLs, de-duplicated in first-seen order.
    ///
    /// Bare `www.` hosts are returned with an `http://` prefix. Other schemes
    /// (`ftp://`, `mailto:` …) are ignored.
    pub fn extract_urls(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut found: Vec<(usize, String)> = Vec::new();
        for m in self.scheme_url.find_iter(text) {
            found.push((m.start(), trim_url(m.as_str()).to_string()));
        }
        for m in self.bare_www.find_iter(text) {
            // Already covered by a scheme match ("http://www.…").
            if text[..m.start()].ends_with("//") {
                continue;
            }
            found.push((m.start(), format!("http://{}", trim_url(m.as_str()))));
        }
        found.sort_by_key(|(pos, _)| *pos);

        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(|(_, url)| url)
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Number of distinct suspicious keywords present (case-insensitive).
    pub fn count_suspicious_keywords(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let lower = text.to_lowercase();
        SUSPICIOUS_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count()
    }

    /// True if any URL's host (lower-cased, `www.` stripped) is blacklisted.
    pub fn any_blacklisted(&self, urls: &[String]) -> bool {
        urls.iter().any(|u| self.is_blacklisted(u))
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        parsed
            .host_str()
            .map(|host| self.blacklist.contains(&normalize_host(host)))
            .unwrap_or(false)
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

impl Default for ContentScanner {
    fn default() -> Self {
        Self::with_default_blacklist()
    }
}

fn normalize_host(host: &str) -> String {
    let lower = host.trim().to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

fn trim_url(url: &str) -> &str {
    url.trim_end_matches(TRAILING_PUNCT)
}
