//! Mailbox collaborators: where raw messages come from.
//!
//! The pipeline needs two operations only: fetch what has not been seen yet,
//! and acknowledge a message so it is not delivered again.

mod imap;
mod samples;

pub use imap::{ImapConfig, ImapMailbox};
pub use samples::SampleMailbox;

use std::collections::BTreeMap;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::error::MailboxError;
use crate::pipeline::types::RawMessage;

/// A source of raw messages.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logs ("imap", "samples").
    fn name(&self) -> &str;

    /// Messages not yet acknowledged. Re-fetchable: an unacknowledged
    /// message is returned again on the next call.
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, MailboxError>;

    /// Mark a message consumed.
    async fn acknowledge(&self, message_id: &str) -> Result<(), MailboxError>;
}

/// Headers copied into [`RawMessage::headers`].
const KEPT_HEADERS: &[(&str, &str)] = &[
    ("Message-ID", "message_id"),
    ("Reply-To", "reply_to"),
    ("X-Originating-IP", "x_originating_ip"),
    ("Received", "received"),
];

/// Parse an RFC 822 message into a [`RawMessage`] with the given id.
pub fn parse_rfc822(id: impl Into<String>, raw: &[u8]) -> Option<RawMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let recipients: Vec<String> = parsed
        .to()
        .map(|addr| {
            addr.iter()
                .filter_map(|a| a.address())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or_default().trim().to_string();

    let mut headers = BTreeMap::new();
    for (name, key) in KEPT_HEADERS {
        if let Some(value) = parsed.header_raw(*name) {
            headers.insert(key.to_string(), value.trim().to_string());
        }
    }

    Some(RawMessage {
        id: id.into(),
        sender,
        recipients,
        subject,
        body: extract_body(&parsed),
        headers,
    })
}

/// Prefer a real `text/plain` part; otherwise keep the raw HTML so markup
/// and links still reach the scanner.
///
/// `body_text` renders HTML down to text, so the part type is checked first.
fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(part) = parsed.text_part(0)
        && let PartType::Text(text) = &part.body
    {
        return text.to_string();
    }
    if let Some(part) = parsed.html_part(0)
        && let PartType::Html(html) = &part.body
    {
        return html.to_string();
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: Security Team <security@bank.test>\r\n\
        To: alice@corp.test, bob@corp.test\r\n\
        Subject: Account suspended\r\n\
        Message-ID: <abc123@bank.test>\r\n\
        Reply-To: noreply@bank.test\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Please verify your account at http://www.example-bad.com/login\r\n";

    #[test]
    fn parses_headers_and_body() {
        let msg = parse_rfc822("42", SAMPLE.as_bytes()).unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.sender, "security@bank.test");
        assert_eq!(msg.recipients, vec!["alice@corp.test", "bob@corp.test"]);
        assert_eq!(msg.subject, "Account suspended");
        assert!(msg.body.contains("verify your account"));
        assert_eq!(msg.headers["message_id"], "<abc123@bank.test>");
        assert!(msg.headers.contains_key("reply_to"));
    }

    #[test]
    fn html_only_body_is_kept_raw() {
        let raw = "From: a@b.test\r\nSubject: Hi\r\nContent-Type: text/html\r\n\r\n<p>Click <a href=\"http://x.test\">here</a></p>\r\n";
        let msg = parse_rfc822("1", raw.as_bytes()).unwrap();
        assert!(msg.body.contains("<a href=\"http://x.test\">"));
    }

    #[test]
    fn multipart_html_only_body_is_kept_raw() {
        let raw = "From: a@b.test\r\n\
            Subject: Hi\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
            \r\n\
            --b1\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>Verify <a href=\"http://www.example-bad.com/login\">now</a></p>\r\n\
            --b1--\r\n";
        let msg = parse_rfc822("2", raw.as_bytes()).unwrap();
        assert!(msg.body.contains("href=\"http://www.example-bad.com/login\""));
    }

    #[test]
    fn plain_part_wins_over_html_alternative() {
        let raw = "From: a@b.test\r\n\
            Subject: Hi\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/alternative; boundary=\"b2\"\r\n\
            \r\n\
            --b2\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            Plain version\r\n\
            --b2\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>HTML version</p>\r\n\
            --b2--\r\n";
        let msg = parse_rfc822("3", raw.as_bytes()).unwrap();
        assert!(msg.body.contains("Plain version"));
        assert!(!msg.body.contains("<p>"));
    }
}
