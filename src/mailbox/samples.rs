//! Sample-directory mailbox for offline runs.
//!
//! Every readable sample is "unseen" until acknowledged; acknowledgements
//! live in memory only, so a restart replays the directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Mailbox, parse_rfc822};
use crate::error::MailboxError;
use crate::pipeline::types::RawMessage;

const PLACEHOLDER_SENDER: &str = "unknown@example.com";
const PLACEHOLDER_RECIPIENT: &str = "recipient@example.com";

/// Reads sample messages from a directory.
///
/// `*.eml` files are parsed as RFC 822. `*.txt` files use the first line as
/// the subject and the remainder as the body. Message ids are file names.
pub struct SampleMailbox {
    dir: PathBuf,
    acknowledged: Mutex<HashSet<String>>,
}

impl SampleMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            acknowledged: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_acknowledged(&self, id: &str) -> bool {
        self.acknowledged
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Mailbox for SampleMailbox {
    fn name(&self) -> &str {
        "samples"
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if matches!(extension(&path), Some("eml" | "txt")) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::new();
        for path in paths {
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if self.is_acknowledged(&id) {
                continue;
            }

            let raw = tokio::fs::read(&path).await?;
            let parsed = match extension(&path) {
                Some("eml") => parse_rfc822(id.clone(), &raw),
                _ => Some(parse_text_sample(id.clone(), &String::from_utf8_lossy(&raw))),
            };
            match parsed {
                Some(msg) => messages.push(msg),
                None => warn!(file = %path.display(), "Unparseable sample skipped"),
            }
        }

        debug!(count = messages.len(), dir = %self.dir.display(), "Loaded samples");
        Ok(messages)
    }

    async fn acknowledge(&self, message_id: &str) -> Result<(), MailboxError> {
        let mut set = self
            .acknowledged
            .lock()
            .map_err(|_| MailboxError::Protocol("acknowledged set poisoned".into()))?;
        set.insert(message_id.to_string());
        Ok(())
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn parse_text_sample(id: String, text: &str) -> RawMessage {
    let (subject, body) = match text.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest.trim()),
        None => (text.trim(), ""),
    };
    RawMessage::new(
        PLACEHOLDER_SENDER,
        vec![PLACEHOLDER_RECIPIENT.to_string()],
        subject,
        body,
    )
    .with_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_eml_and_txt_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.eml"),
            "From: it@corp.test\r\nTo: me@corp.test\r\nSubject: Reset\r\n\r\nReset your password\r\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.txt"),
            "URGENT: verify now\nClick http://www.example-bad.com/login\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let mailbox = SampleMailbox::new(dir.path());
        let messages = mailbox.fetch_unseen().await.unwrap();
        assert_eq!(messages.len(), 2);

        assert_eq!(messages[0].id, "a.txt");
        assert_eq!(messages[0].subject, "URGENT: verify now");
        assert_eq!(messages[0].sender, PLACEHOLDER_SENDER);
        assert_eq!(messages[0].recipients, vec![PLACEHOLDER_RECIPIENT]);
        assert!(messages[0].body.starts_with("Click"));

        assert_eq!(messages[1].id, "b.eml");
        assert_eq!(messages[1].sender, "it@corp.test");
    }

    #[tokio::test]
    async fn acknowledged_samples_are_not_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.txt"), "Hello\nWorld").unwrap();
        std::fs::write(dir.path().join("two.txt"), "Hi\nThere").unwrap();

        let mailbox = SampleMailbox::new(dir.path());
        assert_eq!(mailbox.fetch_unseen().await.unwrap().len(), 2);

        mailbox.acknowledge("one.txt").await.unwrap();
        let left = mailbox.fetch_unseen().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "two.txt");
    }

    #[tokio::test]
    async fn missing_dir_is_io_error() {
        let mailbox = SampleMailbox::new("/nonexistent/phishguard-samples");
        assert!(matches!(
            mailbox.fetch_unseen().await,
            Err(MailboxError::Io(_))
        ));
    }

    #[test]
    fn single_line_sample_has_empty_body() {
        let msg = parse_text_sample("x.txt".into(), "Only a subject");
        assert_eq!(msg.subject, "Only a subject");
        assert!(msg.body.is_empty());
    }
}
