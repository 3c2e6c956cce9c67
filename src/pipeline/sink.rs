//! Event persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SinkError;
use crate::pipeline::types::EmailEvent;

/// Destination for processed events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &EmailEvent) -> Result<(), SinkError>;
}

/// Appends one JSON object per line to a file.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends so concurrent writers never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn append(&self, event: &EmailEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(id = %event.message_id, path = %self.path.display(), "Event appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ContentScanner;
    use crate::pipeline::orchestrator::ScoringOrchestrator;
    use crate::pipeline::types::RawMessage;

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("nested/events.jsonl"));
        let orch = ScoringOrchestrator::degraded(ContentScanner::with_default_blacklist());

        for subject in ["First", "Second"] {
            let event = orch
                .process(&RawMessage::new("a@b.test", vec![], subject, "Body"))
                .await;
            sink.append(&event).await.unwrap();
        }

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["subject"], "First");
        assert_eq!(first["sender"], "[EMAIL_REDACTED]");
        assert_eq!(first["risk_level"], "low");
        assert!(first["classification_label"].is_null());
        assert!(first["features"]["body_length"].is_u64());

        let second: EmailEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.subject, "Second");
    }
}
