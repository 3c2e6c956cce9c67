//! Error types for phishguard.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the external classification service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Outbound rate window did not open after {rounds} waits")]
    RateWindowStarved { rounds: u32 },
}

impl LlmError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed { .. })
    }
}

/// Response cache storage errors. Never fatal: callers log and treat as a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Mailbox collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("Mailbox authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    #[error("Unknown message id: {0}")]
    UnknownMessage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-message pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Batch too large: {size} > {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_not_retryable() {
        let err = LlmError::AuthFailed {
            provider: "anthropic".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_failures_are_retryable() {
        let err = LlmError::Timeout {
            provider: "openai".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_retryable());
        assert!(
            LlmError::InvalidResponse {
                provider: "openai".into(),
                reason: "no json".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn config_error_converts_into_top_level() {
        let err: Error = ConfigError::MissingRequired {
            key: "LLM_API_KEY".into(),
            hint: "set it".into(),
        }
        .into();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }
}
