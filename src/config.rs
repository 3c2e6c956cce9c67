//! Configuration, built from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::analysis::DEFAULT_BLACKLIST;
use crate::classify::{CacheConfig, ClientSettings, RetryPolicy};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::mailbox::ImapConfig;

/// Whether the external classification call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// External classification plus local heuristics.
    Classify,
    /// Local heuristics only.
    Degraded,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Degraded => "degraded",
        }
    }

    pub fn classification_enabled(&self) -> bool {
        matches!(self, Self::Classify)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classify" | "llm" => Ok(Self::Classify),
            "degraded" | "fallback" => Ok(Self::Degraded),
            other => Err(ConfigError::InvalidValue {
                key: "MODE".to_string(),
                message: format!("unknown mode '{other}' (expected classify or degraded)"),
            }),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: ProcessingMode,
    /// Present only in classify mode.
    pub llm: Option<LlmConfig>,
    pub client: ClientSettings,
    pub cache: CacheConfig,
    pub poll_interval: Duration,
    pub imap: Option<ImapConfig>,
    pub samples_dir: Option<PathBuf>,
    pub event_log_path: PathBuf,
    pub blacklist: Vec<String>,
    /// HTTP API port; `None` leaves the API off.
    pub api_port: Option<u16>,
    pub logging: LoggingConfig,
}

/// Log output settings. Read separately so tracing can be installed before
/// the rest of the configuration is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated log files.
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            dir: var("LOG_DIR").map(PathBuf::from),
        }
    }
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parsed = |key: &str, default: u64| -> u64 {
            var(key).and_then(|s| s.parse().ok()).unwrap_or(default)
        };

        let requested = match var("MODE") {
            Some(raw) => raw.parse::<ProcessingMode>()?,
            None => ProcessingMode::Classify,
        };

        let backend = match var("LLM_BACKEND") {
            Some(raw) => raw.parse::<LlmBackend>()?,
            None => LlmBackend::Anthropic,
        };

        let llm = var("LLM_API_KEY").map(|key| LlmConfig {
            backend,
            api_key: SecretString::from(key),
            model: var("LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
            timeout: Duration::from_secs(parsed("LLM_TIMEOUT_SECS", 30)),
        });

        let mode = match (requested, &llm) {
            (ProcessingMode::Classify, None) => {
                warn!("MODE=classify but LLM_API_KEY is not set, running in degraded mode");
                ProcessingMode::Degraded
            }
            (mode, _) => mode,
        };
        let llm = if mode.classification_enabled() { llm } else { None };

        let max_requests = parsed("RATE_LIMIT_MAX_REQUESTS", 60);
        if max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_MAX_REQUESTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let window_secs = parsed("RATE_LIMIT_WINDOW_SECS", 60);
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_WINDOW_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let client = ClientSettings {
            max_retries: parsed("LLM_MAX_RETRIES", 3).clamp(1, u32::MAX as u64) as u32,
            max_requests: max_requests as usize,
            window: Duration::from_secs(window_secs),
            retry: RetryPolicy::default(),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            enabled: var("CACHE_ENABLED")
                .map(|s| parse_bool(&s))
                .unwrap_or(true),
            ttl: Duration::from_secs(parsed("CACHE_TTL_SECS", 3600)),
            dir: var("CACHE_DIR").map(PathBuf::from).unwrap_or(cache_defaults.dir),
            remote_url: var("CACHE_REMOTE_URL"),
            remote_token: var("CACHE_REMOTE_TOKEN").map(SecretString::from),
            sweep_interval: cache_defaults.sweep_interval,
        };

        let imap = var("IMAP_HOST").map(|host| ImapConfig {
            host,
            port: var("IMAP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(993),
            username: var("IMAP_USER").unwrap_or_default(),
            password: SecretString::from(var("IMAP_PASS").unwrap_or_default()),
        });

        let blacklist: Vec<String> = match var("URL_BLACKLIST") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            mode,
            llm,
            client,
            cache,
            poll_interval: Duration::from_secs(parsed("POLL_INTERVAL_SECS", 60).max(1)),
            imap,
            samples_dir: var("SAMPLES_DIR").map(PathBuf::from),
            event_log_path: var("EVENT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/email_events.jsonl")),
            blacklist,
            api_port: var("API_PORT").and_then(|s| s.parse().ok()),
            logging: LoggingConfig::from_lookup(&lookup),
        })
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
