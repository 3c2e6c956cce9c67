//! Content-addressed, TTL-expiring store of classification results.
//!
//! One capability trait, two backends:
//! - [`FileCache`]: sharded JSON files on local disk
//! - [`LibSqlCache`]: a libSQL table, remote (shared) or in-memory
//!
//! [`connect_cache`] picks the backend once at startup.

mod file;
mod sql;

pub use self::file::FileCache;
pub use self::sql::LibSqlCache;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::fingerprint::Fingerprint;
use crate::classify::types::Label;
use crate::error::CacheError;

/// A cached classification. The model identifier is not stored; the client
/// fills it in from its own configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub label: Label,
    pub confidence: f64,
    pub explanation: String,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(label: Label, confidence: f64, explanation: impl Into<String>) -> Self {
        Self {
            label,
            confidence,
            explanation: explanation.into(),
            stored_at: Utc::now(),
        }
    }

    /// Logically absent once `now - stored_at > ttl`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }
}

/// Observability snapshot of a cache backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub location: String,
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub ttl_seconds: u64,
}

/// Storage-agnostic cache capability.
///
/// Writes replace whole entries; readers never observe a partially written
/// entry. Errors are reported to the caller, which treats them as a miss.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Backend name for stats and logs.
    fn backend(&self) -> &'static str;

    fn ttl(&self) -> Duration;

    /// Fetch a live entry. Expired entries read as `None` and may be removed.
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Unconditional overwrite.
    async fn set(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn delete(&self, key: &Fingerprint) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Eagerly remove expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, CacheError>;
}

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub dir: PathBuf,
    pub remote_url: Option<String>,
    pub remote_token: Option<SecretString>,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            dir: PathBuf::from("/tmp/phishguard-cache"),
            remote_url: None,
            remote_token: None,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Build the configured cache backend.
///
/// A remote store that cannot be reached at startup degrades to the local
/// file cache (logged once). A local cache that cannot be opened disables
/// caching altogether; neither case is fatal.
pub async fn connect_cache(config: &CacheConfig) -> Option<Arc<dyn ResponseCache>> {
    if !config.enabled {
        info!("Response cache disabled");
        return None;
    }

    if let Some(url) = config.remote_url.as_deref() {
        let token = config
            .remote_token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_default();
        match LibSqlCache::connect_remote(url, &token, config.ttl).await {
            Ok(cache) => {
                info!(url = %url, ttl_secs = config.ttl.as_secs(), "Using remote response cache");
                return Some(Arc::new(cache));
            }
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    "Remote cache unreachable, falling back to local file cache"
                );
            }
        }
    }

    match FileCache::open(&config.dir, config.ttl).await {
        Ok(cache) => {
            info!(
                dir = %config.dir.display(),
                ttl_secs = config.ttl.as_secs(),
                "Using local response cache"
            );
            Some(Arc::new(cache))
        }
        Err(e) => {
            warn!(dir = %config.dir.display(), error = %e, "Failed to open cache, caching disabled");
            None
        }
    }
}

/// Spawn a periodic sweep that drops expired entries.
pub fn spawn_sweeper(cache: Arc<dyn ResponseCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(count) => debug!(count, backend = cache.backend(), "Swept expired cache entries"),
                Err(e) => warn!(error = %e, backend = cache.backend(), "Cache sweep failed"),
            }
        }
    })
}
