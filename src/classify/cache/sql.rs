//! libSQL cache backend: a single `classification_cache` table.
//!
//! Used for a shared remote store (sqld / Turso) so several processes reuse
//! the same results. Each write is a single `INSERT OR REPLACE`, and `clear`
//! is a single `DELETE`, so readers never see partial rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, params};
use tracing::{debug, info};

use super::{CacheEntry, CacheStats, ResponseCache};
use crate::classify::fingerprint::Fingerprint;
use crate::classify::types::Label;
use crate::error::CacheError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS classification_cache (
        fingerprint TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        explanation TEXT NOT NULL,
        stored_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_classification_cache_stored_at
        ON classification_cache(stored_at);
"#;

/// libSQL-backed response cache.
pub struct LibSqlCache {
    conn: Connection,
    ttl: Duration,
    location: String,
}

impl LibSqlCache {
    /// Connect to a remote libSQL server and ensure the table exists.
    ///
    /// The schema statement is the reachability probe: an unreachable server
    /// fails here rather than on first use.
    pub async fn connect_remote(url: &str, token: &str, ttl: Duration) -> Result<Self, CacheError> {
        let db = libsql::Builder::new_remote(url.to_string(), token.to_string())
            .build()
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to open remote cache: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| CacheError::Backend(format!("Failed to create connection: {e}")))?;

        let cache = Self {
            conn,
            ttl,
            location: url.to_string(),
        };
        cache.init_schema().await?;
        Ok(cache)
    }

    /// Create an in-memory cache (for tests).
    pub async fn new_memory(ttl: Duration) -> Result<Self, CacheError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to create in-memory cache: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| CacheError::Backend(format!("Failed to create connection: {e}")))?;

        let cache = Self {
            conn,
            ttl,
            location: ":memory:".to_string(),
        };
        cache.init_schema().await?;
        Ok(cache)
    }

    async fn init_schema(&self) -> Result<(), CacheError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| CacheError::Backend(format!("init_schema: {e}")))?;
        Ok(())
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_entry(row: &libsql::Row, key: &Fingerprint) -> Result<CacheEntry, CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.short().to_string(),
        reason,
    };

    let label: String = row.get(0).map_err(|e| corrupt(e.to_string()))?;
    let confidence: f64 = row.get(1).map_err(|e| corrupt(e.to_string()))?;
    let explanation: String = row.get(2).map_err(|e| corrupt(e.to_string()))?;
    let stored_at: String = row.get(3).map_err(|e| corrupt(e.to_string()))?;

    Ok(CacheEntry {
        label: label.parse::<Label>().map_err(corrupt)?,
        confidence,
        explanation,
        stored_at: DateTime::parse_from_rfc3339(&stored_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl ResponseCache for LibSqlCache {
    fn backend(&self) -> &'static str {
        "libsql"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let mut rows = self
            .conn
            .query(
                "SELECT label, confidence, explanation, stored_at FROM classification_cache WHERE fingerprint = ?1",
                params![key.to_string()],
            )
            .await
            .map_err(|e| CacheError::Backend(format!("get: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(CacheError::Backend(format!("get: {e}"))),
        };

        let entry = row_to_entry(&row, key)?;
        if entry.is_expired(self.ttl, Utc::now()) {
            debug!(key = key.short(), "Cache entry expired");
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO classification_cache (fingerprint, label, confidence, explanation, stored_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key.to_string(),
                    entry.label.as_str().to_string(),
                    entry.confidence,
                    entry.explanation.clone(),
                    format_ts(&entry.stored_at),
                ],
            )
            .await
            .map_err(|e| CacheError::Backend(format!("set: {e}")))?;

        debug!(key = key.short(), "Cached result");
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> Result<(), CacheError> {
        self.conn
            .execute(
                "DELETE FROM classification_cache WHERE fingerprint = ?1",
                params![key.to_string()],
            )
            .await
            .map_err(|e| CacheError::Backend(format!("delete: {e}")))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.conn
            .execute("DELETE FROM classification_cache", ())
            .await
            .map_err(|e| CacheError::Backend(format!("clear: {e}")))?;
        info!(location = %self.location, "Cache cleared");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(fingerprint) + LENGTH(label) + LENGTH(explanation) + LENGTH(stored_at) + 8), 0) FROM classification_cache",
                (),
            )
            .await
            .map_err(|e| CacheError::Backend(format!("stats: {e}")))?;

        let (entries, size) = match rows.next().await {
            Ok(Some(row)) => (
                row.get::<i64>(0).unwrap_or(0),
                row.get::<i64>(1).unwrap_or(0),
            ),
            Ok(None) => (0, 0),
            Err(e) => return Err(CacheError::Backend(format!("stats: {e}"))),
        };

        Ok(CacheStats {
            backend: self.backend().to_string(),
            location: self.location.clone(),
            total_entries: entries.max(0) as u64,
            total_size_bytes: size.max(0) as u64,
            ttl_seconds: self.ttl.as_secs(),
        })
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| CacheError::Backend(format!("ttl out of range: {e}")))?;
        let cutoff = format_ts(&(Utc::now() - ttl));
        let count = self
            .conn
            .execute(
                "DELETE FROM classification_cache WHERE stored_at < ?1",
                params![cutoff],
            )
            .await
            .map_err(|e| CacheError::Backend(format!("purge_expired: {e}")))?;
        Ok(count as usize)
    }
}
