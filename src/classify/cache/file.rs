//! Local file cache: `<dir>/<shard>/<fingerprint>.json`.
//!
//! Entries are written to a hidden temp file in the shard directory and
//! renamed into place, so a reader sees either the previous entry or the new
//! one. `clear` moves the whole directory aside before deleting it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CacheEntry, CacheStats, ResponseCache};
use crate::classify::fingerprint::Fingerprint;
use crate::error::CacheError;

const ENTRY_EXT: &str = "json";

/// Sharded JSON-file cache on local disk.
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    /// Open (or create) the cache directory and sweep expired entries.
    pub async fn open(dir: impl AsRef<Path>, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let cache = Self { dir, ttl };
        match cache.purge_expired().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Cleaned expired cache entries"),
            Err(e) => warn!(error = %e, "Initial cache sweep failed"),
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir
            .join(key.shard())
            .join(format!("{}.{ENTRY_EXT}", key.as_str()))
    }

    /// All committed entry files. A missing root reads as empty (e.g. mid-clear).
    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut shards = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = match fs::read_dir(shard.path()).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_entry_file(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn is_entry_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT)
}

async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Modification time and length of an entry file, taken before reading it.
type Snapshot = (Option<SystemTime>, u64);

async fn snapshot(path: &Path) -> Option<Snapshot> {
    let meta = fs::metadata(path).await.ok()?;
    Some((meta.modified().ok(), meta.len()))
}

/// Remove an expired entry unless a concurrent `set` has renamed a fresh one
/// into place since `seen` was taken. Returns whether the file was removed.
///
/// A replacement landing between the check and the removal is still lost,
/// which costs one cache miss.
async fn remove_if_unchanged(path: &Path, seen: Option<Snapshot>) -> Result<bool, CacheError> {
    if seen.is_none() || snapshot(path).await != seen {
        return Ok(false);
    }
    remove_if_present(path).await?;
    Ok(true)
}

#[async_trait]
impl ResponseCache for FileCache {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let seen = snapshot(&path).await;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                key: key.short().to_string(),
                reason: e.to_string(),
            })?;

        if entry.is_expired(self.ttl, Utc::now()) {
            debug!(key = key.short(), "Cache entry expired");
            if let Err(e) = remove_if_unchanged(&path, seen).await {
                debug!(key = key.short(), error = %e, "Failed to remove expired entry");
            }
            return Ok(None);
        }

        debug!(key = key.short(), "Cache hit");
        Ok(Some(entry))
    }

    async fn set(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let shard_dir = self.dir.join(key.shard());
        fs::create_dir_all(&shard_dir).await?;

        let json = serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Corrupt {
            key: key.short().to_string(),
            reason: e.to_string(),
        })?;

        let tmp = shard_dir.join(format!(".{}.{}.tmp", key.as_str(), Uuid::new_v4()));
        fs::write(&tmp, &json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key = key.short(), "Cached result");
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> Result<(), CacheError> {
        remove_if_present(&self.entry_path(key)).await?;
        debug!(key = key.short(), "Deleted cache entry");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let name = self
            .dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cache");
        let aside = self
            .dir
            .with_file_name(format!(".{name}.clearing-{}", Uuid::new_v4()));

        match fs::rename(&self.dir, &aside).await {
            Ok(()) => {
                fs::create_dir_all(&self.dir).await?;
                fs::remove_dir_all(&aside).await?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(dir = %self.dir.display(), "Cache cleared");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let files = self.entry_files().await?;
        let mut total_size_bytes = 0;
        for path in &files {
            if let Ok(meta) = fs::metadata(path).await {
                total_size_bytes += meta.len();
            }
        }

        Ok(CacheStats {
            backend: self.backend().to_string(),
            location: self.dir.display().to_string(),
            total_entries: files.len() as u64,
            total_size_bytes,
            ttl_seconds: self.ttl.as_secs(),
        })
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_files().await? {
            let seen = snapshot(&path).await;
            let stale = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CacheEntry>(&bytes)
                    .map(|entry| entry.is_expired(self.ttl, now))
                    .unwrap_or(true),
                Err(_) => continue,
            };
            if stale && remove_if_unchanged(&path, seen).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
