//! Persistence checkpoints for the content cache.
//!
//! The controller calls a [`PersistenceStrategy`] at four points: once at
//! startup to load a previous snapshot, after every complete update, after
//! partial updates applied outside a rebuild, and at shutdown. Failures are
//! reported back but never invalidate the in-memory cache.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::snapshot::ContentCache;

#[async_trait]
pub trait PersistenceStrategy: Send + Sync {
    /// Load a previously persisted snapshot, if any.
    async fn load(&self) -> CacheResult<Option<ContentCache>>;

    async fn persist_on_complete_update(&self, cache: &ContentCache) -> CacheResult<()>;

    async fn persist_on_partial_update(&self, cache: &ContentCache) -> CacheResult<()>;

    async fn persist_on_shutdown(&self, cache: &ContentCache) -> CacheResult<()>;
}

/// Keeps the cache in memory only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

#[async_trait]
impl PersistenceStrategy for NoPersistence {
    async fn load(&self) -> CacheResult<Option<ContentCache>> {
        Ok(None)
    }

    async fn persist_on_complete_update(&self, _cache: &ContentCache) -> CacheResult<()> {
        Ok(())
    }

    async fn persist_on_partial_update(&self, _cache: &ContentCache) -> CacheResult<()> {
        Ok(())
    }

    async fn persist_on_shutdown(&self, _cache: &ContentCache) -> CacheResult<()> {
        Ok(())
    }
}

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedCacheRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    cache: &'a ContentCache,
}

#[derive(Deserialize)]
struct PersistedCache {
    version: u32,
    saved_at: DateTime<Utc>,
    cache: ContentCache,
}

/// Writes the cache as a JSON document.
///
/// Writes go to a sibling temporary file that is renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
pub struct FilePersistence {
    path: PathBuf,
    persist_partial_updates: bool,
    write_lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persist_partial_updates: true,
            write_lock: Mutex::new(()),
        }
    }

    /// Skip the partial-update checkpoint; the file is then only refreshed
    /// after complete updates and at shutdown.
    pub fn with_partial_updates(mut self, enabled: bool) -> Self {
        self.persist_partial_updates = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write(&self, cache: &ContentCache, checkpoint: &str) -> CacheResult<()> {
        let _guard = self.write_lock.lock().await;

        let document = PersistedCacheRef {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            cache,
        };
        let bytes = serde_json::to_vec(&document)
            .map_err(|e| CacheError::Persistence(format!("serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CacheError::Persistence(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| CacheError::Persistence(format!("write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            CacheError::Persistence(format!("rename to {}: {}", self.path.display(), e))
        })?;

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            checkpoint = checkpoint,
            "Persisted content cache"
        );
        Ok(())
    }
}

#[async_trait]
impl PersistenceStrategy for FilePersistence {
    async fn load(&self) -> CacheResult<Option<ContentCache>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No persisted content cache found");
                return Ok(None);
            }
            Err(e) => {
                return Err(CacheError::Persistence(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let document: PersistedCache = serde_json::from_slice(&bytes).map_err(|e| {
            CacheError::Persistence(format!("parse {}: {}", self.path.display(), e))
        })?;

        if document.version != FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                version = document.version,
                expected = FORMAT_VERSION,
                "Ignoring persisted content cache with unsupported format version"
            );
            return Ok(None);
        }

        info!(
            path = %self.path.display(),
            saved_at = %document.saved_at,
            offerings = document.cache.summary().offerings,
            "Loaded persisted content cache"
        );
        Ok(Some(document.cache))
    }

    async fn persist_on_complete_update(&self, cache: &ContentCache) -> CacheResult<()> {
        self.write(cache, "complete").await
    }

    async fn persist_on_partial_update(&self, cache: &ContentCache) -> CacheResult<()> {
        if !self.persist_partial_updates {
            return Ok(());
        }
        self.write(cache, "partial").await
    }

    async fn persist_on_shutdown(&self, cache: &ContentCache) -> CacheResult<()> {
        self.write(cache, "shutdown").await
    }
}
