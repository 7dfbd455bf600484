//! A persistence strategy that remembers every checkpoint.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use content_cache::{CacheError, CacheResult, ContentCache, PersistenceStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Complete,
    Partial,
    Shutdown,
}

/// One recorded checkpoint and the snapshot it was handed.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub checkpoint: Checkpoint,
    pub cache: ContentCache,
}

#[derive(Default)]
pub struct RecordingPersistence {
    stored: Option<ContentCache>,
    fail_load: bool,
    fail_checkpoints: bool,
    recorded: Mutex<Vec<Recorded>>,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// `load` returns `cache`.
    pub fn with_stored(cache: ContentCache) -> Self {
        Self {
            stored: Some(cache),
            ..Self::default()
        }
    }

    /// `load` fails.
    pub fn failing_load() -> Self {
        Self {
            fail_load: true,
            ..Self::default()
        }
    }

    /// Every checkpoint is recorded as attempted, then fails.
    pub fn failing_checkpoints() -> Self {
        Self {
            fail_checkpoints: true,
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.recorded().into_iter().map(|r| r.checkpoint).collect()
    }

    pub fn count(&self, checkpoint: Checkpoint) -> usize {
        self.checkpoints()
            .into_iter()
            .filter(|c| *c == checkpoint)
            .count()
    }

    fn record(&self, checkpoint: Checkpoint, cache: &ContentCache) -> CacheResult<()> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Recorded {
                checkpoint,
                cache: cache.clone(),
            });
        if self.fail_checkpoints {
            return Err(CacheError::Persistence("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStrategy for RecordingPersistence {
    async fn load(&self) -> CacheResult<Option<ContentCache>> {
        if self.fail_load {
            return Err(CacheError::Persistence("snapshot unreadable".to_string()));
        }
        Ok(self.stored.clone())
    }

    async fn persist_on_complete_update(&self, cache: &ContentCache) -> CacheResult<()> {
        self.record(Checkpoint::Complete, cache)
    }

    async fn persist_on_partial_update(&self, cache: &ContentCache) -> CacheResult<()> {
        self.record(Checkpoint::Partial, cache)
    }

    async fn persist_on_shutdown(&self, cache: &ContentCache) -> CacheResult<()> {
        self.record(Checkpoint::Shutdown, cache)
    }
}
