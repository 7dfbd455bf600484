use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CacheUpdate, UpdateKind};
use crate::error::CacheResult;
use crate::snapshot::ContentCache;
use crate::source::ContentSource;

/// Rebuild the cache from the backing store.
///
/// The controller hands this update a fresh, empty snapshot; whatever the
/// source fills in replaces the live cache once the rebuild finishes.
#[derive(Clone)]
pub struct CompleteCacheUpdate {
    source: Arc<dyn ContentSource>,
}

impl CompleteCacheUpdate {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self { source }
    }
}

impl fmt::Debug for CompleteCacheUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompleteCacheUpdate")
            .field("source", &self.source.name())
            .finish()
    }
}

#[async_trait]
impl CacheUpdate for CompleteCacheUpdate {
    fn kind(&self) -> UpdateKind {
        UpdateKind::Complete
    }

    fn name(&self) -> &'static str {
        "complete cache update"
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        self.source.populate(cache).await
    }
}
