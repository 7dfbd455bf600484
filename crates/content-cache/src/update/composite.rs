use async_trait::async_trait;

use super::{CacheUpdate, UpdateKind};
use crate::error::{CacheError, CacheResult};
use crate::snapshot::ContentCache;

/// Several partial updates applied as one unit.
///
/// Used when one request touches the cache in more than one way, e.g. a
/// batch that registers a sensor and inserts its first observations.
#[derive(Debug)]
pub struct CompositeUpdate {
    updates: Vec<Box<dyn CacheUpdate>>,
}

impl CompositeUpdate {
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
        }
    }

    pub fn with(mut self, update: impl CacheUpdate + 'static) -> Self {
        self.updates.push(Box::new(update));
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl Default for CompositeUpdate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheUpdate for CompositeUpdate {
    fn name(&self) -> &'static str {
        "composite update"
    }

    fn validate(&self) -> CacheResult<()> {
        if self.updates.is_empty() {
            return Err(CacheError::IllegalSubmission(
                "composite update without updates".to_string(),
            ));
        }
        for update in &self.updates {
            if update.kind() == UpdateKind::Complete {
                return Err(CacheError::IllegalSubmission(format!(
                    "{} cannot be part of a composite update",
                    update.name()
                )));
            }
            update.validate()?;
        }
        Ok(())
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        for update in &self.updates {
            update.apply(cache).await?;
        }
        Ok(())
    }
}
