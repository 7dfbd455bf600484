//! Cache updates.
//!
//! A [`CacheUpdate`] describes one change to the content cache: either a
//! complete rebuild from the backing store or a partial delta derived from a
//! single data-modifying operation. The controller never calls a
//! `CacheUpdate` directly; it wraps it in an [`UpdateUnit`], which captures
//! the failure instead of propagating it so the controller can hand it to
//! the submitting caller and to every caller waiting on the same rebuild.

mod complete;
mod composite;
mod observation;
mod result;
mod sensor;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CacheError, CacheResult};
use crate::snapshot::ContentCache;

pub use complete::CompleteCacheUpdate;
pub use composite::CompositeUpdate;
pub use observation::ObservationInsertionUpdate;
pub use result::{ResultInsertionUpdate, ResultTemplateInsertionUpdate};
pub use sensor::{SensorDeletionUpdate, SensorInsertionUpdate};

/// Whether an update rebuilds the cache or patches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Complete,
    Partial,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Complete => "complete",
            UpdateKind::Partial => "partial",
        }
    }
}

/// Domain logic of a single cache change.
///
/// `apply` must be replayable: partial updates queued during a rebuild are
/// applied a second time against the rebuilt snapshot.
#[async_trait]
pub trait CacheUpdate: Send + Sync + fmt::Debug {
    fn kind(&self) -> UpdateKind {
        UpdateKind::Partial
    }

    /// Short name used in logs, metrics and error messages.
    fn name(&self) -> &'static str;

    /// Reject submissions that cannot possibly apply.
    fn validate(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()>;
}

pub(crate) fn require(update: &str, field: &str, value: &str) -> CacheResult<()> {
    if value.trim().is_empty() {
        return Err(CacheError::IllegalSubmission(format!(
            "{}: {} must not be empty",
            update, field
        )));
    }
    Ok(())
}

/// A submitted update together with its execution outcome.
pub struct UpdateUnit {
    update: Box<dyn CacheUpdate>,
    failure: Option<CacheError>,
    executed: bool,
}

impl UpdateUnit {
    pub fn new(update: impl CacheUpdate + 'static) -> Self {
        Self::from_boxed(Box::new(update))
    }

    pub fn from_boxed(update: Box<dyn CacheUpdate>) -> Self {
        Self {
            update,
            failure: None,
            executed: false,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        self.update.kind()
    }

    pub fn is_complete_update(&self) -> bool {
        self.kind() == UpdateKind::Complete
    }

    pub fn name(&self) -> &'static str {
        self.update.name()
    }

    pub fn validate(&self) -> CacheResult<()> {
        self.update.validate()
    }

    /// Apply the update to `cache`, recording any failure on the unit.
    ///
    /// A unit executes at most once until [`reset`](Self::reset) is called.
    pub async fn execute(&mut self, cache: &mut ContentCache) {
        if self.executed {
            self.failure = Some(CacheError::IllegalSubmission(format!(
                "{} was already executed",
                self.name()
            )));
            return;
        }
        self.executed = true;
        if let Err(e) = self.update.apply(cache).await {
            self.failure = Some(e);
        }
    }

    /// Return the unit to its pre-execution state.
    pub fn reset(&mut self) {
        self.failure = None;
        self.executed = false;
    }

    pub fn has_executed(&self) -> bool {
        self.executed
    }

    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure_cause(&self) -> Option<&CacheError> {
        self.failure.as_ref()
    }
}

impl fmt::Debug for UpdateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUnit")
            .field("update", &self.update)
            .field("executed", &self.executed)
            .field("failure", &self.failure)
            .finish()
    }
}

impl<T: CacheUpdate + 'static> From<T> for UpdateUnit {
    fn from(update: T) -> Self {
        UpdateUnit::new(update)
    }
}
