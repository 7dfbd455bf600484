//! The content cache controller.
//!
//! Owns the live [`ContentCache`] and serializes every change to it:
//!
//! - Partial updates are staged on a copy of the live snapshot and published
//!   atomically, one at a time. If a rebuild is running they are also queued
//!   and replayed against the rebuilt snapshot before it is published.
//! - Complete updates go through the two-slot admission in
//!   [`crate::rebuild`]; at most one executes at a time, at most one waits
//!   behind it, and redundant requests join a pending rebuild.
//! - Readers load the current snapshot without locking.
//!
//! Rebuilds execute on spawned tasks, so a caller that stops waiting does not
//! stall the rebuild or the callers joined to it.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::persistence::PersistenceStrategy;
use crate::rebuild::{Admission, Rebuild, RebuildEvent, RebuildSlots, RebuildState};
use crate::snapshot::ContentCache;
use crate::source::ContentSource;
use crate::update::{CompleteCacheUpdate, UpdateUnit};

/// Point-in-time view of the controller for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub accepting_updates: bool,
    pub update_in_progress: bool,
    pub current: Option<RebuildState>,
    pub next: Option<RebuildState>,
    pub queued_partial_updates: usize,
    pub partial_updates: u64,
    pub failed_partial_updates: u64,
    pub completed_rebuilds: u64,
    pub failed_rebuilds: u64,
    pub deduplicated_rebuilds: u64,
    pub last_complete_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ControllerStats {
    partial_updates: AtomicU64,
    failed_partial_updates: AtomicU64,
    completed_rebuilds: AtomicU64,
    failed_rebuilds: AtomicU64,
    deduplicated_rebuilds: AtomicU64,
}

struct ControllerInner {
    cache: ArcSwap<ContentCache>,
    slots: Mutex<RebuildSlots>,
    queued_partials: Mutex<VecDeque<UpdateUnit>>,
    /// Serializes partial updates, the publish step of rebuilds and every
    /// persistence checkpoint.
    partial_lock: tokio::sync::Mutex<()>,
    /// A partial checkpoint was skipped because a rebuild was pending.
    persistence_deferred: AtomicBool,
    source: Arc<dyn ContentSource>,
    persistence: Arc<dyn PersistenceStrategy>,
    next_rebuild_id: AtomicU64,
    closed: AtomicBool,
    last_complete_update: Mutex<Option<DateTime<Utc>>>,
    stats: ControllerStats,
}

/// Handle to the content cache. Cheap to clone; all clones share one cache.
#[derive(Clone)]
pub struct CacheController {
    inner: Arc<ControllerInner>,
}

impl CacheController {
    /// Create a controller, restoring the persisted snapshot if there is one.
    ///
    /// Without a persisted snapshot the controller starts empty and runs one
    /// complete update. A failure of that update is logged, not returned:
    /// the controller is usable with an empty cache.
    pub async fn start(
        source: Arc<dyn ContentSource>,
        persistence: Arc<dyn PersistenceStrategy>,
    ) -> Self {
        let loaded = match persistence.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted content cache, starting empty");
                None
            }
        };

        let rebuild_now = loaded.is_none();
        let controller = Self::with_snapshot(loaded.unwrap_or_default(), source, persistence);

        if rebuild_now {
            info!("Running initial complete cache update");
            if let Err(e) = controller.refresh().await {
                warn!(error = %e, "Initial complete cache update failed, serving empty cache");
            }
        }

        controller
    }

    /// Create a controller serving `snapshot` without touching persistence.
    pub fn with_snapshot(
        snapshot: ContentCache,
        source: Arc<dyn ContentSource>,
        persistence: Arc<dyn PersistenceStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                cache: ArcSwap::from_pointee(snapshot),
                slots: Mutex::new(RebuildSlots::default()),
                queued_partials: Mutex::new(VecDeque::new()),
                partial_lock: tokio::sync::Mutex::new(()),
                persistence_deferred: AtomicBool::new(false),
                source,
                persistence,
                next_rebuild_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                last_complete_update: Mutex::new(None),
                stats: ControllerStats::default(),
            }),
        }
    }

    /// Apply `unit` and wait until its effect is visible in the cache.
    ///
    /// For a complete update this waits for the rebuild the request was
    /// admitted to, which may be an already pending one.
    pub async fn update(&self, unit: UpdateUnit) -> CacheResult<()> {
        self.inner.ensure_open()?;
        if unit.has_executed() {
            return Err(CacheError::IllegalSubmission(format!(
                "{} was already executed",
                unit.name()
            )));
        }
        if let Err(e) = unit.validate() {
            counter!("content_cache_updates_total", "kind" => unit.kind().as_str(), "outcome" => "rejected")
                .increment(1);
            warn!(update = unit.name(), error = %e, "Rejected cache update");
            return Err(e);
        }

        if unit.is_complete_update() {
            self.inner.update_complete(unit).await
        } else {
            self.inner.update_partial(unit).await
        }
    }

    /// Rebuild the cache from the configured content source.
    pub async fn refresh(&self) -> CacheResult<()> {
        let update = CompleteCacheUpdate::new(Arc::clone(&self.inner.source));
        self.update(UpdateUnit::new(update)).await
    }

    /// True while a complete update is admitted and not yet finished.
    pub fn is_update_in_progress(&self) -> bool {
        self.inner.slots().in_progress()
    }

    /// The current snapshot. Never blocks; the snapshot may be superseded
    /// right after it is returned.
    pub fn get_cache(&self) -> Arc<ContentCache> {
        self.inner.cache.load_full()
    }

    pub fn status(&self) -> ControllerStatus {
        let stats = &self.inner.stats;
        let (update_in_progress, current, next) = {
            let slots = self.inner.slots();
            (slots.in_progress(), slots.current_state(), slots.next_state())
        };

        ControllerStatus {
            accepting_updates: !self.inner.closed.load(Ordering::Acquire),
            update_in_progress,
            current,
            next,
            queued_partial_updates: self.inner.queued().len(),
            partial_updates: stats.partial_updates.load(Ordering::Relaxed),
            failed_partial_updates: stats.failed_partial_updates.load(Ordering::Relaxed),
            completed_rebuilds: stats.completed_rebuilds.load(Ordering::Relaxed),
            failed_rebuilds: stats.failed_rebuilds.load(Ordering::Relaxed),
            deduplicated_rebuilds: stats.deduplicated_rebuilds.load(Ordering::Relaxed),
            last_complete_update: *self.inner.last_complete_update(),
        }
    }

    /// Stop accepting updates, wait for pending rebuilds and run the
    /// shutdown checkpoint. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = self.inner.slots().pending();
        info!(pending_rebuilds = pending.len(), "Shutting down cache controller");
        for rebuild in pending {
            let _ = rebuild.wait().await;
        }

        let _guard = self.inner.partial_lock.lock().await;
        let cache = self.get_cache();
        if let Err(e) = self.inner.persistence.persist_on_shutdown(&cache).await {
            counter!("content_cache_persistence_failures_total", "checkpoint" => "shutdown")
                .increment(1);
            warn!(error = %e, "Failed to persist content cache on shutdown");
        }
    }
}

impl ControllerInner {
    fn slots(&self) -> MutexGuard<'_, RebuildSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queued(&self) -> MutexGuard<'_, VecDeque<UpdateUnit>> {
        self.queued_partials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn last_complete_update(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_complete_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn update_partial(&self, mut unit: UpdateUnit) -> CacheResult<()> {
        let name = unit.name();
        let _guard = self.partial_lock.lock().await;
        // Shutdown takes this lock for its checkpoint.
        self.ensure_open()?;

        let mut staged = ContentCache::clone(&self.cache.load());
        unit.execute(&mut staged).await;
        if let Some(cause) = unit.failure_cause() {
            self.stats
                .failed_partial_updates
                .fetch_add(1, Ordering::Relaxed);
            counter!("content_cache_updates_total", "kind" => "partial", "outcome" => "failed")
                .increment(1);
            warn!(update = name, error = %cause, "Partial cache update failed, cache unchanged");
            return Err(cause.clone());
        }
        staged.touch(Utc::now());
        let staged = Arc::new(staged);

        let deferred = {
            let slots = self.slots();
            self.cache.store(Arc::clone(&staged));
            match slots.current_state() {
                Some(RebuildState::Running) => {
                    unit.reset();
                    let mut queue = self.queued();
                    queue.push_back(unit);
                    gauge!("content_cache_queued_partial_updates").set(queue.len() as f64);
                    true
                }
                Some(RebuildState::Waiting) => true,
                _ => false,
            }
        };

        self.stats.partial_updates.fetch_add(1, Ordering::Relaxed);
        counter!("content_cache_updates_total", "kind" => "partial", "outcome" => "success")
            .increment(1);
        debug!(update = name, deferred = deferred, "Applied partial cache update");

        if deferred {
            self.persistence_deferred.store(true, Ordering::Release);
        } else {
            self.persist_partial(&staged).await;
        }
        Ok(())
    }

    async fn update_complete(self: &Arc<Self>, unit: UpdateUnit) -> CacheResult<()> {
        let admission = {
            let mut slots = self.slots();
            // Shutdown collects pending rebuilds under this lock.
            self.ensure_open()?;
            slots.admit(|| Rebuild::new(self.next_rebuild_id.fetch_add(1, Ordering::Relaxed), unit))
        };

        let rebuild = match admission {
            Admission::Execute(rebuild) => {
                debug!(rebuild = rebuild.id(), "Complete cache update admitted");
                self.spawn_rebuild(Arc::clone(&rebuild), None);
                rebuild
            }
            Admission::ExecuteAfter { previous, rebuild } => {
                debug!(
                    rebuild = rebuild.id(),
                    behind = previous.id(),
                    "Complete cache update queued behind running rebuild"
                );
                self.spawn_rebuild(Arc::clone(&rebuild), Some(previous));
                rebuild
            }
            Admission::Join(rebuild) => {
                self.stats
                    .deduplicated_rebuilds
                    .fetch_add(1, Ordering::Relaxed);
                counter!("content_cache_deduplicated_rebuilds_total").increment(1);
                debug!(rebuild = rebuild.id(), "Complete cache update already pending, joining it");
                rebuild
            }
        };

        rebuild.wait().await
    }

    fn spawn_rebuild(self: &Arc<Self>, rebuild: Arc<Rebuild>, previous: Option<Arc<Rebuild>>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // The outcome of `previous` belongs to its own callers.
                let _ = previous.wait().await;
                inner.slots().settle();
            }
            inner.run_rebuild(rebuild).await;
        });
    }

    async fn run_rebuild(&self, rebuild: Arc<Rebuild>) {
        let started = Instant::now();

        let start = {
            let slots = self.slots();
            if slots.is_current(&rebuild) {
                rebuild
                    .advance(RebuildEvent::Start)
                    .map_err(|e| CacheError::Aborted(e.to_string()))
            } else {
                Err(CacheError::Aborted(format!(
                    "rebuild {} scheduled out of turn",
                    rebuild.id()
                )))
            }
        };
        if let Err(cause) = start {
            error!(rebuild = rebuild.id(), error = %cause, "Complete cache update could not start");
            self.finish_failed(&rebuild, cause, started).await;
            return;
        }

        let Some(mut unit) = rebuild.take_unit() else {
            let cause = CacheError::Aborted(format!("rebuild {} has no update", rebuild.id()));
            self.finish_failed(&rebuild, cause, started).await;
            return;
        };

        info!(
            rebuild = rebuild.id(),
            source = self.source.name(),
            update = unit.name(),
            "Starting complete cache update"
        );

        let mut fresh = ContentCache::new();
        let failure = match AssertUnwindSafe(unit.execute(&mut fresh))
            .catch_unwind()
            .await
        {
            Ok(()) => unit.failure_cause().cloned(),
            Err(_) => Some(CacheError::Aborted(
                "complete cache update panicked".to_string(),
            )),
        };
        if let Some(cause) = failure {
            self.finish_failed(&rebuild, cause, started).await;
            return;
        }

        let _guard = self.partial_lock.lock().await;
        if let Err(e) = rebuild.advance(RebuildEvent::Built) {
            warn!(rebuild = rebuild.id(), error = %e, "Unexpected rebuild state");
        }

        let queued: Vec<UpdateUnit> = self.queued().drain(..).collect();
        gauge!("content_cache_queued_partial_updates").set(0.0);
        let replayed = queued.len();
        for partial in queued {
            let name = partial.name();
            match replay(partial, &fresh).await {
                Ok(staged) => fresh = staged,
                Err(cause) => warn!(
                    rebuild = rebuild.id(),
                    update = name,
                    error = %cause,
                    "Queued partial update failed on rebuilt cache, skipping"
                ),
            }
        }

        let now = Utc::now();
        fresh.touch(now);
        let fresh = Arc::new(fresh);
        self.cache.store(Arc::clone(&fresh));
        *self.last_complete_update() = Some(now);
        self.persistence_deferred.store(false, Ordering::Release);

        if let Err(e) = self.persistence.persist_on_complete_update(&fresh).await {
            counter!("content_cache_persistence_failures_total", "checkpoint" => "complete")
                .increment(1);
            warn!(error = %e, "Failed to persist content cache after complete update");
        }

        {
            let mut slots = self.slots();
            if let Err(e) = rebuild.advance(RebuildEvent::Published) {
                warn!(rebuild = rebuild.id(), error = %e, "Unexpected rebuild state");
            }
            slots.release(&rebuild);
        }

        let elapsed = started.elapsed();
        self.stats.completed_rebuilds.fetch_add(1, Ordering::Relaxed);
        counter!("content_cache_updates_total", "kind" => "complete", "outcome" => "success")
            .increment(1);
        histogram!("content_cache_rebuild_duration_seconds").record(elapsed.as_secs_f64());

        let summary = fresh.summary();
        info!(
            rebuild = rebuild.id(),
            duration_ms = elapsed.as_millis() as u64,
            replayed_partials = replayed,
            offerings = summary.offerings,
            procedures = summary.procedures,
            features = summary.features_of_interest,
            "Complete cache update finished"
        );
    }

    /// Mark `rebuild` failed. The live cache is left as it was.
    async fn finish_failed(&self, rebuild: &Arc<Rebuild>, cause: CacheError, started: Instant) {
        let _guard = self.partial_lock.lock().await;

        let dropped = {
            let mut queue = self.queued();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        gauge!("content_cache_queued_partial_updates").set(0.0);

        // Partials applied while the rebuild was pending skipped their own
        // checkpoint.
        if self.persistence_deferred.swap(false, Ordering::AcqRel) {
            let live = self.cache.load_full();
            self.persist_partial(&live).await;
        }

        {
            let mut slots = self.slots();
            if let Err(e) = rebuild.fail(cause.clone()) {
                warn!(rebuild = rebuild.id(), error = %e, "Unexpected rebuild state");
            }
            slots.release(rebuild);
        }

        self.stats.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
        counter!("content_cache_updates_total", "kind" => "complete", "outcome" => "failed")
            .increment(1);
        error!(
            rebuild = rebuild.id(),
            error = %cause,
            duration_ms = started.elapsed().as_millis() as u64,
            dropped_partials = dropped,
            "Complete cache update failed, keeping previous cache"
        );
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::IllegalSubmission(
                "cache controller is shut down".to_string(),
            ));
        }
        Ok(())
    }

    async fn persist_partial(&self, cache: &ContentCache) {
        if let Err(e) = self.persistence.persist_on_partial_update(cache).await {
            counter!("content_cache_persistence_failures_total", "checkpoint" => "partial")
                .increment(1);
            warn!(error = %e, "Failed to persist content cache after partial update");
        }
    }
}

/// Apply a queued partial to a copy of the rebuilt snapshot.
///
/// A panic is reported like any other failure so the rebuild can still
/// publish.
async fn replay(mut partial: UpdateUnit, rebuilt: &ContentCache) -> CacheResult<ContentCache> {
    partial.reset();
    let mut staged = rebuilt.clone();
    let outcome = AssertUnwindSafe(partial.execute(&mut staged))
        .catch_unwind()
        .await;

    match outcome {
        Ok(()) => match partial.failure_cause() {
            Some(cause) => Err(cause.clone()),
            None => Ok(staged),
        },
        Err(_) => Err(CacheError::Aborted(format!(
            "{} panicked during replay",
            partial.name()
        ))),
    }
}
