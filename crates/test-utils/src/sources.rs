//! Instrumented content sources.
//!
//! Each source delegates to a [`MemoryContentSource`] and records how the
//! controller drove it, so tests can assert on rebuild counts and overlap.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use content_cache::{CacheError, CacheResult, ContentCache, ContentSource, MemoryContentSource};
use tokio::sync::Semaphore;

/// Counts rebuilds and tracks how many run at once.
#[derive(Default)]
pub struct RebuildProbe {
    started: AtomicUsize,
    completed: AtomicUsize,
    running: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl RebuildProbe {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` rebuilds have started.
    pub async fn wait_started(&self, count: usize) {
        while self.started() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// A source whose rebuilds block until the test opens the gate.
///
/// Every rebuild consumes one permit, so `open(1)` lets exactly one rebuild
/// read the store.
pub struct GatedSource {
    store: Arc<MemoryContentSource>,
    gate: Semaphore,
    probe: RebuildProbe,
}

impl GatedSource {
    pub fn new(store: Arc<MemoryContentSource>) -> Self {
        Self {
            store,
            gate: Semaphore::new(0),
            probe: RebuildProbe::default(),
        }
    }

    pub fn store(&self) -> &MemoryContentSource {
        &self.store
    }

    pub fn probe(&self) -> &RebuildProbe {
        &self.probe
    }

    /// Let `rebuilds` more rebuilds proceed.
    pub fn open(&self, rebuilds: usize) {
        self.gate.add_permits(rebuilds);
    }

    /// Fail every blocked and future rebuild.
    pub fn close(&self) {
        self.gate.close();
    }
}

#[async_trait]
impl ContentSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()> {
        self.probe.enter();
        let outcome = match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.store.populate(cache).await
            }
            Err(_) => Err(CacheError::Source("gate closed".to_string())),
        };
        self.probe.exit();
        outcome
    }
}

/// A source that fails while `failing` is set.
pub struct FailingSource {
    store: Arc<MemoryContentSource>,
    failing: AtomicBool,
    panic_instead: bool,
    probe: RebuildProbe,
}

impl FailingSource {
    pub fn new(store: Arc<MemoryContentSource>) -> Self {
        Self {
            store,
            failing: AtomicBool::new(true),
            panic_instead: false,
            probe: RebuildProbe::default(),
        }
    }

    /// Fail by panicking rather than returning an error.
    pub fn panicking(store: Arc<MemoryContentSource>) -> Self {
        Self {
            panic_instead: true,
            ..Self::new(store)
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn probe(&self) -> &RebuildProbe {
        &self.probe
    }
}

#[async_trait]
impl ContentSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()> {
        self.probe.enter();
        let outcome = if self.failing.load(Ordering::SeqCst) {
            // Leave a trace so tests can tell a half-built cache from the live one.
            cache.add_offering("half-built", None);
            if self.panic_instead {
                self.probe.exit();
                panic!("backing store exploded");
            }
            Err(CacheError::Source("backing store unavailable".to_string()))
        } else {
            self.store.populate(cache).await
        };
        self.probe.exit();
        outcome
    }
}

/// A source that counts rebuilds and otherwise reads the store directly.
pub struct CountingSource {
    store: Arc<MemoryContentSource>,
    probe: RebuildProbe,
}

impl CountingSource {
    pub fn new(store: Arc<MemoryContentSource>) -> Self {
        Self {
            store,
            probe: RebuildProbe::default(),
        }
    }

    pub fn store(&self) -> &MemoryContentSource {
        &self.store
    }

    pub fn probe(&self) -> &RebuildProbe {
        &self.probe
    }
}

#[async_trait]
impl ContentSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()> {
        self.probe.enter();
        let outcome = self.store.populate(cache).await;
        self.probe.exit();
        outcome
    }
}
