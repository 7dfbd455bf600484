//! Tests for the periodic cache update trigger, run on paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use content_cache::{CacheController, ContentCache, NoPersistence, PeriodicTrigger};
use test_utils::fixtures::seeded_store;
use test_utils::{CountingSource, FailingSource};

const MINUTE: Duration = Duration::from_secs(60);

async fn counting_controller() -> (CacheController, Arc<CountingSource>) {
    let source = Arc::new(CountingSource::new(Arc::new(seeded_store().await)));
    let controller = CacheController::with_snapshot(
        ContentCache::new(),
        source.clone(),
        Arc::new(NoPersistence),
    );
    (controller, source)
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconfigure_replaces_schedule() {
    let (controller, source) = counting_controller().await;
    let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_millis(10));

    trigger.reconfigure(120);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.probe().started(), 1);

    trigger.reconfigure(5);
    assert_eq!(trigger.interval_minutes(), 5);

    tokio::time::sleep(4 * MINUTE).await;
    assert_eq!(source.probe().started(), 1);

    tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
    assert_eq!(source.probe().started(), 2);

    // Past the old 120 minute mark: only the 5 minute cadence fired.
    tokio::time::sleep(116 * MINUTE).await;
    assert_eq!(source.probe().started(), 1 + 24);
    assert_eq!(source.probe().max_concurrent(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cadence_survives_failures() {
    let source = Arc::new(FailingSource::new(Arc::new(seeded_store().await)));
    let controller = CacheController::with_snapshot(
        ContentCache::new(),
        source.clone(),
        Arc::new(NoPersistence),
    );
    let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_millis(10));

    trigger.reconfigure(1);
    tokio::time::sleep(3 * MINUTE + Duration::from_secs(30)).await;

    assert_eq!(source.probe().started(), 4);
    assert_eq!(controller.status().failed_rebuilds, 4);
    assert!(trigger.is_scheduled());
    assert!(controller.get_cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disable_then_enable() {
    let (controller, source) = counting_controller().await;
    let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_millis(10));

    trigger.reconfigure(0);
    tokio::time::sleep(10 * MINUTE).await;
    assert_eq!(source.probe().started(), 0);

    // The first schedule still uses the short initial delay.
    trigger.reconfigure(30);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.probe().started(), 1);

    trigger.stop();
    assert!(!trigger.is_scheduled());
    assert_eq!(trigger.interval_minutes(), 30);
    tokio::time::sleep(60 * MINUTE).await;
    assert_eq!(source.probe().started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_with_timer_disabled() {
    let (controller, source) = counting_controller().await;
    let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_millis(10));
    trigger.reconfigure(0);

    controller.refresh().await.unwrap();
    assert_eq!(source.probe().started(), 1);
    assert!(!trigger.is_scheduled());
}
