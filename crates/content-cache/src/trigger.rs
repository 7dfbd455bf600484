//! Timer that submits complete cache updates.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::controller::CacheController;
use crate::error::CacheError;

#[derive(Default)]
struct TriggerState {
    interval_minutes: u64,
    task: Option<JoinHandle<()>>,
    /// Cleared once the first firing has been scheduled.
    first_pending: bool,
}

/// Periodically asks the controller for a complete update.
///
/// The first schedule after construction fires after `initial_delay` so the
/// cache warms up quickly; any later reconfiguration waits a full interval.
/// The scheduled task is aborted by [`stop`](Self::stop), by reconfiguring,
/// and when the trigger is dropped.
pub struct PeriodicTrigger {
    controller: CacheController,
    initial_delay: Duration,
    state: Mutex<TriggerState>,
}

impl PeriodicTrigger {
    pub fn new(controller: CacheController, initial_delay: Duration) -> Self {
        Self {
            controller,
            initial_delay,
            state: Mutex::new(TriggerState {
                first_pending: true,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the interval in minutes and reschedule. `0` disables the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconfigure(&self, minutes: u64) {
        let mut state = self.state();
        let previous = state.interval_minutes;
        state.interval_minutes = minutes;

        if let Some(task) = state.task.take() {
            task.abort();
            debug!(previous_minutes = previous, "Cancelled scheduled cache update");
        }

        if minutes == 0 {
            info!(previous_minutes = previous, "Periodic cache updates disabled");
            return;
        }

        let period = Duration::from_secs(minutes * 60);
        let first = if std::mem::take(&mut state.first_pending) {
            self.initial_delay
        } else {
            period
        };

        info!(
            interval_minutes = minutes,
            previous_minutes = previous,
            first_in_secs = first.as_secs(),
            "Scheduled periodic cache updates"
        );
        state.task = Some(tokio::spawn(run_schedule(
            self.controller.clone(),
            first,
            period,
        )));
    }

    pub fn interval_minutes(&self) -> u64 {
        self.state().interval_minutes
    }

    pub fn is_scheduled(&self) -> bool {
        self.state()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancel the scheduled firing. The configured interval is kept.
    pub fn stop(&self) {
        if let Some(task) = self.state().task.take() {
            task.abort();
            info!("Stopped periodic cache updates");
        }
    }
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        if let Some(task) = self.state().task.take() {
            task.abort();
        }
    }
}

async fn run_schedule(controller: CacheController, first: Duration, period: Duration) {
    let mut ticker = interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        counter!("content_cache_trigger_firings_total").increment(1);
        debug!("Periodic cache update firing");

        match controller.refresh().await {
            Ok(()) => {}
            Err(CacheError::IllegalSubmission(reason)) => {
                info!(reason = %reason, "Cache controller no longer accepts updates, stopping timer");
                return;
            }
            // The cadence continues; the next tick retries.
            Err(e) => error!(error = %e, "Periodic cache update failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::NoPersistence;
    use crate::snapshot::ContentCache;
    use crate::source::MemoryContentSource;

    fn controller() -> CacheController {
        CacheController::with_snapshot(
            ContentCache::new(),
            Arc::new(MemoryContentSource::new()),
            Arc::new(NoPersistence),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_firing_uses_initial_delay() {
        let controller = controller();
        let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_secs(1));

        trigger.reconfigure(120);
        assert!(trigger.is_scheduled());
        assert_eq!(controller.status().completed_rebuilds, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.status().completed_rebuilds, 1);

        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(controller.status().completed_rebuilds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables() {
        let controller = controller();
        let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_millis(10));

        trigger.reconfigure(0);
        assert!(!trigger.is_scheduled());
        assert_eq!(trigger.interval_minutes(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(controller.status().completed_rebuilds, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_schedule() {
        let controller = controller();
        let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_secs(5));
        trigger.reconfigure(1);
        drop(trigger);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(controller.status().completed_rebuilds, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_controller_shutdown() {
        let controller = controller();
        let trigger = PeriodicTrigger::new(controller.clone(), Duration::from_secs(1));
        controller.shutdown().await;

        trigger.reconfigure(1);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!trigger.is_scheduled());
        assert_eq!(controller.status().completed_rebuilds, 0);
    }
}
