//! Application state for the content cache service.

use std::time::Instant;

use content_cache::{CacheConfig, CacheController, PeriodicTrigger};

/// Shared application state.
pub struct AppState {
    /// The content cache and its update coordination.
    pub controller: CacheController,

    /// Timer for periodic complete updates.
    pub trigger: PeriodicTrigger,

    /// Configuration the service was started with.
    pub config: CacheConfig,

    pub started_at: Instant,
}

impl AppState {
    /// Wrap `controller` and schedule periodic updates per `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(controller: CacheController, config: CacheConfig) -> Self {
        let trigger = PeriodicTrigger::new(controller.clone(), config.initial_delay());
        trigger.reconfigure(config.update_interval_minutes);

        Self {
            controller,
            trigger,
            config,
            started_at: Instant::now(),
        }
    }

    /// Stop the timer and shut the controller down.
    pub async fn shutdown(&self) {
        self.trigger.stop();
        self.controller.shutdown().await;
    }
}
