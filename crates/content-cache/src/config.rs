//! Configuration for the content cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::persistence::{FilePersistence, NoPersistence, PersistenceStrategy};

/// Content cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Minutes between periodic complete updates. 0 disables the timer.
    pub update_interval_minutes: u64,

    /// Where the cache is persisted. Unset keeps the cache in memory only.
    pub persistence_path: Option<PathBuf>,

    /// Also persist after partial updates, not just after rebuilds.
    pub persist_partial_updates: bool,

    /// Delay before the first periodic update after startup.
    pub initial_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            update_interval_minutes: 120,
            persistence_path: None,
            persist_partial_updates: true,
            initial_delay_ms: 1000,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache config {}", path.display()))?;
        let config: CacheConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse cache config {}", path.display()))?;
        Ok(config)
    }

    /// Override fields from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(minutes) = lookup("CACHE_UPDATE_INTERVAL_MINUTES").and_then(|v| v.parse().ok()) {
            self.update_interval_minutes = minutes;
        }

        if let Some(path) = lookup("CACHE_PERSISTENCE_PATH") {
            self.persistence_path = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(val) = lookup("CACHE_PERSIST_PARTIAL_UPDATES") {
            self.persist_partial_updates = val.to_lowercase() == "true" || val == "1";
        }

        if let Some(ms) = lookup("CACHE_INITIAL_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.initial_delay_ms = ms;
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Build the persistence strategy this configuration describes.
    pub fn persistence(&self) -> Arc<dyn PersistenceStrategy> {
        match &self.persistence_path {
            Some(path) => Arc::new(
                FilePersistence::new(path).with_partial_updates(self.persist_partial_updates),
            ),
            None => Arc::new(NoPersistence),
        }
    }
}
