//! Backing-store boundary for complete cache rebuilds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheResult;
use crate::model::{Observation, ResultTemplate, SensorDescription};
use crate::snapshot::ContentCache;

/// Computes a full cache from the backing store.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Identifies the source in logs.
    fn name(&self) -> &str;

    /// Fill `cache`, which starts out empty, from scratch.
    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()>;
}

#[derive(Default)]
struct MemoryStore {
    sensors: BTreeMap<String, SensorDescription>,
    observations: Vec<Observation>,
    templates: BTreeMap<String, ResultTemplate>,
}

/// An in-process observation store.
///
/// Serves as the backing store for demos and tests; a production deployment
/// uses the PostgreSQL catalog from the `storage` crate instead.
#[derive(Default)]
pub struct MemoryContentSource {
    store: RwLock<MemoryStore>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_sensor(&self, sensor: SensorDescription) {
        let mut store = self.store.write().await;
        store.sensors.insert(sensor.procedure.clone(), sensor);
    }

    /// Remove a sensor together with its observations and result templates.
    pub async fn delete_sensor(&self, procedure: &str) -> bool {
        let mut store = self.store.write().await;
        let existed = store.sensors.remove(procedure).is_some();
        store.observations.retain(|o| o.procedure != procedure);
        store.templates.retain(|_, t| t.procedure != procedure);
        existed
    }

    pub async fn insert_observations(&self, observations: impl IntoIterator<Item = Observation>) {
        let mut store = self.store.write().await;
        store.observations.extend(observations);
    }

    pub async fn insert_result_template(&self, template: ResultTemplate) {
        let mut store = self.store.write().await;
        store.templates.insert(template.identifier.clone(), template);
    }

    pub async fn observation_count(&self) -> usize {
        self.store.read().await.observations.len()
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()> {
        let store = self.store.read().await;

        for sensor in store.sensors.values() {
            cache.register_sensor(sensor);
        }
        for template in store.templates.values() {
            cache.add_result_template(template);
        }
        for observation in &store.observations {
            cache.add_observation(observation);
        }

        debug!(
            sensors = store.sensors.len(),
            observations = store.observations.len(),
            templates = store.templates.len(),
            "Populated cache from memory store"
        );
        Ok(())
    }
}
