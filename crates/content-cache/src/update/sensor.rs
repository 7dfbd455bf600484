use async_trait::async_trait;
use tracing::debug;

use super::{require, CacheUpdate};
use crate::error::{CacheError, CacheResult};
use crate::model::SensorDescription;
use crate::snapshot::ContentCache;

/// Register a procedure and its offerings (InsertSensor).
#[derive(Debug, Clone)]
pub struct SensorInsertionUpdate {
    sensor: SensorDescription,
}

impl SensorInsertionUpdate {
    pub fn new(sensor: SensorDescription) -> Self {
        Self { sensor }
    }
}

#[async_trait]
impl CacheUpdate for SensorInsertionUpdate {
    fn name(&self) -> &'static str {
        "sensor insertion"
    }

    fn validate(&self) -> CacheResult<()> {
        require(self.name(), "procedure", &self.sensor.procedure)?;
        if self.sensor.offerings.is_empty() {
            return Err(CacheError::IllegalSubmission(format!(
                "sensor {} registers no offering",
                self.sensor.procedure
            )));
        }
        for offering in &self.sensor.offerings {
            require(self.name(), "offering", &offering.identifier)?;
        }
        Ok(())
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        cache.register_sensor(&self.sensor);
        Ok(())
    }
}

/// Remove a procedure and everything only it kept alive (DeleteSensor).
#[derive(Debug, Clone)]
pub struct SensorDeletionUpdate {
    procedure: String,
}

impl SensorDeletionUpdate {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
        }
    }
}

#[async_trait]
impl CacheUpdate for SensorDeletionUpdate {
    fn name(&self) -> &'static str {
        "sensor deletion"
    }

    fn validate(&self) -> CacheResult<()> {
        require(self.name(), "procedure", &self.procedure)
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        if !cache.remove_procedure(&self.procedure) {
            // Replays against a rebuilt snapshot that never saw the sensor.
            debug!(procedure = %self.procedure, "Deleted procedure not in cache");
        }
        Ok(())
    }
}
