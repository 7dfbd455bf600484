use async_trait::async_trait;

use super::{require, CacheUpdate};
use crate::error::{CacheError, CacheResult};
use crate::model::Observation;
use crate::snapshot::ContentCache;

/// Index the observations of an InsertObservation request.
#[derive(Debug, Clone)]
pub struct ObservationInsertionUpdate {
    observations: Vec<Observation>,
}

impl ObservationInsertionUpdate {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn single(observation: Observation) -> Self {
        Self::new(vec![observation])
    }
}

pub(crate) fn validate_observation(update: &str, observation: &Observation) -> CacheResult<()> {
    require(update, "procedure", &observation.procedure)?;
    require(update, "observable property", &observation.observable_property)?;
    require(
        update,
        "feature of interest",
        &observation.feature_of_interest.identifier,
    )?;
    for offering in &observation.offerings {
        require(update, "offering", offering)?;
    }
    Ok(())
}

#[async_trait]
impl CacheUpdate for ObservationInsertionUpdate {
    fn name(&self) -> &'static str {
        "observation insertion"
    }

    fn validate(&self) -> CacheResult<()> {
        if self.observations.is_empty() {
            return Err(CacheError::IllegalSubmission(
                "observation insertion without observations".to_string(),
            ));
        }
        for observation in &self.observations {
            validate_observation(self.name(), observation)?;
            if observation.offerings.is_empty() {
                return Err(CacheError::IllegalSubmission(format!(
                    "observation of {} has no offering",
                    observation.procedure
                )));
            }
        }
        Ok(())
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        for observation in &self.observations {
            cache.add_observation(observation);
        }
        Ok(())
    }
}
