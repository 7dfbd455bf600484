use async_trait::async_trait;

use super::observation::validate_observation;
use super::{require, CacheUpdate};
use crate::error::{CacheError, CacheResult};
use crate::model::{Observation, ResultTemplate};
use crate::snapshot::ContentCache;

/// Register a result template (InsertResultTemplate).
#[derive(Debug, Clone)]
pub struct ResultTemplateInsertionUpdate {
    template: ResultTemplate,
}

impl ResultTemplateInsertionUpdate {
    pub fn new(template: ResultTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl CacheUpdate for ResultTemplateInsertionUpdate {
    fn name(&self) -> &'static str {
        "result template insertion"
    }

    fn validate(&self) -> CacheResult<()> {
        require(self.name(), "identifier", &self.template.identifier)?;
        require(self.name(), "offering", &self.template.offering)?;
        require(self.name(), "procedure", &self.template.procedure)?;
        require(
            self.name(),
            "observable property",
            &self.template.observable_property,
        )
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        cache.add_result_template(&self.template);
        Ok(())
    }
}

/// Index observations decoded from an InsertResult request.
///
/// The observations are attributed to the offering of the referenced result
/// template, which must already be known to the cache.
#[derive(Debug, Clone)]
pub struct ResultInsertionUpdate {
    template: String,
    observations: Vec<Observation>,
}

impl ResultInsertionUpdate {
    pub fn new(template: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            template: template.into(),
            observations,
        }
    }
}

#[async_trait]
impl CacheUpdate for ResultInsertionUpdate {
    fn name(&self) -> &'static str {
        "result insertion"
    }

    fn validate(&self) -> CacheResult<()> {
        require(self.name(), "result template", &self.template)?;
        if self.observations.is_empty() {
            return Err(CacheError::IllegalSubmission(format!(
                "result insertion for template {} without observations",
                self.template
            )));
        }
        for observation in &self.observations {
            validate_observation(self.name(), observation)?;
        }
        Ok(())
    }

    async fn apply(&self, cache: &mut ContentCache) -> CacheResult<()> {
        let offering = cache
            .result_template(&self.template)
            .map(|entry| entry.offering.clone())
            .ok_or_else(|| {
                CacheError::update_failed(
                    self.name(),
                    format!("unknown result template {}", self.template),
                )
            })?;

        for observation in &self.observations {
            let mut observation = observation.clone();
            observation.offerings = vec![offering.clone()];
            cache.add_observation(&observation);
        }
        Ok(())
    }
}
