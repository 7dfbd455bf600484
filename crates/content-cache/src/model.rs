//! Inputs carried by partial cache updates.
//!
//! These are the cache-relevant projections of the data-modifying
//! operations (InsertObservation, InsertSensor, DeleteSensor,
//! InsertResultTemplate, InsertResult). Only the identifiers and extents the
//! cache indexes are kept.

use serde::{Deserialize, Serialize};
use sos_common::{BoundingBox, TimePeriod};

/// A feature of interest with the envelope of its geometry, if known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterest {
    pub identifier: String,
    #[serde(default)]
    pub envelope: Option<BoundingBox>,
}

impl FeatureOfInterest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            envelope: None,
        }
    }

    /// Feature sampled at a single point.
    pub fn at_point(identifier: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            identifier: identifier.into(),
            envelope: Some(BoundingBox::from_point(x, y)),
        }
    }
}

/// One inserted observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub procedure: String,
    pub offerings: Vec<String>,
    pub observable_property: String,
    pub feature_of_interest: FeatureOfInterest,
    pub phenomenon_time: TimePeriod,
    /// Defaults to the end of the phenomenon time when absent.
    #[serde(default)]
    pub result_time: Option<TimePeriod>,
}

impl Observation {
    pub fn new(
        procedure: impl Into<String>,
        offering: impl Into<String>,
        observable_property: impl Into<String>,
        feature_of_interest: FeatureOfInterest,
        phenomenon_time: TimePeriod,
    ) -> Self {
        Self {
            procedure: procedure.into(),
            offerings: vec![offering.into()],
            observable_property: observable_property.into(),
            feature_of_interest,
            phenomenon_time,
            result_time: None,
        }
    }

    /// Effective result time.
    pub fn result_time(&self) -> TimePeriod {
        self.result_time
            .unwrap_or_else(|| TimePeriod::instant(self.phenomenon_time.end))
    }
}

/// An offering announced by a sensor registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingDescription {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl OfferingDescription {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A sensor registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescription {
    pub procedure: String,
    pub offerings: Vec<OfferingDescription>,
    #[serde(default)]
    pub observable_properties: Vec<String>,
    #[serde(default)]
    pub parent_procedures: Vec<String>,
    #[serde(default)]
    pub features_of_interest: Vec<FeatureOfInterest>,
}

impl SensorDescription {
    pub fn new(procedure: impl Into<String>, offering: OfferingDescription) -> Self {
        Self {
            procedure: procedure.into(),
            offerings: vec![offering],
            observable_properties: Vec::new(),
            parent_procedures: Vec::new(),
            features_of_interest: Vec::new(),
        }
    }

    pub fn with_observable_property(mut self, property: impl Into<String>) -> Self {
        self.observable_properties.push(property.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_procedures.push(parent.into());
        self
    }
}

/// A result template registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTemplate {
    pub identifier: String,
    pub offering: String,
    pub procedure: String,
    pub observable_property: String,
}
