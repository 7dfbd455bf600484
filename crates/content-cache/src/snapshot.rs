//! The content cache snapshot.
//!
//! A `ContentCache` is a plain value: the controller stages changes on a
//! clone and publishes the result atomically, so none of the methods here
//! need interior locking.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sos_common::{BoundingBox, TimePeriod};

use crate::model::{Observation, ResultTemplate, SensorDescription};

type Relation = BTreeMap<String, BTreeSet<String>>;

fn relate(relation: &mut Relation, key: &str, value: &str) {
    relation
        .entry(key.to_string())
        .or_default()
        .insert(value.to_string());
}

/// Remove `value` from `key`'s set; returns true if the set became empty.
fn unrelate(relation: &mut Relation, key: &str, value: &str) -> bool {
    match relation.get_mut(key) {
        Some(values) => {
            values.remove(value);
            if values.is_empty() {
                relation.remove(key);
                true
            } else {
                false
            }
        }
        None => true,
    }
}

fn members<'a>(relation: &'a Relation, key: &str) -> impl Iterator<Item = &'a str> + 'a {
    relation
        .get(key)
        .into_iter()
        .flat_map(|values| values.iter().map(String::as_str))
}

/// Result template as indexed by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTemplateEntry {
    pub offering: String,
    pub procedure: String,
    pub observable_property: String,
}

/// Counts reported by the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSummary {
    pub offerings: usize,
    pub procedures: usize,
    pub features_of_interest: usize,
    pub observable_properties: usize,
    pub result_templates: usize,
    pub global_envelope: Option<BoundingBox>,
    pub global_phenomenon_time: Option<TimePeriod>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Derived indices over the observation store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentCache {
    offerings: BTreeSet<String>,
    offering_names: BTreeMap<String, String>,
    procedures: BTreeSet<String>,
    features_of_interest: BTreeSet<String>,
    observable_properties: BTreeSet<String>,

    procedures_for_offering: Relation,
    offerings_for_procedure: Relation,
    observable_properties_for_offering: Relation,
    features_for_offering: Relation,
    procedures_for_feature: Relation,
    features_for_procedure: Relation,
    parent_procedures: Relation,
    child_procedures: Relation,

    result_templates: BTreeMap<String, ResultTemplateEntry>,

    envelope_for_offering: BTreeMap<String, BoundingBox>,
    global_envelope: Option<BoundingBox>,
    phenomenon_time_for_offering: BTreeMap<String, TimePeriod>,
    global_phenomenon_time: Option<TimePeriod>,
    result_time_for_offering: BTreeMap<String, TimePeriod>,
    global_result_time: Option<TimePeriod>,

    last_update: Option<DateTime<Utc>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn is_empty(&self) -> bool {
        self.offerings.is_empty()
            && self.procedures.is_empty()
            && self.features_of_interest.is_empty()
            && self.observable_properties.is_empty()
            && self.result_templates.is_empty()
    }

    pub fn has_offering(&self, offering: &str) -> bool {
        self.offerings.contains(offering)
    }

    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.procedures.contains(procedure)
    }

    pub fn has_feature_of_interest(&self, feature: &str) -> bool {
        self.features_of_interest.contains(feature)
    }

    pub fn has_observable_property(&self, property: &str) -> bool {
        self.observable_properties.contains(property)
    }

    pub fn has_result_template(&self, identifier: &str) -> bool {
        self.result_templates.contains_key(identifier)
    }

    pub fn offerings(&self) -> impl Iterator<Item = &str> {
        self.offerings.iter().map(String::as_str)
    }

    pub fn procedures(&self) -> impl Iterator<Item = &str> {
        self.procedures.iter().map(String::as_str)
    }

    pub fn features_of_interest(&self) -> impl Iterator<Item = &str> {
        self.features_of_interest.iter().map(String::as_str)
    }

    pub fn observable_properties(&self) -> impl Iterator<Item = &str> {
        self.observable_properties.iter().map(String::as_str)
    }

    pub fn offering_name(&self, offering: &str) -> Option<&str> {
        self.offering_names.get(offering).map(String::as_str)
    }

    pub fn procedures_for_offering<'a>(&'a self, offering: &str) -> impl Iterator<Item = &'a str> {
        members(&self.procedures_for_offering, offering)
    }

    pub fn offerings_for_procedure<'a>(&'a self, procedure: &str) -> impl Iterator<Item = &'a str> {
        members(&self.offerings_for_procedure, procedure)
    }

    pub fn observable_properties_for_offering<'a>(
        &'a self,
        offering: &str,
    ) -> impl Iterator<Item = &'a str> {
        members(&self.observable_properties_for_offering, offering)
    }

    pub fn features_for_offering<'a>(&'a self, offering: &str) -> impl Iterator<Item = &'a str> {
        members(&self.features_for_offering, offering)
    }

    pub fn procedures_for_feature<'a>(&'a self, feature: &str) -> impl Iterator<Item = &'a str> {
        members(&self.procedures_for_feature, feature)
    }

    pub fn parent_procedures<'a>(&'a self, procedure: &str) -> impl Iterator<Item = &'a str> {
        members(&self.parent_procedures, procedure)
    }

    pub fn child_procedures<'a>(&'a self, procedure: &str) -> impl Iterator<Item = &'a str> {
        members(&self.child_procedures, procedure)
    }

    pub fn result_template(&self, identifier: &str) -> Option<&ResultTemplateEntry> {
        self.result_templates.get(identifier)
    }

    pub fn result_templates(&self) -> impl Iterator<Item = &str> {
        self.result_templates.keys().map(String::as_str)
    }

    pub fn envelope_for_offering(&self, offering: &str) -> Option<&BoundingBox> {
        self.envelope_for_offering.get(offering)
    }

    pub fn global_envelope(&self) -> Option<&BoundingBox> {
        self.global_envelope.as_ref()
    }

    pub fn phenomenon_time_for_offering(&self, offering: &str) -> Option<&TimePeriod> {
        self.phenomenon_time_for_offering.get(offering)
    }

    pub fn global_phenomenon_time(&self) -> Option<&TimePeriod> {
        self.global_phenomenon_time.as_ref()
    }

    pub fn result_time_for_offering(&self, offering: &str) -> Option<&TimePeriod> {
        self.result_time_for_offering.get(offering)
    }

    pub fn global_result_time(&self) -> Option<&TimePeriod> {
        self.global_result_time.as_ref()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            offerings: self.offerings.len(),
            procedures: self.procedures.len(),
            features_of_interest: self.features_of_interest.len(),
            observable_properties: self.observable_properties.len(),
            result_templates: self.result_templates.len(),
            global_envelope: self.global_envelope,
            global_phenomenon_time: self.global_phenomenon_time,
            last_update: self.last_update,
        }
    }

    // ---------------------------------------------------------------------
    // Mutations (all idempotent)
    // ---------------------------------------------------------------------

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_update = Some(at);
    }

    pub fn add_offering(&mut self, offering: &str, name: Option<&str>) {
        self.offerings.insert(offering.to_string());
        if let Some(name) = name {
            self.offering_names
                .insert(offering.to_string(), name.to_string());
        }
    }

    pub fn add_procedure_to_offering(&mut self, procedure: &str, offering: &str) {
        self.add_offering(offering, None);
        self.procedures.insert(procedure.to_string());
        relate(&mut self.procedures_for_offering, offering, procedure);
        relate(&mut self.offerings_for_procedure, procedure, offering);
    }

    pub fn add_observable_property_to_offering(&mut self, property: &str, offering: &str) {
        self.observable_properties.insert(property.to_string());
        relate(&mut self.observable_properties_for_offering, offering, property);
    }

    pub fn add_feature_to_offering(&mut self, feature: &str, offering: &str) {
        self.features_of_interest.insert(feature.to_string());
        relate(&mut self.features_for_offering, offering, feature);
    }

    pub fn add_procedure_for_feature(&mut self, procedure: &str, feature: &str) {
        self.features_of_interest.insert(feature.to_string());
        relate(&mut self.procedures_for_feature, feature, procedure);
        relate(&mut self.features_for_procedure, procedure, feature);
    }

    pub fn add_parent_procedure(&mut self, child: &str, parent: &str) {
        relate(&mut self.parent_procedures, child, parent);
        relate(&mut self.child_procedures, parent, child);
    }

    pub fn extend_envelope(&mut self, offering: &str, envelope: &BoundingBox) {
        self.envelope_for_offering
            .entry(offering.to_string())
            .and_modify(|e| e.extend(envelope))
            .or_insert(*envelope);
        match self.global_envelope.as_mut() {
            Some(global) => global.extend(envelope),
            None => self.global_envelope = Some(*envelope),
        }
    }

    pub fn extend_phenomenon_time(&mut self, offering: &str, time: &TimePeriod) {
        self.phenomenon_time_for_offering
            .entry(offering.to_string())
            .and_modify(|t| t.extend(time))
            .or_insert(*time);
        match self.global_phenomenon_time.as_mut() {
            Some(global) => global.extend(time),
            None => self.global_phenomenon_time = Some(*time),
        }
    }

    pub fn extend_result_time(&mut self, offering: &str, time: &TimePeriod) {
        self.result_time_for_offering
            .entry(offering.to_string())
            .and_modify(|t| t.extend(time))
            .or_insert(*time);
        match self.global_result_time.as_mut() {
            Some(global) => global.extend(time),
            None => self.global_result_time = Some(*time),
        }
    }

    pub fn add_result_template(&mut self, template: &ResultTemplate) {
        self.add_procedure_to_offering(&template.procedure, &template.offering);
        self.add_observable_property_to_offering(&template.observable_property, &template.offering);
        self.result_templates.insert(
            template.identifier.clone(),
            ResultTemplateEntry {
                offering: template.offering.clone(),
                procedure: template.procedure.clone(),
                observable_property: template.observable_property.clone(),
            },
        );
    }

    /// Index a sensor registration.
    pub fn register_sensor(&mut self, sensor: &SensorDescription) {
        let procedure = sensor.procedure.as_str();
        self.procedures.insert(procedure.to_string());

        for offering in &sensor.offerings {
            self.add_offering(&offering.identifier, offering.name.as_deref());
            self.add_procedure_to_offering(procedure, &offering.identifier);
            for property in &sensor.observable_properties {
                self.add_observable_property_to_offering(property, &offering.identifier);
            }
            for feature in &sensor.features_of_interest {
                self.add_feature_to_offering(&feature.identifier, &offering.identifier);
                if let Some(envelope) = &feature.envelope {
                    self.extend_envelope(&offering.identifier, envelope);
                }
            }
        }

        for feature in &sensor.features_of_interest {
            self.add_procedure_for_feature(procedure, &feature.identifier);
        }

        for parent in &sensor.parent_procedures {
            self.add_parent_procedure(procedure, parent);
        }
    }

    /// Index an inserted observation.
    pub fn add_observation(&mut self, observation: &Observation) {
        let procedure = observation.procedure.as_str();
        let feature = &observation.feature_of_interest;
        let result_time = observation.result_time();

        self.add_procedure_for_feature(procedure, &feature.identifier);

        for offering in &observation.offerings {
            self.add_procedure_to_offering(procedure, offering);
            self.add_observable_property_to_offering(&observation.observable_property, offering);
            self.add_feature_to_offering(&feature.identifier, offering);
            if let Some(envelope) = &feature.envelope {
                self.extend_envelope(offering, envelope);
            }
            self.extend_phenomenon_time(offering, &observation.phenomenon_time);
            self.extend_result_time(offering, &result_time);
        }
    }

    /// Remove a procedure and everything only it kept alive.
    ///
    /// Offerings left without procedures are dropped with their derived
    /// data; features and observable properties no longer referenced are
    /// dropped too. Returns false if the procedure was unknown.
    pub fn remove_procedure(&mut self, procedure: &str) -> bool {
        if !self.procedures.remove(procedure) {
            return false;
        }

        let offerings: Vec<String> = self
            .offerings_for_procedure
            .remove(procedure)
            .unwrap_or_default()
            .into_iter()
            .collect();
        for offering in &offerings {
            if unrelate(&mut self.procedures_for_offering, offering, procedure) {
                self.remove_offering(offering);
            }
        }

        let features = self
            .features_for_procedure
            .remove(procedure)
            .unwrap_or_default();
        for feature in &features {
            unrelate(&mut self.procedures_for_feature, feature, procedure);
        }

        for parent in self.parent_procedures.remove(procedure).unwrap_or_default() {
            unrelate(&mut self.child_procedures, &parent, procedure);
        }
        for child in self.child_procedures.remove(procedure).unwrap_or_default() {
            unrelate(&mut self.parent_procedures, &child, procedure);
        }

        self.result_templates
            .retain(|_, entry| entry.procedure != procedure);

        self.prune_unreferenced();
        self.recalculate_global_envelope();
        self.recalculate_global_times();
        true
    }

    fn remove_offering(&mut self, offering: &str) {
        self.offerings.remove(offering);
        self.offering_names.remove(offering);
        self.procedures_for_offering.remove(offering);
        self.observable_properties_for_offering.remove(offering);
        self.features_for_offering.remove(offering);
        self.envelope_for_offering.remove(offering);
        self.phenomenon_time_for_offering.remove(offering);
        self.result_time_for_offering.remove(offering);
        self.result_templates
            .retain(|_, entry| entry.offering != offering);
    }

    /// Drop features and observable properties no offering or procedure
    /// refers to any more.
    fn prune_unreferenced(&mut self) {
        let referenced_features: BTreeSet<&String> = self
            .features_for_offering
            .values()
            .chain(self.features_for_procedure.values())
            .flatten()
            .collect();
        let features: BTreeSet<String> = self
            .features_of_interest
            .iter()
            .filter(|f| referenced_features.contains(f))
            .cloned()
            .collect();

        let referenced_properties: BTreeSet<&String> = self
            .observable_properties_for_offering
            .values()
            .flatten()
            .collect();
        let properties: BTreeSet<String> = self
            .observable_properties
            .iter()
            .filter(|p| referenced_properties.contains(p))
            .cloned()
            .collect();

        self.procedures_for_feature
            .retain(|feature, _| features.contains(feature));
        self.features_of_interest = features;
        self.observable_properties = properties;
    }

    pub fn recalculate_global_envelope(&mut self) {
        self.global_envelope = BoundingBox::union_all(self.envelope_for_offering.values());
    }

    pub fn recalculate_global_times(&mut self) {
        self.global_phenomenon_time =
            TimePeriod::union_all(self.phenomenon_time_for_offering.values());
        self.global_result_time = TimePeriod::union_all(self.result_time_for_offering.values());
    }

    /// Union another snapshot into this one.
    pub fn merge(&mut self, other: &ContentCache) {
        self.offerings.extend(other.offerings.iter().cloned());
        self.offering_names.extend(
            other
                .offering_names
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.procedures.extend(other.procedures.iter().cloned());
        self.features_of_interest
            .extend(other.features_of_interest.iter().cloned());
        self.observable_properties
            .extend(other.observable_properties.iter().cloned());

        for (mine, theirs) in [
            (&mut self.procedures_for_offering, &other.procedures_for_offering),
            (&mut self.offerings_for_procedure, &other.offerings_for_procedure),
            (
                &mut self.observable_properties_for_offering,
                &other.observable_properties_for_offering,
            ),
            (&mut self.features_for_offering, &other.features_for_offering),
            (&mut self.procedures_for_feature, &other.procedures_for_feature),
            (&mut self.features_for_procedure, &other.features_for_procedure),
            (&mut self.parent_procedures, &other.parent_procedures),
            (&mut self.child_procedures, &other.child_procedures),
        ] {
            for (key, values) in theirs {
                mine.entry(key.clone())
                    .or_default()
                    .extend(values.iter().cloned());
            }
        }

        self.result_templates.extend(
            other
                .result_templates
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        for (offering, envelope) in &other.envelope_for_offering {
            self.envelope_for_offering
                .entry(offering.clone())
                .and_modify(|e| e.extend(envelope))
                .or_insert(*envelope);
        }
        for (offering, time) in &other.phenomenon_time_for_offering {
            self.phenomenon_time_for_offering
                .entry(offering.clone())
                .and_modify(|t| t.extend(time))
                .or_insert(*time);
        }
        for (offering, time) in &other.result_time_for_offering {
            self.result_time_for_offering
                .entry(offering.clone())
                .and_modify(|t| t.extend(time))
                .or_insert(*time);
        }

        self.recalculate_global_envelope();
        self.recalculate_global_times();
        self.last_update = self.last_update.max(other.last_update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureOfInterest, OfferingDescription};
    use chrono::TimeZone;

    fn at(day: u32) -> TimePeriod {
        TimePeriod::instant(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap())
    }

    fn observation(procedure: &str, offering: &str, feature: &str, x: f64, day: u32) -> Observation {
        Observation::new(
            procedure,
            offering,
            "air_temperature",
            FeatureOfInterest::at_point(feature, x, 50.0),
            at(day),
        )
    }

    #[test]
    fn test_add_observation_builds_relations() {
        let mut cache = ContentCache::new();
        cache.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));

        assert!(cache.has_offering("temps"));
        assert!(cache.has_procedure("thermo-1"));
        assert!(cache.has_feature_of_interest("station-a"));
        assert!(cache.has_observable_property("air_temperature"));
        assert_eq!(
            cache.procedures_for_offering("temps").collect::<Vec<_>>(),
            vec!["thermo-1"]
        );
        assert_eq!(
            cache.procedures_for_feature("station-a").collect::<Vec<_>>(),
            vec!["thermo-1"]
        );
        assert_eq!(cache.global_envelope(), Some(&BoundingBox::from_point(7.0, 50.0)));
    }

    #[test]
    fn test_add_observation_is_idempotent() {
        let obs = observation("thermo-1", "temps", "station-a", 7.0, 1);
        let mut once = ContentCache::new();
        once.add_observation(&obs);
        let mut twice = once.clone();
        twice.add_observation(&obs);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_extents_grow() {
        let mut cache = ContentCache::new();
        cache.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));
        cache.add_observation(&observation("thermo-1", "temps", "station-b", 9.0, 4));

        let envelope = cache.envelope_for_offering("temps").unwrap();
        assert_eq!(envelope.min_x, 7.0);
        assert_eq!(envelope.max_x, 9.0);

        let time = cache.phenomenon_time_for_offering("temps").unwrap();
        assert_eq!(time.start, at(1).start);
        assert_eq!(time.end, at(4).end);
    }

    #[test]
    fn test_remove_procedure_cascades() {
        let mut cache = ContentCache::new();
        cache.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));
        cache.add_observation(&observation("thermo-2", "shared", "station-b", 20.0, 2));
        cache.add_observation(&observation("thermo-1", "shared", "station-b", 20.0, 3));

        assert!(cache.remove_procedure("thermo-1"));

        assert!(!cache.has_procedure("thermo-1"));
        assert!(!cache.has_offering("temps"));
        assert!(cache.has_offering("shared"));
        assert!(!cache.has_feature_of_interest("station-a"));
        assert!(cache.has_feature_of_interest("station-b"));
        assert_eq!(cache.global_envelope(), Some(&BoundingBox::from_point(20.0, 50.0)));
    }

    #[test]
    fn test_remove_unknown_procedure() {
        let mut cache = ContentCache::new();
        assert!(!cache.remove_procedure("nope"));
    }

    #[test]
    fn test_remove_last_procedure_empties_cache() {
        let mut cache = ContentCache::new();
        cache.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));
        cache.remove_procedure("thermo-1");

        assert!(cache.is_empty());
        assert!(cache.global_envelope().is_none());
        assert!(cache.global_phenomenon_time().is_none());
    }

    #[test]
    fn test_register_sensor_with_parent() {
        let mut cache = ContentCache::new();
        let sensor = SensorDescription::new(
            "thermo-1",
            OfferingDescription::new("temps").with_name("Temperatures"),
        )
        .with_observable_property("air_temperature")
        .with_parent("weather-station");

        cache.register_sensor(&sensor);

        assert_eq!(cache.offering_name("temps"), Some("Temperatures"));
        assert_eq!(
            cache.child_procedures("weather-station").collect::<Vec<_>>(),
            vec!["thermo-1"]
        );
        assert!(cache.has_observable_property("air_temperature"));
    }

    #[test]
    fn test_merge_unions_extents() {
        let mut a = ContentCache::new();
        a.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));
        let mut b = ContentCache::new();
        b.add_observation(&observation("thermo-1", "temps", "station-b", 9.0, 5));

        a.merge(&b);

        assert_eq!(a.features_for_offering("temps").count(), 2);
        assert_eq!(a.global_phenomenon_time().unwrap().end, at(5).end);
    }

    #[test]
    fn test_serde_roundtrip_preserves_equality() {
        let mut cache = ContentCache::new();
        cache.add_observation(&observation("thermo-1", "temps", "station-a", 7.0, 1));

        let json = serde_json::to_string(&cache).unwrap();
        let back: ContentCache = serde_json::from_str(&json).unwrap();
        assert_eq!(cache, back);
    }
}
