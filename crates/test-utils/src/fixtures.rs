//! Common test fixtures for content cache tests.
//!
//! A small observation network: two weather stations reporting air
//! temperature into the `temperatures` offering and one buoy reporting sea
//! surface temperature into `ocean`.

use content_cache::{
    FeatureOfInterest, MemoryContentSource, Observation, OfferingDescription, ResultTemplate,
    SensorDescription,
};
use sos_common::TimePeriod;

pub mod ids {
    pub const TEMPERATURES: &str = "temperatures";
    pub const OCEAN: &str = "ocean";

    pub const STATION_A: &str = "urn:sensor:station-a";
    pub const STATION_B: &str = "urn:sensor:station-b";
    pub const BUOY: &str = "urn:sensor:buoy-7";

    pub const AIR_TEMPERATURE: &str = "air_temperature";
    pub const SEA_SURFACE_TEMPERATURE: &str = "sea_surface_temperature";

    pub const TEMPLATE: &str = "urn:template:station-a-air";
}

/// Parse an ISO 8601 instant or `start/end` period.
///
/// Panics on invalid input; fixtures are expected to be well formed.
pub fn period(value: &str) -> TimePeriod {
    TimePeriod::from_iso8601(value).expect("invalid fixture time")
}

pub fn sensor(procedure: &str, offering: &str) -> SensorDescription {
    SensorDescription::new(procedure, OfferingDescription::new(offering))
}

pub fn station_sensor(procedure: &str) -> SensorDescription {
    SensorDescription::new(
        procedure,
        OfferingDescription::new(ids::TEMPERATURES).with_name("Air temperatures"),
    )
    .with_observable_property(ids::AIR_TEMPERATURE)
}

/// Observation at a point feature.
pub fn observation_at(
    procedure: &str,
    offering: &str,
    feature: &str,
    (x, y): (f64, f64),
    time: &str,
) -> Observation {
    Observation::new(
        procedure,
        offering,
        ids::AIR_TEMPERATURE,
        FeatureOfInterest::at_point(feature, x, y),
        period(time),
    )
}

/// Air temperature observation of `procedure` at the feature `feature`.
pub fn observation(procedure: &str, feature: &str, time: &str) -> Observation {
    observation_at(procedure, ids::TEMPERATURES, feature, (0.0, 0.0), time)
}

pub fn station_template() -> ResultTemplate {
    ResultTemplate {
        identifier: ids::TEMPLATE.to_string(),
        offering: ids::TEMPERATURES.to_string(),
        procedure: ids::STATION_A.to_string(),
        observable_property: ids::AIR_TEMPERATURE.to_string(),
    }
}

/// Backing store pre-loaded with the fixture network.
pub async fn seeded_store() -> MemoryContentSource {
    let store = MemoryContentSource::new();

    store.insert_sensor(station_sensor(ids::STATION_A)).await;
    store.insert_sensor(station_sensor(ids::STATION_B)).await;
    store
        .insert_sensor(
            SensorDescription::new(
                ids::BUOY,
                OfferingDescription::new(ids::OCEAN).with_name("Ocean"),
            )
            .with_observable_property(ids::SEA_SURFACE_TEMPERATURE),
        )
        .await;

    store
        .insert_observations([
            observation_at(
                ids::STATION_A,
                ids::TEMPERATURES,
                "station-a-site",
                (7.1, 51.9),
                "2024-03-01T00:00:00Z",
            ),
            observation_at(
                ids::STATION_B,
                ids::TEMPERATURES,
                "station-b-site",
                (8.4, 52.3),
                "2024-03-01T06:00:00Z",
            ),
            Observation::new(
                ids::BUOY,
                ids::OCEAN,
                ids::SEA_SURFACE_TEMPERATURE,
                FeatureOfInterest::at_point("buoy-7-site", -30.0, 45.0),
                period("2024-03-01T00:00:00Z/2024-03-02T00:00:00Z"),
            ),
        ])
        .await;

    store.insert_result_template(station_template()).await;
    store
}
