//! Observation catalog using PostgreSQL.
//!
//! Rows are written by the services handling transactional requests; the
//! catalog only reads them back to rebuild the content cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::info;

use content_cache::{
    CacheResult, ContentCache, ContentSource, FeatureOfInterest, Observation, OfferingDescription,
    ResultTemplate, SensorDescription,
};
use sos_common::{BoundingBox, SosError, SosResult, TimePeriod};

/// Database connection pool and catalog operations.
pub struct ObservationCatalog {
    pool: PgPool,
}

impl ObservationCatalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> SosResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| SosError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> SosResult<()> {
        for statement in schema_statements() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| SosError::DatabaseError(format!("Migration failed: {}", e)))?;
        }
        Ok(())
    }

    async fn load_sensors(&self) -> SosResult<Vec<SensorDescription>> {
        let offerings = sqlx::query_as::<_, SensorOfferingRow>(
            "SELECT po.procedure, o.identifier AS offering, o.name \
             FROM procedure_offerings po JOIN offerings o ON o.identifier = po.offering \
             ORDER BY po.procedure",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Query failed"))?;

        let properties = sqlx::query_as::<_, PairRow>(
            "SELECT procedure AS left_id, observable_property AS right_id FROM procedure_properties",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Query failed"))?;

        let parents = sqlx::query_as::<_, PairRow>(
            "SELECT procedure AS left_id, parent AS right_id FROM procedure_parents",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Query failed"))?;

        Ok(assemble_sensors(offerings, properties, parents))
    }

    async fn load_templates(&self) -> SosResult<Vec<ResultTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT identifier, offering, procedure, observable_property FROM result_templates",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Query failed"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// One aggregate per procedure, offering, property and feature; the cache
    /// only needs the extents.
    async fn load_observation_extents(&self) -> SosResult<Vec<Observation>> {
        let rows = sqlx::query_as::<_, ExtentRow>(
            r#"
            SELECT o.procedure, o.offering, o.observable_property, o.feature,
                   f.min_x, f.min_y, f.max_x, f.max_y,
                   MIN(o.phenomenon_start) AS phenomenon_start,
                   MAX(o.phenomenon_end) AS phenomenon_end,
                   MIN(o.result_start) AS result_start,
                   MAX(o.result_end) AS result_end
            FROM observations o
            JOIN features f ON f.identifier = o.feature
            GROUP BY o.procedure, o.offering, o.observable_property, o.feature,
                     f.min_x, f.min_y, f.max_x, f.max_y
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Query failed"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ContentSource for ObservationCatalog {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn populate(&self, cache: &mut ContentCache) -> CacheResult<()> {
        let sensors = self.load_sensors().await?;
        let templates = self.load_templates().await?;
        let extents = self.load_observation_extents().await?;

        for sensor in &sensors {
            cache.register_sensor(sensor);
        }
        for template in &templates {
            cache.add_result_template(template);
        }
        for extent in &extents {
            cache.add_observation(extent);
        }

        info!(
            sensors = sensors.len(),
            templates = templates.len(),
            extents = extents.len(),
            "Populated content cache from catalog"
        );
        Ok(())
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> SosError {
    move |e| SosError::DatabaseError(format!("{}: {}", context, e))
}

fn schema_statements() -> impl Iterator<Item = &'static str> {
    SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn assemble_sensors(
    offerings: Vec<SensorOfferingRow>,
    properties: Vec<PairRow>,
    parents: Vec<PairRow>,
) -> Vec<SensorDescription> {
    let mut sensors: Vec<SensorDescription> = Vec::new();

    for row in offerings {
        let offering = OfferingDescription {
            identifier: row.offering,
            name: row.name,
        };
        match sensors.last_mut() {
            Some(sensor) if sensor.procedure == row.procedure => sensor.offerings.push(offering),
            _ => sensors.push(SensorDescription::new(row.procedure, offering)),
        }
    }

    for sensor in &mut sensors {
        sensor.observable_properties = properties
            .iter()
            .filter(|p| p.left_id == sensor.procedure)
            .map(|p| p.right_id.clone())
            .collect();
        sensor.parent_procedures = parents
            .iter()
            .filter(|p| p.left_id == sensor.procedure)
            .map(|p| p.right_id.clone())
            .collect();
    }

    sensors
}

/// Internal row types for database queries.
#[derive(FromRow)]
struct SensorOfferingRow {
    procedure: String,
    offering: String,
    name: Option<String>,
}

#[derive(FromRow)]
struct PairRow {
    left_id: String,
    right_id: String,
}

#[derive(FromRow)]
struct TemplateRow {
    identifier: String,
    offering: String,
    procedure: String,
    observable_property: String,
}

impl From<TemplateRow> for ResultTemplate {
    fn from(row: TemplateRow) -> Self {
        ResultTemplate {
            identifier: row.identifier,
            offering: row.offering,
            procedure: row.procedure,
            observable_property: row.observable_property,
        }
    }
}

#[derive(FromRow)]
struct ExtentRow {
    procedure: String,
    offering: String,
    observable_property: String,
    feature: String,
    min_x: Option<f64>,
    min_y: Option<f64>,
    max_x: Option<f64>,
    max_y: Option<f64>,
    phenomenon_start: DateTime<Utc>,
    phenomenon_end: DateTime<Utc>,
    result_start: DateTime<Utc>,
    result_end: DateTime<Utc>,
}

impl From<ExtentRow> for Observation {
    fn from(row: ExtentRow) -> Self {
        let envelope = match (row.min_x, row.min_y, row.max_x, row.max_y) {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => {
                Some(BoundingBox::new(min_x, min_y, max_x, max_y))
            }
            _ => None,
        };

        Observation {
            procedure: row.procedure,
            offerings: vec![row.offering],
            observable_property: row.observable_property,
            feature_of_interest: FeatureOfInterest {
                identifier: row.feature,
                envelope,
            },
            phenomenon_time: TimePeriod::new(row.phenomenon_start, row.phenomenon_end),
            result_time: Some(TimePeriod::new(row.result_start, row.result_end)),
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS procedures (
    identifier TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS offerings (
    identifier TEXT PRIMARY KEY,
    name TEXT
);

CREATE TABLE IF NOT EXISTS procedure_offerings (
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    offering TEXT NOT NULL REFERENCES offerings(identifier) ON DELETE CASCADE,
    PRIMARY KEY (procedure, offering)
);

CREATE TABLE IF NOT EXISTS procedure_properties (
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    observable_property TEXT NOT NULL,
    PRIMARY KEY (procedure, observable_property)
);

CREATE TABLE IF NOT EXISTS procedure_parents (
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    parent TEXT NOT NULL,
    PRIMARY KEY (procedure, parent)
);

CREATE TABLE IF NOT EXISTS features (
    identifier TEXT PRIMARY KEY,
    min_x DOUBLE PRECISION,
    min_y DOUBLE PRECISION,
    max_x DOUBLE PRECISION,
    max_y DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS procedure_features (
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    feature TEXT NOT NULL REFERENCES features(identifier) ON DELETE CASCADE,
    PRIMARY KEY (procedure, feature)
);

CREATE TABLE IF NOT EXISTS observations (
    id UUID PRIMARY KEY,
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    offering TEXT NOT NULL REFERENCES offerings(identifier) ON DELETE CASCADE,
    observable_property TEXT NOT NULL,
    feature TEXT NOT NULL REFERENCES features(identifier),
    phenomenon_start TIMESTAMPTZ NOT NULL,
    phenomenon_end TIMESTAMPTZ NOT NULL,
    result_start TIMESTAMPTZ NOT NULL,
    result_end TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_procedure ON observations(procedure);
CREATE INDEX IF NOT EXISTS idx_observations_offering ON observations(offering);

CREATE TABLE IF NOT EXISTS result_templates (
    identifier TEXT PRIMARY KEY,
    offering TEXT NOT NULL REFERENCES offerings(identifier) ON DELETE CASCADE,
    procedure TEXT NOT NULL REFERENCES procedures(identifier) ON DELETE CASCADE,
    observable_property TEXT NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        value.parse().unwrap()
    }

    #[test]
    fn test_schema_statements_are_split() {
        let statements: Vec<_> = schema_statements().collect();
        assert_eq!(statements.len(), 11);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }

    #[test]
    fn test_assemble_sensors_groups_offerings() {
        let offerings = vec![
            SensorOfferingRow {
                procedure: "a".to_string(),
                offering: "temps".to_string(),
                name: Some("Temperatures".to_string()),
            },
            SensorOfferingRow {
                procedure: "a".to_string(),
                offering: "winds".to_string(),
                name: None,
            },
            SensorOfferingRow {
                procedure: "b".to_string(),
                offering: "temps".to_string(),
                name: Some("Temperatures".to_string()),
            },
        ];
        let properties = vec![PairRow {
            left_id: "b".to_string(),
            right_id: "air_temperature".to_string(),
        }];
        let parents = vec![PairRow {
            left_id: "b".to_string(),
            right_id: "a".to_string(),
        }];

        let sensors = assemble_sensors(offerings, properties, parents);

        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].offerings.len(), 2);
        assert!(sensors[0].observable_properties.is_empty());
        assert_eq!(sensors[1].observable_properties, vec!["air_temperature"]);
        assert_eq!(sensors[1].parent_procedures, vec!["a"]);
    }

    #[test]
    fn test_extent_row_into_observation() {
        let row = ExtentRow {
            procedure: "a".to_string(),
            offering: "temps".to_string(),
            observable_property: "air_temperature".to_string(),
            feature: "site".to_string(),
            min_x: Some(1.0),
            min_y: Some(2.0),
            max_x: Some(3.0),
            max_y: Some(4.0),
            phenomenon_start: ts("2024-03-01T00:00:00Z"),
            phenomenon_end: ts("2024-03-02T00:00:00Z"),
            result_start: ts("2024-03-01T01:00:00Z"),
            result_end: ts("2024-03-02T01:00:00Z"),
        };

        let observation: Observation = row.into();

        assert_eq!(observation.offerings, vec!["temps"]);
        assert_eq!(
            observation.feature_of_interest.envelope,
            Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0))
        );
        assert_eq!(observation.result_time().start, ts("2024-03-01T01:00:00Z"));

        let mut cache = ContentCache::new();
        cache.add_observation(&observation);
        assert_eq!(
            cache.phenomenon_time_for_offering("temps"),
            Some(&TimePeriod::new(
                ts("2024-03-01T00:00:00Z"),
                ts("2024-03-02T00:00:00Z")
            ))
        );
    }

    #[test]
    fn test_extent_without_geometry() {
        let row = ExtentRow {
            procedure: "a".to_string(),
            offering: "temps".to_string(),
            observable_property: "air_temperature".to_string(),
            feature: "site".to_string(),
            min_x: None,
            min_y: None,
            max_x: None,
            max_y: None,
            phenomenon_start: ts("2024-03-01T00:00:00Z"),
            phenomenon_end: ts("2024-03-01T00:00:00Z"),
            result_start: ts("2024-03-01T00:00:00Z"),
            result_end: ts("2024-03-01T00:00:00Z"),
        };

        let observation: Observation = row.into();
        assert!(observation.feature_of_interest.envelope.is_none());
        assert!(observation.phenomenon_time.is_instant());
    }
}
