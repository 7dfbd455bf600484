//! In-memory content cache of the observation store.
//!
//! The [`CacheController`] keeps a [`ContentCache`] snapshot up to date from
//! partial updates (one per data-modifying operation) and complete rebuilds
//! (periodic or on demand), and hands out the current snapshot to readers.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod persistence;
pub mod rebuild;
pub mod snapshot;
pub mod source;
pub mod trigger;
pub mod update;

pub use config::CacheConfig;
pub use controller::{CacheController, ControllerStatus};
pub use error::{CacheError, CacheResult};
pub use model::{
    FeatureOfInterest, Observation, OfferingDescription, ResultTemplate, SensorDescription,
};
pub use persistence::{FilePersistence, NoPersistence, PersistenceStrategy};
pub use rebuild::RebuildState;
pub use snapshot::{CacheSummary, ContentCache, ResultTemplateEntry};
pub use source::{ContentSource, MemoryContentSource};
pub use trigger::PeriodicTrigger;
pub use update::{
    CacheUpdate, CompleteCacheUpdate, CompositeUpdate, ObservationInsertionUpdate,
    ResultInsertionUpdate, ResultTemplateInsertionUpdate, SensorDeletionUpdate,
    SensorInsertionUpdate, UpdateKind, UpdateUnit,
};
