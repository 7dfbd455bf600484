//! Storage backends for the observation service.
//!
//! Provides the PostgreSQL observation catalog, which doubles as the content
//! source for complete content cache rebuilds.

pub mod catalog;

pub use catalog::ObservationCatalog;
