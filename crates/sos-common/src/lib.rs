//! Common types and utilities shared across the observation service crates.

pub mod bbox;
pub mod error;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{SosError, SosResult};
pub use time::{TimeParseError, TimePeriod};
