//! Time handling for observation phenomenon and result times.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A time instant or period.
///
/// An instant is represented as a period whose start equals its end, which
/// keeps extent aggregation a plain min/max fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    /// Create a period; the bounds are swapped if given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// A single instant.
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// Smallest period covering both.
    pub fn union(&self, other: &TimePeriod) -> TimePeriod {
        TimePeriod {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Grow this period in place so it also covers `other`.
    pub fn extend(&mut self, other: &TimePeriod) {
        *self = self.union(other);
    }

    /// Union of an iterator of periods, `None` if the iterator is empty.
    pub fn union_all<'a>(periods: impl IntoIterator<Item = &'a TimePeriod>) -> Option<TimePeriod> {
        periods.into_iter().fold(None, |acc, p| match acc {
            None => Some(*p),
            Some(a) => Some(a.union(p)),
        })
    }

    /// Parse an ISO 8601 instant ("2024-01-15T12:00:00Z") or period
    /// ("start/end").
    pub fn from_iso8601(s: &str) -> Result<Self, TimeParseError> {
        match s.split_once('/') {
            Some((start, end)) => Ok(Self::new(parse_instant(start)?, parse_instant(end)?)),
            None => Ok(Self::instant(parse_instant(s)?)),
        }
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Without timezone, assume UTC
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}
