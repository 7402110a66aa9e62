//! Absolute time intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulingError};

/// A half-open `[start, end)` span of absolute time. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = SchedulingError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        TimeInterval::new(raw.start, raw.end)
    }
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(SchedulingError::InvalidInterval(format!(
                "start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse an RFC 3339 pair such as `"2025-05-20T13:00:00Z"`.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_instant(start)?, parse_instant(end)?)
    }

    /// Interval of `minutes` starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Result<Self> {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open intersection. Adjacent intervals (one ends exactly when the
    /// other starts) do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Minutes shared with `other`; zero when they do not overlap.
    pub fn overlap_minutes(&self, other: &TimeInterval) -> i64 {
        if !self.overlaps(other) {
            return 0;
        }
        (self.end.min(other.end) - self.start.max(other.start)).num_minutes()
    }

    /// The same span moved by `delta`.
    pub fn shifted(&self, delta: Duration) -> TimeInterval {
        TimeInterval {
            start: self.start + delta,
            end: self.end + delta,
        }
    }
}

pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulingError::InvalidInterval(format!("'{}': {}", value, e)))
}
