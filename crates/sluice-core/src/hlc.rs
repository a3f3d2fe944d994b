//! Hybrid logical clock timestamps and half-open ranges.
//!
//! Every mutation flowing through the pipeline carries an [`Hlc`]: a
//! `(wall_nanos, logical)` pair with lexicographic ordering. The logical
//! counter disambiguates events that share a wall-clock reading, so the
//! total order is stable even under clock ties.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A hybrid-logical-clock timestamp.
///
/// Ordering is lexicographic: wall time first, logical counter second.
/// [`Hlc::ZERO`] is the minimum value and doubles as the "no checkpoint
/// yet" sentinel in resolved-bound ranges.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hlc {
    wall_nanos: i64,
    logical: u32,
}

impl Hlc {
    /// The minimum timestamp.
    pub const ZERO: Hlc = Hlc {
        wall_nanos: 0,
        logical: 0,
    };

    /// Creates a timestamp from a wall-clock reading in nanoseconds since
    /// the Unix epoch and a logical counter.
    #[must_use]
    pub const fn new(wall_nanos: i64, logical: u32) -> Self {
        Self {
            wall_nanos,
            logical,
        }
    }

    /// Returns the wall-clock component in nanoseconds.
    #[must_use]
    pub const fn wall_nanos(&self) -> i64 {
        self.wall_nanos
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Returns `true` for the zero timestamp.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.wall_nanos == 0 && self.logical == 0
    }

    /// Returns the smallest timestamp strictly greater than `self`.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            wall_nanos: self.wall_nanos,
            logical: self.logical + 1,
        }
    }

    /// Captures the current wall clock as a timestamp with a zero logical
    /// counter. Used by the synthetic-bounds proposer when the source has
    /// not yet delivered a checkpoint.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn wall_now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        Self {
            wall_nanos: nanos,
            logical: 0,
        }
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:010}", self.wall_nanos, self.logical)
    }
}

impl FromStr for Hlc {
    type Err = ParseHlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (wall, logical) = s.split_once('.').ok_or(ParseHlcError)?;
        Ok(Self {
            wall_nanos: wall.parse().map_err(|_| ParseHlcError)?,
            logical: logical.parse().map_err(|_| ParseHlcError)?,
        })
    }
}

/// Error returned when parsing a textual timestamp fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected a timestamp of the form <nanos>.<logical>")]
pub struct ParseHlcError;

/// A half-open timestamp range `[min, max_exclusive)`.
///
/// The range is empty when both endpoints coincide. Construction clamps
/// the endpoints so `min <= max` always holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlcRange {
    min: Hlc,
    max_exclusive: Hlc,
}

impl HlcRange {
    /// An empty range at the zero timestamp.
    pub const EMPTY: HlcRange = HlcRange {
        min: Hlc::ZERO,
        max_exclusive: Hlc::ZERO,
    };

    /// Creates a range, clamping `max` up to `min` if it is smaller.
    #[must_use]
    pub fn new(min: Hlc, max_exclusive: Hlc) -> Self {
        Self {
            min,
            max_exclusive: max_exclusive.max(min),
        }
    }

    /// Returns the inclusive lower bound.
    #[must_use]
    pub const fn min(&self) -> Hlc {
        self.min
    }

    /// Returns the exclusive upper bound.
    #[must_use]
    pub const fn max_exclusive(&self) -> Hlc {
        self.max_exclusive
    }

    /// Returns `true` when the range contains no timestamps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min == self.max_exclusive
    }

    /// Returns `true` when `ts` falls within the range.
    #[must_use]
    pub fn contains(&self, ts: Hlc) -> bool {
        ts >= self.min && ts < self.max_exclusive
    }

    /// Returns a copy whose upper bound is at least `max`.
    #[must_use]
    pub fn extended_to(&self, max: Hlc) -> Self {
        Self {
            min: self.min,
            max_exclusive: self.max_exclusive.max(max),
        }
    }
}

impl fmt::Display for HlcRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max_exclusive)
    }
}
