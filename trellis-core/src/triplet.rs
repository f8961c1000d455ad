//! Triplets
//!
//! A triplet is the unit of data flowing through the graph: a value, the
//! time it was acquired and its quality.
//!
//! # Invariant
//!
//! A triplet has no value if and only if its quality is `Invalid`. The
//! constructor enforces it in both directions: a missing value forces the
//! quality to `Invalid`, and an `Invalid` quality clears the value. Nothing
//! else can build a triplet, so every triplet in the system holds it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::value::Value;

/// Quality tag accompanying a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Valid,
    Invalid,
    Alarm,
    Changing,
    Warning,
}

impl Quality {
    /// Severity rank, lowest is worst.
    fn rank(self) -> u8 {
        match self {
            Quality::Invalid => 0,
            Quality::Alarm => 1,
            Quality::Changing => 2,
            Quality::Warning => 3,
            Quality::Valid => 4,
        }
    }

    /// The most degraded quality of the given set, `Valid` if empty.
    pub fn worst<I>(qualities: I) -> Quality
    where
        I: IntoIterator<Item = Quality>,
    {
        qualities
            .into_iter()
            .min_by_key(|q| q.rank())
            .unwrap_or(Quality::Valid)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quality::Valid => "VALID",
            Quality::Invalid => "INVALID",
            Quality::Alarm => "ALARM",
            Quality::Changing => "CHANGING",
            Quality::Warning => "WARNING",
        };
        f.write_str(name)
    }
}

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Latest of the given timestamps.
    pub fn latest<I>(stamps: I) -> Option<Timestamp>
    where
        I: IntoIterator<Item = Timestamp>,
    {
        stamps
            .into_iter()
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
    }
}

/// An immutable (value, timestamp, quality) record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Triplet {
    value: Option<Value>,
    timestamp: Timestamp,
    quality: Quality,
}

impl Triplet {
    /// Build a triplet, normalizing value and quality.
    pub fn new(value: Option<Value>, timestamp: Timestamp, quality: Quality) -> Self {
        let (value, quality) = match value {
            Some(_) if quality == Quality::Invalid => (None, Quality::Invalid),
            None => (None, Quality::Invalid),
            some => (some, quality),
        };
        Self {
            value,
            timestamp,
            quality,
        }
    }

    /// A valid triplet stamped with the wall clock.
    pub fn now(value: impl Into<Value>) -> Self {
        Self::at(value, SystemClock.now())
    }

    /// A valid triplet with an explicit stamp.
    pub fn at(value: impl Into<Value>, timestamp: Timestamp) -> Self {
        Self::new(Some(value.into()), timestamp, Quality::Valid)
    }

    /// An invalid triplet: no value.
    pub fn invalid(timestamp: Timestamp) -> Self {
        Self::new(None, timestamp, Quality::Invalid)
    }

    /// Stamp with the given clock when `timestamp` is missing.
    pub fn stamped(
        value: Option<Value>,
        timestamp: Option<Timestamp>,
        quality: Quality,
        clock: &dyn Clock,
    ) -> Self {
        Self::new(value, timestamp.unwrap_or_else(|| clock.now()), quality)
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn is_valid(&self) -> bool {
        self.quality == Quality::Valid
    }

    /// Destructure into `(value, timestamp, quality)`.
    pub fn into_parts(self) -> (Option<Value>, Timestamp, Quality) {
        (self.value, self.timestamp, self.quality)
    }

    /// Same value and quality, regardless of the timestamp.
    ///
    /// This is the change criterion used by the update transaction.
    pub fn same_reading(&self, other: &Triplet) -> bool {
        self.quality == other.quality && self.value == other.value
    }
}
