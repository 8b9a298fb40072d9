//! Millisecond timestamps used as timeline keys.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Point in time in milliseconds, totally ordered.
///
/// NaN is rejected and `-0.0` is folded into `0.0` at construction, so
/// ordering and equality agree with `f64::total_cmp` and the type can key a
/// `BTreeMap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Timestamp(f64);

impl Timestamp {
    /// Timestamp at `millis` milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if `millis` is NaN.
    #[must_use]
    pub fn from_millis(millis: f64) -> Self {
        assert!(!millis.is_nan(), "timestamp must not be NaN");
        Self(unsigned_zero(millis))
    }

    /// Wall-clock time since the Unix epoch.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_micros() as f64 / 1000.0)
    }

    /// Milliseconds value.
    #[must_use]
    pub fn as_millis(self) -> f64 {
        self.0
    }

    /// Absolute distance to `other` in milliseconds.
    #[must_use]
    pub fn distance(self, other: Timestamp) -> f64 {
        (self.0 - other.0).abs()
    }
}

/// `total_cmp` orders `-0.0` before `0.0`; both must name the same instant.
fn unsigned_zero(millis: f64) -> f64 {
    if millis == 0.0 {
        0.0
    } else {
        millis
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<Timestamp> for f64 {
    fn from(timestamp: Timestamp) -> f64 {
        timestamp.0
    }
}

impl TryFrom<f64> for Timestamp {
    type Error = &'static str;

    fn try_from(millis: f64) -> Result<Self, Self::Error> {
        if millis.is_nan() {
            Err("timestamp must not be NaN")
        } else {
            Ok(Self(unsigned_zero(millis)))
        }
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: f64) -> Timestamp {
        Timestamp::from_millis(self.0 + millis)
    }
}

impl Sub<f64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, millis: f64) -> Timestamp {
        Timestamp::from_millis(self.0 - millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.0)
    }
}
