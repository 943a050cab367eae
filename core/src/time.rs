//! Utilities for timestamps and durations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{Arc, Mutex},
};

/// Errors arising from time arithmetic.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("illegal time arithmetic: {0}")]
    IllegalTimeArithmetic(&'static str),
}

/// A number of seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(u64);

impl Time {
    /// 3000-01-01T00:00:00Z, used as the expiration of tasks that should never expire during a
    /// test run.
    pub const DISTANT_FUTURE: Time = Time(32_503_680_000);

    pub const fn from_seconds_since_epoch(seconds: u64) -> Self {
        Self(seconds)
    }

    pub const fn as_seconds_since_epoch(&self) -> u64 {
        self.0
    }

    /// Truncate this time to the start of the batch interval it falls in, for the given time
    /// precision.
    pub fn to_batch_interval_start(&self, time_precision: &Duration) -> Result<Time, Error> {
        let rem = self
            .0
            .checked_rem(time_precision.0)
            .ok_or(Error::IllegalTimeArithmetic("time precision is zero"))?;
        Ok(Time(self.0 - rem))
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A number of seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_seconds(seconds: u64) -> Self {
        Self(seconds)
    }

    pub const fn from_hours(hours: u64) -> Self {
        Self(hours * 3600)
    }

    pub const fn as_seconds(&self) -> u64 {
        self.0
    }

    pub fn checked_mul(&self, factor: u64) -> Result<Duration, Error> {
        self.0
            .checked_mul(factor)
            .map(Duration)
            .ok_or(Error::IllegalTimeArithmetic("operation would overflow"))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// A clock knows what time it currently is.
pub trait Clock: 'static + Clone + Debug + Sync + Send {
    /// Get the current time.
    fn now(&self) -> Time;
}

/// A real clock returns the current time relative to the Unix epoch.
#[derive(Clone, Copy, Default)]
#[non_exhaustive]
pub struct RealClock {}

impl Clock for RealClock {
    fn now(&self) -> Time {
        Time::from_seconds_since_epoch(
            Utc::now()
                .timestamp()
                .try_into()
                .expect("invalid or out-of-range timestamp"),
        )
    }
}

impl Debug for RealClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.now())
    }
}

/// A mock clock for use in testing. Clones are identical: all clones of a given MockClock will
/// be controlled by a controller retrieved from any of the clones.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct MockClock {
    current_time: Arc<Mutex<Time>>,
}

impl MockClock {
    pub fn new(when: Time) -> MockClock {
        MockClock {
            current_time: Arc::new(Mutex::new(when)),
        }
    }

    pub fn set(&self, when: Time) {
        let mut current_time = self.current_time.lock().unwrap();
        *current_time = when;
    }

    pub fn advance(&self, duration: &Duration) {
        let mut current_time = self.current_time.lock().unwrap();
        *current_time = Time(current_time.0 + duration.0);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Time {
        *self.current_time.lock().unwrap()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        // Sunday, September 9, 2001 1:46:40 AM UTC
        Self::new(Time::from_seconds_since_epoch(1_000_000_000))
    }
}
