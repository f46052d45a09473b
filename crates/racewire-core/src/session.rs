use std::fmt;

use chrono::{DateTime, Duration, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// `strftime` layout of a session token: day, month, year, hour, minute, second.
pub const TOKEN_FORMAT: &str = "%d%m%Y%H%M%S";

/// Number of characters in a generated token.
pub const TOKEN_LEN: usize = 14;

/// Opaque identifier of one logical session.
///
/// Generated from local wall-clock time at second granularity, so two tokens
/// produced within the same second compare equal.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Format a token from a point in time.
    pub fn from_time(time: &DateTime<Local>) -> Self {
        Self(time.format(TOKEN_FORMAT).to_string())
    }

    /// Generate a token for the clock's current time.
    pub fn generate(clock: &dyn Clock) -> Self {
        Self::from_time(&clock.now())
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of wall-clock time for token generation and frame timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The process clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, time: DateTime<Local>) {
        *self.now.lock() = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// ISO-8601 local timestamp with microseconds and no offset, e.g.
/// `2025-01-01T12:00:00.000000`.
pub fn iso_timestamp(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
