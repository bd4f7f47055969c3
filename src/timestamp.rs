// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The datetime primitive of the wire format.
//!
//! Document stores keep datetimes as a signed 64-bit count of milliseconds since the UNIX
//! epoch, so that is exactly what a [`Timestamp`] holds. Sub-millisecond precision is dropped
//! on construction, which makes `decode(encode(t)) == t` hold for every timestamp.
//!
//! The representable range is constrained to the years `0` through `9999`, which covers
//! everything RFC 3339 can spell.
use std::fmt;

#[cfg(feature = "chrono")]
use chrono::{DateTime, Datelike, Utc};
#[cfg(feature = "chrono")]
use std::str::FromStr;

/// Error returned when creating or parsing a `Timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    /// The year is outside the supported range of `0` to `9999`.
    #[error("invalid year {0}, supported years are between 0 and 9999 included")]
    InvalidYear(i32),
    /// The millisecond count is outside the supported range.
    #[error("{0} milliseconds since the epoch is outside the supported range")]
    OutOfRange(i64),
    /// The string could not be parsed as a valid RFC 3339 datetime.
    #[error("failed to parse date {0} in rfc3339 format")]
    Parse(String),
}

/// A UTC datetime with millisecond precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Timestamp(i64);

impl Timestamp {
    /// The minimum supported `Timestamp`: `0000-01-01T00:00:00.000Z`.
    pub const MIN: Timestamp = Timestamp(-62_167_219_200_000);
    /// The maximum supported `Timestamp`: `9999-12-31T23:59:59.999Z`.
    pub const MAX: Timestamp = Timestamp(253_402_300_799_999);

    /// Creates a new `Timestamp` from a `chrono::DateTime<Utc>`, truncating to milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the year is outside the supported range of `0` to `9999`.
    #[cfg(feature = "chrono")]
    pub fn new(datetime: DateTime<Utc>) -> Result<Timestamp, TimestampError> {
        let year = datetime.year();
        if !(0..=9999).contains(&year) {
            return Err(TimestampError::InvalidYear(year));
        }
        Ok(Timestamp(datetime.timestamp_millis()))
    }

    /// The current wall-clock time.
    #[cfg(feature = "chrono")]
    pub fn now() -> Timestamp {
        Timestamp(Utc::now().timestamp_millis())
    }

    /// Creates a `Timestamp` from a number of milliseconds since the UNIX epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if `milliseconds` falls outside [`Timestamp::MIN`]..=[`Timestamp::MAX`].
    pub fn from_millis(milliseconds: i64) -> Result<Self, TimestampError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&milliseconds) {
            Ok(Self(milliseconds))
        } else {
            Err(TimestampError::OutOfRange(milliseconds))
        }
    }

    /// Returns the number of milliseconds since the UNIX epoch.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Converts the `Timestamp` to a `chrono::DateTime<Utc>`.
    #[cfg(feature = "chrono")]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        // the constructor range check keeps every Timestamp inside chrono's range
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }

    /// Formats as RFC 3339 with millisecond precision, e.g. `2024-12-24T15:00:00.000Z`.
    #[cfg(feature = "chrono")]
    pub fn to_rfc3339(&self) -> String {
        self.as_datetime()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

#[cfg(feature = "chrono")]
impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = TimestampError;

    fn try_from(value: DateTime<Utc>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(feature = "chrono")]
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(not(feature = "chrono"))]
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(feature = "chrono")]
impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let datetime =
            DateTime::parse_from_rfc3339(s).map_err(|_| TimestampError::Parse(s.to_string()))?;
        Timestamp::new(datetime.to_utc())
    }
}
