//! Validated value types shared across the vault crates.
//!
//! Each type guarantees its invariant once constructed, so downstream code (path derivation,
//! manifest parsing, bucket scanning) never re-validates.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not a positive decimal device number
    #[error("Invalid device number: '{0}'")]
    InvalidDeviceNumber(String),

    /// The input is not an 8-digit `YYYYMMDD` calendar date
    #[error("Invalid date token: '{0}'")]
    InvalidDateToken(String),

    /// The input is not a timestamp in any accepted layout
    #[error("Invalid timestamp: '{0}'")]
    InvalidTimestamp(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A registered device number: a positive integer assigned sequentially per customer.
///
/// Device directories under a customer root are named by the decimal form of this number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceNumber(u32);

impl DeviceNumber {
    /// Wraps `value`, rejecting zero.
    pub fn new(value: u32) -> Result<Self, TextError> {
        if value == 0 {
            return Err(TextError::InvalidDeviceNumber(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceNumber {
    type Err = TextError;

    /// Parses a directory name as a device number.
    ///
    /// Only the canonical decimal form is accepted: ASCII digits with no sign, whitespace or
    /// leading zero. `+1` and `01` are never mistaken for device `1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TextError::InvalidDeviceNumber(s.to_owned()));
        }
        let value: u32 = s
            .parse()
            .map_err(|_| TextError::InvalidDeviceNumber(s.to_owned()))?;
        Self::new(value)
    }
}

impl serde::Serialize for DeviceNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

/// The date token naming a backup bucket: `YYYYMMDD`.
///
/// Tokens order chronologically, which is also their lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateToken(NaiveDate);

/// Timestamp layouts accepted in restore manifests, tried in order.
const DATETIME_LAYOUTS: &[&str] = &[
    "%Y%m%d %H:%M:%S",
    "%Y%m%d-%H%M%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_LAYOUTS: &[&str] = &["%Y%m%d", "%Y-%m-%d"];

impl DateToken {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parses a bucket directory name. Exactly eight ASCII digits forming a real calendar date.
    pub fn parse(input: &str) -> Result<Self, TextError> {
        let invalid = || TextError::InvalidDateToken(input.to_owned());
        if input.len() != 8 || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: i32 = input[0..4].parse().map_err(|_| invalid())?;
        let month: u32 = input[4..6].parse().map_err(|_| invalid())?;
        let day: u32 = input[6..8].parse().map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Resolves the bucket a backup timestamp belongs to.
    ///
    /// The time of day is discarded. RFC 3339 timestamps keep the calendar date as written in
    /// their own offset.
    pub fn from_timestamp(input: &str) -> Result<Self, TextError> {
        let trimmed = input.trim();
        for layout in DATETIME_LAYOUTS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, layout) {
                return Ok(Self(dt.date()));
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self(dt.naive_local().date()));
        }
        for layout in DATE_LAYOUTS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, layout) {
                return Ok(Self(date));
            }
        }
        Err(TextError::InvalidTimestamp(input.to_owned()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The directory name form, `YYYYMMDD`.
    pub fn as_dir_name(&self) -> String {
        format!(
            "{:04}{:02}{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }
}

impl fmt::Display for DateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_dir_name())
    }
}

impl FromStr for DateToken {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateToken::parse(s)
    }
}

impl serde::Serialize for DateToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_dir_name())
    }
}

impl<'de> serde::Deserialize<'de> for DateToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateToken::parse(&s).map_err(serde::de::Error::custom)
    }
}
