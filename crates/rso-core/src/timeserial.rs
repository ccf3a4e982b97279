//! Timeserials - logical clock values totally ordering operations per origin.
//!
//! A timeserial is an opaque wire string of the form
//! `{series}@{timestamp}-{counter}` with an optional `:{index}` suffix.
//! Comparison order is timestamp, then counter, then series (lexicographic),
//! then index. An absent timeserial sorts before any present one, and two
//! absent timeserials compare equal.

use crate::error::{ObjectError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed timeserial.
///
/// The per-site application gate admits an operation only when its
/// timeserial is strictly greater than the one already recorded for that
/// site, so equality must be exact and ordering total.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Timeserial {
    series: String,
    timestamp: u64,
    counter: u32,
    index: Option<u32>,
}

impl Timeserial {
    pub fn new(series: impl Into<String>, timestamp: u64, counter: u32) -> Self {
        Self {
            series: series.into(),
            timestamp,
            counter,
            index: None,
        }
    }

    pub fn with_index(series: impl Into<String>, timestamp: u64, counter: u32, index: u32) -> Self {
        Self {
            series: series.into(),
            timestamp,
            counter,
            index: Some(index),
        }
    }

    /// The series identifier of the originating site.
    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Parse the wire form `{series}@{timestamp}-{counter}[:{index}]`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || ObjectError::InvalidTimeserial(input.to_string());

        let (series, rest) = input.split_once('@').ok_or_else(invalid)?;
        if series.is_empty() {
            return Err(invalid());
        }

        let (rest, index) = match rest.split_once(':') {
            Some((rest, idx)) => (rest, Some(idx.parse::<u32>().map_err(|_| invalid())?)),
            None => (rest, None),
        };

        let (timestamp, counter) = rest.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            series: series.to_string(),
            timestamp: timestamp.parse().map_err(|_| invalid())?,
            counter: counter.parse().map_err(|_| invalid())?,
            index,
        })
    }

    /// Compare two optional timeserials.
    ///
    /// Absent sorts before present; two absents are equal. This is the
    /// comparison every application gate is built on: a candidate is
    /// admitted only when the result is `Greater` with the candidate on
    /// the left.
    pub fn compare_optional(a: Option<&Timeserial>, b: Option<&Timeserial>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl Ord for Timeserial {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.series.cmp(&other.series))
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Timeserial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timeserial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.series, self.timestamp, self.counter)?;
        if let Some(index) = self.index {
            write!(f, ":{}", index)?;
        }
        Ok(())
    }
}

impl FromStr for Timeserial {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Serialized as the opaque wire string rather than a struct.
impl Serialize for Timeserial {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timeserial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timeserial::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_roundtrip() {
        for input in ["site1@1700000000000-1", "aaBB@42-7:3"] {
            let ts = Timeserial::parse(input).unwrap();
            assert_eq!(ts.to_string(), input);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "no-at-sign", "@1-1", "s@x-1", "s@1-x", "s@1-1:x"] {
            assert!(Timeserial::parse(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_timestamp_dominates_ordering() {
        let older = Timeserial::new("zzz", 100, 99);
        let newer = Timeserial::new("aaa", 200, 0);
        assert!(older < newer);
    }

    #[test]
    fn test_counter_breaks_timestamp_tie() {
        let a = Timeserial::new("zzz", 100, 1);
        let b = Timeserial::new("aaa", 100, 2);
        assert!(a < b);
    }

    #[test]
    fn test_series_breaks_counter_tie() {
        let a = Timeserial::new("aaa", 100, 1);
        let b = Timeserial::new("bbb", 100, 1);
        assert!(a < b);
    }

    #[test]
    fn test_index_breaks_full_tie() {
        let a = Timeserial::new("aaa", 100, 1);
        let b = Timeserial::with_index("aaa", 100, 1, 0);
        let c = Timeserial::with_index("aaa", 100, 1, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_absent_sorts_before_present() {
        let present = Timeserial::new("s", 1, 0);
        assert_eq!(
            Timeserial::compare_optional(None, Some(&present)),
            Ordering::Less
        );
        assert_eq!(
            Timeserial::compare_optional(Some(&present), None),
            Ordering::Greater
        );
        assert_eq!(Timeserial::compare_optional(None, None), Ordering::Equal);
    }

    #[test]
    fn test_serialization_as_string() {
        let ts = Timeserial::with_index("site1", 1700000000000, 5, 2);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"site1@1700000000000-5:2\"");
        let back: Timeserial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
