// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Feed positions.
//!
//! A [`Position`] is a Redis stream entry ID (`{timestamp_ms}-{sequence}`).
//! IDs compare numerically, not lexicographically: `"9-0" < "10-0"`.
//! Positions serialize as their canonical string form so they can be stored
//! in any checkpoint backend.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A totally ordered marker into the change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    /// Milliseconds part of the stream ID.
    pub millis: u64,
    /// Sequence part of the stream ID.
    pub seq: u64,
}

/// Error returned when a string is not a valid stream ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid stream position: {0:?}")]
pub struct ParsePositionError(String);

impl Position {
    /// The position before every entry (`0-0`).
    pub const ZERO: Position = Position { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// True for `0-0`, i.e. "before the first entry".
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Time lag between two positions, based on the millisecond part.
    pub fn lag_ms(&self, latest: &Position) -> u64 {
        latest.millis.saturating_sub(self.millis)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for Position {
    type Err = ParsePositionError;

    /// Parses `"{ms}-{seq}"`. A bare `"{ms}"` is accepted with sequence 0,
    /// matching how Redis itself interprets incomplete IDs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePositionError(s.to_string());
        let s_trimmed = s.trim();
        match s_trimmed.split_once('-') {
            Some((ms, seq)) => {
                let millis = ms.parse().map_err(|_| invalid())?;
                let seq = seq.parse().map_err(|_| invalid())?;
                Ok(Position { millis, seq })
            }
            None => {
                let millis = s_trimmed.parse().map_err(|_| invalid())?;
                Ok(Position { millis, seq: 0 })
            }
        }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_parse_full_id() {
        let p: Position = "1234567890123-7".parse().unwrap();
        assert_eq!(p, Position::new(1234567890123, 7));
        assert_eq!(p.to_string(), "1234567890123-7");
    }

    #[test]
    fn test_parse_bare_millis() {
        let p: Position = "0".parse().unwrap();
        assert!(p.is_zero());
        let p: Position = "42".parse().unwrap();
        assert_eq!(p, Position::new(42, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "-", "abc", "1-", "-1", "1-2-3", "1.5-0", "\"1-0\""] {
            assert!(input.parse::<Position>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_parse_error_message_quotes_input() {
        let err = "yesterday".parse::<Position>().unwrap_err();
        assert_eq!(err.to_string(), r#"invalid stream position: "yesterday""#);
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_numeric_not_lexicographic_order() {
        let a: Position = "9-0".parse().unwrap();
        let b: Position = "10-0".parse().unwrap();
        assert_eq!(a.cmp(&b), Ordering::Less);

        let c: Position = "10-9".parse().unwrap();
        let d: Position = "10-10".parse().unwrap();
        assert_eq!(c.cmp(&d), Ordering::Less);
    }

    #[test]
    fn test_timestamp_dominates_sequence() {
        let a = Position::new(100, 999);
        let b = Position::new(101, 0);
        assert!(a < b);
    }

    #[test]
    fn test_lag_ms() {
        let cursor = Position::new(1000, 0);
        let latest = Position::new(1500, 3);
        assert_eq!(cursor.lag_ms(&latest), 500);
        // Cursor ahead of latest saturates to zero
        assert_eq!(latest.lag_ms(&cursor), 0);
    }

    #[test]
    fn test_serde_as_string() {
        let p = Position::new(1700000000000, 2);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"1700000000000-2\"");
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let result: Result<Position, _> = serde_json::from_str("\"not-a-position\"");
        assert!(result.is_err());
    }
}
