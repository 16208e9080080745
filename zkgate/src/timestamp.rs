//! Unix timestamp utilities for commitment freshness and payment metadata.
//!
//! [`UnixTimestamp`] anchors a commitment's freshness window, stamps payment
//! requirements when a challenge is issued, and records when a payment settled.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Whole seconds since the Unix epoch.
///
/// Written to JSON as a decimal string (`"1760000000"`) so JavaScript clients
/// never round it. Both the string and a bare integer are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct SecondsVisitor;

impl Visitor<'_> for SecondsVisitor {
    type Value = UnixTimestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("non-negative seconds as an integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixTimestamp(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixTimestamp)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse()
            .map(UnixTimestamp)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SecondsVisitor)
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    /// Saturates at `u64::MAX` so a far-future timestamp plus a window never wraps.
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    /// Wraps raw seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Wall-clock now. A clock set before the epoch reads as the epoch.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self(now)
    }

    /// Raw seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp moved back by `duration`, saturating at the epoch.
    #[must_use]
    pub const fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs()))
    }

    /// Returns `true` if `now` falls within `window` of this timestamp,
    /// i.e. `now <= self + window`.
    ///
    /// A timestamp in the future relative to `now` is always within the window.
    #[must_use]
    pub fn is_fresh_at(self, now: Self, window: Duration) -> bool {
        now <= self + window.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1_699_999_999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1699999999\"");
        let back: UnixTimestamp = serde_json::from_str("\"1699999999\"").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_accepts_bare_integer() {
        let ts: UnixTimestamp = serde_json::from_str("1760000000").unwrap();
        assert_eq!(ts.as_secs(), 1_760_000_000);
    }

    #[test]
    fn test_rejects_negative() {
        assert!(serde_json::from_str::<UnixTimestamp>("\"-1\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("-1").is_err());
    }

    #[test]
    fn test_freshness_boundary() {
        let issued = UnixTimestamp::from_secs(10_000);
        let window = Duration::from_secs(3600);
        assert!(issued.is_fresh_at(UnixTimestamp::from_secs(13_600), window));
        assert!(!issued.is_fresh_at(UnixTimestamp::from_secs(13_601), window));
        assert!(issued.is_fresh_at(UnixTimestamp::from_secs(9_000), window));
    }

    #[test]
    fn test_far_future_timestamp_is_fresh() {
        let now = UnixTimestamp::from_secs(1_760_000_000);
        let window = Duration::from_secs(3600);
        let next_year = now + 365 * 24 * 3600;
        assert!(next_year.is_fresh_at(now, window));
        assert!(UnixTimestamp::from_secs(u64::MAX).is_fresh_at(now, window));
    }

    #[test]
    fn test_add_saturates() {
        let ts = UnixTimestamp::from_secs(u64::MAX - 1);
        assert_eq!((ts + 10).as_secs(), u64::MAX);
    }
}
