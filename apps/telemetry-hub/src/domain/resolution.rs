//! Sampling Resolutions
//!
//! The closed set of resolutions a series can be requested at, ordered by
//! sample duration. `raw` and `second` are reserved for realtime push
//! subscriptions; history requests use `minute` and coarser.

use serde::{Deserialize, Serialize};

/// Sampling resolution of a value stream.
///
/// Variant order is duration order, so the derived `Ord` sorts from finest
/// (`Raw`) to coarsest (`Year`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Unaggregated readings as the device produced them.
    Raw,
    /// One sample per second.
    Second,
    /// One sample per minute.
    Minute,
    /// One sample per hour.
    Hour,
    /// One sample per day.
    Day,
    /// One sample per week.
    Week,
    /// One sample per month.
    Month,
    /// One sample per year.
    Year,
}

impl Resolution {
    /// All resolutions, finest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Raw,
            Self::Second,
            Self::Minute,
            Self::Hour,
            Self::Day,
            Self::Week,
            Self::Month,
            Self::Year,
        ]
    }

    /// Wire name of the resolution.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Nominal sample duration in milliseconds; `Raw` has no fixed cadence
    /// and reports zero. Months and years use 30-day and 365-day nominals.
    #[must_use]
    pub const fn duration_ms(self) -> i64 {
        match self {
            Self::Raw => 0,
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
            Self::Week => 604_800_000,
            Self::Month => 2_592_000_000,
            Self::Year => 31_536_000_000,
        }
    }

    /// Whether this resolution can back an interval or sliding-window
    /// (history) subscription.
    #[must_use]
    pub const fn supports_history(self) -> bool {
        !self.supports_realtime()
    }

    /// Whether this resolution can back a realtime push subscription.
    #[must_use]
    pub const fn supports_realtime(self) -> bool {
        matches!(self, Self::Raw | Self::Second)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn ordered_by_duration() {
        let mut sorted = Resolution::all().to_vec();
        sorted.sort_by_key(|r| r.duration_ms());
        assert_eq!(sorted.as_slice(), Resolution::all());
    }

    #[test]
    fn ord_matches_duration() {
        assert!(Resolution::Raw < Resolution::Second);
        assert!(Resolution::Minute < Resolution::Year);
    }

    #[test_case(Resolution::Raw, true; "raw is realtime")]
    #[test_case(Resolution::Second, true; "second is realtime")]
    #[test_case(Resolution::Minute, false; "minute is history")]
    #[test_case(Resolution::Year, false; "year is history")]
    fn realtime_support(resolution: Resolution, expected: bool) {
        assert_eq!(resolution.supports_realtime(), expected);
        assert_eq!(resolution.supports_history(), !expected);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(
            serde_json::to_string(&Resolution::Minute).unwrap(),
            "\"minute\""
        );
        let parsed: Resolution = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(parsed, Resolution::Hour);
    }

    #[test]
    fn display_matches_wire_name() {
        for resolution in Resolution::all() {
            assert_eq!(resolution.to_string(), resolution.as_str());
        }
    }
}
