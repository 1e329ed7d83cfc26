//! Subscription Windows
//!
//! A subscription is a pure value describing which slice of a sensor's
//! timeline an observer wants. The three variants differ only in how their
//! absolute `[start, end]` bounds are derived from "now"; dispatch treats
//! them uniformly through [`Subscription::start`] / [`Subscription::end`].

use crate::domain::clock::TimestampMs;

/// How a subscription's window tracks the present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Fixed absolute bounds.
    Interval,
    /// Bounds slide with the clock.
    SlidingWindow,
    /// Sliding window ending at "now", eligible for push updates.
    Realtime,
}

/// Invalid window bounds at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Interval start lies after its end.
    #[error("interval start {start} is after end {end}")]
    IntervalOutOfOrder {
        /// Requested start timestamp.
        start: TimestampMs,
        /// Requested end timestamp.
        end: TimestampMs,
    },
    /// Sliding-window end offset is further from "now" than the start offset.
    #[error("sliding window end offset {end} exceeds start offset {start}")]
    WindowOutOfOrder {
        /// Offset of the window start back from "now".
        start: TimestampMs,
        /// Offset of the window end back from "now".
        end: TimestampMs,
    },
    /// Realtime window must cover a positive span.
    #[error("realtime window span must be positive, got {0}")]
    EmptyRealtimeWindow(TimestampMs),
}

/// A time-window subscription on one (device, sensor, resolution) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Fixed `[start, end]` bounds, independent of the clock.
    Interval {
        /// Absolute window start.
        start: TimestampMs,
        /// Absolute window end.
        end: TimestampMs,
    },
    /// `[now - start, now - end]`; `end` is the offset closer to "now".
    SlidingWindow {
        /// Offset of the window start back from "now".
        start: TimestampMs,
        /// Offset of the window end back from "now".
        end: TimestampMs,
    },
    /// `[now - start, now]`; additionally drives realtime push requests.
    Realtime {
        /// Offset of the window start back from "now".
        start: TimestampMs,
    },
}

impl Subscription {
    /// Fixed window; requires `start <= end`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::IntervalOutOfOrder`] when the bounds are
    /// reversed.
    pub const fn interval(
        start: TimestampMs,
        end: TimestampMs,
    ) -> Result<Self, SubscriptionError> {
        if start > end {
            return Err(SubscriptionError::IntervalOutOfOrder { start, end });
        }
        Ok(Self::Interval { start, end })
    }

    /// Sliding window; requires `end <= start` (the end offset is the one
    /// closer to "now").
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::WindowOutOfOrder`] when the offsets are
    /// reversed.
    pub const fn sliding_window(
        start: TimestampMs,
        end: TimestampMs,
    ) -> Result<Self, SubscriptionError> {
        if end > start {
            return Err(SubscriptionError::WindowOutOfOrder { start, end });
        }
        Ok(Self::SlidingWindow { start, end })
    }

    /// Realtime window; requires `start > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::EmptyRealtimeWindow`] for a zero or
    /// negative span.
    pub const fn realtime(start: TimestampMs) -> Result<Self, SubscriptionError> {
        if start <= 0 {
            return Err(SubscriptionError::EmptyRealtimeWindow(start));
        }
        Ok(Self::Realtime { start })
    }

    /// The variant discriminant.
    #[must_use]
    pub const fn mode(&self) -> SubscriptionMode {
        match self {
            Self::Interval { .. } => SubscriptionMode::Interval,
            Self::SlidingWindow { .. } => SubscriptionMode::SlidingWindow,
            Self::Realtime { .. } => SubscriptionMode::Realtime,
        }
    }

    /// Whether this subscription drives realtime push requests.
    #[must_use]
    pub const fn is_realtime(&self) -> bool {
        matches!(self, Self::Realtime { .. })
    }

    /// Absolute window start for the given "now".
    #[must_use]
    pub const fn start(&self, now: TimestampMs) -> TimestampMs {
        match self {
            Self::Interval { start, .. } => *start,
            Self::SlidingWindow { start, .. } | Self::Realtime { start } => now - *start,
        }
    }

    /// Absolute window end for the given "now".
    #[must_use]
    pub const fn end(&self, now: TimestampMs) -> TimestampMs {
        match self {
            Self::Interval { end, .. } => *end,
            Self::SlidingWindow { end, .. } => now - *end,
            Self::Realtime { .. } => now,
        }
    }

    /// Whether `timestamp` falls inside the window at the given "now"
    /// (bounds inclusive).
    #[must_use]
    pub const fn in_time_range(&self, timestamp: TimestampMs, now: TimestampMs) -> bool {
        self.start(now) <= timestamp && timestamp <= self.end(now)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn interval_bounds_ignore_now() {
        let sub = Subscription::interval(100, 200).unwrap();
        assert_eq!(sub.start(5_000), 100);
        assert_eq!(sub.end(5_000), 200);
        assert_eq!(sub.mode(), SubscriptionMode::Interval);
    }

    #[test]
    fn interval_rejects_reversed_bounds() {
        assert_eq!(
            Subscription::interval(200, 100),
            Err(SubscriptionError::IntervalOutOfOrder {
                start: 200,
                end: 100
            })
        );
    }

    #[test]
    fn interval_allows_degenerate_point() {
        assert!(Subscription::interval(100, 100).is_ok());
    }

    #[test]
    fn sliding_window_tracks_now() {
        let sub = Subscription::sliding_window(600, 60).unwrap();
        assert_eq!(sub.start(10_000), 9_400);
        assert_eq!(sub.end(10_000), 9_940);
        assert_eq!(sub.mode(), SubscriptionMode::SlidingWindow);
    }

    #[test]
    fn sliding_window_rejects_end_beyond_start() {
        assert_eq!(
            Subscription::sliding_window(60, 600),
            Err(SubscriptionError::WindowOutOfOrder {
                start: 60,
                end: 600
            })
        );
    }

    #[test]
    fn realtime_ends_at_now() {
        let sub = Subscription::realtime(500).unwrap();
        assert_eq!(sub.start(10_000), 9_500);
        assert_eq!(sub.end(10_000), 10_000);
        assert!(sub.is_realtime());
    }

    #[test_case(0; "zero span")]
    #[test_case(-5; "negative span")]
    fn realtime_rejects_empty_window(start: TimestampMs) {
        assert_eq!(
            Subscription::realtime(start),
            Err(SubscriptionError::EmptyRealtimeWindow(start))
        );
    }

    #[test]
    fn in_time_range_is_inclusive() {
        let sub = Subscription::sliding_window(100, 0).unwrap();
        let now = 1_000;
        assert!(sub.in_time_range(900, now));
        assert!(sub.in_time_range(1_000, now));
        assert!(sub.in_time_range(950, now));
        assert!(!sub.in_time_range(899, now));
        assert!(!sub.in_time_range(1_001, now));
    }
}
