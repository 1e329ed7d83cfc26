//! Gap-Aware Time Series Store
//!
//! Per-sensor ordered series of `(timestamp, value)` points where a `None`
//! value is an explicit missing-data marker. Readings may arrive out of
//! order; a reading at an existing timestamp overwrites in place. Markers
//! are maintained so that any inactivity gap of at least the configured
//! timeout is visibly represented at the series edge it was detected at,
//! and are dropped again as soon as a reading bridges the gap or the
//! retention window clamps it away.
//!
//! Marker maintenance, concretely:
//!
//! - a reading appended past the tail inserts a marker at `timestamp - 1`
//!   when the previous real point is at least `timeout` older, and removes a
//!   trailing marker it lands within `timeout` of;
//! - a reading prepended before the head behaves symmetrically with a
//!   marker at `timestamp + 1`;
//! - a reading inserted between existing points bridges the surrounding
//!   gap: adjacent markers are removed and none are inserted.
//!
//! Clamping never leaves a series starting or ending on a marker.

use std::collections::HashMap;

use crate::domain::clock::TimestampMs;
use crate::domain::metadata::SensorSpecifier;

/// Chart colors assigned to sensors in rotation.
pub const COLOR_PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// One point of a series; `value` is `None` for a missing-data marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    /// Timestamp in milliseconds.
    pub timestamp: TimestampMs,
    /// The reading, or `None` for a gap marker.
    pub value: Option<f64>,
}

impl DataPoint {
    /// A real reading.
    #[must_use]
    pub const fn reading(timestamp: TimestampMs, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }

    /// A missing-data marker.
    #[must_use]
    pub const fn gap(timestamp: TimestampMs) -> Self {
        Self {
            timestamp,
            value: None,
        }
    }

    /// Whether this point is a missing-data marker.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        self.value.is_none()
    }
}

/// Which points survive a clamp pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionWindow {
    /// Keep points inside fixed absolute bounds `[start, end]`.
    Fixed {
        /// Absolute lower bound.
        start: TimestampMs,
        /// Absolute upper bound.
        end: TimestampMs,
    },
    /// Keep points inside `[now - start, now - end]`.
    Sliding {
        /// Offset of the lower bound back from "now".
        start: TimestampMs,
        /// Offset of the upper bound back from "now".
        end: TimestampMs,
    },
}

impl RetentionWindow {
    /// Absolute `(low, high)` bounds for the given "now".
    #[must_use]
    pub const fn bounds(&self, now: TimestampMs) -> (TimestampMs, TimestampMs) {
        match self {
            Self::Fixed { start, end } => (*start, *end),
            Self::Sliding { start, end } => (now - *start, now - *end),
        }
    }
}

/// Store misuse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    /// The sensor is already tracked.
    #[error("sensor {0} is already tracked")]
    DuplicateSensor(SensorSpecifier),
    /// The sensor was never added.
    #[error("sensor {0} is not tracked")]
    UnknownSensor(SensorSpecifier),
}

/// Per-widget store of sensor series with display-color assignment.
///
/// The sensor index maps into two parallel lists, one series and one color
/// per sensor.
#[derive(Debug)]
pub struct TimeSeriesStore {
    index: HashMap<SensorSpecifier, usize>,
    series: Vec<Vec<DataPoint>>,
    colors: Vec<&'static str>,
    next_color: usize,
    window: RetentionWindow,
    gap_timeout: TimestampMs,
}

impl TimeSeriesStore {
    /// Empty store with the given retention window and inactivity timeout.
    #[must_use]
    pub fn new(window: RetentionWindow, gap_timeout: TimestampMs) -> Self {
        Self {
            index: HashMap::new(),
            series: Vec::new(),
            colors: Vec::new(),
            next_color: 0,
            window,
            gap_timeout,
        }
    }

    /// Start tracking a sensor with an empty series and the next palette
    /// color.
    ///
    /// # Errors
    ///
    /// [`SeriesError::DuplicateSensor`] when the sensor is already tracked.
    pub fn add_sensor(&mut self, spec: SensorSpecifier) -> Result<(), SeriesError> {
        if self.index.contains_key(&spec) {
            return Err(SeriesError::DuplicateSensor(spec));
        }
        self.index.insert(spec, self.series.len());
        self.series.push(Vec::new());
        self.colors.push(COLOR_PALETTE[self.next_color]);
        self.next_color = (self.next_color + 1) % COLOR_PALETTE.len();
        Ok(())
    }

    /// Stop tracking a sensor, dropping its series and re-indexing the rest.
    ///
    /// # Errors
    ///
    /// [`SeriesError::UnknownSensor`] when the sensor was never added.
    pub fn remove_sensor(&mut self, spec: &SensorSpecifier) -> Result<(), SeriesError> {
        let idx = self
            .index
            .remove(spec)
            .ok_or_else(|| SeriesError::UnknownSensor(spec.clone()))?;
        self.series.remove(idx);
        self.colors.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Ok(())
    }

    /// Drop every sensor of a device; returns how many were removed.
    pub fn remove_device(&mut self, device: &str) -> usize {
        let specs: Vec<SensorSpecifier> = self
            .index
            .keys()
            .filter(|spec| spec.device == device)
            .cloned()
            .collect();
        for spec in &specs {
            let _ = self.remove_sensor(spec);
        }
        specs.len()
    }

    /// Whether the sensor is tracked.
    #[must_use]
    pub fn contains(&self, spec: &SensorSpecifier) -> bool {
        self.index.contains_key(spec)
    }

    /// Insert a reading at its timestamp position, overwriting an existing
    /// point at the exact timestamp, and repair gap markers around the
    /// insertion.
    ///
    /// # Errors
    ///
    /// [`SeriesError::UnknownSensor`] when the sensor was never added.
    pub fn add_value(
        &mut self,
        spec: &SensorSpecifier,
        timestamp: TimestampMs,
        value: f64,
    ) -> Result<(), SeriesError> {
        let idx = *self
            .index
            .get(spec)
            .ok_or_else(|| SeriesError::UnknownSensor(spec.clone()))?;
        let timeout = self.gap_timeout;
        let points = &mut self.series[idx];

        let pos = points.partition_point(|p| p.timestamp < timestamp);
        if pos < points.len() && points[pos].timestamp == timestamp {
            // last write wins, even over a marker; no repair needed
            points[pos].value = Some(value);
            return Ok(());
        }

        points.insert(pos, DataPoint::reading(timestamp, value));

        let at_head = pos == 0;
        let at_tail = pos + 1 == points.len();
        if at_head && at_tail {
            return Ok(());
        }

        if at_tail {
            let prev = points[pos - 1];
            if prev.is_gap() {
                if timestamp - prev.timestamp < timeout {
                    points.remove(pos - 1);
                }
            } else if timestamp - prev.timestamp >= timeout {
                points.insert(pos, DataPoint::gap(timestamp - 1));
            }
        } else if at_head {
            let next = points[pos + 1];
            if next.is_gap() {
                if next.timestamp - timestamp < timeout {
                    points.remove(pos + 1);
                }
            } else if next.timestamp - timestamp >= timeout {
                points.insert(pos + 1, DataPoint::gap(timestamp + 1));
            }
        } else {
            // bridged into the middle: adjacent markers describe gaps that
            // no longer exist
            if points[pos + 1].is_gap() {
                points.remove(pos + 1);
            }
            if points[pos - 1].is_gap() {
                points.remove(pos - 1);
            }
        }

        Ok(())
    }

    /// Drop every point outside the retention window, then strip leading and
    /// trailing markers so no series starts or ends on a gap.
    pub fn clamp(&mut self, now: TimestampMs) {
        let (low, high) = self.window.bounds(now);
        for points in &mut self.series {
            points.retain(|p| p.timestamp >= low && p.timestamp <= high);
            while points.first().is_some_and(|p| p.is_gap()) {
                points.remove(0);
            }
            while points.last().is_some_and(|p| p.is_gap()) {
                points.pop();
            }
        }
    }

    /// All series, in sensor-index order.
    #[must_use]
    pub fn data(&self) -> &[Vec<DataPoint>] {
        &self.series
    }

    /// Assigned colors, in sensor-index order.
    #[must_use]
    pub fn colors(&self) -> &[&'static str] {
        &self.colors
    }

    /// Index of a sensor into [`Self::data`] / [`Self::colors`].
    #[must_use]
    pub fn index_of(&self, spec: &SensorSpecifier) -> Option<usize> {
        self.index.get(spec).copied()
    }

    /// One sensor's series.
    #[must_use]
    pub fn series(&self, spec: &SensorSpecifier) -> Option<&[DataPoint]> {
        self.index_of(spec).map(|idx| self.series[idx].as_slice())
    }

    /// One sensor's color.
    #[must_use]
    pub fn color(&self, spec: &SensorSpecifier) -> Option<&'static str> {
        self.index_of(spec).map(|idx| self.colors[idx])
    }

    /// Tracked sensors, in arbitrary order.
    pub fn sensors(&self) -> impl Iterator<Item = &SensorSpecifier> {
        self.index.keys()
    }

    /// Number of tracked sensors.
    #[must_use]
    pub fn sensor_count(&self) -> usize {
        self.index.len()
    }

    /// The configured inactivity timeout.
    #[must_use]
    pub const fn gap_timeout(&self) -> TimestampMs {
        self.gap_timeout
    }

    /// The configured retention window.
    #[must_use]
    pub const fn window(&self) -> RetentionWindow {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TimestampMs = 100;

    fn store() -> (TimeSeriesStore, SensorSpecifier) {
        let mut store = TimeSeriesStore::new(
            RetentionWindow::Fixed {
                start: TimestampMs::MIN,
                end: TimestampMs::MAX,
            },
            T,
        );
        let spec = SensorSpecifier::new("d1", "s1");
        store.add_sensor(spec.clone()).unwrap();
        (store, spec)
    }

    fn points(store: &TimeSeriesStore, spec: &SensorSpecifier) -> Vec<(TimestampMs, Option<f64>)> {
        store
            .series(spec)
            .unwrap()
            .iter()
            .map(|p| (p.timestamp, p.value))
            .collect()
    }

    #[test]
    fn duplicate_sensor_rejected() {
        let (mut store, spec) = store();
        assert_eq!(
            store.add_sensor(spec.clone()),
            Err(SeriesError::DuplicateSensor(spec))
        );
    }

    #[test]
    fn unknown_sensor_rejected_everywhere() {
        let (mut store, _) = store();
        let ghost = SensorSpecifier::new("d1", "ghost");
        assert_eq!(
            store.add_value(&ghost, 0, 1.0),
            Err(SeriesError::UnknownSensor(ghost.clone()))
        );
        assert_eq!(
            store.remove_sensor(&ghost),
            Err(SeriesError::UnknownSensor(ghost))
        );
    }

    #[test]
    fn values_stay_sorted_under_out_of_order_inserts() {
        let (mut store, spec) = store();
        for t in [50, 10, 30, 20, 40] {
            store.add_value(&spec, t, f64::from(u32::try_from(t).unwrap())).unwrap();
        }
        let ts: Vec<_> = store
            .series(&spec)
            .unwrap()
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn duplicate_timestamp_overwrites_in_place() {
        let (mut store, spec) = store();
        store.add_value(&spec, 10, 1.0).unwrap();
        store.add_value(&spec, 20, 2.0).unwrap();
        store.add_value(&spec, 10, 9.0).unwrap();
        assert_eq!(points(&store, &spec), vec![(10, Some(9.0)), (20, Some(2.0))]);
    }

    #[test]
    fn gap_marker_inserted_before_late_reading() {
        // worked example: addValue(t0, 23), addValue(t0 + 6T, 42)
        let (mut store, spec) = store();
        let t0 = 1_000;
        store.add_value(&spec, t0, 23.0).unwrap();
        store.add_value(&spec, t0 + 6 * T, 42.0).unwrap();
        assert_eq!(
            points(&store, &spec),
            vec![
                (t0, Some(23.0)),
                (t0 + 6 * T - 1, None),
                (t0 + 6 * T, Some(42.0))
            ]
        );
    }

    #[test]
    fn bridging_insert_removes_the_marker() {
        // worked example continued: addValue(t0 + 3T, 39)
        let (mut store, spec) = store();
        let t0 = 1_000;
        store.add_value(&spec, t0, 23.0).unwrap();
        store.add_value(&spec, t0 + 6 * T, 42.0).unwrap();
        store.add_value(&spec, t0 + 3 * T, 39.0).unwrap();
        assert_eq!(
            points(&store, &spec),
            vec![
                (t0, Some(23.0)),
                (t0 + 3 * T, Some(39.0)),
                (t0 + 6 * T, Some(42.0))
            ]
        );
    }

    #[test]
    fn append_within_timeout_adds_no_marker() {
        let (mut store, spec) = store();
        store.add_value(&spec, 0, 1.0).unwrap();
        store.add_value(&spec, T - 1, 2.0).unwrap();
        assert_eq!(points(&store, &spec), vec![(0, Some(1.0)), (T - 1, Some(2.0))]);
    }

    #[test]
    fn prepend_across_gap_adds_marker_after_reading() {
        let (mut store, spec) = store();
        store.add_value(&spec, 10 * T, 1.0).unwrap();
        store.add_value(&spec, 0, 2.0).unwrap();
        assert_eq!(
            points(&store, &spec),
            vec![(0, Some(2.0)), (1, None), (10 * T, Some(1.0))]
        );
    }

    #[test]
    fn overwrite_replaces_a_marker() {
        let (mut store, spec) = store();
        store.add_value(&spec, 0, 1.0).unwrap();
        store.add_value(&spec, 6 * T, 2.0).unwrap();
        // a reading lands exactly on the marker timestamp
        store.add_value(&spec, 6 * T - 1, 3.0).unwrap();
        assert_eq!(
            points(&store, &spec),
            vec![(0, Some(1.0)), (6 * T - 1, Some(3.0)), (6 * T, Some(2.0))]
        );
    }

    #[test]
    fn clamp_drops_points_outside_fixed_window() {
        let mut store = TimeSeriesStore::new(RetentionWindow::Fixed { start: 10, end: 20 }, T);
        let spec = SensorSpecifier::new("d1", "s1");
        store.add_sensor(spec.clone()).unwrap();
        for t in [5, 10, 15, 20, 25] {
            store.add_value(&spec, t, 1.0).unwrap();
        }
        store.clamp(0);
        let ts: Vec<_> = store
            .series(&spec)
            .unwrap()
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![10, 15, 20]);
    }

    #[test]
    fn clamp_sliding_window_tracks_now() {
        let mut store = TimeSeriesStore::new(RetentionWindow::Sliding { start: 100, end: 0 }, T);
        let spec = SensorSpecifier::new("d1", "s1");
        store.add_sensor(spec.clone()).unwrap();
        for t in [850, 900, 950, 1_000] {
            store.add_value(&spec, t, 1.0).unwrap();
        }
        store.clamp(1_000);
        let ts: Vec<_> = store
            .series(&spec)
            .unwrap()
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![900, 950, 1_000]);
    }

    #[test]
    fn clamp_never_leaves_edge_markers() {
        let mut store = TimeSeriesStore::new(
            RetentionWindow::Fixed {
                start: 550,
                end: 10_000,
            },
            T,
        );
        let spec = SensorSpecifier::new("d1", "s1");
        store.add_sensor(spec.clone()).unwrap();
        store.add_value(&spec, 0, 1.0).unwrap();
        store.add_value(&spec, 6 * T, 2.0).unwrap();
        // marker at 6T-1 = 599 survives the cut, the reading at 0 does not
        store.clamp(0);
        assert_eq!(points(&store, &spec), vec![(6 * T, Some(2.0))]);
    }

    #[test]
    fn remove_sensor_reindexes_remaining_series() {
        let (mut store, spec) = store();
        let other = SensorSpecifier::new("d1", "s2");
        store.add_sensor(other.clone()).unwrap();
        store.add_value(&other, 1, 7.0).unwrap();

        store.remove_sensor(&spec).unwrap();
        assert_eq!(store.sensor_count(), 1);
        assert_eq!(store.index_of(&other), Some(0));
        assert_eq!(points(&store, &other), vec![(1, Some(7.0))]);
    }

    #[test]
    fn remove_device_drops_all_its_sensors() {
        let (mut store, _) = store();
        store.add_sensor(SensorSpecifier::new("d1", "s2")).unwrap();
        store.add_sensor(SensorSpecifier::new("d2", "s1")).unwrap();
        assert_eq!(store.remove_device("d1"), 2);
        assert_eq!(store.sensor_count(), 1);
        assert!(store.contains(&SensorSpecifier::new("d2", "s1")));
    }

    #[test]
    fn colors_assigned_cyclically() {
        let mut store = TimeSeriesStore::new(RetentionWindow::Fixed { start: 0, end: 1 }, T);
        for i in 0..COLOR_PALETTE.len() + 2 {
            store
                .add_sensor(SensorSpecifier::new("d", format!("s{i}")))
                .unwrap();
        }
        let colors = store.colors();
        assert_eq!(colors[0], COLOR_PALETTE[0]);
        assert_eq!(colors[COLOR_PALETTE.len()], COLOR_PALETTE[0]);
        assert_eq!(colors[COLOR_PALETTE.len() + 1], COLOR_PALETTE[1]);
    }

    #[test]
    fn color_cursor_keeps_cycling_after_removals() {
        let mut store = TimeSeriesStore::new(RetentionWindow::Fixed { start: 0, end: 1 }, T);
        let first = SensorSpecifier::new("d", "s0");
        store.add_sensor(first.clone()).unwrap();
        store.remove_sensor(&first).unwrap();
        store.add_sensor(SensorSpecifier::new("d", "s1")).unwrap();
        assert_eq!(store.colors()[0], COLOR_PALETTE[1]);
    }
}
