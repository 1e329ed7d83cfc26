//! Widget View
//!
//! A ready-made [`Subscriber`] that owns a [`TimeSeriesStore`] and keeps it
//! current from dispatcher notifications. A renderer polls
//! [`WidgetView::take_dirty`] and reads [`WidgetView::snapshot`] whenever it
//! wants to redraw; the clamp timer keeps the retention window applied while
//! the view is alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Subscriber;
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::metadata::SensorSpecifier;
use crate::domain::resolution::Resolution;
use crate::domain::timeseries::{DataPoint, RetentionWindow, SeriesError, TimeSeriesStore};

/// One sensor's series and color, cloned out for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    /// Which sensor this series belongs to.
    pub specifier: SensorSpecifier,
    /// Assigned display color.
    pub color: &'static str,
    /// The points, timestamp-sorted.
    pub points: Vec<DataPoint>,
}

/// A widget's view over a set of sensors.
pub struct WidgetView {
    store: Mutex<TimeSeriesStore>,
    clock: Arc<dyn Clock>,
    dirty: AtomicBool,
}

impl WidgetView {
    /// New view with its own empty store.
    #[must_use]
    pub fn new(window: RetentionWindow, gap_timeout: TimestampMs, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(TimeSeriesStore::new(window, gap_timeout)),
            clock,
            dirty: AtomicBool::new(false),
        }
    }

    /// Start tracking a sensor in this view.
    ///
    /// # Errors
    ///
    /// [`SeriesError::DuplicateSensor`] when the sensor is already tracked.
    pub fn add_sensor(&self, spec: SensorSpecifier) -> Result<(), SeriesError> {
        self.store.lock().add_sensor(spec)?;
        self.mark_dirty();
        Ok(())
    }

    /// Stop tracking a sensor.
    ///
    /// # Errors
    ///
    /// [`SeriesError::UnknownSensor`] when the sensor was never added.
    pub fn drop_sensor(&self, spec: &SensorSpecifier) -> Result<(), SeriesError> {
        self.store.lock().remove_sensor(spec)?;
        self.mark_dirty();
        Ok(())
    }

    /// Apply the retention window now.
    pub fn clamp(&self) {
        self.store.lock().clamp(self.clock.now_ms());
        self.mark_dirty();
    }

    /// Consume the redraw flag; returns whether anything changed since the
    /// last call.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Clone out every series for rendering, in sensor-index order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        let store = self.store.lock();
        let mut specs: Vec<SensorSpecifier> = store.sensors().cloned().collect();
        specs.sort_by_key(|spec| store.index_of(spec));
        specs
            .into_iter()
            .filter_map(|spec| {
                let color = store.color(&spec)?;
                let points = store.series(&spec)?.to_vec();
                Some(SeriesSnapshot {
                    specifier: spec,
                    color,
                    points,
                })
            })
            .collect()
    }

    /// Number of sensors tracked by this view.
    #[must_use]
    pub fn sensor_count(&self) -> usize {
        self.store.lock().sensor_count()
    }

    /// Spawn the periodic clamp timer; it stops with the token, which the
    /// widget cancels when it unsubscribes.
    pub fn spawn_clamp_timer(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let view = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tick.tick() => view.clamp(),
                }
            }
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl Subscriber for WidgetView {
    fn update_value(
        &self,
        device: &str,
        sensor: &str,
        _resolution: Resolution,
        timestamp: TimestampMs,
        value: f64,
    ) {
        let spec = SensorSpecifier::new(device, sensor);
        let result = self.store.lock().add_value(&spec, timestamp, value);
        match result {
            Ok(()) => self.mark_dirty(),
            // a subscription can outlive the view's sensor set; drop quietly
            Err(err) => tracing::debug!(%err, "value for untracked sensor dropped"),
        }
    }

    fn update_device_metadata(&self, _device: &str) {
        // labels are re-read from the dispatcher on redraw
        self.mark_dirty();
    }

    fn update_sensor_metadata(&self, _device: &str, _sensor: &str) {
        self.mark_dirty();
    }

    fn remove_device(&self, device: &str) {
        if self.store.lock().remove_device(device) > 0 {
            self.mark_dirty();
        }
    }

    fn remove_sensor(&self, device: &str, sensor: &str) {
        let spec = SensorSpecifier::new(device, sensor);
        if self.store.lock().remove_sensor(&spec).is_ok() {
            self.mark_dirty();
        }
    }
}
