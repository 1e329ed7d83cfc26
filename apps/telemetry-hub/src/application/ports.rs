//! Port Interfaces
//!
//! Contracts between the dispatcher and its collaborators.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: the stream endpoint. All calls are fire-and-forget:
//!   there is no request/response correlation, and inbound data is matched
//!   to subscriptions purely by device, sensor, resolution, and time range.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`Subscriber`]: the widget-facing notification surface. Notifications
//!   carry no return value and implementations must swallow their own
//!   errors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::clock::TimestampMs;
use crate::domain::metadata::{DeviceId, SensorId};
use crate::domain::resolution::Resolution;

/// Sensors addressed per device, deterministic iteration order.
pub type SensorSelection = BTreeMap<DeviceId, BTreeSet<SensorId>>;

/// One (possibly coalesced) history request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuesRequest {
    /// Inclusive window start.
    pub since: TimestampMs,
    /// Inclusive window end.
    pub until: TimestampMs,
    /// Resolution the values should be delivered at.
    pub resolution: Resolution,
    /// Which sensors the window applies to.
    pub sensors: SensorSelection,
}

impl ValuesRequest {
    /// Request covering a single sensor.
    #[must_use]
    pub fn single(
        device: &str,
        sensor: &str,
        resolution: Resolution,
        since: TimestampMs,
        until: TimestampMs,
    ) -> Self {
        let mut sensors = SensorSelection::new();
        sensors
            .entry(device.to_owned())
            .or_default()
            .insert(sensor.to_owned());
        Self {
            since,
            until,
            resolution,
            sensors,
        }
    }

    /// Total number of sensors addressed.
    #[must_use]
    pub fn sensor_count(&self) -> usize {
        self.sensors.values().map(BTreeSet::len).sum()
    }
}

/// A resolution-tagged batch of value tuples, grouped device → sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBatch {
    /// Resolution every tuple in the batch belongs to.
    pub resolution: Resolution,
    /// `device → sensor → [(timestamp, value), ...]` in arrival order.
    pub values: BTreeMap<DeviceId, BTreeMap<SensorId, Vec<(TimestampMs, f64)>>>,
}

impl ValueBatch {
    /// Empty batch for one resolution.
    #[must_use]
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            values: BTreeMap::new(),
        }
    }

    /// Append one tuple.
    pub fn push(&mut self, device: &str, sensor: &str, timestamp: TimestampMs, value: f64) {
        self.values
            .entry(device.to_owned())
            .or_default()
            .entry(sensor.to_owned())
            .or_default()
            .push((timestamp, value));
    }

    /// Total number of tuples across all sensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Whether the batch carries no tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outbound operations on the stream endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Ask for the full metadata tree.
    fn get_metadata(&self);

    /// Ask for history values covering `request`.
    fn get_values(&self, request: ValuesRequest);

    /// Assert the set of sensors that should push realtime updates. Push
    /// subscriptions are not persistent on the endpoint side, so this is
    /// re-sent periodically with the full current set.
    fn request_realtime_updates(&self, sensors: SensorSelection);
}

/// Widget-facing notification surface.
///
/// The registry references subscribers, it never owns their state.
pub trait Subscriber: Send + Sync {
    /// A value inside one of the subscriber's windows arrived.
    fn update_value(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        timestamp: TimestampMs,
        value: f64,
    );

    /// The device's metadata (name) changed.
    fn update_device_metadata(&self, device: &str);

    /// A sensor's metadata (name, unit, or port) changed.
    fn update_sensor_metadata(&self, device: &str, sensor: &str);

    /// The device is gone; evict any state held for it.
    fn remove_device(&self, device: &str);

    /// The sensor is gone; evict any state held for it.
    fn remove_sensor(&self, device: &str, sensor: &str);
}

/// Shared subscriber handle. Identity — for notification dedup and
/// unsubscribing — is the allocation, i.e. `Arc` pointer equality.
pub type SubscriberRef = Arc<dyn Subscriber>;

/// Stable dedup key for a subscriber handle.
pub(crate) fn subscriber_key(subscriber: &SubscriberRef) -> usize {
    Arc::as_ptr(subscriber).cast::<()>() as usize
}
