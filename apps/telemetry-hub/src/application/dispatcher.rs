//! Subscription Registry and Update Dispatcher
//!
//! Owns the metadata tree and the per-(device, sensor, resolution)
//! subscription slots. Incoming metadata and value batches fan out to
//! subscribers at most once per event even when a subscriber holds several
//! overlapping subscriptions; periodic history polling coalesces every
//! non-realtime window into one request per resolution, so outbound request
//! volume is bounded by the number of resolutions in use rather than the
//! number of subscribers.
//!
//! All registry state lives behind one mutex and is dropped wholesale when
//! the transport closes; subscribers resubscribe after reconnect. Subscriber
//! callbacks are never invoked while the lock is held, so a callback may
//! call back into the registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    SensorSelection, SubscriberRef, Transport, ValueBatch, ValuesRequest, subscriber_key,
};
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::metadata::{
    DeviceId, MetadataDelta, MetadataTree, SensorId, SensorRecord, SensorSpecifier,
};
use crate::domain::resolution::Resolution;
use crate::domain::subscription::{Subscription, SubscriptionError};

/// Registry misuse errors, raised synchronously at the offending call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The device has never been seen in metadata.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    /// The resolution cannot back this kind of subscription.
    #[error("resolution {resolution} is not supported for {kind} subscriptions")]
    UnsupportedResolution {
        /// The rejected resolution.
        resolution: Resolution,
        /// `"history"` or `"realtime"`.
        kind: &'static str,
    },
    /// No slot was ever created for this (device, sensor, resolution).
    #[error("no subscribers registered for {device}/{sensor} at {resolution}")]
    NoSubscribers {
        /// Device id of the missing slot.
        device: DeviceId,
        /// Sensor id of the missing slot.
        sensor: SensorId,
        /// Resolution of the missing slot.
        resolution: Resolution,
    },
    /// Invalid window bounds.
    #[error(transparent)]
    InvalidWindow(#[from] SubscriptionError),
}

/// Registry statistics for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    /// Devices known from metadata.
    pub devices: usize,
    /// Sensors known from metadata.
    pub sensors: usize,
    /// Active interval and sliding-window subscriptions.
    pub history_subscriptions: usize,
    /// Active realtime subscriptions.
    pub realtime_subscriptions: usize,
}

struct SlotEntry {
    subscription: Subscription,
    subscriber: SubscriberRef,
}

type ResolutionSlots = BTreeMap<Resolution, Vec<SlotEntry>>;
type SensorSlots = BTreeMap<SensorId, ResolutionSlots>;

#[derive(Default)]
struct RegistryState {
    devices: MetadataTree,
    slots: BTreeMap<DeviceId, SensorSlots>,
    units: BTreeMap<String, Vec<SensorSpecifier>>,
    has_metadata: bool,
    metadata_waiters: Vec<Box<dyn FnOnce() + Send>>,
}

/// A notification queued while the registry lock is held, delivered after.
enum Notification {
    Value {
        subscriber: SubscriberRef,
        device: DeviceId,
        sensor: SensorId,
        resolution: Resolution,
        timestamp: TimestampMs,
        value: f64,
    },
    DeviceMetadata {
        subscriber: SubscriberRef,
        device: DeviceId,
    },
    SensorMetadata {
        subscriber: SubscriberRef,
        device: DeviceId,
        sensor: SensorId,
    },
    SensorRemoved {
        subscriber: SubscriberRef,
        device: DeviceId,
        sensor: SensorId,
    },
}

impl Notification {
    fn deliver(self) {
        match self {
            Self::Value {
                subscriber,
                device,
                sensor,
                resolution,
                timestamp,
                value,
            } => subscriber.update_value(&device, &sensor, resolution, timestamp, value),
            Self::DeviceMetadata { subscriber, device } => {
                subscriber.update_device_metadata(&device);
            }
            Self::SensorMetadata {
                subscriber,
                device,
                sensor,
            } => subscriber.update_sensor_metadata(&device, &sensor),
            Self::SensorRemoved {
                subscriber,
                device,
                sensor,
            } => subscriber.remove_sensor(&device, &sensor),
        }
    }
}

/// The subscription registry and update dispatcher.
pub struct Dispatcher {
    state: Mutex<RegistryState>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// New empty registry over the given transport and clock.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            transport,
            clock,
        }
    }

    // =========================================================================
    // Subscribing
    // =========================================================================

    /// Subscribe with fixed absolute bounds.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownDevice`], [`DispatchError::UnsupportedResolution`],
    /// or [`DispatchError::InvalidWindow`].
    pub fn subscribe_interval(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        start: TimestampMs,
        end: TimestampMs,
        subscriber: SubscriberRef,
    ) -> Result<(), DispatchError> {
        let subscription = Subscription::interval(start, end)?;
        self.subscribe(device, sensor, resolution, subscription, subscriber)
    }

    /// Subscribe with a window sliding along with the clock.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownDevice`], [`DispatchError::UnsupportedResolution`],
    /// or [`DispatchError::InvalidWindow`].
    pub fn subscribe_sliding_window(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        start: TimestampMs,
        end: TimestampMs,
        subscriber: SubscriberRef,
    ) -> Result<(), DispatchError> {
        let subscription = Subscription::sliding_window(start, end)?;
        self.subscribe(device, sensor, resolution, subscription, subscriber)
    }

    /// Subscribe with a window ending at "now", additionally requesting push
    /// updates for the sensor.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownDevice`], [`DispatchError::UnsupportedResolution`],
    /// or [`DispatchError::InvalidWindow`].
    pub fn subscribe_realtime_sliding_window(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        start: TimestampMs,
        subscriber: SubscriberRef,
    ) -> Result<(), DispatchError> {
        let subscription = Subscription::realtime(start)?;
        self.subscribe(device, sensor, resolution, subscription, subscriber)
    }

    fn subscribe(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        subscription: Subscription,
        subscriber: SubscriberRef,
    ) -> Result<(), DispatchError> {
        let realtime = subscription.is_realtime();
        {
            let mut state = self.state.lock();
            if !state.devices.contains_device(device) {
                return Err(DispatchError::UnknownDevice(device.to_owned()));
            }
            let supported = if realtime {
                resolution.supports_realtime()
            } else {
                resolution.supports_history()
            };
            if !supported {
                return Err(DispatchError::UnsupportedResolution {
                    resolution,
                    kind: if realtime { "realtime" } else { "history" },
                });
            }
            state
                .slots
                .entry(device.to_owned())
                .or_default()
                .entry(sensor.to_owned())
                .or_default()
                .entry(resolution)
                .or_default()
                .push(SlotEntry {
                    subscription,
                    subscriber,
                });
        }

        // one immediate history request for just this sensor, so the new
        // subscriber does not wait for the next poll tick
        let now = self.clock.now_ms();
        self.transport.get_values(ValuesRequest::single(
            device,
            sensor,
            resolution,
            subscription.start(now),
            subscription.end(now),
        ));
        if realtime {
            let mut sensors = SensorSelection::new();
            sensors
                .entry(device.to_owned())
                .or_default()
                .insert(sensor.to_owned());
            self.transport.request_realtime_updates(sensors);
        }

        tracing::debug!(device, sensor, %resolution, realtime, "subscription added");
        Ok(())
    }

    // =========================================================================
    // Unsubscribing
    // =========================================================================

    /// Remove every subscription of `subscriber` in one slot; returns how
    /// many were removed (possibly zero).
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoSubscribers`] when the slot was never created.
    pub fn unsubscribe_sensor(
        &self,
        device: &str,
        sensor: &str,
        resolution: Resolution,
        subscriber: &SubscriberRef,
    ) -> Result<usize, DispatchError> {
        let key = subscriber_key(subscriber);
        let mut state = self.state.lock();
        let entries = state
            .slots
            .get_mut(device)
            .and_then(|sensors| sensors.get_mut(sensor))
            .and_then(|resolutions| resolutions.get_mut(&resolution))
            .ok_or_else(|| DispatchError::NoSubscribers {
                device: device.to_owned(),
                sensor: sensor.to_owned(),
                resolution,
            })?;
        let before = entries.len();
        entries.retain(|entry| subscriber_key(&entry.subscriber) != key);
        Ok(before - entries.len())
    }

    /// Remove every subscription of `subscriber` across the whole registry;
    /// slots where it holds nothing are skipped. Returns how many were
    /// removed.
    pub fn unsubscribe_all(&self, subscriber: &SubscriberRef) -> usize {
        let key = subscriber_key(subscriber);
        let mut state = self.state.lock();
        let mut removed = 0;
        for sensors in state.slots.values_mut() {
            for resolutions in sensors.values_mut() {
                for entries in resolutions.values_mut() {
                    let before = entries.len();
                    entries.retain(|entry| subscriber_key(&entry.subscriber) != key);
                    removed += before - entries.len();
                }
            }
        }
        removed
    }

    // =========================================================================
    // Initial-metadata callbacks
    // =========================================================================

    /// Run `callback` once metadata has been received at least once:
    /// synchronously if it already has, otherwise queued and flushed in
    /// registration order when the first batch arrives.
    pub fn on_initial_metadata<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if !state.has_metadata {
                state.metadata_waiters.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Whether at least one metadata batch has been received.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        self.state.lock().has_metadata
    }

    // =========================================================================
    // Transport lifecycle
    // =========================================================================

    /// Transport (re)opened: kick off the metadata flow.
    pub fn handle_open(&self) {
        tracing::info!("stream open, requesting metadata");
        self.transport.get_metadata();
    }

    /// Transport closed: drop all registry state. Subscribers resubscribe
    /// once reconnected and fresh metadata arrives.
    pub fn handle_close(&self) {
        let mut state = self.state.lock();
        state.devices.clear();
        state.slots.clear();
        state.units.clear();
        state.has_metadata = false;
        // queued initial-metadata callbacks have not fired yet; they flush
        // with the first batch of the next connection
        tracing::info!("stream closed, registry reset");
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Apply one metadata batch: lazily create tree entries, notify affected
    /// subscribers (at most once each per device rename, sensor change, and
    /// sensor removal), discard slots of deleted sensors, rebuild the unit
    /// index, and flush initial-metadata callbacks on the first batch.
    pub fn handle_metadata(&self, delta: &MetadataDelta) {
        let mut notifications: Vec<Notification> = Vec::new();
        let waiters;
        {
            let mut state = self.state.lock();
            let changes = state.devices.apply(delta);

            for device in &changes.renamed_devices {
                let mut seen = HashSet::new();
                if let Some(sensors) = state.slots.get(device) {
                    for resolutions in sensors.values() {
                        for entries in resolutions.values() {
                            for entry in entries {
                                if seen.insert(subscriber_key(&entry.subscriber)) {
                                    notifications.push(Notification::DeviceMetadata {
                                        subscriber: Arc::clone(&entry.subscriber),
                                        device: device.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
            }

            for spec in &changes.changed_sensors {
                let mut seen = HashSet::new();
                let slot = state
                    .slots
                    .get(&spec.device)
                    .and_then(|sensors| sensors.get(&spec.sensor));
                if let Some(resolutions) = slot {
                    for entries in resolutions.values() {
                        for entry in entries {
                            if seen.insert(subscriber_key(&entry.subscriber)) {
                                notifications.push(Notification::SensorMetadata {
                                    subscriber: Arc::clone(&entry.subscriber),
                                    device: spec.device.clone(),
                                    sensor: spec.sensor.clone(),
                                });
                            }
                        }
                    }
                }
            }

            for spec in &changes.removed_sensors {
                // the slot is discarded; former subscribers are told once
                // each and are responsible for evicting their own series
                let mut seen = HashSet::new();
                let removed = state
                    .slots
                    .get_mut(&spec.device)
                    .and_then(|sensors| sensors.remove(&spec.sensor));
                if let Some(resolutions) = removed {
                    for entries in resolutions.into_values() {
                        for entry in entries {
                            if seen.insert(subscriber_key(&entry.subscriber)) {
                                notifications.push(Notification::SensorRemoved {
                                    subscriber: entry.subscriber,
                                    device: spec.device.clone(),
                                    sensor: spec.sensor.clone(),
                                });
                            }
                        }
                    }
                }
            }

            let units = state.devices.sensors_by_unit();
            state.units = units;

            let first = !state.has_metadata;
            state.has_metadata = true;
            waiters = if first {
                std::mem::take(&mut state.metadata_waiters)
            } else {
                Vec::new()
            };
        }

        let delivered = notifications.len();
        for notification in notifications {
            notification.deliver();
        }
        for waiter in waiters {
            waiter();
        }
        if delivered > 0 {
            tracing::debug!(delivered, "metadata notifications delivered");
        }
    }

    /// Dispatch one value batch. A tuple reaches a subscriber when it has at
    /// least one subscription on the exact (device, sensor, resolution) slot
    /// whose window contains the tuple's timestamp; overlapping
    /// subscriptions still yield one notification per tuple.
    pub fn handle_update(&self, batch: &ValueBatch) {
        let now = self.clock.now_ms();
        let mut notifications: Vec<Notification> = Vec::new();
        {
            let state = self.state.lock();
            for (device, sensors) in &batch.values {
                let Some(sensor_slots) = state.slots.get(device) else {
                    continue;
                };
                for (sensor, tuples) in sensors {
                    let entries = sensor_slots
                        .get(sensor)
                        .and_then(|resolutions| resolutions.get(&batch.resolution));
                    let Some(entries) = entries else {
                        continue;
                    };
                    for &(timestamp, value) in tuples {
                        let mut seen = HashSet::new();
                        for entry in entries {
                            if entry.subscription.in_time_range(timestamp, now)
                                && seen.insert(subscriber_key(&entry.subscriber))
                            {
                                notifications.push(Notification::Value {
                                    subscriber: Arc::clone(&entry.subscriber),
                                    device: device.clone(),
                                    sensor: sensor.clone(),
                                    resolution: batch.resolution,
                                    timestamp,
                                    value,
                                });
                            }
                        }
                    }
                }
            }
        }

        let delivered = notifications.len();
        for notification in notifications {
            notification.deliver();
        }
        tracing::trace!(
            tuples = batch.len(),
            delivered,
            resolution = %batch.resolution,
            "value batch dispatched"
        );
    }

    // =========================================================================
    // Periodic requests
    // =========================================================================

    /// Re-request history for every non-realtime subscription, coalesced to
    /// one request per resolution: the bounding box of all windows and the
    /// union of all sensors using that resolution.
    pub fn poll_history_data(&self) {
        struct Coalesced {
            since: TimestampMs,
            until: TimestampMs,
            sensors: SensorSelection,
        }

        let now = self.clock.now_ms();
        let mut by_resolution: BTreeMap<Resolution, Coalesced> = BTreeMap::new();
        {
            let state = self.state.lock();
            for (device, sensors) in &state.slots {
                for (sensor, resolutions) in sensors {
                    for (&resolution, entries) in resolutions {
                        for entry in entries {
                            if entry.subscription.is_realtime() {
                                continue;
                            }
                            let start = entry.subscription.start(now);
                            let end = entry.subscription.end(now);
                            let agg =
                                by_resolution
                                    .entry(resolution)
                                    .or_insert_with(|| Coalesced {
                                        since: start,
                                        until: end,
                                        sensors: SensorSelection::new(),
                                    });
                            agg.since = agg.since.min(start);
                            agg.until = agg.until.max(end);
                            agg.sensors
                                .entry(device.clone())
                                .or_default()
                                .insert(sensor.clone());
                        }
                    }
                }
            }
        }

        for (resolution, agg) in by_resolution {
            tracing::debug!(
                %resolution,
                since = agg.since,
                until = agg.until,
                sensors = agg.sensors.values().map(std::collections::BTreeSet::len).sum::<usize>(),
                "polling history"
            );
            self.transport.get_values(ValuesRequest {
                since: agg.since,
                until: agg.until,
                resolution,
                sensors: agg.sensors,
            });
        }
    }

    /// Re-assert the full current set of realtime push targets in one
    /// batched request; skipped entirely when no realtime subscriptions
    /// exist. Push subscriptions on the endpoint are not persistent, so
    /// this runs on a short timer.
    pub fn renew_realtime_requests(&self) {
        let mut targets = SensorSelection::new();
        {
            let state = self.state.lock();
            for (device, sensors) in &state.slots {
                for (sensor, resolutions) in sensors {
                    let realtime = resolutions
                        .values()
                        .flatten()
                        .any(|entry| entry.subscription.is_realtime());
                    if realtime {
                        targets
                            .entry(device.clone())
                            .or_default()
                            .insert(sensor.clone());
                    }
                }
            }
        }
        if !targets.is_empty() {
            self.transport.request_realtime_updates(targets);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Sensors grouped by unit, rebuilt after every metadata batch.
    #[must_use]
    pub fn sensors_by_unit(&self) -> BTreeMap<String, Vec<SensorSpecifier>> {
        self.state.lock().units.clone()
    }

    /// Display name of a device, if known.
    #[must_use]
    pub fn device_name(&self, device: &str) -> Option<String> {
        self.state.lock().devices.device(device)?.name.clone()
    }

    /// Metadata of a sensor, if known.
    #[must_use]
    pub fn sensor_metadata(&self, device: &str, sensor: &str) -> Option<SensorRecord> {
        self.state.lock().devices.sensor(device, sensor).cloned()
    }

    /// Current registry statistics.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let state = self.state.lock();
        let mut stats = DispatcherStats {
            devices: state.devices.device_count(),
            sensors: state.devices.sensor_count(),
            ..DispatcherStats::default()
        };
        for sensors in state.slots.values() {
            for resolutions in sensors.values() {
                for entries in resolutions.values() {
                    for entry in entries {
                        if entry.subscription.is_realtime() {
                            stats.realtime_subscriptions += 1;
                        } else {
                            stats.history_subscriptions += 1;
                        }
                    }
                }
            }
        }
        stats
    }
}

/// Spawn the periodic history-poll and realtime-renewal timers. The caller
/// owns the returned task through the cancellation token it passed in.
pub fn spawn_pollers(
    dispatcher: Arc<Dispatcher>,
    history_every: Duration,
    realtime_every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut history = tokio::time::interval(history_every);
        history.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut realtime = tokio::time::interval(realtime_every);
        realtime.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = history.tick() => dispatcher.poll_history_data(),
                _ = realtime.tick() => dispatcher.renew_realtime_requests(),
            }
        }
    })
}
