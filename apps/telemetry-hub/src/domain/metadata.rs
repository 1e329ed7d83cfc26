//! Device Metadata Tree
//!
//! Devices own sensors; both are created lazily the first time a metadata
//! delta mentions them, with fields left empty until later deltas fill them
//! in. [`MetadataTree::apply`] mutates the tree and reports exactly what
//! changed so the dispatcher can fan notifications out at most once per
//! subscriber.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique device identifier.
pub type DeviceId = String;

/// Sensor identifier, unique within its device.
pub type SensorId = String;

/// Identity of a sensor: the (device, sensor) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorSpecifier {
    /// Owning device.
    pub device: DeviceId,
    /// Sensor within the device.
    pub sensor: SensorId,
}

impl SensorSpecifier {
    /// Build a specifier from id parts.
    pub fn new(device: impl Into<DeviceId>, sensor: impl Into<SensorId>) -> Self {
        Self {
            device: device.into(),
            sensor: sensor.into(),
        }
    }
}

impl std::fmt::Display for SensorSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device, self.sensor)
    }
}

/// Sensor metadata; fields stay `None` until a delta fills them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorRecord {
    /// Human-readable sensor name.
    pub name: Option<String>,
    /// Unit of measurement, e.g. `"°C"`.
    pub unit: Option<String>,
    /// Physical port the sensor is attached to.
    pub port: Option<u32>,
}

/// Device metadata and its sensors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Human-readable device name.
    pub name: Option<String>,
    /// Sensors owned by this device.
    pub sensors: BTreeMap<SensorId, SensorRecord>,
}

/// Incoming per-sensor delta; absent fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorDelta {
    /// New sensor name, if mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New unit, if mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// New port, if mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

/// Incoming per-device delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDelta {
    /// New device name, if mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sensor creations and field updates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sensors: BTreeMap<SensorId, SensorDelta>,
    /// Sensors to delete; values are ignored.
    #[serde(
        default,
        rename = "deletedSensors",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub deleted_sensors: BTreeMap<SensorId, serde_json::Value>,
}

/// One metadata batch as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDelta {
    /// Per-device deltas, keyed by device id.
    #[serde(default)]
    pub devices: BTreeMap<DeviceId, DeviceDelta>,
}

/// What a delta changed, for notification fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataChanges {
    /// Devices whose name changed.
    pub renamed_devices: Vec<DeviceId>,
    /// Sensors with at least one changed field.
    pub changed_sensors: Vec<SensorSpecifier>,
    /// Sensors removed by deletion entries.
    pub removed_sensors: Vec<SensorSpecifier>,
}

impl MetadataChanges {
    /// Whether the delta changed anything observable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renamed_devices.is_empty()
            && self.changed_sensors.is_empty()
            && self.removed_sensors.is_empty()
    }
}

/// The device → sensor metadata mapping.
///
/// A sensor entry is never observable before its device entry exists; the
/// nesting guarantees it structurally.
#[derive(Debug, Default)]
pub struct MetadataTree {
    devices: BTreeMap<DeviceId, DeviceRecord>,
}

impl MetadataTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device has ever been mentioned in metadata.
    #[must_use]
    pub fn contains_device(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// Device record, if known.
    #[must_use]
    pub fn device(&self, device: &str) -> Option<&DeviceRecord> {
        self.devices.get(device)
    }

    /// Sensor record, if known.
    #[must_use]
    pub fn sensor(&self, device: &str, sensor: &str) -> Option<&SensorRecord> {
        self.devices.get(device)?.sensors.get(sensor)
    }

    /// Number of known devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of known sensors across all devices.
    #[must_use]
    pub fn sensor_count(&self) -> usize {
        self.devices.values().map(|d| d.sensors.len()).sum()
    }

    /// Drop everything; used on transport close.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Apply one delta batch, creating entries lazily, and report what
    /// changed. Deletion entries always report a removal, even for sensors
    /// the tree never saw: subscription slots can exist for such sensors and
    /// their owners still need the notification.
    pub fn apply(&mut self, delta: &MetadataDelta) -> MetadataChanges {
        let mut changes = MetadataChanges::default();

        for (device_id, device_delta) in &delta.devices {
            let record = self.devices.entry(device_id.clone()).or_default();

            if let Some(name) = &device_delta.name
                && record.name.as_ref() != Some(name)
            {
                record.name = Some(name.clone());
                changes.renamed_devices.push(device_id.clone());
            }

            for (sensor_id, sensor_delta) in &device_delta.sensors {
                let sensor = record.sensors.entry(sensor_id.clone()).or_default();
                if apply_sensor_delta(sensor, sensor_delta) {
                    changes
                        .changed_sensors
                        .push(SensorSpecifier::new(device_id.clone(), sensor_id.clone()));
                }
            }

            for sensor_id in device_delta.deleted_sensors.keys() {
                record.sensors.remove(sensor_id);
                changes
                    .removed_sensors
                    .push(SensorSpecifier::new(device_id.clone(), sensor_id.clone()));
            }
        }

        changes
    }

    /// Sensors grouped by unit, specifiers sorted; sensors without a known
    /// unit are left out.
    #[must_use]
    pub fn sensors_by_unit(&self) -> BTreeMap<String, Vec<SensorSpecifier>> {
        let mut groups: BTreeMap<String, Vec<SensorSpecifier>> = BTreeMap::new();
        for (device_id, device) in &self.devices {
            for (sensor_id, sensor) in &device.sensors {
                if let Some(unit) = &sensor.unit {
                    groups
                        .entry(unit.clone())
                        .or_default()
                        .push(SensorSpecifier::new(device_id.clone(), sensor_id.clone()));
                }
            }
        }
        groups
    }
}

/// Apply the mentioned fields; returns whether anything actually changed.
fn apply_sensor_delta(sensor: &mut SensorRecord, delta: &SensorDelta) -> bool {
    let mut changed = false;
    if let Some(name) = &delta.name
        && sensor.name.as_ref() != Some(name)
    {
        sensor.name = Some(name.clone());
        changed = true;
    }
    if let Some(unit) = &delta.unit
        && sensor.unit.as_ref() != Some(unit)
    {
        sensor.unit = Some(unit.clone());
        changed = true;
    }
    if let Some(port) = delta.port
        && sensor.port != Some(port)
    {
        sensor.port = Some(port);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_json(json: &str) -> MetadataDelta {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn entries_created_lazily_with_empty_fields() {
        let mut tree = MetadataTree::new();
        let changes = tree.apply(&delta_json(r#"{"devices":{"d1":{"sensors":{"s1":{}}}}}"#));

        assert!(tree.contains_device("d1"));
        let sensor = tree.sensor("d1", "s1").unwrap();
        assert_eq!(sensor.name, None);
        assert_eq!(sensor.unit, None);
        assert_eq!(sensor.port, None);
        // mention without fields is not a change
        assert!(changes.is_empty());
    }

    #[test]
    fn device_rename_reported_once() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(r#"{"devices":{"d1":{"name":"Boiler"}}}"#));

        let changes = tree.apply(&delta_json(r#"{"devices":{"d1":{"name":"Boiler 2"}}}"#));
        assert_eq!(changes.renamed_devices, vec!["d1".to_string()]);

        // same name again is not a change
        let changes = tree.apply(&delta_json(r#"{"devices":{"d1":{"name":"Boiler 2"}}}"#));
        assert!(changes.renamed_devices.is_empty());
    }

    #[test]
    fn sensor_field_changes_detected_shallowly() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(
            r#"{"devices":{"d1":{"sensors":{"s1":{"name":"Temp","unit":"°C","port":3}}}}}"#,
        ));

        // only the unit changes
        let changes = tree.apply(&delta_json(
            r#"{"devices":{"d1":{"sensors":{"s1":{"unit":"K"}}}}}"#,
        ));
        assert_eq!(changes.changed_sensors, vec![SensorSpecifier::new("d1", "s1")]);
        let sensor = tree.sensor("d1", "s1").unwrap();
        assert_eq!(sensor.unit.as_deref(), Some("K"));
        // unmentioned fields survive
        assert_eq!(sensor.name.as_deref(), Some("Temp"));
        assert_eq!(sensor.port, Some(3));
    }

    #[test]
    fn identical_fields_do_not_report_changes() {
        let mut tree = MetadataTree::new();
        let delta = delta_json(r#"{"devices":{"d1":{"sensors":{"s1":{"unit":"W"}}}}}"#);
        tree.apply(&delta);
        let changes = tree.apply(&delta);
        assert!(changes.changed_sensors.is_empty());
    }

    #[test]
    fn deletion_removes_sensor_and_reports_it() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(r#"{"devices":{"d1":{"sensors":{"s1":{}}}}}"#));

        let changes = tree.apply(&delta_json(
            r#"{"devices":{"d1":{"deletedSensors":{"s1":null}}}}"#,
        ));
        assert_eq!(changes.removed_sensors, vec![SensorSpecifier::new("d1", "s1")]);
        assert!(tree.sensor("d1", "s1").is_none());
        assert!(tree.contains_device("d1"));
    }

    #[test]
    fn deletion_of_unknown_sensor_still_reported() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(r#"{"devices":{"d1":{}}}"#));

        let changes = tree.apply(&delta_json(
            r#"{"devices":{"d1":{"deletedSensors":{"ghost":1}}}}"#,
        ));
        assert_eq!(
            changes.removed_sensors,
            vec![SensorSpecifier::new("d1", "ghost")]
        );
    }

    #[test]
    fn sensors_by_unit_groups_and_sorts() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(
            r#"{"devices":{
                "d2":{"sensors":{"s1":{"unit":"W"}}},
                "d1":{"sensors":{"s1":{"unit":"W"},"s2":{"unit":"°C"},"s3":{}}}
            }}"#,
        ));

        let groups = tree.sensors_by_unit();
        assert_eq!(
            groups.get("W").unwrap(),
            &vec![
                SensorSpecifier::new("d1", "s1"),
                SensorSpecifier::new("d2", "s1")
            ]
        );
        assert_eq!(
            groups.get("°C").unwrap(),
            &vec![SensorSpecifier::new("d1", "s2")]
        );
        // sensors without a unit are not grouped
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn clear_resets_the_tree() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(r#"{"devices":{"d1":{"sensors":{"s1":{}}}}}"#));
        tree.clear();
        assert_eq!(tree.device_count(), 0);
        assert!(!tree.contains_device("d1"));
    }

    #[test]
    fn counts_cover_all_devices() {
        let mut tree = MetadataTree::new();
        tree.apply(&delta_json(
            r#"{"devices":{"d1":{"sensors":{"a":{},"b":{}}},"d2":{"sensors":{"c":{}}}}}"#,
        ));
        assert_eq!(tree.device_count(), 2);
        assert_eq!(tree.sensor_count(), 3);
    }
}
