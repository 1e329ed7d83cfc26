//! Wire Frames
//!
//! JSON frames exchanged with the sensor stream endpoint. Frames are single
//! objects tagged by a `type` field; the payload shapes are the port-layer
//! types themselves, so the dispatcher and the wire never drift apart.

use serde::{Deserialize, Serialize};

use crate::application::ports::{SensorSelection, ValueBatch, ValuesRequest};
use crate::domain::metadata::MetadataDelta;

/// Frames sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Request the full metadata tree.
    GetMetadata,
    /// Request history values for a coalesced sensor window.
    GetValues(ValuesRequest),
    /// Assert the set of sensors that should push realtime updates.
    RequestRealtimeUpdates {
        /// Sensors per device.
        sensors: SensorSelection,
    },
}

/// Frames received from the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// A metadata delta batch.
    Metadata(MetadataDelta),
    /// A resolution-tagged value batch.
    Update(ValueBatch),
}
