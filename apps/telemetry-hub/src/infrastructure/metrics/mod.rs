//! Prometheus Metrics Module
//!
//! Application metrics in Prometheus format, rendered at `/metrics` on the
//! health port.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound metadata/update frames from the stream
//! - **Connection**: link state and reconnect attempts
//! - **Subscriptions**: active registry subscriptions by mode
//! - **Latency**: batch dispatch duration

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");
            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "telemetry_hub_frames_received_total",
        "Inbound frames from the sensor stream by kind"
    );
    describe_counter!(
        "telemetry_hub_reconnects_total",
        "Stream reconnection attempts"
    );
    describe_gauge!(
        "telemetry_hub_link_up",
        "Whether the sensor stream link is connected (0/1)"
    );
    describe_gauge!(
        "telemetry_hub_subscriptions",
        "Active registry subscriptions by mode"
    );
    describe_histogram!(
        "telemetry_hub_dispatch_seconds",
        "Time to dispatch one inbound batch to subscribers"
    );
}

/// Inbound frame kinds, used as metric labels.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Metadata delta batch.
    Metadata,
    /// Value batch.
    Update,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Update => "update",
        }
    }
}

/// Record one inbound frame.
pub fn record_frame_received(kind: FrameKind) {
    counter!(
        "telemetry_hub_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record one reconnection attempt.
pub fn record_reconnect() {
    counter!("telemetry_hub_reconnects_total").increment(1);
}

/// Update the link state gauge.
pub fn set_link_up(up: bool) {
    gauge!("telemetry_hub_link_up").set(if up { 1.0 } else { 0.0 });
}

/// Update the subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscription_counts(history: usize, realtime: usize) {
    gauge!("telemetry_hub_subscriptions", "mode" => "history").set(history as f64);
    gauge!("telemetry_hub_subscriptions", "mode" => "realtime").set(realtime as f64);
}

/// Record how long one inbound batch took to dispatch.
pub fn record_dispatch_duration(kind: FrameKind, duration: Duration) {
    histogram!(
        "telemetry_hub_dispatch_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}
