#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Telemetry Hub - Sensor Stream Dispatcher
//!
//! Ingests a live, gap-prone stream of timestamped sensor readings together
//! with asynchronous device/sensor metadata changes, and serves many
//! independent in-process widget views that each want a time-filtered slice
//! of a subset of sensors at a chosen resolution.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure dispatch and series logic
//!   - `clock`: injectable millisecond time source
//!   - `resolution`: the closed raw…year resolution set
//!   - `subscription`: interval / sliding-window / realtime windows
//!   - `metadata`: device → sensor tree with delta application
//!   - `timeseries`: gap-aware per-sensor series storage
//!
//! - **Application**: dispatch services and port definitions
//!   - `ports`: Transport (outbound) and Subscriber (widget-facing) contracts
//!   - `dispatcher`: subscription registry, fan-out, request coalescing
//!   - `view`: ready-made widget subscriber owning a series store
//!
//! - **Infrastructure**: adapters and service plumbing
//!   - `transport`: WebSocket client, JSON codec, reconnect backoff
//!   - `config`: environment-driven settings
//!   - `health`: health/readiness/metrics HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing/OTLP setup
//!
//! # Data Flow
//!
//! ```text
//! Sensor WS ──► StreamClient ──► events ──► Dispatcher ──► Subscriber 1 ─► store
//!                    ▲                          │     ╲──► Subscriber 2 ─► store
//!                    └──── coalesced requests ──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - pure dispatch and series types.
pub mod domain;

/// Application layer - dispatch services and ports.
pub mod application;

/// Infrastructure layer - adapters and service plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::clock::{Clock, ManualClock, SystemClock, TimestampMs};
pub use domain::metadata::{
    DeviceDelta, DeviceId, DeviceRecord, MetadataChanges, MetadataDelta, MetadataTree, SensorDelta,
    SensorId, SensorRecord, SensorSpecifier,
};
pub use domain::resolution::Resolution;
pub use domain::subscription::{Subscription, SubscriptionError, SubscriptionMode};
pub use domain::timeseries::{
    COLOR_PALETTE, DataPoint, RetentionWindow, SeriesError, TimeSeriesStore,
};

// Application surface
pub use application::dispatcher::{DispatchError, Dispatcher, DispatcherStats, spawn_pollers};
pub use application::ports::{
    SensorSelection, Subscriber, SubscriberRef, Transport, ValueBatch, ValuesRequest,
};
pub use application::view::{SeriesSnapshot, WidgetView};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, HubConfig, ServerSettings, StoreSettings, TimerSettings, WebSocketSettings,
};

// Health server
pub use infrastructure::health::{
    HealthServer, HealthServerError, HealthServerState, LinkState, LinkStatus,
};

// Stream transport
pub use infrastructure::transport::{
    ClientFrame, CodecError, JsonCodec, ReconnectConfig, ReconnectPolicy, ServerFrame,
    StreamClient, StreamClientConfig, StreamClientError, StreamEvent, StreamHandle,
};

// Metrics
pub use infrastructure::metrics::{FrameKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
