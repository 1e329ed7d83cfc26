//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces plus the service-level
//! plumbing: configuration, health reporting, metrics, and tracing.

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint and link state tracking.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OTLP initialization.
pub mod telemetry;

/// WebSocket transport adapter for the sensor stream.
pub mod transport;
