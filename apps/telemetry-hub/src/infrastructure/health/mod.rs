//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, link status reporting, and Prometheus
//! metrics. Used by container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (checks the stream link)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::dispatcher::{Dispatcher, DispatcherStats};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Link State
// =============================================================================

/// Connection state of the upstream sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// No connection.
    Disconnected,
    /// Connected and receiving frames.
    Connected,
    /// Backing off before another attempt.
    Reconnecting,
}

/// Upstream link status and counters, updated by the stream event loop.
#[derive(Debug, Default)]
pub struct LinkState {
    status: AtomicU8,
    messages_received: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl LinkState {
    /// New disconnected link state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection status.
    pub fn set_status(&self, status: LinkStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        match self.status.load(Ordering::Acquire) {
            1 => LinkStatus::Connected,
            2 => LinkStatus::Reconnecting,
            _ => LinkStatus::Disconnected,
        }
    }

    /// Count one inbound frame.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound frames since startup.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Count one reconnection attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear the reconnect counter after a successful connection.
    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Reconnection attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream link up.
    Healthy,
    /// Stream link down.
    Unhealthy,
}

/// Stream link details.
#[derive(Debug, Clone, Serialize)]
pub struct LinkInfo {
    /// Connection state.
    pub state: LinkStatus,
    /// Whether the link is connected.
    pub connected: bool,
    /// Inbound frames since startup.
    pub messages_received: u64,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream link details.
    pub link: LinkInfo,
    /// Registry statistics.
    pub registry: DispatcherStats,
}

// =============================================================================
// Health Server
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    link: Arc<LinkState>,
    dispatcher: Arc<Dispatcher>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, link: Arc<LinkState>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            link,
            dispatcher,
        }
    }
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.link.status() == LinkStatus::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_owned(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let link_status = state.link.status();
    let connected = link_status == LinkStatus::Connected;
    HealthResponse {
        status: if connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        link: LinkInfo {
            state: link_status,
            connected,
            messages_received: state.link.messages_received(),
            reconnect_attempts: state.link.reconnect_attempts(),
        },
        registry: state.dispatcher.stats(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_starts_disconnected() {
        let link = LinkState::new();
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(link.messages_received(), 0);
        assert_eq!(link.reconnect_attempts(), 0);
    }

    #[test]
    fn link_state_round_trips_statuses() {
        let link = LinkState::new();
        for status in [
            LinkStatus::Connected,
            LinkStatus::Reconnecting,
            LinkStatus::Disconnected,
        ] {
            link.set_status(status);
            assert_eq!(link.status(), status);
        }
    }

    #[test]
    fn link_state_counts_and_resets() {
        let link = LinkState::new();
        link.record_message();
        link.record_message();
        link.record_reconnect_attempt();
        assert_eq!(link.messages_received(), 2);
        assert_eq!(link.reconnect_attempts(), 1);
        link.reset_reconnect_attempts();
        assert_eq!(link.reconnect_attempts(), 0);
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&LinkStatus::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
