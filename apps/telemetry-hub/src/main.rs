//! Telemetry Hub Binary
//!
//! Starts the sensor stream hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin telemetry-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TELEMETRY_HUB_WS_URL`: sensor stream WebSocket URL
//!
//! ## Optional
//! - `TELEMETRY_HUB_HEALTH_PORT`: health/metrics HTTP port (default: 8082)
//! - `TELEMETRY_HUB_HISTORY_POLL_SECS`: history poll interval (default: 60)
//! - `TELEMETRY_HUB_REALTIME_RENEW_SECS`: realtime renewal interval (default: 30)
//! - `TELEMETRY_HUB_GAP_TIMEOUT_SECS`: series gap timeout (default: 300)
//! - `TELEMETRY_HUB_WINDOW_START_SECS` / `TELEMETRY_HUB_WINDOW_END_SECS`:
//!   sliding retention window offsets (default: 3600 / 0)
//! - `OTEL_ENABLED`: enable OTLP export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: service name (default: telemetry-hub)
//! - `RUST_LOG`: log level (default: info)

use std::sync::Arc;
use std::time::Instant;

use telemetry_hub::infrastructure::metrics::{
    FrameKind, record_dispatch_duration, record_frame_received, record_reconnect,
    set_link_up, set_subscription_counts,
};
use telemetry_hub::infrastructure::telemetry;
use telemetry_hub::{
    Dispatcher, HealthServer, HealthServerState, HubConfig, LinkState, LinkStatus, ReconnectConfig,
    StreamClient, StreamClientConfig, StreamEvent, SystemClock, init_metrics, spawn_pollers,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("starting telemetry hub");

    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Stream client and its outbound handle
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(1_024);
    let stream_config = StreamClientConfig {
        url: config.ws_url.clone(),
        reconnect: ReconnectConfig {
            initial_delay: config.websocket.reconnect_delay_initial,
            max_delay: config.websocket.reconnect_delay_max,
            multiplier: config.websocket.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: config.websocket.max_reconnect_attempts,
        },
    };
    let (stream_client, stream_handle) =
        StreamClient::new(stream_config, event_tx, shutdown_token.clone());

    // Registry over the stream transport
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(stream_handle),
        Arc::new(SystemClock),
    ));

    // Link state shared between the event loop and the health endpoint
    let link = Arc::new(LinkState::new());

    // Stream event loop
    let event_dispatcher = Arc::clone(&dispatcher);
    let event_link = Arc::clone(&link);
    tokio::spawn(async move {
        handle_stream_events(event_rx, event_dispatcher, event_link).await;
    });

    // Connection task
    tokio::spawn(async move {
        if let Err(e) = stream_client.run().await {
            tracing::error!(error = %e, "stream client error");
        }
    });

    // Periodic history poll and realtime renewal
    let _pollers = spawn_pollers(
        Arc::clone(&dispatcher),
        config.timers.history_poll_interval,
        config.timers.realtime_renew_interval,
        shutdown_token.clone(),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_owned(),
        Arc::clone(&link),
        Arc::clone(&dispatcher),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "health server error");
        }
    });

    tracing::info!("telemetry hub ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("telemetry hub stopped");
    Ok(())
}

/// Route stream events into the dispatcher and the link state.
async fn handle_stream_events(
    mut rx: mpsc::Receiver<StreamEvent>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<LinkState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Open => {
                link.set_status(LinkStatus::Connected);
                link.reset_reconnect_attempts();
                set_link_up(true);
                tracing::info!("sensor stream connected");
                dispatcher.handle_open();
            }
            StreamEvent::Closed => {
                link.set_status(LinkStatus::Disconnected);
                set_link_up(false);
                tracing::warn!("sensor stream disconnected");
                dispatcher.handle_close();
            }
            StreamEvent::Reconnecting { attempt } => {
                link.set_status(LinkStatus::Reconnecting);
                link.record_reconnect_attempt();
                record_reconnect();
                tracing::info!(attempt, "sensor stream reconnecting");
            }
            StreamEvent::Metadata(delta) => {
                link.record_message();
                record_frame_received(FrameKind::Metadata);
                let started = Instant::now();
                dispatcher.handle_metadata(&delta);
                record_dispatch_duration(FrameKind::Metadata, started.elapsed());
                publish_registry_gauges(&dispatcher);
            }
            StreamEvent::Update(batch) => {
                link.record_message();
                record_frame_received(FrameKind::Update);
                let started = Instant::now();
                dispatcher.handle_update(&batch);
                record_dispatch_duration(FrameKind::Update, started.elapsed());
                publish_registry_gauges(&dispatcher);
            }
            StreamEvent::ProtocolError(msg) => {
                tracing::error!(error = %msg, "sensor stream protocol error");
            }
        }
    }
}

fn publish_registry_gauges(dispatcher: &Dispatcher) {
    let stats = dispatcher.stats();
    set_subscription_counts(stats.history_subscriptions, stats.realtime_subscriptions);
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        ws_url = %config.ws_url,
        health_port = config.server.health_port,
        history_poll_secs = config.timers.history_poll_interval.as_secs(),
        realtime_renew_secs = config.timers.realtime_renew_interval.as_secs(),
        gap_timeout_secs = config.store.gap_timeout.as_secs(),
        "configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
