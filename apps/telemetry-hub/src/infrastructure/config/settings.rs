//! Hub Configuration Settings
//!
//! Configuration for the hub, loaded from environment variables. Only the
//! stream endpoint URL is required; everything else has sensible defaults.

use std::time::Duration;

use crate::domain::clock::TimestampMs;
use crate::domain::timeseries::RetentionWindow;

/// HTTP server ports.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (also serves `/metrics`).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Periodic task intervals.
#[derive(Debug, Clone)]
pub struct TimerSettings {
    /// How often non-realtime subscriptions are re-requested.
    pub history_poll_interval: Duration,
    /// How often the realtime push set is re-asserted.
    pub realtime_renew_interval: Duration,
    /// How often widget stores clamp to their retention window.
    pub clamp_interval: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            history_poll_interval: Duration::from_secs(60),
            realtime_renew_interval: Duration::from_secs(30),
            clamp_interval: Duration::from_secs(10),
        }
    }
}

/// Defaults for widget time-series stores.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Inactivity span after which a gap marker is placed.
    pub gap_timeout: Duration,
    /// Sliding retention window start offset back from "now".
    pub window_start: Duration,
    /// Sliding retention window end offset back from "now".
    pub window_end: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            gap_timeout: Duration::from_secs(300),
            window_start: Duration::from_secs(3_600),
            window_end: Duration::ZERO,
        }
    }
}

impl StoreSettings {
    /// Gap timeout in series-timestamp units.
    #[must_use]
    pub fn gap_timeout_ms(&self) -> TimestampMs {
        duration_ms(self.gap_timeout)
    }

    /// The sliding retention window these settings describe.
    #[must_use]
    pub fn retention_window(&self) -> RetentionWindow {
        RetentionWindow::Sliding {
            start: duration_ms(self.window_start),
            end: duration_ms(self.window_end),
        }
    }
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Sensor stream WebSocket URL.
    pub ws_url: String,
    /// HTTP server ports.
    pub server: ServerSettings,
    /// Periodic task intervals.
    pub timers: TimerSettings,
    /// Widget store defaults.
    pub store: StoreSettings,
    /// Stream connection settings.
    pub websocket: WebSocketSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when `TELEMETRY_HUB_WS_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ws_url = std::env::var("TELEMETRY_HUB_WS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("TELEMETRY_HUB_WS_URL".to_owned()))?;
        if ws_url.is_empty() {
            return Err(ConfigError::EmptyValue("TELEMETRY_HUB_WS_URL".to_owned()));
        }

        let server = ServerSettings {
            health_port: parse_env_u16(
                "TELEMETRY_HUB_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let timers = TimerSettings {
            history_poll_interval: parse_env_duration_secs(
                "TELEMETRY_HUB_HISTORY_POLL_SECS",
                TimerSettings::default().history_poll_interval,
            ),
            realtime_renew_interval: parse_env_duration_secs(
                "TELEMETRY_HUB_REALTIME_RENEW_SECS",
                TimerSettings::default().realtime_renew_interval,
            ),
            clamp_interval: parse_env_duration_secs(
                "TELEMETRY_HUB_CLAMP_SECS",
                TimerSettings::default().clamp_interval,
            ),
        };

        let store = StoreSettings {
            gap_timeout: parse_env_duration_secs(
                "TELEMETRY_HUB_GAP_TIMEOUT_SECS",
                StoreSettings::default().gap_timeout,
            ),
            window_start: parse_env_duration_secs(
                "TELEMETRY_HUB_WINDOW_START_SECS",
                StoreSettings::default().window_start,
            ),
            window_end: parse_env_duration_secs(
                "TELEMETRY_HUB_WINDOW_END_SECS",
                StoreSettings::default().window_end,
            ),
        };

        let websocket = WebSocketSettings {
            reconnect_delay_initial: parse_env_duration_millis(
                "TELEMETRY_HUB_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "TELEMETRY_HUB_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "TELEMETRY_HUB_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "TELEMETRY_HUB_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        Ok(Self {
            ws_url,
            server,
            timers,
            store,
            websocket,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn duration_ms(duration: Duration) -> TimestampMs {
    TimestampMs::try_from(duration.as_millis()).unwrap_or(TimestampMs::MAX)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_settings_defaults() {
        assert_eq!(ServerSettings::default().health_port, 8082);
    }

    #[test]
    fn timer_settings_defaults() {
        let timers = TimerSettings::default();
        assert_eq!(timers.history_poll_interval, Duration::from_secs(60));
        assert_eq!(timers.realtime_renew_interval, Duration::from_secs(30));
        assert_eq!(timers.clamp_interval, Duration::from_secs(10));
    }

    #[test]
    fn store_settings_defaults() {
        let store = StoreSettings::default();
        assert_eq!(store.gap_timeout, Duration::from_secs(300));
        assert_eq!(store.gap_timeout_ms(), 300_000);
        assert_eq!(
            store.retention_window(),
            RetentionWindow::Sliding {
                start: 3_600_000,
                end: 0
            }
        );
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }
}
