use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Runtime configuration for the realtime core.
///
/// The WebSocket and REST base URLs come from the deployment environment; the
/// remaining knobs default to the values the mobile and web clients ship with.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base WebSocket URL, e.g. `wss://realtime.roadaid.app/ws`
    pub ws_url: String,
    /// Base HTTP URL for the chat REST API, e.g. `https://api.roadaid.app`
    pub api_url: String,
    /// Interval between outgoing keepalive frames; missing inbound traffic for
    /// two intervals counts as a transport error
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before the connection gives up (0 = never)
    pub reconnect_max_attempts: u32,
    /// Page size for history fetches
    pub page_size: u32,
}

impl Config {
    pub fn new(ws_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_url: api_url.into(),
            heartbeat_interval: Duration::from_millis(10_000),
            reconnect_delay: Duration::from_millis(5_000),
            reconnect_max_attempts: 10,
            page_size: 20,
        }
    }

    pub fn from_env() -> Result<Self, crate::error::RealtimeError> {
        dotenv().ok();
        let ws_url = env::var("REALTIME_WS_URL")
            .map_err(|_| crate::error::RealtimeError::Config("REALTIME_WS_URL missing".into()))?;
        let api_url = env::var("REALTIME_API_URL")
            .map_err(|_| crate::error::RealtimeError::Config("REALTIME_API_URL missing".into()))?;

        let heartbeat_ms = env::var("REALTIME_HEARTBEAT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);
        let reconnect_delay_ms = env::var("REALTIME_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);
        let reconnect_max_attempts = env::var("REALTIME_RECONNECT_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let page_size = env::var("REALTIME_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        Ok(Self {
            ws_url,
            api_url,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            reconnect_max_attempts,
            page_size,
        })
    }
}
