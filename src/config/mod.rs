//! Configuration: server settings from the environment and client store tunables.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Redis connection URL. When unset, channels fan out in-process only.
    pub redis_url: Option<String>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
    /// Interval between SSE keep-alive comments.
    pub sse_keepalive: Duration,
    /// Per-channel broadcast buffer; slower receivers skip ahead.
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            redis_url: None,
            log_level: "info".to_string(),
            sse_keepalive: Duration::from_secs(15),
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let defaults = Self::default();

        let server_addr = match std::env::var("SERVER_ADDR") {
            Ok(v) => v.parse().map_err(|_| ConfigLoadError::InvalidServerAddr)?,
            Err(_) => defaults.server_addr,
        };
        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);
        let sse_keepalive = match std::env::var("SSE_KEEPALIVE_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .map_err(|_| ConfigLoadError::InvalidNumber("SSE_KEEPALIVE_SECS"))?,
            ),
            Err(_) => defaults.sse_keepalive,
        };
        let channel_capacity = match std::env::var("SSE_CHANNEL_CAPACITY") {
            Ok(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigLoadError::InvalidNumber("SSE_CHANNEL_CAPACITY")),
            },
            Err(_) => defaults.channel_capacity,
        };

        Ok(Self {
            server_addr,
            redis_url,
            log_level,
            sse_keepalive,
            channel_capacity,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid {0}: expected a positive integer")]
    InvalidNumber(&'static str),
}

/// Tunables for [`EventRelayStore`](crate::client::EventRelayStore).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Origin used to resolve relative connect URLs.
    pub base_url: String,
    /// Grace period between the last handler leaving and the connection closing.
    pub disconnect_delay: Duration,
    /// Handlers kept per subject; the oldest is evicted beyond this.
    pub max_handlers_per_subject: usize,
    /// Connection-state observers kept; the oldest is evicted beyond this.
    pub max_connection_state_handlers: usize,
    /// Delay before the SSE transport reopens a dropped stream, unless the
    /// server sent a `retry:` field.
    pub reconnect_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            disconnect_delay: Duration::from_millis(1000),
            max_handlers_per_subject: 3,
            max_connection_state_handlers: 5,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl RelayConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }
}
