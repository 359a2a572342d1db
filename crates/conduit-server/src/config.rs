//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CONDUIT_HOST, CONDUIT_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use conduit_transport::{DuplexConfig, LongPollConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Long-polling configuration.
    #[serde(default)]
    pub longpoll: LongPollSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Enable the WebSocket transport.
    #[serde(default = "default_true")]
    pub websocket: bool,

    /// Enable the long-polling transport.
    #[serde(default = "default_true")]
    pub longpoll: bool,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Base path for the long-polling endpoints.
    #[serde(default = "default_longpoll_path")]
    pub longpoll_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound frames buffered per connection before dropping.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Close duplex connections silent for this long, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Long-polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongPollSettings {
    /// Close sessions not polled for this long, in milliseconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// How often to look for expired sessions, in milliseconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("CONDUIT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CONDUIT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_longpoll_path() -> String {
    "/longpoll".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_buffer() -> usize {
    1024
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_session_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_reap_interval() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            longpoll: LongPollSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket: true,
            longpoll: true,
            websocket_path: default_ws_path(),
            longpoll_path: default_longpoll_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for LongPollSettings {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "conduit.toml",
            "/etc/conduit/conduit.toml",
            "~/.config/conduit/conduit.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Settings for the duplex adapter.
    #[must_use]
    pub fn duplex(&self) -> DuplexConfig {
        DuplexConfig {
            idle_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            outbound_capacity: self.limits.outbound_buffer,
        }
    }

    /// Settings for the long-polling adapter.
    #[must_use]
    pub fn longpoll(&self) -> LongPollConfig {
        LongPollConfig {
            session_timeout: Duration::from_millis(self.longpoll.session_timeout_ms),
            outbound_capacity: self.limits.outbound_buffer,
        }
    }
}
