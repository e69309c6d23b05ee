//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BRUME_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind all listeners to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listener configuration.
    #[serde(default)]
    pub listeners: ListenersConfig,

    /// HTTP API configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keepalive configuration.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenersConfig {
    /// Enable the WebSocket listener (browser dashboards).
    #[serde(default = "default_true")]
    pub websocket: bool,

    /// WebSocket listener port.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Enable the raw TCP listener (device sensors).
    #[serde(default = "default_true")]
    pub tcp: bool,

    /// TCP listener port.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Enable the HTTP API (health, stats, external publish).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API port.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Upper bound on a single delivery write; a subscriber slower than
    /// this is dropped.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Upper bound on the client-requested keepalive window in seconds.
    #[serde(default = "default_keepalive_max_secs")]
    pub max_secs: u16,

    /// How long a new connection may take to send its Connect frame.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Interval between keepalive expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
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
    std::env::var("BRUME_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_true() -> bool {
    true
}

fn default_ws_port() -> u16 {
    port_from_env("BRUME_WS_PORT", 8888)
}

fn default_tcp_port() -> u16 {
    port_from_env("BRUME_TCP_PORT", 1883)
}

fn default_http_port() -> u16 {
    port_from_env("BRUME_HTTP_PORT", 3001)
}

fn default_metrics_port() -> u16 {
    port_from_env("BRUME_METRICS_PORT", 9090)
}

fn port_from_env(var: &str, fallback: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(fallback)
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_keepalive_max_secs() -> u16 {
    7200
}

fn default_handshake_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_sweep_interval() -> u64 {
    1_000 // 1 second
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            listeners: ListenersConfig::default(),
            http: HttpConfig::default(),
            limits: LimitsConfig::default(),
            keepalive: KeepaliveConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            websocket: true,
            ws_port: default_ws_port(),
            tcp: true,
            tcp_port: default_tcp_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_http_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            max_secs: default_keepalive_max_secs(),
            handshake_timeout_ms: default_handshake_timeout(),
            sweep_interval_ms: default_sweep_interval(),
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
        // Try to load from default paths
        let config_paths = [
            "brume.toml",
            "/etc/brume/brume.toml",
            "~/.config/brume/brume.toml",
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

    /// Get the WebSocket listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid socket address.
    pub fn ws_addr(&self) -> Result<SocketAddr> {
        self.addr(self.listeners.ws_port)
    }

    /// Get the TCP listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid socket address.
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        self.addr(self.listeners.tcp_port)
    }

    /// Get the HTTP API address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid socket address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.addr(self.http.port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, port))
    }
}
