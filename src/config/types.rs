//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_ENCODING, DEFAULT_PORT};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Line server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Literal IP, hostname, or empty for the dual-stack wildcard
    pub bind_address: String,
    pub port: u16,
    /// WHATWG encoding label used for decoding and encoding lines
    pub encoding: String,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// How long a rebind waits for the previous accept loop to stop
    #[serde(with = "humantime_serde")]
    pub rebind_timeout: Duration,
    /// Bounded wait used by timed queue reads
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// How long disposal waits for each reader loop to exit
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
    pub chunk_size: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_addr: Option<SocketAddr>,
    /// Sleep between empty polls of the inbound queue in the console loop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            port: DEFAULT_PORT,
            encoding: DEFAULT_ENCODING.to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            rebind_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9090))),
            poll_interval: Duration::from_secs(1),
        }
    }
}
