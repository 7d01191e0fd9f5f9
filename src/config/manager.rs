//! Configuration Manager

use super::Config;
use crate::protocol::TextEncoding;
use crate::Result;
use anyhow::{Context, bail};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_address) = std::env::var("LINECAST_BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("LINECAST_PORT") {
            config.server.port = port.parse::<u16>()
                .with_context(|| format!("Invalid LINECAST_PORT: {}", port))?;
        }

        if let Ok(encoding) = std::env::var("LINECAST_ENCODING") {
            config.server.encoding = encoding;
        }

        if let Ok(timeout) = std::env::var("LINECAST_READ_TIMEOUT") {
            config.server.read_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid LINECAST_READ_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("LINECAST_WRITE_TIMEOUT") {
            config.server.write_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid LINECAST_WRITE_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("LINECAST_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        let server = &self.server;

        TextEncoding::for_label(&server.encoding)?;

        if server.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        if server.chunk_size > 1048576 {
            bail!("chunk_size cannot exceed 1MB");
        }

        for (name, value) in [
            ("read_timeout", server.read_timeout),
            ("write_timeout", server.write_timeout),
            ("rebind_timeout", server.rebind_timeout),
            ("poll_timeout", server.poll_timeout),
            ("join_timeout", server.join_timeout),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than 0", name);
            }
            if value.as_secs() > 3600 {
                bail!("{} cannot exceed 1 hour", name);
            }
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        if self.monitoring.metrics_enabled && self.monitoring.metrics_addr.is_none() {
            bail!("monitoring.metrics_addr is required when metrics are enabled");
        }

        if self.monitoring.poll_interval.is_zero() {
            bail!("monitoring.poll_interval must be greater than 0");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        encoding: Option<&str>,
    ) {
        if let Some(bind) = bind {
            self.server.bind_address = bind.to_string();
            tracing::info!("CLI override: bind address set to '{}'", bind);
        }

        if let Some(port) = port {
            self.server.port = port;
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(encoding) = encoding {
            self.server.encoding = encoding.to_string();
            tracing::info!("CLI override: encoding set to {}", encoding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 2001);
        assert_eq!(config.server.encoding, "utf-8");
        assert!(config.server.bind_address.is_empty());
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.server.chunk_size, 256);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_address = "127.0.0.1"
port = 4100
write_timeout = "3s"

[monitoring]
log_level = "debug"
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.write_timeout, Duration::from_secs(3));
        // Untouched fields fall back to defaults
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.monitoring.log_level, "debug");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 2001);
    }

    #[test]
    fn test_rejects_unknown_encoding() {
        let mut config = Config::default();
        config.server.encoding = "not-an-encoding".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_encodings_that_cannot_frame_lines() {
        for encoding in ["utf-16le", "replacement"] {
            let mut config = Config::default();
            config.server.encoding = encoding.to_string();
            assert!(config.validate().is_err(), "{} should be rejected", encoding);
        }

        let mut config = Config::default();
        config.server.encoding = "euc-jp".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_timeouts_and_chunk() {
        let mut config = Config::default();
        config.server.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.read_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = Config::default();
        config.monitoring.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.merge_with_cli_args(Some("localhost"), Some(3000), Some("shift_jis"));
        assert_eq!(config.server.bind_address, "localhost");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.encoding, "shift_jis");
        assert!(config.validate().is_ok());
    }
}
