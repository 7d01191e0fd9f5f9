//! Tests for loading configuration files and starting a server from them

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use linecast::config::ConfigManager;
use linecast::LineServer;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_example_config_is_valid() {
    let content = include_str!("../linecast.toml.example");
    let file = write_config(content);

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.server.port, 2001);
    assert!(config.server.bind_address.is_empty());
    assert_eq!(config.server.join_timeout, Duration::from_secs(5));
    assert!(!config.monitoring.metrics_enabled);
}

#[test]
fn test_invalid_encoding_is_rejected() {
    let file = write_config(
        r#"
[server]
encoding = "klingon"
"#,
    );
    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_zero_timeout_is_rejected() {
    let file = write_config(
        r#"
[server]
write_timeout = "0s"
"#,
    );
    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[tokio::test]
async fn test_server_from_loaded_config() {
    let file = write_config(
        r#"
[server]
bind_address = "127.0.0.1"
port = 0
encoding = "windows-1252"
read_timeout = "200ms"
"#,
    );
    let config = ConfigManager::load_from_file(file.path()).unwrap();

    let server = LineServer::new(config.server).unwrap();
    let addr = server.start().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    // Idle reads past the read timeout must not drop the connection
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.write_all(b"caf\xe9\n").await.unwrap();

    let line = server.read_timeout(Duration::from_secs(2)).await;
    assert_eq!(line.as_deref(), Some("café"));

    server.dispose().await;
}
