//! Metrics HTTP Server
//!
//! Provides HTTP endpoints for Prometheus scraping and connection listing

use crate::connection::ConnectionRegistry;
use crate::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, error, debug};

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    registry: Arc<ConnectionRegistry>,
    bind_addr: SocketAddr,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(
        metrics: Arc<Metrics>,
        registry: Arc<ConnectionRegistry>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            metrics,
            registry,
            bind_addr,
        }
    }

    /// Bind and serve until the task is aborted
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(bind_addr = %self.bind_addr, "Metrics server started");
        self.serve(listener).await
    }

    /// Serve requests on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(client_addr = %addr, "Metrics request received");

                    let metrics = self.metrics.clone();
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_request(&mut stream, metrics, registry).await {
                            error!(
                                error = %e,
                                client_addr = %addr,
                                "Failed to handle metrics request"
                            );
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> anyhow::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Handle a single HTTP request
async fn handle_request(
    stream: &mut TcpStream,
    metrics: Arc<Metrics>,
    registry: Arc<ConnectionRegistry>,
) -> anyhow::Result<()> {
    // Only the request line matters
    let mut buffer = [0; 1024];
    let bytes_read = stream.read(&mut buffer).await?;

    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    debug!(request = %request, "Received HTTP request");

    if request.starts_with("GET /metrics") {
        let body = metrics.export_prometheus();
        write_response(stream, "200 OK", "text/plain; version=0.0.4; charset=utf-8", &body).await?;
    } else if request.starts_with("GET /health") {
        write_response(stream, "200 OK", "text/plain", "OK").await?;
    } else if request.starts_with("GET /connections") {
        let body = serde_json::to_string(&registry.info().await)?;
        write_response(stream, "200 OK", "application/json", &body).await?;
    } else {
        write_response(stream, "404 Not Found", "text/plain", "Not Found").await?;
    }

    Ok(())
}
