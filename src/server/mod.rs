//! Line Server
//!
//! Owns the listening socket, the connection registry and the inbound queue,
//! and ties their lifecycles together.

mod acceptor;
pub mod listener;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{BroadcastReport, ConnectionInfo, ConnectionRegistry, ReaderContext, Sender};
use crate::error::{ServerError, ServerResult};
use crate::metrics::Metrics;
use crate::protocol::{LineCodec, TextEncoding};
use crate::queue::InboundQueue;
use acceptor::{Acceptor, AcceptorHandle};

pub use listener::{resolve_bind_target, BindTarget};

/// Concurrent newline-delimited TCP server
///
/// All operations take `&self`; share the server behind an `Arc` between
/// the poller, the broadcaster and whoever disposes it.
pub struct LineServer {
    config: ServerConfig,
    encoding: TextEncoding,
    registry: Arc<ConnectionRegistry>,
    queue: Arc<InboundQueue>,
    sender: Sender,
    metrics: Arc<Metrics>,
    /// Parent of the accept loop and every connection token
    root: CancellationToken,
    acceptor: Mutex<Option<AcceptorHandle>>,
    local_addr: StdMutex<Option<SocketAddr>>,
    disposed: AtomicBool,
}

impl LineServer {
    /// Create a server; nothing is bound until [`LineServer::start`]
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::with_metrics(config, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(config: ServerConfig, metrics: Arc<Metrics>) -> ServerResult<Self> {
        let encoding = TextEncoding::for_label(&config.encoding)?;
        let sender = Sender::new(
            LineCodec::new(encoding),
            config.write_timeout,
            Arc::clone(&metrics),
        );

        Ok(Self {
            encoding,
            registry: Arc::new(ConnectionRegistry::new()),
            queue: Arc::new(InboundQueue::new()),
            sender,
            metrics,
            root: CancellationToken::new(),
            acceptor: Mutex::new(None),
            local_addr: StdMutex::new(None),
            disposed: AtomicBool::new(false),
            config,
        })
    }

    /// Bind the configured address and port and start accepting
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        let address = self.config.bind_address.clone();
        self.rebind(&address, self.config.port).await
    }

    /// Stop the current accept loop (if any) and listen on a new address
    ///
    /// Connections accepted by the previous listener stay registered.
    pub async fn rebind(&self, address: &str, port: u16) -> ServerResult<SocketAddr> {
        self.ensure_live()?;

        let mut acceptor = self.acceptor.lock().await;
        if let Some(previous) = acceptor.take() {
            info!(addr = %previous.local_addr, "Stopping previous listener before rebind");
            self.set_local_addr(None);
            previous.stop(self.config.rebind_timeout).await;
        }

        // Disposal may have started while we waited for the lock
        self.ensure_live()?;

        let target = resolve_bind_target(address, port).await?;
        let listener = listener::bind(target)?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: match target {
                BindTarget::Addr(addr) => addr,
                BindTarget::DualStack(port) => SocketAddr::from(([0u16; 8], port)),
            },
            source,
        })?;

        let handle = Acceptor {
            listener,
            cancel: self.root.child_token(),
            connections: self.root.clone(),
            registry: Arc::clone(&self.registry),
            reader_ctx: ReaderContext {
                queue: self.queue.sender(),
                registry: Arc::clone(&self.registry),
                metrics: Arc::clone(&self.metrics),
                read_timeout: self.config.read_timeout,
            },
            encoding: self.encoding,
            chunk_size: self.config.chunk_size,
            join_timeout: self.config.join_timeout,
            metrics: Arc::clone(&self.metrics),
        }
        .spawn()
        .map_err(|source| ServerError::Bind { addr: local_addr, source })?;

        *acceptor = Some(handle);
        self.set_local_addr(Some(local_addr));
        info!("Line server listening on {} ({})", local_addr, self.encoding.name());
        Ok(local_addr)
    }

    /// Address of the active listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = addr;
    }

    /// Poll for one received line
    ///
    /// Returns `None` at once when nothing is queued; otherwise waits at most
    /// `poll_timeout` for the line.
    pub async fn read(&self) -> Option<String> {
        self.queue.read(self.config.poll_timeout).await
    }

    /// Wait up to `wait` for the next received line
    pub async fn read_timeout(&self, wait: Duration) -> Option<String> {
        self.queue.read_timeout(wait).await
    }

    /// Send one line to the connection registered under `key`
    pub async fn send(&self, key: &str, message: &str) -> ServerResult<()> {
        self.ensure_live()?;
        let record = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| ServerError::NotConnected(key.to_string()))?;
        self.sender.send(&record, message).await
    }

    /// Send one line to every registered connection, best effort
    pub async fn send_all(&self, message: &str) -> ServerResult<BroadcastReport> {
        self.ensure_live()?;
        Ok(self.sender.send_all(&self.registry, message).await)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.info().await
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn queue(&self) -> Arc<InboundQueue> {
        Arc::clone(&self.queue)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> ServerResult<()> {
        if self.is_disposed() {
            Err(ServerError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Shut everything down
    ///
    /// Cancels the accept loop and every reader, waits for them to exit,
    /// then closes every socket and the inbound queue. Safe to call more than
    /// once; later calls return immediately.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            debug!("Line server already disposed");
            return;
        }
        info!("Disposing line server");

        self.root.cancel();

        if let Some(acceptor) = self.acceptor.lock().await.take() {
            acceptor.stop(self.config.join_timeout).await;
        }
        self.set_local_addr(None);

        let records = self.registry.drain().await;
        let count = records.len();
        let mut closing = JoinSet::new();
        for record in records {
            let join_timeout = self.config.join_timeout;
            closing.spawn(async move { record.close(join_timeout).await });
        }
        while let Some(result) = closing.join_next().await {
            if let Err(e) = result {
                warn!("Connection close task failed: {}", e);
            }
        }
        self.metrics.set_active_connections(0);

        self.queue.close();
        info!(connections = count, "Line server disposed");
    }
}

impl Drop for LineServer {
    fn drop(&mut self) {
        if !self.is_disposed() {
            // Loops exit on their own and release their sockets
            self.root.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_rejects_unknown_encoding() {
        let config = ServerConfig {
            encoding: "no-such-charset".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(LineServer::new(config), Err(ServerError::UnknownEncoding(_))));
    }

    #[tokio::test]
    async fn test_start_reports_local_addr() {
        let server = LineServer::new(loopback_config()).unwrap();
        assert!(server.local_addr().is_none());

        let addr = server.start().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));

        server.dispose().await;
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_operations_after_dispose() {
        let server = LineServer::new(loopback_config()).unwrap();
        server.start().await.unwrap();
        server.dispose().await;
        server.dispose().await;

        assert!(server.is_disposed());
        assert!(matches!(server.start().await, Err(ServerError::Disposed)));
        assert!(matches!(server.send_all("x").await, Err(ServerError::Disposed)));
        assert!(matches!(server.send("k", "x").await, Err(ServerError::Disposed)));
        assert!(server.queue().is_closed());
    }

    #[tokio::test]
    async fn test_send_to_unknown_key() {
        let server = LineServer::new(loopback_config()).unwrap();
        server.start().await.unwrap();
        let err = server.send("127.0.0.1:1", "hi").await.unwrap_err();
        assert!(matches!(err, ServerError::NotConnected(_)));
        server.dispose().await;
    }
}
