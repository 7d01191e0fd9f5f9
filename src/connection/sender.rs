//! Outbound Sender and Broadcast

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use super::{ConnectionRecord, ConnectionRegistry};
use crate::error::{ServerError, ServerResult};
use crate::metrics::Metrics;
use crate::protocol::LineCodec;

/// Per-connection result of a broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Keys that received the full frame
    pub delivered: Vec<String>,
    /// Keys whose write failed, with the reason
    pub failed: Vec<(String, ServerError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Frames outbound messages and writes them to connections
pub struct Sender {
    codec: LineCodec,
    write_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Sender {
    pub fn new(codec: LineCodec, write_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            codec,
            write_timeout,
            metrics,
        }
    }

    /// Send `message` plus one delimiter to a single connection
    pub async fn send<W>(&self, record: &ConnectionRecord<W>, message: &str) -> ServerResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let frame = self.codec.frame(message);
        self.write(record, &frame).await?;
        debug!(key = %record.key(), message = %message, "Sent line");
        Ok(())
    }

    /// Send `message` to every connection registered at call time
    ///
    /// Best effort: a failed write is recorded in the report and the
    /// remaining connections are still attempted.
    pub async fn send_all<W>(
        &self,
        registry: &ConnectionRegistry<W>,
        message: &str,
    ) -> BroadcastReport
    where
        W: AsyncWrite + Unpin + Send,
    {
        let frame = self.codec.frame(message);
        let mut report = BroadcastReport::default();

        for record in registry.snapshot().await {
            match self.write(&record, &frame).await {
                Ok(()) => report.delivered.push(record.key().to_string()),
                Err(e) => {
                    warn!(key = %record.key(), "Broadcast write failed: {}", e);
                    report.failed.push((record.key().to_string(), e));
                }
            }
        }

        debug!(
            message = %message,
            attempted = report.attempted(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }

    async fn write<W>(&self, record: &ConnectionRecord<W>, frame: &[u8]) -> ServerResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match record.write_frame(frame, self.write_timeout).await {
            Ok(()) => {
                self.metrics.message_sent();
                Ok(())
            }
            Err(e) => {
                self.metrics.send_failed();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_util::sync::CancellationToken;

    fn record(peer: &str) -> (Arc<ConnectionRecord<DuplexStream>>, DuplexStream) {
        let (client, server_side) = tokio::io::duplex(64);
        let peer: SocketAddr = peer.parse().unwrap();
        (
            Arc::new(ConnectionRecord::new(peer, client, CancellationToken::new())),
            server_side,
        )
    }

    fn sender() -> Sender {
        Sender::new(LineCodec::default(), Duration::from_secs(1), Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut peer_a) = record("127.0.0.1:6001");
        let (b, mut peer_b) = record("127.0.0.1:6002");
        registry.insert(a).await;
        registry.insert(b).await;

        let report = sender().send_all(&registry, "ping").await;
        assert!(report.is_complete());
        assert_eq!(report.attempted(), 2);

        for peer in [&mut peer_a, &mut peer_b] {
            let mut buf = [0u8; 5];
            peer.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping\n");
        }
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failure() {
        let registry = ConnectionRegistry::new();
        let (closed, _closed_peer) = record("127.0.0.1:6001");
        let (open, mut open_peer) = record("127.0.0.1:6002");
        closed.close(Duration::from_secs(1)).await;
        registry.insert(closed).await;
        registry.insert(open).await;

        let sender = sender();
        let report = sender.send_all(&registry, "still here").await;
        assert_eq!(report.delivered, vec!["127.0.0.1:6002".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "127.0.0.1:6001");
        assert!(!report.is_complete());

        let mut buf = vec![0u8; "still here\n".len()];
        open_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"still here\n");
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry: ConnectionRegistry<DuplexStream> = ConnectionRegistry::new();
        let report = sender().send_all(&registry, "nobody").await;
        assert_eq!(report.attempted(), 0);
        assert!(report.is_complete());
    }
}
