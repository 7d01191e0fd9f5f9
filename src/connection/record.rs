//! Connection Record

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

/// Build the registry key for a peer: its canonical remote `ip:port`
///
/// IPv4 peers accepted on a dual-stack listener arrive as IPv4-mapped IPv6
/// addresses and are keyed by their IPv4 form.
pub fn endpoint_key(peer: &SocketAddr) -> String {
    SocketAddr::new(peer.ip().to_canonical(), peer.port()).to_string()
}

/// Snapshot of a registered connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub key: String,
    pub peer: SocketAddr,
    pub connected_at: SystemTime,
    pub connected_for_ms: u64,
}

/// State for one accepted socket
///
/// The read half is owned by the connection's reader task; the write half
/// lives here so broadcasts can reach the peer.
pub struct ConnectionRecord<W = OwnedWriteHalf> {
    id: Uuid,
    key: String,
    peer: SocketAddr,
    connected_at: SystemTime,
    started: Instant,
    writer: Mutex<W>,
    cancel: CancellationToken,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<W: AsyncWrite + Unpin + Send> ConnectionRecord<W> {
    pub fn new(peer: SocketAddr, writer: W, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: endpoint_key(&peer),
            peer,
            connected_at: SystemTime::now(),
            started: Instant::now(),
            writer: Mutex::new(writer),
            cancel,
            reader: StdMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Cancellation signal observed by this connection's reader loop
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            key: self.key.clone(),
            peer: self.peer,
            connected_at: self.connected_at,
            connected_for_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Remember the reader task so `close` can wait for it
    pub fn attach_reader(&self, handle: JoinHandle<()>) {
        let mut slot = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
    }

    /// Write an already-framed message, bounded by `timeout`
    pub async fn write_frame(&self, frame: &[u8], timeout: Duration) -> ServerResult<()> {
        if self.is_closed() {
            return Err(ServerError::NotConnected(self.key.clone()));
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame).await?;
            writer.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ServerError::WriteFailure {
                key: self.key.clone(),
                source,
            }),
            Err(_) => Err(ServerError::WriteTimeout {
                key: self.key.clone(),
                timeout,
            }),
        }
    }

    /// Close the connection: cancel the reader, wait up to `join_timeout` for
    /// it to exit, then shut the socket down.
    ///
    /// Returns `false` if the record was already closed.
    pub async fn close(&self, join_timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();

        let handle = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(join_timeout, &mut handle).await.is_err() {
                warn!(key = %self.key, "Reader did not stop within {:?}, aborting", join_timeout);
                handle.abort();
            }
        }

        self.shutdown_writer().await;
        debug!(key = %self.key, id = %self.id, "Connection closed");
        true
    }

    /// Close path used by the reader task itself once its loop has ended
    pub(crate) async fn finish(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        // Dropping our own handle detaches it; the task is already finishing
        drop(self.reader.lock().unwrap_or_else(|e| e.into_inner()).take());
        self.shutdown_writer().await;
        true
    }

    async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(key = %self.key, "Ignoring error while shutting down socket: {}", e);
        }
    }
}

impl<W> std::fmt::Debug for ConnectionRecord<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("peer", &self.peer)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_endpoint_key_uses_canonical_ip() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:5000".parse().unwrap();
        assert_eq!(endpoint_key(&mapped), "127.0.0.1:5000");

        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        assert_eq!(endpoint_key(&v6), "[::1]:5000");
    }

    #[tokio::test]
    async fn test_write_frame_and_close_once() {
        let (client, mut server_side) = tokio::io::duplex(64);
        let record = ConnectionRecord::new(peer(), client, CancellationToken::new());

        record.write_frame(b"ping\n", Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 5];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        assert!(record.close(Duration::from_secs(1)).await);
        assert!(record.cancel_token().is_cancelled());
        assert!(!record.close(Duration::from_secs(1)).await);

        // Peer sees end of stream after shutdown
        let mut rest = Vec::new();
        server_side.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let (client, _server_side) = tokio::io::duplex(64);
        let record = ConnectionRecord::new(peer(), client, CancellationToken::new());
        record.close(Duration::from_secs(1)).await;

        let err = record.write_frame(b"late\n", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ServerError::NotConnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_when_peer_stalls() {
        // A tiny pipe nobody drains fills up and blocks the writer
        let (client, _server_side) = tokio::io::duplex(4);
        let record = ConnectionRecord::new(peer(), client, CancellationToken::new());

        let err = record
            .write_frame(b"more than four bytes\n", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::WriteTimeout { .. }));
    }

    #[tokio::test]
    async fn test_close_waits_for_reader() {
        let (client, _server_side) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let record = ConnectionRecord::new(peer(), client, token.clone());

        let exited = std::sync::Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        record.attach_reader(tokio::spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));

        assert!(record.close(Duration::from_secs(1)).await);
        assert!(exited.load(Ordering::SeqCst));
    }
}
