//! Accept Loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{
    run_reader, ConnectionRecord, ConnectionRegistry, LineReader, ReaderContext,
};
use crate::metrics::Metrics;
use crate::protocol::TextEncoding;

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything the accept loop needs to admit a connection
pub(crate) struct Acceptor {
    pub listener: TcpListener,
    /// Stops this accept loop only
    pub cancel: CancellationToken,
    /// Parent of every connection token; outlives rebinds
    pub connections: CancellationToken,
    pub registry: Arc<ConnectionRegistry>,
    pub reader_ctx: ReaderContext,
    pub encoding: TextEncoding,
    pub chunk_size: usize,
    pub join_timeout: Duration,
    pub metrics: Arc<Metrics>,
}

/// A running accept loop
pub(crate) struct AcceptorHandle {
    pub local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AcceptorHandle {
    /// Cancel the loop and wait up to `timeout` for it to release the listener
    pub async fn stop(self, timeout: Duration) {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => debug!(addr = %self.local_addr, "Accept loop stopped"),
            Ok(Err(e)) => warn!(addr = %self.local_addr, "Accept loop ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    addr = %self.local_addr,
                    "Accept loop did not stop within {:?}, aborting", timeout
                );
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Acceptor {
    /// Spawn the accept loop
    pub fn spawn(self) -> std::io::Result<AcceptorHandle> {
        let local_addr = self.listener.local_addr()?;
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        Ok(AcceptorHandle {
            local_addr,
            cancel,
            task,
        })
    }

    async fn run(self) {
        let local_addr = self.listener.local_addr().ok();
        info!(addr = ?local_addr, "Starting connection acceptance loop");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Accept loop cancelled");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.admit(stream, peer).await,
                        Err(e) => {
                            // Transient (EMFILE, ECONNABORTED, ...): keep the listener alive
                            error!("Error accepting connection: {}", e);
                            tokio::select! {
                                _ = self.cancel.cancelled() => break,
                                _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                            }
                        }
                    }
                }
            }
        }

        info!(addr = ?local_addr, "Connection acceptance loop stopped");
    }

    async fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let record = Arc::new(ConnectionRecord::new(
            peer,
            write_half,
            self.connections.child_token(),
        ));
        info!(key = %record.key(), id = %record.id(), "Accepted connection");

        // Register before the reader starts so its exit can always unregister
        if let Some(displaced) = self.registry.insert(Arc::clone(&record)).await {
            warn!(
                key = %displaced.key(),
                id = %displaced.id(),
                "Endpoint key reused, closing previous connection"
            );
            let join_timeout = self.join_timeout;
            tokio::spawn(async move {
                displaced.close(join_timeout).await;
            });
        }
        self.metrics.connection_accepted();
        self.metrics.set_active_connections(self.registry.len().await);

        let reader = LineReader::new(read_half, self.encoding, self.chunk_size);
        let handle = tokio::spawn(run_reader(
            Arc::clone(&record),
            reader,
            self.reader_ctx.clone(),
        ));
        record.attach_reader(handle);
    }
}
