//! Connection Reader
//!
//! Reads fixed-size chunks from one peer, reassembles `\n`-terminated frames
//! and pushes each decoded line onto the inbound queue.

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::Decoder;
use tracing::{debug, info, instrument, trace, warn};

use super::{ConnectionRecord, ConnectionRegistry};
use crate::error::{ReadOutcome, ServerResult};
use crate::metrics::Metrics;
use crate::protocol::{LineCodec, TextEncoding};
use crate::queue::{QueueClosed, QueueSender};

/// Single-line reader over any byte stream
pub struct LineReader<R = OwnedReadHalf> {
    inner: R,
    codec: LineCodec,
    buffer: BytesMut,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, encoding: TextEncoding, chunk_size: usize) -> Self {
        Self {
            inner,
            codec: LineCodec::new(encoding),
            buffer: BytesMut::with_capacity(chunk_size),
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Bytes received but not yet terminated by a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next complete line
    ///
    /// Lines already buffered from an earlier chunk are returned without
    /// touching the socket. Returns `Idle` if no chunk arrives within
    /// `timeout` (a partial frame stays buffered) and `Disconnected` on a
    /// zero-length read. Cancel-safe: bytes are only buffered after a read
    /// completes.
    pub async fn read_line(&mut self, timeout: Duration) -> ServerResult<ReadOutcome> {
        loop {
            if let Some(line) = self.codec.decode(&mut self.buffer)? {
                return Ok(ReadOutcome::Line(line));
            }

            let read = tokio::time::timeout(timeout, self.inner.read(&mut self.chunk)).await;
            let n = match read {
                Ok(result) => result?,
                Err(_) => return Ok(ReadOutcome::Idle),
            };

            if n == 0 {
                self.codec.decode_eof(&mut self.buffer)?;
                return Ok(ReadOutcome::Disconnected);
            }

            trace!(bytes = n, "Received chunk");
            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }
}

/// Shared state every reader task needs
#[derive(Clone)]
pub struct ReaderContext {
    pub queue: QueueSender,
    pub registry: Arc<ConnectionRegistry<OwnedWriteHalf>>,
    pub metrics: Arc<Metrics>,
    pub read_timeout: Duration,
}

/// Per-connection loop: runs until the peer disconnects, a read fails or the
/// record's cancellation token fires, then unregisters and closes the record.
#[instrument(skip_all, fields(key = %record.key(), id = %record.id()))]
pub async fn run_reader(
    record: Arc<ConnectionRecord<OwnedWriteHalf>>,
    mut reader: LineReader<OwnedReadHalf>,
    ctx: ReaderContext,
) {
    debug!("Reader loop started");
    let token = record.cancel_token().clone();

    loop {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Reader loop cancelled");
                break;
            }
            outcome = reader.read_line(ctx.read_timeout) => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Line(line)) => {
                debug!(line = %line, "Received line");
                ctx.metrics.message_received();
                if let Err(QueueClosed(line)) = ctx.queue.push(line) {
                    warn!(line = %line, "Inbound queue closed, dropping line");
                    ctx.metrics.message_dropped();
                }
            }
            Ok(ReadOutcome::Idle) => {
                trace!(pending = reader.pending(), "Read idle");
            }
            Ok(ReadOutcome::Disconnected) => {
                info!("Client disconnected");
                break;
            }
            Err(e) => {
                warn!("Read failed, closing connection: {}", e);
                break;
            }
        }
    }

    if ctx.registry.remove_if_current(record.key(), record.id()).await.is_some() {
        ctx.metrics.set_active_connections(ctx.registry.len().await);
    }
    record.finish().await;
    debug!("Reader loop stopped");
}
