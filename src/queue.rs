//! Inbound Message Queue
//!
//! A single unbounded FIFO into which every connection's decoded lines are
//! merged. Producers are the per-connection reader tasks; the consumer polls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Returned when pushing to a queue that has been closed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inbound queue is closed")]
pub struct QueueClosed(pub String);

#[derive(Debug, Default)]
struct QueueState {
    len: AtomicUsize,
    closed: AtomicBool,
}

/// Producer handle handed to each connection reader
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<String>,
    state: Arc<QueueState>,
}

impl QueueSender {
    /// Append a line; hands the line back if the queue has been closed
    pub fn push(&self, line: String) -> Result<(), QueueClosed> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(QueueClosed(line));
        }
        // Count before sending so a consumer never observes len < 0
        self.state.len.fetch_add(1, Ordering::AcqRel);
        self.tx.send(line).map_err(|e| {
            self.state.len.fetch_sub(1, Ordering::AcqRel);
            QueueClosed(e.0)
        })
    }
}

/// Thread-safe FIFO of decoded inbound lines
#[derive(Debug)]
pub struct InboundQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    state: Arc<QueueState>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            state: Arc::new(QueueState::default()),
        }
    }

    /// Create a producer handle
    pub fn sender(&self) -> QueueSender {
        QueueSender {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Number of lines waiting to be read
    pub fn len(&self) -> usize {
        self.state.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Poll for the oldest line
    ///
    /// Returns `None` immediately when the queue is empty. Otherwise takes the
    /// oldest line, waiting at most `wait` for it to materialise.
    pub async fn read(&self, wait: Duration) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        self.read_timeout(wait).await
    }

    /// Timed take: waits up to `wait` for a line to arrive
    pub async fn read_timeout(&self, wait: Duration) -> Option<String> {
        let result = tokio::time::timeout(wait, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match result {
            Ok(Some(line)) => {
                self.state.len.fetch_sub(1, Ordering::AcqRel);
                Some(line)
            }
            Ok(None) => None,
            Err(_) => {
                debug!(?wait, "Timed out waiting for inbound line");
                None
            }
        }
    }

    /// Take a line if one is immediately available
    pub fn try_read(&self) -> Option<String> {
        let mut rx = self.rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(line) => {
                self.state.len.fetch_sub(1, Ordering::AcqRel);
                Some(line)
            }
            Err(_) => None,
        }
    }

    /// Stop accepting new lines; lines already queued can still be read
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            debug!(pending = self.len(), "Inbound queue closed");
        }
    }
}
