//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM/SIGINT, fans the signal out to background tasks and
//! disposes the line server within a bounded time.

use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::signal;
use tracing::{info, warn, error, debug};
use crate::server::LineServer;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal without waiting for an OS signal
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No shutdown subscribers: {}", e);
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, or for `trigger` from elsewhere
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");
        let mut triggered = self.subscribe();

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = triggered.recv() => {
                    info!("Shutdown requested, initiating graceful shutdown");
                    return Ok(());
                }
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
                _ = triggered.recv() => {
                    info!("Shutdown requested, initiating graceful shutdown");
                    return Ok(());
                }
            }
        }

        // Send shutdown signal to all components
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Dispose the server, giving up after the coordinator's timeout
    pub async fn shutdown_server(&self, server: &LineServer) -> Result<()> {
        info!("Initiating graceful shutdown of line server");
        let start_time = Instant::now();
        let connections = server.connection_count().await;

        match tokio::time::timeout(self.timeout, server.dispose()).await {
            Ok(()) => {
                info!("Closed {} connections in {:?}", connections, start_time.elapsed());
            }
            Err(_) => {
                warn!("Shutdown timeout reached after {:?} with disposal still running",
                      start_time.elapsed());
            }
        }

        Ok(())
    }
}

/// Shutdown-aware task handle that can be gracefully cancelled
pub struct ShutdownAwareTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownAwareTask {
    /// Create a new shutdown-aware task
    pub fn spawn<F, Fut>(
        shutdown_coordinator: &ShutdownCoordinator,
        task_name: &str,
        task_fn: F,
    ) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown_rx = shutdown_coordinator.subscribe();
        let task_name = task_name.to_string();

        let handle = tokio::spawn(async move {
            debug!("Starting shutdown-aware task: {}", task_name);
            task_fn(shutdown_rx).await;
            debug!("Shutdown-aware task completed: {}", task_name);
        });

        Self {
            handle,
            shutdown_rx: shutdown_coordinator.subscribe(),
        }
    }

    /// Wait for the task to complete or shutdown signal
    pub async fn wait_for_completion_or_shutdown(mut self) -> Result<()> {
        tokio::select! {
            result = &mut self.handle => {
                match result {
                    Ok(()) => {
                        debug!("Task completed successfully");
                        Ok(())
                    }
                    Err(e) if e.is_cancelled() => {
                        debug!("Task was cancelled");
                        Ok(())
                    }
                    Err(e) => {
                        error!("Task failed: {}", e);
                        Err(anyhow::anyhow!("Task failed: {}", e))
                    }
                }
            }
            _ = self.shutdown_rx.recv() => {
                debug!("Received shutdown signal, cancelling task");
                self.handle.abort();
                Ok(())
            }
        }
    }
}
