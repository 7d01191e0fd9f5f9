//! Linecast Library
//!
//! Concurrent line-oriented TCP server.
//!
//! Accepts any number of client connections, frames their byte streams into
//! newline-delimited text messages, merges every received line into a single
//! inbound queue, and broadcasts outbound lines to all connected clients.

pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use connection::{BroadcastReport, ConnectionInfo, ConnectionRegistry};
pub use error::{ReadOutcome, ServerError, ServerResult};
pub use queue::InboundQueue;
pub use server::LineServer;
pub use shutdown::ShutdownCoordinator;

/// Common error type for configuration and binary plumbing
pub type Result<T> = anyhow::Result<T>;
