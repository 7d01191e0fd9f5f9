//! Server Error Types

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the line server core
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("failed to bind listener to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A hostname bind address had no usable IPv4 address
    #[error("no IPv4 address found for host '{host}'")]
    Resolution { host: String },

    /// The configured text encoding label is not recognised
    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),

    /// A write did not complete within the configured timeout
    #[error("write to {key} timed out after {timeout:?}")]
    WriteTimeout { key: String, timeout: Duration },

    /// A write failed at the socket level
    #[error("write to {key} failed: {source}")]
    WriteFailure {
        key: String,
        #[source]
        source: io::Error,
    },

    /// No connection is registered under the given endpoint key
    #[error("no connection registered for {0}")]
    NotConnected(String),

    /// The server has already been disposed
    #[error("server has been disposed")]
    Disposed,

    /// The encoding cannot carry `\n`-delimited frames byte for byte
    #[error("text encoding '{0}' cannot frame lines on a single newline byte")]
    UnframeableEncoding(String),

    /// Reading from a connection failed for a reason other than a clean close
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
}

/// Result alias for core server operations
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Outcome of a single-line read from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line with its delimiter removed
    Line(String),
    /// The read timeout elapsed without a complete line
    Idle,
    /// The peer closed its side of the connection
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ServerError::UnknownEncoding("klingon".to_string());
        assert_eq!(err.to_string(), "unknown text encoding 'klingon'");

        let err = ServerError::NotConnected("10.0.0.1:4000".to_string());
        assert!(err.to_string().contains("10.0.0.1:4000"));

        let err = ServerError::WriteTimeout {
            key: "127.0.0.1:5000".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "write to 127.0.0.1:5000 timed out after 10s");
    }
}
