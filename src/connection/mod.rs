//! Connection Management Module
//!
//! Per-connection state, the shared registry, the framing reader loop and
//! the outbound sender.

pub mod reader;
pub mod record;
pub mod registry;
pub mod sender;

pub use reader::{run_reader, LineReader, ReaderContext};
pub use record::{endpoint_key, ConnectionInfo, ConnectionRecord};
pub use registry::ConnectionRegistry;
pub use sender::{BroadcastReport, Sender};
