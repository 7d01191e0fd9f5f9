//! Line Protocol Constants

// Frame delimiter
pub const DELIMITER: u8 = b'\n';

// Size of each socket read
pub const DEFAULT_CHUNK_SIZE: usize = 256;

// Listener defaults
pub const DEFAULT_PORT: u16 = 2001;
pub const DEFAULT_ENCODING: &str = "utf-8";
