//! Line Protocol Implementation
//!
//! Newline-delimited text framing over a plain TCP stream.

pub mod codec;
pub mod constants;
pub mod encoding;

pub use codec::LineCodec;
pub use constants::*;
pub use encoding::TextEncoding;
