//! Newline-Delimited Line Codec

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::debug;
use super::{TextEncoding, DELIMITER};

/// Splits a byte stream into `\n`-terminated text lines and writes lines back
/// with exactly one trailing delimiter.
///
/// There is no escaping: a delimiter byte inside an outbound message produces
/// two frames on the receiving side.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    encoding: TextEncoding,
    // Bytes before this index are known not to contain a delimiter
    next_index: usize,
}

impl LineCodec {
    pub fn new(encoding: TextEncoding) -> Self {
        Self { encoding, next_index: 0 }
    }

    /// Encode one message into a standalone frame
    pub fn frame(&self, message: &str) -> BytesMut {
        let encoded = self.encoding.encode(message);
        let mut dst = BytesMut::with_capacity(encoded.len() + 1);
        dst.put_slice(&encoded);
        dst.put_u8(DELIMITER);
        dst
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|&b| b == DELIMITER) {
            Some(offset) => {
                let end = start + offset;
                let frame = src.split_to(end + 1);
                self.next_index = 0;
                Ok(Some(self.encoding.decode(&frame[..end])))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "Discarding unterminated fragment at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_line() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"hello\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"lo\nwor");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"wor");
    }

    #[test]
    fn test_decode_burst_preserves_order() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"a1\na2\n\na3\n"[..]);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a1", "a2", "", "a3"]);
    }

    #[test]
    fn test_only_one_delimiter_stripped() {
        // A carriage return is message content, not part of the delimiter
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"ping\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("ping\r".to_string()));
    }

    #[test]
    fn test_decode_eof_discards_fragment() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"done\ntrailing"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("done".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_appends_one_delimiter() {
        let codec = LineCodec::default();
        assert_eq!(&codec.frame("pong")[..], b"pong\n");
        assert_eq!(&codec.frame("")[..], b"\n");
    }

    #[test]
    fn test_non_utf8_encoding() {
        let sjis = TextEncoding::for_label("shift_jis").unwrap();
        let mut codec = LineCodec::new(sjis);
        let mut buf = codec.frame("こんにちは");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("こんにちは".to_string()));
    }
}
