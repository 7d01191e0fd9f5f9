//! Text Encoding

use encoding_rs::Encoding;
use std::fmt;
use crate::error::{ServerError, ServerResult};

/// Text encoding applied to every line on the wire
///
/// Lines are framed on the single byte `\n` before decoding, so only
/// ASCII-compatible encodings (UTF-8, Shift_JIS, EUC-JP, windows-125x, ...)
/// are accepted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    inner: &'static Encoding,
}

impl TextEncoding {
    /// Look up an encoding by its WHATWG label (case-insensitive)
    ///
    /// Encodings that are not ASCII compatible (UTF-16, `replacement`,
    /// ISO-2022-JP) or that encode through a different output encoding are
    /// rejected: they cannot be framed on a single `\n` byte.
    pub fn for_label(label: &str) -> ServerResult<Self> {
        let inner = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ServerError::UnknownEncoding(label.to_string()))?;
        if !inner.is_ascii_compatible() || inner.output_encoding() != inner {
            return Err(ServerError::UnframeableEncoding(inner.name().to_string()));
        }
        Ok(Self { inner })
    }

    pub fn utf8() -> Self {
        Self { inner: encoding_rs::UTF_8 }
    }

    /// Canonical name of the encoding
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Decode bytes, substituting U+FFFD for malformed sequences
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, had_errors) = self.inner.decode_without_bom_handling(bytes);
        if had_errors {
            tracing::debug!(encoding = self.name(), "Replaced malformed input while decoding");
        }
        text.into_owned()
    }

    /// Encode text, substituting numeric character references for unmappable characters
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.inner.encode(text);
        bytes.into_owned()
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextEncoding").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_lookup() {
        assert_eq!(TextEncoding::for_label("utf-8").unwrap().name(), "UTF-8");
        assert_eq!(TextEncoding::for_label("UTF8").unwrap().name(), "UTF-8");
        assert_eq!(TextEncoding::for_label("shift_jis").unwrap().name(), "Shift_JIS");
        assert!(matches!(
            TextEncoding::for_label("bogus"),
            Err(ServerError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_rejects_encodings_without_byte_framing() {
        let rejected = [
            "utf-16le",
            "utf-16be",
            "utf-16",
            "replacement",
            "iso-2022-kr",
            "iso-2022-jp",
        ];
        for label in rejected {
            assert!(
                matches!(TextEncoding::for_label(label), Err(ServerError::UnframeableEncoding(_))),
                "{} should be rejected",
                label
            );
        }
    }

    #[test]
    fn test_shift_jis_text() {
        let sjis = TextEncoding::for_label("shift_jis").unwrap();
        let bytes = sjis.encode("受信");
        assert_eq!(bytes.len(), 4);
        assert_ne!(bytes, "受信".as_bytes());
        assert_eq!(sjis.decode(&bytes), "受信");
    }

    #[test]
    fn test_malformed_utf8_is_replaced() {
        let text = TextEncoding::utf8().decode(&[b'o', b'k', 0xff]);
        assert_eq!(text, "ok\u{FFFD}");
    }
}
