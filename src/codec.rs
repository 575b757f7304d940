//! Binary/text transcoding for audio payloads
//!
//! Audio travels inside JSON text frames, so raw bytes are carried as
//! standard (padded) base64.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::Result;

/// Encode raw bytes into transportable text
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transportable text back into raw bytes
///
/// # Errors
///
/// Returns error if the text is not valid base64
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_byte_values() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn round_trips_uneven_lengths() {
        for len in 0..8 {
            let bytes: Vec<u8> = (0..len).map(|i| i * 37).collect();
            assert_eq!(decode(&encode(&bytes)).unwrap(), bytes, "len {len}");
        }
    }

    #[test]
    fn known_vector() {
        assert_eq!(encode(b"hello"), "aGVsbG8=");
        assert_eq!(decode("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(decode(" aGVsbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn rejects_invalid_text() {
        assert!(decode("not base64!").is_err());
    }
}
