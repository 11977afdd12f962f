//! Decoding of raw sample notifications.
//!
//! The sensor packs its readings as consecutive little-endian `i32` words.
//! Each notification is decoded on its own; nothing is buffered between
//! notifications, so a payload that does not frame cleanly is dropped whole.

use core::fmt::Write as _;
use core::iter::FusedIterator;
use core::slice::ChunksExact;

use crate::error::{ParseError, ParseResult};

/// Size of one encoded value in bytes.
pub const WORD_SIZE: usize = 4;

/// Lazy iterator over the values of one notification payload.
///
/// Borrows the payload; yields exactly `len / 4` values.
#[derive(Debug, Clone)]
pub struct DecodedValues<'a> {
    words: ChunksExact<'a, u8>,
}

impl Iterator for DecodedValues<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.words.next().map(|word| {
            // chunks_exact guarantees WORD_SIZE bytes per chunk
            i32::from_le_bytes([word[0], word[1], word[2], word[3]])
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.words.size_hint()
    }
}

impl ExactSizeIterator for DecodedValues<'_> {}

impl FusedIterator for DecodedValues<'_> {}

/// Decode a notification payload into its `i32` values.
///
/// # Errors
///
/// Returns [`ParseError::Framing`] when the payload length is not a
/// multiple of [`WORD_SIZE`]. An empty payload is valid and yields nothing.
///
/// # Example
///
/// ```
/// use loadlink_types::decode_notification;
///
/// let values: Vec<i32> = decode_notification(&[1, 0, 0, 0, 2, 0, 0, 0])
///     .unwrap()
///     .collect();
/// assert_eq!(values, vec![1, 2]);
/// assert!(decode_notification(&[0; 5]).is_err());
/// ```
pub fn decode_notification(payload: &[u8]) -> ParseResult<DecodedValues<'_>> {
    if payload.len() % WORD_SIZE != 0 {
        return Err(ParseError::Framing { len: payload.len() });
    }
    Ok(DecodedValues {
        words: payload.chunks_exact(WORD_SIZE),
    })
}

/// Lowercase hex rendering of a payload for debug logging.
pub fn hex_preview(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len() * 2);
    for byte in payload {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_two_values() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        let values: Vec<i32> = decode_notification(&bytes).unwrap().collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_decode_negative_and_extremes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&i32::MIN.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        let values: Vec<i32> = decode_notification(&bytes).unwrap().collect();
        assert_eq!(values, vec![-1, i32::MIN, i32::MAX]);
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut values = decode_notification(&[]).unwrap();
        assert_eq!(values.len(), 0);
        assert_eq!(values.next(), None);
    }

    #[test]
    fn test_decode_length_five_is_framing_error() {
        let err = decode_notification(&[0; 5]).unwrap_err();
        assert_eq!(err, ParseError::Framing { len: 5 });
    }

    #[test]
    fn test_decode_reports_exact_len() {
        let values = decode_notification(&[0; 12]).unwrap();
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0x01, 0xab, 0x00]), "01ab00");
        assert_eq!(hex_preview(&[]), "");
    }
}

/// Property-based tests for the notification decoder.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whole-word payloads decode to one value per word.
        #[test]
        fn framed_payload_decodes_every_word(words in proptest::collection::vec(any::<[u8; 4]>(), 0..64)) {
            let payload: Vec<u8> = words.iter().flatten().copied().collect();
            let values: Vec<i32> = decode_notification(&payload).unwrap().collect();
            prop_assert_eq!(values.len(), payload.len() / WORD_SIZE);
            for (value, word) in values.iter().zip(&words) {
                prop_assert_eq!(*value, i32::from_le_bytes(*word));
            }
        }

        /// Any other length is rejected without yielding values.
        #[test]
        fn unframed_payload_is_rejected(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assume!(data.len() % WORD_SIZE != 0);
            let result = decode_notification(&data);
            prop_assert_eq!(result.unwrap_err(), ParseError::Framing { len: data.len() });
        }
    }
}
