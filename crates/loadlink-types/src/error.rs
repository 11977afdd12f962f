//! Error types for data parsing in loadlink-types.

use thiserror::Error;

/// Errors that can occur when decoding sensor payloads.
///
/// This error type is platform-agnostic and does not include
/// radio-specific errors (those belong in loadlink-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Notification payload is not a whole number of 4-byte words.
    #[error("Framing error: payload length {len} is not a multiple of 4")]
    Framing {
        /// Length of the rejected payload in bytes.
        len: usize,
    },

    /// A sample could not be interpreted.
    #[error("Invalid sample: {0}")]
    InvalidSample(String),
}

/// Result type alias using loadlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
