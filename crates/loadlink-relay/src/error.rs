//! Error types for the relay.

use thiserror::Error;

/// Errors raised while relaying messages.
///
/// None of these end the process: a parse failure is logged and the
/// connection stays open, a classification failure closes only the
/// offending connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    /// A frame was not valid JSON, or did not have the expected shape.
    #[error("Invalid message: {0}")]
    TransportParse(#[from] serde_json::Error),

    /// The first frame of a connection did not name a known role.
    #[error("Invalid classification message: {0}")]
    Classification(String),

    /// The persistence sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl RelayError {
    /// Short machine-friendly label used as the `reason` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportParse(_) => "transport_parse",
            Self::Classification(_) => "classification",
            Self::Sink(_) => "sink",
        }
    }
}

/// Errors raised by a persistence sink.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The backend rejected a flush.
    #[error("Flush rejected with status {status}: {body}")]
    Flush {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The request never got a response.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// In-memory sink configured to fail.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using the relay's error type.
pub type Result<T> = std::result::Result<T, RelayError>;
