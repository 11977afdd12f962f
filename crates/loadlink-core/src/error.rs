//! Error types for loadlink-core.
//!
//! Every radio operation the connection manager awaits can fail. None of
//! these errors escape the manager's event loop: each one is logged and
//! turned into a state transition.
//!
//! | Error | Raised by | Manager reaction |
//! |-------|-----------|------------------|
//! | [`Error::RadioState`] | adapter not powered | scanning halts until powered on |
//! | [`Error::ScanStart`] | `start_scan` | scanning flag reset, retry scheduled |
//! | [`Error::Connect`] | `connect` | target cleared, retry scheduled |
//! | [`Error::CapabilityNotFound`] | service/characteristic discovery | disconnect and reset |
//! | [`Error::Subscribe`] | `subscribe` | disconnect and reset |
//! | [`Error::Disconnect`] | `disconnect` | logged, state reset anyway |
//! | [`Error::Framing`] | notification decode | payload dropped, link unaffected |

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::radio::AdapterState;

/// Errors raised while driving the sensor link.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Adapter is not ready for scanning.
    #[error("Bluetooth adapter not ready (state: {0})")]
    RadioState(AdapterState),

    /// Scan could not be started.
    #[error("Failed to start scan: {0}")]
    ScanStart(String),

    /// Link establishment failed.
    #[error("Failed to connect to {}: {reason}", device_id.as_deref().unwrap_or("device"))]
    Connect {
        /// Identifier of the peripheral, when known.
        device_id: Option<String>,
        /// What went wrong.
        reason: String,
    },

    /// Configured service or characteristic is missing on the peripheral.
    #[error("{0} not found")]
    CapabilityNotFound(Capability),

    /// Notification subscription failed.
    #[error("Failed to subscribe to notifications: {0}")]
    Subscribe(String),

    /// Disconnect request failed.
    #[error("Failed to disconnect: {0}")]
    Disconnect(String),

    /// Operation did not complete in time.
    #[error("Operation '{0}' timed out")]
    Timeout(&'static str),

    /// Notification payload could not be framed.
    #[error(transparent)]
    Framing(#[from] loadlink_types::ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A GATT capability the manager looks for after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The data service.
    Service(Uuid),
    /// The notify characteristic inside the data service.
    Characteristic(Uuid),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(uuid) => write!(f, "service {}", uuid),
            Self::Characteristic(uuid) => write!(f, "characteristic {}", uuid),
        }
    }
}

impl Error {
    /// Create a connect error for a known peripheral.
    pub fn connect(device_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Connect {
            device_id: Some(device_id.into()),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Short machine-friendly label used as the `reason` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bluetooth(_) => "bluetooth",
            Self::RadioState(_) => "radio_state",
            Self::ScanStart(_) => "scan_start",
            Self::Connect { .. } => "connect",
            Self::CapabilityNotFound(Capability::Service(_)) => "service_not_found",
            Self::CapabilityNotFound(Capability::Characteristic(_)) => {
                "characteristic_not_found"
            }
            Self::Subscribe(_) => "subscribe",
            Self::Disconnect(_) => "disconnect",
            Self::Timeout(_) => "timeout",
            Self::Framing(_) => "framing",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result type alias using loadlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use loadlink_types::ParseError;

    #[test]
    fn test_capability_not_found_display() {
        let err = Error::CapabilityNotFound(Capability::Service(Uuid::nil()));
        assert_eq!(
            err.to_string(),
            "service 00000000-0000-0000-0000-000000000000 not found"
        );
        assert_eq!(err.kind(), "service_not_found");

        let err = Error::CapabilityNotFound(Capability::Characteristic(Uuid::nil()));
        assert!(err.to_string().starts_with("characteristic"));
        assert_eq!(err.kind(), "characteristic_not_found");
    }

    #[test]
    fn test_connect_display() {
        let err = Error::connect("AA:BB", "refused");
        assert_eq!(err.to_string(), "Failed to connect to AA:BB: refused");

        let err = Error::Connect {
            device_id: None,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to connect to device: timeout");
    }

    #[test]
    fn test_radio_state_display() {
        let err = Error::RadioState(AdapterState::PoweredOff);
        assert!(err.to_string().contains("poweredOff"));
    }

    #[test]
    fn test_framing_conversion() {
        let err: Error = ParseError::Framing { len: 5 }.into();
        assert!(matches!(err, Error::Framing(_)));
        assert!(err.to_string().contains("5"));
        assert_eq!(err.kind(), "framing");
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
