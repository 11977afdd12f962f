//! Relay wire messages.
//!
//! Every frame is a JSON text frame. The first frame of a connection is a
//! [`Hello`] naming the client's role; after that, browsers send commands
//! (`{"cmd": "start"}`) and devices send sample batches
//! (`{"samples": [{"t": 1, "l": 2, "r": 3}]}`). Both are forwarded as the
//! exact text received.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use loadlink_types::{SampleBatch, SamplePoint};

use crate::error::{RelayError, Result};

/// Role a connection declares in its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// The sensor device pushing samples.
    Esp,
    /// A browser dashboard sending commands.
    Browser,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp => f.write_str("esp"),
            Self::Browser => f.write_str("browser"),
        }
    }
}

/// The classification frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Declared role.
    #[serde(rename = "type")]
    pub role: ClientRole,
}

impl Hello {
    /// Create a classification frame.
    pub fn new(role: ClientRole) -> Self {
        Self { role }
    }

    /// Parse a first frame.
    ///
    /// Invalid JSON is a [`RelayError::TransportParse`]; valid JSON that
    /// does not name a known role is a [`RelayError::Classification`].
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("esp") => Ok(Self::new(ClientRole::Esp)),
            Some("browser") => Ok(Self::new(ClientRole::Browser)),
            Some(other) => Err(RelayError::Classification(format!(
                "unknown client type '{}'",
                other
            ))),
            None => Err(RelayError::Classification(
                "missing client type".to_string(),
            )),
        }
    }
}

/// A frame received after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A browser command, identified by its `cmd` field.
    Command {
        /// Command name.
        cmd: String,
    },
    /// A batch of samples from the device.
    Samples {
        /// Entries that parsed as samples, in device order.
        batch: SampleBatch,
        /// Entries that did not; a `samples` value that is not an array
        /// counts as one.
        rejected: usize,
    },
    /// Anything else; dropped.
    Other,
}

impl Inbound {
    /// Interpret a frame from a connection with the given role.
    ///
    /// Browsers may only send commands and devices may only send samples;
    /// a frame of the other kind is [`Inbound::Other`].
    pub fn parse(role: ClientRole, text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        match role {
            ClientRole::Browser => Ok(value
                .get("cmd")
                .and_then(Value::as_str)
                .filter(|cmd| !cmd.is_empty())
                .map_or(Self::Other, |cmd| Self::Command {
                    cmd: cmd.to_string(),
                })),
            ClientRole::Esp => Ok(match value.get_mut("samples").map(Value::take) {
                None | Some(Value::Null | Value::Bool(false)) => Self::Other,
                Some(Value::String(s)) if s.is_empty() => Self::Other,
                Some(Value::Array(items)) => {
                    let total = items.len();
                    let samples: Vec<SamplePoint> = items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value(item).ok())
                        .collect();
                    Self::Samples {
                        rejected: total - samples.len(),
                        batch: SampleBatch::new(samples),
                    }
                }
                Some(_) => Self::Samples {
                    batch: SampleBatch::default(),
                    rejected: 1,
                },
            }),
        }
    }
}
