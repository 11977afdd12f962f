//! Sample types shared by the radio logger and the relay.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single two-channel load-cell sample.
///
/// On the wire this is `{"t": <int>, "l": <int>, "r": <int>}`; the
/// short field names are kept to match the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SamplePoint {
    /// Device timestamp (firmware clock, not wall time).
    #[cfg_attr(feature = "serde", serde(rename = "t"))]
    pub timestamp: i64,
    /// Left channel reading.
    #[cfg_attr(feature = "serde", serde(rename = "l"))]
    pub left: i64,
    /// Right channel reading.
    #[cfg_attr(feature = "serde", serde(rename = "r"))]
    pub right: i64,
}

impl SamplePoint {
    /// Create a new sample.
    #[must_use]
    pub const fn new(timestamp: i64, left: i64, right: i64) -> Self {
        Self {
            timestamp,
            left,
            right,
        }
    }
}

impl fmt::Display for SamplePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time={}, left={}, right={}",
            self.timestamp, self.left, self.right
        )
    }
}

/// A batch of samples as pushed by the device client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleBatch {
    /// Samples in device order.
    pub samples: Vec<SamplePoint>,
}

impl SampleBatch {
    /// Create a batch from samples.
    #[must_use]
    pub fn new(samples: Vec<SamplePoint>) -> Self {
        Self { samples }
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the batch carries no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<SamplePoint>> for SampleBatch {
    fn from(samples: Vec<SamplePoint>) -> Self {
        Self::new(samples)
    }
}
