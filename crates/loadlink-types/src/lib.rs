//! Platform-agnostic types for loadlink sensor bridges.
//!
//! This crate provides the pieces shared by the radio logger
//! (loadlink-core) and the WebSocket relay (loadlink-relay):
//!
//! - Sample types for the two-channel load cell
//! - Decoding of raw sample notifications
//! - Default identifiers of the sensor peripheral
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use loadlink_types::{decode_notification, SamplePoint};
//!
//! let values: Vec<i32> = decode_notification(&[7, 0, 0, 0]).unwrap().collect();
//! assert_eq!(values, vec![7]);
//!
//! let sample = SamplePoint::new(0, 120, 118);
//! assert_eq!(sample.to_string(), "time=0, left=120, right=118");
//! ```

pub mod decode;
pub mod error;
pub mod types;
pub mod uuid;

pub use decode::{DecodedValues, WORD_SIZE, decode_notification, hex_preview};
pub use error::{ParseError, ParseResult};
pub use types::{SampleBatch, SamplePoint};
pub use uuid as uuids;
