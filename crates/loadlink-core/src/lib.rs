//! Core BLE library for the loadlink sensor logger.
//!
//! This crate finds a single load-cell sensor over Bluetooth Low Energy,
//! keeps a notification subscription to it alive and decodes what it
//! sends.
//!
//! # Features
//!
//! - **Discovery**: unfiltered scanning with per-epoch deduplication and
//!   exact name matching (optional service UUID fallback)
//! - **Connection lifecycle**: connect, capability discovery and subscribe
//!   driven by a single-owner state machine
//! - **Recovery**: fixed-delay, unbounded retry after any failure or link loss
//! - **Decoding**: little-endian `i32` words, malformed payloads dropped
//! - **Testability**: the radio is a trait seam with an in-memory mock
//!
//! # Platform Differences
//!
//! - **macOS**: peripherals are identified by a CoreBluetooth UUID, stable
//!   per host but not the device's MAC address.
//! - **Linux/Windows**: peripherals are identified by their MAC address.
//!
//! # Quick Start
//!
//! ```no_run
//! use loadlink_core::btle::BtleAdapter;
//! use loadlink_core::{ConnectionManager, RetryPolicy, TargetConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = BtleAdapter::first().await?;
//!     let mut manager =
//!         ConnectionManager::new(adapter, TargetConfig::default(), RetryPolicy::default());
//!
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     manager.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod discovery;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod radio;
pub mod retry;

pub use discovery::{DiscoveryFilter, DiscoveryRecord, MatchKind, Observation, TargetConfig};
pub use error::{Capability, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, LinkEvent};
pub use manager::{ConnectionManager, ConnectionSession, LinkState, LinkStatus};
pub use radio::{
    AdapterState, DataHandler, DisconnectHandler, Discovery, ListenerGuard, PeripheralInfo,
    RadioAdapter, RadioCharacteristic, RadioEvent, RadioEventStream, RadioPeripheral,
    RadioService,
};
pub use retry::{DEFAULT_RETRY_DELAY, RetryPolicy};

// Re-export types from loadlink-types
pub use loadlink_types::{self as types, DecodedValues, ParseError, decode_notification};
