//! Link event system.
//!
//! The connection manager publishes a [`LinkEvent`] for every step of the
//! lifecycle. Consumers (the logger binary, tests, a status page) subscribe
//! through [`EventDispatcher::subscribe`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::discovery::{DiscoveryRecord, MatchKind};

/// Events emitted by the connection manager.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LinkEvent {
    /// A peripheral was seen for the first time this scanning epoch.
    Discovered { record: DiscoveryRecord },
    /// An advertisement was promoted to target.
    TargetFound { id: String, matched: MatchKind },
    /// The link to the target is up.
    Connected { id: String },
    /// Notifications are flowing.
    Subscribed { id: String },
    /// A notification decoded cleanly.
    Samples { values: Vec<i32> },
    /// A notification payload was dropped.
    FramingError { len: usize },
    /// The link to the target went down.
    Disconnected { id: String },
    /// A restart of scanning is pending.
    RetryScheduled {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    /// A lifecycle step failed.
    Error { reason: String, message: String },
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Sender for link events.
pub type EventSender = broadcast::Sender<LinkEvent>;

/// Receiver for link events.
pub type EventReceiver = broadcast::Receiver<LinkEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: LinkEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
