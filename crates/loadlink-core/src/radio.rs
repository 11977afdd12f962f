//! Radio adapter facade.
//!
//! The connection manager never talks to a Bluetooth stack directly. It
//! drives these traits instead, which the btleplug backend
//! ([`crate::btle`]) and the test double ([`crate::mock`]) implement.
//!
//! Listener registration returns a [`ListenerGuard`]; dropping the guard
//! detaches the listener, so clearing a session releases every handler it
//! installed.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Power state reported by the radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    /// State not reported yet.
    Unknown,
    /// Adapter is restarting.
    Resetting,
    /// Platform has no usable Bluetooth LE support.
    Unsupported,
    /// The process is not allowed to use Bluetooth.
    Unauthorized,
    /// Adapter is switched off.
    PoweredOff,
    /// Adapter is ready to scan and connect.
    PoweredOn,
}

impl AdapterState {
    /// Whether scanning may start in this state.
    pub fn is_ready(self) -> bool {
        self == Self::PoweredOn
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "poweredOff",
            Self::PoweredOn => "poweredOn",
        };
        f.write_str(s)
    }
}

/// What an advertisement tells us about a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeripheralInfo {
    /// MAC address on Linux/Windows, platform UUID on macOS.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm at the time of the advertisement.
    pub rssi: Option<i16>,
}

impl PeripheralInfo {
    /// Create info for a peripheral with only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an advertised service.
    #[must_use]
    pub fn with_service(mut self, uuid: Uuid) -> Self {
        if !self.services.contains(&uuid) {
            self.services.push(uuid);
        }
        self
    }

    /// Set the signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name for log lines.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("N/A")
    }
}

/// An advertisement event: what was seen plus a handle to connect to it.
#[derive(Debug, Clone)]
pub struct Discovery<P> {
    /// Advertised data.
    pub info: PeripheralInfo,
    /// Handle used for the connection attempt.
    pub peripheral: P,
}

/// Events emitted by the radio adapter.
#[derive(Debug, Clone)]
pub enum RadioEvent<P> {
    /// Adapter power state changed.
    StateChanged(AdapterState),
    /// A peripheral advertised.
    Discovered(Discovery<P>),
}

/// Stream of adapter events.
pub type RadioEventStream<P> = Pin<Box<dyn Stream<Item = RadioEvent<P>> + Send>>;

/// Called with `(payload, is_notification)` for each value pushed by a characteristic.
pub type DataHandler = Arc<dyn Fn(&[u8], bool) + Send + Sync>;

/// Called once when the link to a peripheral drops.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Keeps a listener attached for as long as it is alive.
#[must_use = "dropping a ListenerGuard detaches the listener"]
pub struct ListenerGuard {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    /// Create a guard that runs `detach` when released.
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Create a guard with nothing to release.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    /// Detach the listener now.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// The radio hardware: power state, scanning and advertisement events.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Peripheral handle type produced by discovery.
    type Peripheral: RadioPeripheral;

    /// Take the adapter's event stream.
    async fn events(&self) -> Result<RadioEventStream<Self::Peripheral>>;

    /// Start scanning. An empty `services` list scans for every device.
    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;
}

/// A discovered peripheral that can be connected to.
#[async_trait]
pub trait RadioPeripheral: Clone + Send + Sync + 'static {
    /// GATT service type.
    type Service: RadioService<Characteristic = Self::Characteristic>;
    /// GATT characteristic type.
    type Characteristic: RadioCharacteristic;

    /// Stable identifier for this session.
    fn id(&self) -> String;

    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Discover services, limited to `ids` when non-empty.
    async fn discover_services(&self, ids: &[Uuid]) -> Result<Vec<Self::Service>>;

    /// Drop the link.
    async fn disconnect(&self) -> Result<()>;

    /// Register a link-loss handler.
    fn on_disconnect(&self, handler: DisconnectHandler) -> ListenerGuard;
}

/// A GATT service on a connected peripheral.
#[async_trait]
pub trait RadioService: Send + Sync {
    /// Characteristic type.
    type Characteristic: RadioCharacteristic;

    /// Service UUID.
    fn uuid(&self) -> Uuid;

    /// Discover characteristics, limited to `ids` when non-empty.
    async fn discover_characteristics(&self, ids: &[Uuid]) -> Result<Vec<Self::Characteristic>>;
}

/// A GATT characteristic supporting notifications.
#[async_trait]
pub trait RadioCharacteristic: Send + Sync {
    /// Characteristic UUID.
    fn uuid(&self) -> Uuid;

    /// Attach a data handler. Values pushed after this returns reach `handler`.
    async fn on_data(&self, handler: DataHandler) -> Result<ListenerGuard>;

    /// Ask the peripheral to start sending notifications.
    async fn subscribe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_adapter_state_display() {
        assert_eq!(AdapterState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(AdapterState::PoweredOff.to_string(), "poweredOff");
        assert!(AdapterState::PoweredOn.is_ready());
        assert!(!AdapterState::Resetting.is_ready());
    }

    #[test]
    fn test_listener_guard_detaches_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let guard = ListenerGuard::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        guard.detach();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_guard_detaches_on_drop() {
        let count = Arc::new(AtomicU32::new(0));
        {
            let c = Arc::clone(&count);
            let _guard = ListenerGuard::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_peripheral_info_builder() {
        let uuid = Uuid::nil();
        let info = PeripheralInfo::new("A1")
            .with_name("Sensor")
            .with_service(uuid)
            .with_service(uuid)
            .with_rssi(-60);
        assert_eq!(info.display_name(), "Sensor");
        assert_eq!(info.services.len(), 1);
        assert_eq!(info.rssi, Some(-60));
        assert_eq!(PeripheralInfo::new("B2").display_name(), "N/A");
    }
}
