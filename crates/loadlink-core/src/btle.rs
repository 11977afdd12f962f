//! btleplug implementation of the radio facade.
//!
//! Uses the first adapter reported by the platform. Disconnect callbacks
//! are dispatched from the adapter's central event stream, so they only
//! fire while [`RadioAdapter::events`] is being polled; the connection
//! manager's event loop keeps it polled for its whole lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::radio::{
    AdapterState, DataHandler, DisconnectHandler, Discovery, ListenerGuard, PeripheralInfo,
    RadioAdapter, RadioCharacteristic, RadioEvent, RadioEventStream, RadioPeripheral,
    RadioService,
};

/// Default timeout for establishing the link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts applied to btleplug operations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use loadlink_core::btle::BtleOptions;
///
/// let options = BtleOptions::default().connection_timeout(Duration::from_secs(20));
/// assert_eq!(options.connection_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtleOptions {
    /// Timeout for `connect`.
    pub connection_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
}

impl Default for BtleOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl BtleOptions {
    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Whether the platform hides the real address (macOS reports all zeros).
fn is_unset_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

/// Identifier for a peripheral: its address, or the platform id when the
/// address is hidden.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_unset_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

#[derive(Default)]
struct DisconnectRegistry {
    next: AtomicU64,
    handlers: Mutex<HashMap<u64, (PeripheralId, DisconnectHandler)>>,
}

impl DisconnectRegistry {
    fn insert(self: &Arc<Self>, peripheral: PeripheralId, handler: DisconnectHandler) -> ListenerGuard {
        let key = self.next.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (peripheral, handler));
        let registry = Arc::clone(self);
        ListenerGuard::new(move || {
            registry
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        })
    }

    fn fire(&self, peripheral: &PeripheralId) {
        let handlers: Vec<DisconnectHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(id, _)| id == peripheral)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler();
        }
    }
}

/// The platform Bluetooth adapter.
#[derive(Clone)]
pub struct BtleAdapter {
    adapter: Adapter,
    options: BtleOptions,
    disconnects: Arc<DisconnectRegistry>,
}

impl BtleAdapter {
    /// Open the first available Bluetooth adapter.
    pub async fn first() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::RadioState(AdapterState::Unsupported))?;
        Ok(Self {
            adapter,
            options: BtleOptions::default(),
            disconnects: Arc::default(),
        })
    }

    /// Replace the operation timeouts.
    #[must_use]
    pub fn with_options(mut self, options: BtleOptions) -> Self {
        self.options = options;
        self
    }
}

async fn describe(
    adapter: &Adapter,
    id: &PeripheralId,
    options: BtleOptions,
    disconnects: &Arc<DisconnectRegistry>,
) -> Option<RadioEvent<BtlePeripheral>> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    let identifier = create_identifier(&props.address.to_string(), id);
    let info = PeripheralInfo {
        id: identifier.clone(),
        name: props.local_name,
        services: props.services,
        rssi: props.rssi,
    };
    Some(RadioEvent::Discovered(Discovery {
        info,
        peripheral: BtlePeripheral {
            peripheral,
            identifier,
            options,
            disconnects: Arc::clone(disconnects),
        },
    }))
}

/// Map btleplug's power state onto the facade's.
fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        CentralState::Unknown => AdapterState::Unknown,
    }
}

#[async_trait]
impl RadioAdapter for BtleAdapter {
    type Peripheral = BtlePeripheral;

    async fn events(&self) -> Result<RadioEventStream<BtlePeripheral>> {
        let central = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let options = self.options;
        let disconnects = Arc::clone(&self.disconnects);

        let mapped = central.filter_map(move |event| {
            let adapter = adapter.clone();
            let disconnects = Arc::clone(&disconnects);
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        describe(&adapter, &id, options, &disconnects).await
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        debug!("Peripheral disconnected: {}", format_peripheral_id(&id));
                        disconnects.fire(&id);
                        None
                    }
                    CentralEvent::StateUpdate(state) => {
                        Some(RadioEvent::StateChanged(adapter_state(state)))
                    }
                    _ => None,
                }
            }
        });

        // Later changes arrive as StateUpdate; the current state seeds the stream.
        let initial = match self.adapter.adapter_state().await {
            Ok(state) => adapter_state(state),
            Err(e) => {
                warn!("Could not read adapter state, assuming powered on: {}", e);
                AdapterState::PoweredOn
            }
        };
        let seed = futures::stream::once(async move { RadioEvent::StateChanged(initial) });
        Ok(Box::pin(seed.chain(mapped)))
    }

    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()> {
        // btleplug reports every advertisement as DeviceDiscovered/DeviceUpdated;
        // repeated sightings are folded by the discovery filter.
        debug!(allow_duplicates, "Starting btleplug scan");
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await
            .map_err(|e| Error::ScanStart(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }
}

/// A peripheral reached through btleplug.
#[derive(Clone)]
pub struct BtlePeripheral {
    peripheral: Peripheral,
    identifier: String,
    options: BtleOptions,
    disconnects: Arc<DisconnectRegistry>,
}

#[async_trait]
impl RadioPeripheral for BtlePeripheral {
    type Service = BtleService;
    type Characteristic = BtleCharacteristic;

    fn id(&self) -> String {
        self.identifier.clone()
    }

    async fn connect(&self) -> Result<()> {
        info!("Connecting to {}", self.identifier);
        timeout(self.options.connection_timeout, self.peripheral.connect())
            .await
            .map_err(|_| Error::Timeout("connect"))?
            .map_err(|e| Error::connect(self.identifier.clone(), e))
    }

    async fn discover_services(&self, ids: &[Uuid]) -> Result<Vec<BtleService>> {
        timeout(
            self.options.discovery_timeout,
            self.peripheral.discover_services(),
        )
        .await
        .map_err(|_| Error::Timeout("discover services"))??;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());
        Ok(services
            .into_iter()
            .filter(|s| ids.is_empty() || ids.contains(&s.uuid))
            .map(|service| BtleService {
                peripheral: self.peripheral.clone(),
                service,
            })
            .collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| Error::Disconnect(e.to_string()))
    }

    fn on_disconnect(&self, handler: DisconnectHandler) -> ListenerGuard {
        self.disconnects.insert(self.peripheral.id(), handler)
    }
}

/// A GATT service on a [`BtlePeripheral`].
pub struct BtleService {
    peripheral: Peripheral,
    service: Service,
}

#[async_trait]
impl RadioService for BtleService {
    type Characteristic = BtleCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn discover_characteristics(&self, ids: &[Uuid]) -> Result<Vec<BtleCharacteristic>> {
        Ok(self
            .service
            .characteristics
            .iter()
            .filter(|c| ids.is_empty() || ids.contains(&c.uuid))
            .map(|characteristic| BtleCharacteristic {
                peripheral: self.peripheral.clone(),
                characteristic: characteristic.clone(),
            })
            .collect())
    }
}

/// A notify characteristic on a [`BtlePeripheral`].
pub struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl RadioCharacteristic for BtleCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn on_data(&self, handler: DataHandler) -> Result<ListenerGuard> {
        let mut stream = self.peripheral.notifications().await?;
        let uuid = self.characteristic.uuid;

        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == uuid {
                    handler(&notification.value, true);
                }
            }
        });

        let abort = task.abort_handle();
        Ok(ListenerGuard::new(move || abort.abort()))
    }

    async fn subscribe(&self) -> Result<()> {
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_mapping() {
        assert_eq!(adapter_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(adapter_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(adapter_state(CentralState::Unknown), AdapterState::Unknown);
        assert!(adapter_state(CentralState::PoweredOn).is_ready());
        assert!(!adapter_state(CentralState::Unknown).is_ready());
    }

    #[test]
    fn test_unset_address_detection() {
        assert!(is_unset_address("00:00:00:00:00:00"));
        assert!(!is_unset_address("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_options_defaults() {
        let options = BtleOptions::default();
        assert_eq!(options.connection_timeout, Duration::from_secs(15));
        assert_eq!(options.discovery_timeout, Duration::from_secs(10));

        let options = options.discovery_timeout(Duration::from_secs(3));
        assert_eq!(options.discovery_timeout, Duration::from_secs(3));
    }
}
