//! Mock radio for testing.
//!
//! [`MockAdapter`] and [`MockPeripheral`] implement the radio facade
//! traits in memory, so the connection manager can be driven through its
//! whole lifecycle without Bluetooth hardware.
//!
//! # Features
//!
//! - **Event injection**: push power state changes and advertisements
//! - **Failure injection**: fail scan, connect, discovery, subscribe or disconnect
//! - **Link control**: deliver notifications and drop the link on demand
//!
//! # Example
//!
//! ```
//! use loadlink_core::mock::{MockAdapter, MockPeripheral};
//! use loadlink_core::{AdapterState, ConnectionManager, LinkState, RetryPolicy, TargetConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut manager = ConnectionManager::new(
//!         MockAdapter::new(),
//!         TargetConfig::default(),
//!         RetryPolicy::default(),
//!     );
//!     manager.handle_state_change(AdapterState::PoweredOn).await;
//!
//!     let sensor = MockPeripheral::builder("A1").name("ESP32_Nano_Sensor").build();
//!     manager.handle_advertisement(sensor.discovery()).await;
//!     assert_eq!(manager.state(), LinkState::Streaming);
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use loadlink_types::uuids::{SAMPLE_CHARACTERISTIC, SENSOR_SERVICE};

use crate::error::{Error, Result};
use crate::radio::{
    AdapterState, DataHandler, DisconnectHandler, Discovery, ListenerGuard, PeripheralInfo,
    RadioAdapter, RadioCharacteristic, RadioEvent, RadioEventStream, RadioPeripheral,
    RadioService,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory radio adapter.
///
/// Clones share state, so a test can keep a handle while the manager owns
/// another.
#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    tx: mpsc::UnboundedSender<RadioEvent<MockPeripheral>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<RadioEvent<MockPeripheral>>>>,
    scan_starts: AtomicU32,
    scan_stops: AtomicU32,
    fail_scan: AtomicBool,
    last_scan: Mutex<Option<(Vec<Uuid>, bool)>>,
}

impl fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAdapter")
            .field("scan_starts", &self.scan_starts())
            .field("scan_stops", &self.scan_stops())
            .finish()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create an adapter with no events queued.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(AdapterInner {
                tx,
                rx: Mutex::new(Some(rx)),
                scan_starts: AtomicU32::new(0),
                scan_stops: AtomicU32::new(0),
                fail_scan: AtomicBool::new(false),
                last_scan: Mutex::new(None),
            }),
        }
    }

    /// Queue a power state change.
    pub fn emit_state(&self, state: AdapterState) {
        let _ = self.inner.tx.send(RadioEvent::StateChanged(state));
    }

    /// Queue an advertisement from `peripheral`.
    pub fn advertise(&self, peripheral: &MockPeripheral) {
        let _ = self
            .inner
            .tx
            .send(RadioEvent::Discovered(peripheral.discovery()));
    }

    /// Make `start_scan` fail.
    pub fn set_fail_scan(&self, fail: bool) {
        self.inner.fail_scan.store(fail, Ordering::Relaxed);
    }

    /// Number of `start_scan` calls.
    pub fn scan_starts(&self) -> u32 {
        self.inner.scan_starts.load(Ordering::Relaxed)
    }

    /// Number of `stop_scan` calls.
    pub fn scan_stops(&self) -> u32 {
        self.inner.scan_stops.load(Ordering::Relaxed)
    }

    /// Arguments of the last `start_scan` call.
    pub fn last_scan(&self) -> Option<(Vec<Uuid>, bool)> {
        lock(&self.inner.last_scan).clone()
    }
}

#[async_trait]
impl RadioAdapter for MockAdapter {
    type Peripheral = MockPeripheral;

    async fn events(&self) -> Result<RadioEventStream<MockPeripheral>> {
        let rx = lock(&self.inner.rx)
            .take()
            .ok_or_else(|| Error::invalid_config("mock event stream already taken"))?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()> {
        self.inner.scan_starts.fetch_add(1, Ordering::Relaxed);
        *lock(&self.inner.last_scan) = Some((services.to_vec(), allow_duplicates));
        if self.inner.fail_scan.load(Ordering::Relaxed) {
            return Err(Error::ScanStart("mock scan failure".to_string()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.scan_stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// An in-memory peripheral exposing a configurable GATT table.
#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    info: PeripheralInfo,
    gatt: Vec<(Uuid, Vec<Uuid>)>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    transient_failures: AtomicU32,
    fail_discovery: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_disconnect: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    subscribes: AtomicU32,
    next_listener: AtomicU64,
    disconnect_handlers: Mutex<HashMap<u64, DisconnectHandler>>,
    data_handlers: Mutex<HashMap<u64, DataHandler>>,
    handlers_at_subscribe: Mutex<Option<usize>>,
}

impl fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("id", &self.inner.info.id)
            .field("name", &self.inner.info.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl MockPeripheral {
    /// Start building a peripheral with the sensor's GATT table.
    pub fn builder(id: &str) -> MockPeripheralBuilder {
        MockPeripheralBuilder::new(id)
    }

    /// Advertisement data.
    pub fn info(&self) -> &PeripheralInfo {
        &self.inner.info
    }

    /// An advertisement event for this peripheral.
    pub fn discovery(&self) -> Discovery<Self> {
        Discovery {
            info: self.inner.info.clone(),
            peripheral: self.clone(),
        }
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.inner.disconnects.load(Ordering::Relaxed)
    }

    /// Number of `subscribe` calls.
    pub fn subscribe_count(&self) -> u32 {
        self.inner.subscribes.load(Ordering::Relaxed)
    }

    /// Data handlers attached when `subscribe` was last called.
    pub fn handlers_at_subscribe(&self) -> Option<usize> {
        *lock(&self.inner.handlers_at_subscribe)
    }

    /// Attached listeners of both kinds.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.disconnect_handlers).len() + lock(&self.inner.data_handlers).len()
    }

    /// Make the next `count` connects fail, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.inner.transient_failures.store(count, Ordering::Relaxed);
    }

    /// Make every connect fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Push a notification to every data handler.
    pub fn notify(&self, bytes: &[u8]) {
        let handlers: Vec<DataHandler> = lock(&self.inner.data_handlers).values().cloned().collect();
        for handler in handlers {
            handler(bytes, true);
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::Relaxed);
        self.inner.fire_disconnect();
    }
}

impl PeripheralInner {
    fn next_id(&self) -> u64 {
        self.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    fn fire_disconnect(&self) {
        let handlers: Vec<DisconnectHandler> =
            lock(&self.disconnect_handlers).values().cloned().collect();
        for handler in handlers {
            handler();
        }
    }
}

#[async_trait]
impl RadioPeripheral for MockPeripheral {
    type Service = MockService;
    type Characteristic = MockCharacteristic;

    fn id(&self) -> String {
        self.inner.info.id.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connects.fetch_add(1, Ordering::Relaxed);

        let remaining = self.inner.transient_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.inner
                .transient_failures
                .store(remaining - 1, Ordering::Relaxed);
            return Err(Error::connect(self.id(), "mock transient failure"));
        }
        if self.inner.fail_connect.load(Ordering::Relaxed) {
            return Err(Error::connect(self.id(), "mock connect failure"));
        }

        self.inner.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn discover_services(&self, ids: &[Uuid]) -> Result<Vec<MockService>> {
        if self.inner.fail_discovery.load(Ordering::Relaxed) {
            return Err(Error::Timeout("discover_services"));
        }
        Ok(self
            .inner
            .gatt
            .iter()
            .filter(|(uuid, _)| ids.is_empty() || ids.contains(uuid))
            .map(|(uuid, characteristics)| MockService {
                uuid: *uuid,
                characteristics: characteristics.clone(),
                peripheral: Arc::clone(&self.inner),
            })
            .collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnects.fetch_add(1, Ordering::Relaxed);
        if self.inner.fail_disconnect.load(Ordering::Relaxed) {
            return Err(Error::Disconnect("mock disconnect failure".to_string()));
        }
        self.inner.connected.store(false, Ordering::Relaxed);
        self.inner.fire_disconnect();
        Ok(())
    }

    fn on_disconnect(&self, handler: DisconnectHandler) -> ListenerGuard {
        let id = self.inner.next_id();
        lock(&self.inner.disconnect_handlers).insert(id, handler);
        let inner = Arc::clone(&self.inner);
        ListenerGuard::new(move || {
            lock(&inner.disconnect_handlers).remove(&id);
        })
    }
}

/// A service on a [`MockPeripheral`].
pub struct MockService {
    uuid: Uuid,
    characteristics: Vec<Uuid>,
    peripheral: Arc<PeripheralInner>,
}

#[async_trait]
impl RadioService for MockService {
    type Characteristic = MockCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn discover_characteristics(&self, ids: &[Uuid]) -> Result<Vec<MockCharacteristic>> {
        Ok(self
            .characteristics
            .iter()
            .filter(|uuid| ids.is_empty() || ids.contains(uuid))
            .map(|uuid| MockCharacteristic {
                uuid: *uuid,
                peripheral: Arc::clone(&self.peripheral),
            })
            .collect())
    }
}

/// A notify characteristic on a [`MockPeripheral`].
pub struct MockCharacteristic {
    uuid: Uuid,
    peripheral: Arc<PeripheralInner>,
}

#[async_trait]
impl RadioCharacteristic for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn on_data(&self, handler: DataHandler) -> Result<ListenerGuard> {
        let id = self.peripheral.next_id();
        lock(&self.peripheral.data_handlers).insert(id, handler);
        let inner = Arc::clone(&self.peripheral);
        Ok(ListenerGuard::new(move || {
            lock(&inner.data_handlers).remove(&id);
        }))
    }

    async fn subscribe(&self) -> Result<()> {
        self.peripheral.subscribes.fetch_add(1, Ordering::Relaxed);
        *lock(&self.peripheral.handlers_at_subscribe) =
            Some(lock(&self.peripheral.data_handlers).len());
        if self.peripheral.fail_subscribe.load(Ordering::Relaxed) {
            return Err(Error::Subscribe("mock subscribe failure".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`MockPeripheral`].
#[derive(Debug, Clone)]
pub struct MockPeripheralBuilder {
    info: PeripheralInfo,
    gatt: Vec<(Uuid, Vec<Uuid>)>,
    fail_connect: bool,
    transient_failures: u32,
    fail_discovery: bool,
    fail_subscribe: bool,
    fail_disconnect: bool,
}

impl MockPeripheralBuilder {
    /// Create a builder for a peripheral with the sensor's GATT table.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            info: PeripheralInfo::new(id),
            gatt: vec![(SENSOR_SERVICE, vec![SAMPLE_CHARACTERISTIC])],
            fail_connect: false,
            transient_failures: 0,
            fail_discovery: false,
            fail_subscribe: false,
            fail_disconnect: false,
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.info = self.info.with_name(name);
        self
    }

    /// Set the signal strength.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.info = self.info.with_rssi(rssi);
        self
    }

    /// Add a service UUID to the advertisement.
    #[must_use]
    pub fn advertise_service(mut self, uuid: Uuid) -> Self {
        self.info = self.info.with_service(uuid);
        self
    }

    /// Add a GATT service with the given characteristics.
    #[must_use]
    pub fn gatt_service(mut self, service: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.gatt.push((service, characteristics));
        self
    }

    /// Expose no GATT services at all.
    #[must_use]
    pub fn without_service(mut self) -> Self {
        self.gatt.clear();
        self
    }

    /// Expose the data service without its characteristic.
    #[must_use]
    pub fn without_characteristic(mut self) -> Self {
        self.gatt = vec![(SENSOR_SERVICE, Vec::new())];
        self
    }

    /// Fail every connect.
    #[must_use]
    pub fn fail_connect(mut self, fail: bool) -> Self {
        self.fail_connect = fail;
        self
    }

    /// Fail the next `count` connects.
    #[must_use]
    pub fn transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Fail service discovery.
    #[must_use]
    pub fn fail_discovery(mut self, fail: bool) -> Self {
        self.fail_discovery = fail;
        self
    }

    /// Fail the subscribe request.
    #[must_use]
    pub fn fail_subscribe(mut self, fail: bool) -> Self {
        self.fail_subscribe = fail;
        self
    }

    /// Fail the disconnect request.
    #[must_use]
    pub fn fail_disconnect(mut self, fail: bool) -> Self {
        self.fail_disconnect = fail;
        self
    }

    /// Build the peripheral.
    #[must_use]
    pub fn build(self) -> MockPeripheral {
        MockPeripheral {
            inner: Arc::new(PeripheralInner {
                info: self.info,
                gatt: self.gatt,
                connected: AtomicBool::new(false),
                fail_connect: AtomicBool::new(self.fail_connect),
                transient_failures: AtomicU32::new(self.transient_failures),
                fail_discovery: AtomicBool::new(self.fail_discovery),
                fail_subscribe: AtomicBool::new(self.fail_subscribe),
                fail_disconnect: AtomicBool::new(self.fail_disconnect),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                subscribes: AtomicU32::new(0),
                next_listener: AtomicU64::new(0),
                disconnect_handlers: Mutex::new(HashMap::new()),
                data_handlers: Mutex::new(HashMap::new()),
                handlers_at_subscribe: Mutex::new(None),
            }),
        }
    }
}
