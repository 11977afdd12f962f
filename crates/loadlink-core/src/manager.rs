//! Connection lifecycle for the target sensor.
//!
//! [`ConnectionManager`] owns every piece of lifecycle state: the scanning
//! flag, the single [`ConnectionSession`], the discovery filter and the one
//! pending retry. All transitions are methods on the manager and run on a
//! single task; radio callbacks never touch that state directly; they post
//! a signal into the manager's queue which [`ConnectionManager::run`]
//! drains between steps.
//!
//! ```text
//! Idle ─► Scanning ─► Connecting ─► DiscoveringCapabilities ─► Subscribing ─► Streaming
//!
//! Connecting failure            ─► Backoff ─(retry delay)─► Scanning
//! capability/subscribe failure  ─► Disconnecting ─► Idle ─(retry delay)─► Scanning
//! link lost while streaming     ─► Idle ─(retry delay)─► Scanning
//! ```
//!
//! Stale radio callbacks are recognised by an epoch counter that is bumped
//! whenever a session ends, so a late disconnect from a previous session
//! cannot tear down the current one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use loadlink_types::{decode_notification, hex_preview};

use crate::discovery::{DiscoveryFilter, TargetConfig};
use crate::error::{Capability, Error, Result};
use crate::events::{EventDispatcher, EventReceiver, LinkEvent};
use crate::radio::{
    AdapterState, DataHandler, Discovery, ListenerGuard, PeripheralInfo, RadioAdapter,
    RadioCharacteristic, RadioEvent, RadioPeripheral, RadioService,
};
use crate::retry::RetryPolicy;

type PeripheralOf<A> = <A as RadioAdapter>::Peripheral;
type CharacteristicOf<A> = <PeripheralOf<A> as RadioPeripheral>::Characteristic;

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Scanning for the target.
    Scanning,
    /// Establishing the link.
    Connecting,
    /// Looking up the data service and characteristic.
    DiscoveringCapabilities,
    /// Attaching the data handler and enabling notifications.
    Subscribing,
    /// Notifications are flowing.
    Streaming,
    /// Tearing down the link after a failure.
    Disconnecting,
    /// Waiting out the retry delay.
    Backoff,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::DiscoveringCapabilities => "discovering_capabilities",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Disconnecting => "disconnecting",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Snapshot of the manager's flags, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Current lifecycle state.
    pub state: LinkState,
    /// A scan is running.
    pub scanning: bool,
    /// The target link is up.
    pub connected: bool,
    /// Identifier of the assigned target, if any.
    pub target: Option<String>,
    /// A scan restart is pending.
    pub retry_pending: bool,
}

/// The active connection attempt.
#[derive(Debug)]
pub struct ConnectionSession<P> {
    peripheral: P,
    info: PeripheralInfo,
    service: Option<Uuid>,
    characteristic: Option<Uuid>,
    connected: bool,
    listeners: Vec<ListenerGuard>,
}

impl<P> ConnectionSession<P> {
    /// Advertisement data of the target.
    pub fn info(&self) -> &PeripheralInfo {
        &self.info
    }

    /// Peripheral handle.
    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    /// Resolved service UUID.
    pub fn service(&self) -> Option<Uuid> {
        self.service
    }

    /// Resolved characteristic UUID.
    pub fn characteristic(&self) -> Option<Uuid> {
        self.characteristic
    }

    /// Whether the link is established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of listeners attached for this session.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Callbacks from the radio, queued for the manager's task.
#[derive(Debug)]
enum LinkSignal {
    LinkLost {
        epoch: u64,
    },
    Notification {
        epoch: u64,
        bytes: Vec<u8>,
        is_notification: bool,
    },
}

/// Drives one target peripheral through scan, connect, subscribe and retry.
pub struct ConnectionManager<A: RadioAdapter> {
    adapter: A,
    target: TargetConfig,
    retry: RetryPolicy,
    state: LinkState,
    scanning: bool,
    adapter_state: AdapterState,
    session: Option<ConnectionSession<PeripheralOf<A>>>,
    filter: DiscoveryFilter,
    pending_retry: Option<Instant>,
    epoch: u64,
    signal_tx: mpsc::UnboundedSender<LinkSignal>,
    signal_rx: mpsc::UnboundedReceiver<LinkSignal>,
    events: EventDispatcher,
    status_tx: watch::Sender<LinkStatus>,
}

impl<A: RadioAdapter> ConnectionManager<A> {
    /// Create a manager for `target` on `adapter`.
    pub fn new(adapter: A, target: TargetConfig, retry: RetryPolicy) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(LinkStatus::default());
        Self {
            filter: DiscoveryFilter::new(&target),
            adapter,
            target,
            retry,
            state: LinkState::Idle,
            scanning: false,
            adapter_state: AdapterState::Unknown,
            session: None,
            pending_retry: None,
            epoch: 0,
            signal_tx,
            signal_rx,
            events: EventDispatcher::default(),
            status_tx,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Whether the target link is up.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.connected)
    }

    /// The active session, if a target is assigned.
    pub fn session(&self) -> Option<&ConnectionSession<PeripheralOf<A>>> {
        self.session.as_ref()
    }

    /// The configured target.
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// The discovery filter.
    pub fn discovery(&self) -> &DiscoveryFilter {
        &self.filter
    }

    /// The radio adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Time left until the pending retry fires.
    pub fn retry_pending(&self) -> Option<Duration> {
        self.pending_retry
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Current status snapshot.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            scanning: self.scanning,
            connected: self.is_connected(),
            target: self.session.as_ref().map(|s| s.info.id.clone()),
            retry_pending: self.pending_retry.is_some(),
        }
    }

    /// Watch status snapshots.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Run the lifecycle until `shutdown` is cancelled or the radio goes away.
    ///
    /// # Errors
    ///
    /// Only fails if the adapter's event stream cannot be opened. Every
    /// failure after that is handled inside the loop.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut radio = self.adapter.events().await?;
        info!("Waiting for Bluetooth adapter, target device: {}", self.target.name);

        loop {
            let retry_at = self.pending_retry;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                Some(signal) = self.signal_rx.recv() => {
                    self.handle_signal(signal).await;
                }
                event = radio.next() => match event {
                    Some(RadioEvent::StateChanged(state)) => self.handle_state_change(state).await,
                    Some(RadioEvent::Discovered(discovery)) => {
                        self.handle_advertisement(discovery).await;
                    }
                    None => {
                        warn!("Radio event stream ended");
                        break;
                    }
                },
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.fire_pending_retry().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Process every queued radio callback without waiting.
    ///
    /// [`run`](Self::run) does this on its own; this is for callers that
    /// drive the manager step by step.
    pub async fn process_signals(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.handle_signal(signal).await;
            handled += 1;
        }
        handled
    }

    async fn handle_signal(&mut self, signal: LinkSignal) {
        match signal {
            LinkSignal::LinkLost { epoch } if epoch == self.epoch => self.handle_link_lost(),
            LinkSignal::Notification {
                epoch,
                bytes,
                is_notification,
            } if epoch == self.epoch => match self.handle_notification(&bytes, is_notification) {
                Ok(values) => debug!(count = values.len(), "Notification handled"),
                Err(e) => debug!(reason = e.kind(), "Notification dropped"),
            },
            stale => debug!("Ignoring signal from an earlier session: {:?}", stale),
        }
    }

    /// React to an adapter power state change.
    pub async fn handle_state_change(&mut self, state: AdapterState) {
        info!("BLE adapter state: {}", state);
        self.adapter_state = state;

        if state.is_ready() {
            self.start_scanning().await;
            if self.scanning {
                self.cancel_retry();
                self.publish();
            }
            return;
        }

        warn!(reason = "radio_state", "{}", Error::RadioState(state));
        self.cancel_retry();
        self.scanning = false;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        if !self.is_connected() {
            self.set_state(LinkState::Idle);
        }
        self.publish();
    }

    /// Start an unfiltered scan.
    ///
    /// No-op while scanning, while a target is assigned, or while the
    /// adapter is not powered on.
    pub async fn start_scanning(&mut self) {
        if self.scanning || self.is_connected() || self.session.is_some() {
            debug!("Already scanning or connected");
            return;
        }
        if !self.adapter_state.is_ready() {
            warn!(
                reason = "radio_state",
                "{}",
                Error::RadioState(self.adapter_state)
            );
            return;
        }

        self.filter.clear();
        self.scanning = true;
        self.set_state(LinkState::Scanning);
        info!("Starting scan for all devices");

        match self.adapter.start_scan(&[], false).await {
            Ok(()) => info!("Scanning started, listening for devices"),
            Err(e) => {
                self.scanning = false;
                self.report(&Error::ScanStart(e.to_string()));
                self.set_state(LinkState::Backoff);
                self.schedule_retry();
            }
        }
    }

    /// Feed an advertisement through the discovery filter.
    pub async fn handle_advertisement(&mut self, discovery: Discovery<PeripheralOf<A>>) {
        let observation = self
            .filter
            .observe(&discovery.info, self.session.is_some());

        if let Some(record) = observation.record {
            info!(
                name = record.name.as_deref().unwrap_or("N/A"),
                id = %record.id,
                rssi = ?record.rssi,
                services = %record.services_label(),
                "Device found"
            );
            self.events.send(LinkEvent::Discovered { record });
        }

        if let Some(matched) = observation.matched {
            info!(
                "Found target device by {:?}: {} ({})",
                matched,
                discovery.info.display_name(),
                discovery.info.id
            );
            self.events.send(LinkEvent::TargetFound {
                id: discovery.info.id.clone(),
                matched,
            });
            self.connect_target(discovery).await;
        }
    }

    /// Promote `discovery` to target and bring the link up.
    ///
    /// No-op if a target is already assigned.
    pub async fn connect_target(&mut self, discovery: Discovery<PeripheralOf<A>>) {
        if self.session.is_some() {
            debug!("Target already assigned, ignoring {}", discovery.info.id);
            return;
        }

        let Discovery { info, peripheral } = discovery;
        let id = info.id.clone();
        info!(
            "Stopping scan and connecting to target: {}",
            info.display_name()
        );

        self.cancel_retry();
        self.scanning = false;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan before connecting: {}", e);
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let tx = self.signal_tx.clone();
        let on_lost = peripheral.on_disconnect(Arc::new(move || {
            let _ = tx.send(LinkSignal::LinkLost { epoch });
        }));
        self.session = Some(ConnectionSession {
            peripheral: peripheral.clone(),
            info,
            service: None,
            characteristic: None,
            connected: false,
            listeners: vec![on_lost],
        });
        self.set_state(LinkState::Connecting);

        if let Err(e) = peripheral.connect().await {
            let err = match e {
                err @ Error::Connect { .. } => err,
                other => Error::connect(id, other),
            };
            self.report(&err);
            info!("Connection failed, restarting scan after retry delay");
            self.end_session(LinkState::Backoff);
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.connected = true;
        }
        info!("Connected to {}", id);
        self.events.send(LinkEvent::Connected { id: id.clone() });
        self.set_state(LinkState::DiscoveringCapabilities);

        let characteristic = match self.resolve_capabilities(&peripheral).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                self.report(&e);
                self.disconnect_and_reset().await;
                return;
            }
        };

        self.set_state(LinkState::Subscribing);
        if let Err(e) = self.subscribe_notifications(&characteristic).await {
            self.report(&e);
            self.disconnect_and_reset().await;
            return;
        }

        info!("Subscribed, waiting for data");
        self.events.send(LinkEvent::Subscribed { id });
        self.set_state(LinkState::Streaming);
    }

    async fn resolve_capabilities(
        &mut self,
        peripheral: &PeripheralOf<A>,
    ) -> Result<CharacteristicOf<A>> {
        let service_id = self.target.service;
        let characteristic_id = self.target.characteristic;
        info!("Discovering services and characteristics");

        let service = peripheral
            .discover_services(&[service_id])
            .await?
            .into_iter()
            .find(|s| s.uuid() == service_id)
            .ok_or(Error::CapabilityNotFound(Capability::Service(service_id)))?;
        info!("Discovered target service: {}", service.uuid());
        if let Some(session) = self.session.as_mut() {
            session.service = Some(service_id);
        }

        let characteristic = service
            .discover_characteristics(&[characteristic_id])
            .await?
            .into_iter()
            .find(|c| c.uuid() == characteristic_id)
            .ok_or(Error::CapabilityNotFound(Capability::Characteristic(
                characteristic_id,
            )))?;
        info!("Discovered target characteristic: {}", characteristic.uuid());
        if let Some(session) = self.session.as_mut() {
            session.characteristic = Some(characteristic_id);
        }

        Ok(characteristic)
    }

    async fn subscribe_notifications(&mut self, characteristic: &CharacteristicOf<A>) -> Result<()> {
        info!("Subscribing to notifications");
        let epoch = self.epoch;
        let tx = self.signal_tx.clone();
        let handler: DataHandler = Arc::new(move |bytes: &[u8], is_notification: bool| {
            let _ = tx.send(LinkSignal::Notification {
                epoch,
                bytes: bytes.to_vec(),
                is_notification,
            });
        });

        // The handler must be attached before notifications are enabled.
        let guard = characteristic.on_data(handler).await.map_err(subscribe_error)?;
        if let Some(session) = self.session.as_mut() {
            session.listeners.push(guard);
        }
        characteristic.subscribe().await.map_err(subscribe_error)
    }

    /// Tear down the session after a failure and schedule a rescan.
    ///
    /// With a live link the peripheral is disconnected first; otherwise the
    /// state resets straight away.
    pub async fn disconnect_and_reset(&mut self) {
        let live = self
            .session
            .as_ref()
            .filter(|s| s.connected)
            .map(|s| s.peripheral.clone());

        if let Some(peripheral) = live {
            self.set_state(LinkState::Disconnecting);
            info!("Disconnecting due to error");
            if let Err(e) = peripheral.disconnect().await {
                let err = match e {
                    err @ Error::Disconnect(_) => err,
                    other => Error::Disconnect(other.to_string()),
                };
                self.report(&err);
            }
        } else {
            info!("Resetting state");
        }
        self.end_session(LinkState::Idle);
    }

    /// The link to the target dropped.
    pub fn handle_link_lost(&mut self) {
        let Some(session) = self.session.as_ref() else {
            debug!("Link lost with no session");
            return;
        };
        info!("Disconnected from {}", session.info.display_name());
        self.end_session(LinkState::Idle);
    }

    /// Decode one notification payload.
    ///
    /// A framing error drops the payload and leaves the link untouched.
    pub fn handle_notification(&mut self, bytes: &[u8], is_notification: bool) -> Result<Vec<i32>> {
        debug!(
            notification = is_notification,
            "Received {} bytes: {}",
            bytes.len(),
            hex_preview(bytes)
        );

        match decode_notification(bytes) {
            Ok(values) => {
                let values: Vec<i32> = values.collect();
                info!("Interpreted int32 values: {:?}", values);
                self.events.send(LinkEvent::Samples {
                    values: values.clone(),
                });
                Ok(values)
            }
            Err(e) => {
                let err = Error::from(e);
                warn!(reason = err.kind(), bytes = bytes.len(), "{}, skipping", err);
                self.events.send(LinkEvent::FramingError { len: bytes.len() });
                Err(err)
            }
        }
    }

    /// Run the pending retry now, if there is one.
    pub async fn fire_pending_retry(&mut self) {
        if self.pending_retry.take().is_none() {
            return;
        }
        debug!("Retry delay elapsed");
        if self.state == LinkState::Backoff {
            self.set_state(LinkState::Idle);
        }
        self.start_scanning().await;
        self.publish();
    }

    /// Stop everything and return to `Idle`. Failures are logged.
    pub async fn shutdown(&mut self) {
        info!("Shutting down link");
        self.cancel_retry();
        self.scanning = false;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Could not stop scanning on exit: {}", e);
        }

        if let Some(session) = self.session.take() {
            if session.connected {
                info!("Disconnecting peripheral");
                match session.peripheral.disconnect().await {
                    Ok(()) => info!("Disconnected"),
                    Err(e) => error!("Error disconnecting on exit: {}", e),
                }
                self.events.send(LinkEvent::Disconnected {
                    id: session.info.id.clone(),
                });
            }
        }

        self.epoch += 1;
        self.filter.clear();
        self.set_state(LinkState::Idle);
    }

    fn end_session(&mut self, next: LinkState) {
        self.epoch += 1;
        // Dropping the session detaches its listeners.
        if let Some(session) = self.session.take()
            && session.connected
        {
            self.events.send(LinkEvent::Disconnected {
                id: session.info.id,
            });
        }
        self.filter.clear();
        self.set_state(next);
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry.delay();
        if self.pending_retry.replace(Instant::now() + delay).is_some() {
            debug!("Replacing pending retry");
        }
        info!("Will attempt to scan again in {:?}", delay);
        self.events.send(LinkEvent::RetryScheduled { delay });
        self.publish();
    }

    fn cancel_retry(&mut self) {
        if self.pending_retry.take().is_some() {
            debug!("Pending retry cancelled");
        }
    }

    fn report(&self, err: &Error) {
        error!(reason = err.kind(), "{}", err);
        self.events.send(LinkEvent::Error {
            reason: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!("Link state {} -> {}", self.state, next);
            self.state = next;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}

fn subscribe_error(e: Error) -> Error {
    match e {
        err @ Error::Subscribe(_) => err,
        other => Error::Subscribe(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, MockPeripheral};
    use loadlink_types::uuids::DEFAULT_DEVICE_NAME;

    fn manager() -> ConnectionManager<MockAdapter> {
        ConnectionManager::new(
            MockAdapter::new(),
            TargetConfig::default(),
            RetryPolicy::default(),
        )
    }

    fn sensor(id: &str) -> MockPeripheral {
        MockPeripheral::builder(id).name(DEFAULT_DEVICE_NAME).build()
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::DiscoveringCapabilities.to_string(), "discovering_capabilities");
        assert_eq!(LinkState::default(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_start_scanning_requires_power() {
        let mut m = manager();
        m.start_scanning().await;
        assert_eq!(m.state(), LinkState::Idle);
        assert_eq!(m.adapter().scan_starts(), 0);

        m.handle_state_change(AdapterState::PoweredOn).await;
        assert_eq!(m.state(), LinkState::Scanning);
        assert!(m.is_scanning());
        assert_eq!(m.adapter().scan_starts(), 1);
        assert_eq!(m.adapter().last_scan(), Some((vec![], false)));
    }

    #[tokio::test]
    async fn test_start_scanning_is_idempotent() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        m.start_scanning().await;
        m.start_scanning().await;
        assert_eq!(m.adapter().scan_starts(), 1);
    }

    #[tokio::test]
    async fn test_scan_start_failure_resets_flag() {
        let adapter = MockAdapter::new();
        adapter.set_fail_scan(true);
        let mut m = ConnectionManager::new(adapter, TargetConfig::default(), RetryPolicy::default());
        m.handle_state_change(AdapterState::PoweredOn).await;
        assert!(!m.is_scanning());
        assert_eq!(m.state(), LinkState::Backoff);
        assert!(m.retry_pending().is_some());
    }

    #[tokio::test]
    async fn test_power_off_stops_scan() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        m.handle_state_change(AdapterState::PoweredOff).await;
        assert!(!m.is_scanning());
        assert_eq!(m.state(), LinkState::Idle);
        assert_eq!(m.adapter().scan_stops(), 1);
    }

    #[tokio::test]
    async fn test_power_cycle_restarts_scan() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        m.handle_state_change(AdapterState::PoweredOff).await;
        m.handle_state_change(AdapterState::PoweredOn).await;
        assert!(m.is_scanning());
        assert_eq!(m.state(), LinkState::Scanning);
        assert_eq!(m.adapter().scan_starts(), 2);
    }

    #[tokio::test]
    async fn test_power_on_during_backoff_cancels_retry() {
        let adapter = MockAdapter::new();
        adapter.set_fail_scan(true);
        let mut m = ConnectionManager::new(adapter, TargetConfig::default(), RetryPolicy::default());
        m.handle_state_change(AdapterState::PoweredOn).await;
        assert_eq!(m.state(), LinkState::Backoff);
        assert!(m.status().retry_pending);

        m.adapter().set_fail_scan(false);
        m.handle_state_change(AdapterState::PoweredOn).await;
        assert_eq!(m.state(), LinkState::Scanning);
        assert!(m.retry_pending().is_none());
        let status = m.status();
        assert!(status.scanning);
        assert!(!status.retry_pending);
        assert_eq!(*m.watch_status().borrow(), status);
    }

    #[tokio::test]
    async fn test_full_connect_reaches_streaming() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = sensor("A1");
        m.handle_advertisement(p.discovery()).await;

        assert_eq!(m.state(), LinkState::Streaming);
        assert!(m.is_connected());
        assert!(!m.is_scanning());
        assert_eq!(m.adapter().scan_stops(), 1);
        assert_eq!(p.connect_count(), 1);
        let session = m.session().unwrap();
        assert_eq!(session.service(), Some(m.target().service));
        assert_eq!(session.characteristic(), Some(m.target().characteristic));
        assert_eq!(session.listener_count(), 2);
        assert_eq!(p.handlers_at_subscribe(), Some(1));
    }

    #[tokio::test]
    async fn test_second_target_ignored() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let first = sensor("A1");
        let second = sensor("A2");
        m.handle_advertisement(first.discovery()).await;
        m.handle_advertisement(second.discovery()).await;
        m.connect_target(second.discovery()).await;
        assert_eq!(second.connect_count(), 0);
        assert_eq!(m.status().target.as_deref(), Some("A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_clears_target() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = MockPeripheral::builder("A1")
            .name(DEFAULT_DEVICE_NAME)
            .fail_connect(true)
            .build();
        m.handle_advertisement(p.discovery()).await;

        assert_eq!(m.state(), LinkState::Backoff);
        assert!(m.session().is_none());
        assert_eq!(p.listener_count(), 0);
        assert_eq!(m.retry_pending(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_disconnects() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = MockPeripheral::builder("A1")
            .name(DEFAULT_DEVICE_NAME)
            .without_characteristic()
            .build();
        let mut events = m.subscribe();
        m.handle_advertisement(p.discovery()).await;

        assert_eq!(p.disconnect_count(), 1);
        assert!(m.session().is_none());
        assert_eq!(m.discovery().seen_count(), 0);
        assert_eq!(m.state(), LinkState::Idle);
        assert!(m.retry_pending().is_some());

        let mut saw_reason = false;
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::Error { reason, .. } = event {
                saw_reason |= reason == "characteristic_not_found";
            }
        }
        assert!(saw_reason);

        // The disconnect callback fired during teardown belongs to the old session.
        assert_eq!(m.process_signals().await, 1);
        assert_eq!(m.state(), LinkState::Idle);
        assert_eq!(m.retry_pending(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_subscribe_failure_disconnects() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = MockPeripheral::builder("A1")
            .name(DEFAULT_DEVICE_NAME)
            .fail_subscribe(true)
            .build();
        m.handle_advertisement(p.discovery()).await;
        assert_eq!(p.disconnect_count(), 1);
        assert!(m.session().is_none());
        assert_eq!(p.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_link_lost_resets_and_schedules_once() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = sensor("A1");
        m.handle_advertisement(p.discovery()).await;

        p.drop_link();
        m.process_signals().await;
        assert_eq!(m.state(), LinkState::Idle);
        assert!(m.session().is_none());
        assert_eq!(m.discovery().seen_count(), 0);
        assert_eq!(p.listener_count(), 0);
        assert!(m.retry_pending().is_some());

        // A duplicate callback after reset is stale.
        p.drop_link();
        assert_eq!(m.process_signals().await, 0);
        assert!(m.retry_pending().is_some());
    }

    #[tokio::test]
    async fn test_notifications_decode() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = sensor("A1");
        m.handle_advertisement(p.discovery()).await;
        let mut events = m.subscribe();

        p.notify(&[1, 0, 0, 0, 2, 0, 0, 0]);
        p.notify(&[0; 5]);
        assert_eq!(m.process_signals().await, 2);

        assert_eq!(
            events.try_recv().unwrap(),
            LinkEvent::Samples { values: vec![1, 2] }
        );
        assert_eq!(events.try_recv().unwrap(), LinkEvent::FramingError { len: 5 });
        assert_eq!(m.state(), LinkState::Streaming);
    }

    #[tokio::test]
    async fn test_handle_notification_direct() {
        let mut m = manager();
        assert_eq!(m.handle_notification(&[255, 255, 255, 255], true).unwrap(), vec![-1]);
        assert!(matches!(
            m.handle_notification(&[1, 2, 3], true),
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_fire_pending_retry_rescans() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = MockPeripheral::builder("A1")
            .name(DEFAULT_DEVICE_NAME)
            .fail_connect(true)
            .build();
        m.handle_advertisement(p.discovery()).await;
        m.fire_pending_retry().await;
        assert_eq!(m.state(), LinkState::Scanning);
        assert!(m.retry_pending().is_none());
        assert_eq!(m.adapter().scan_starts(), 2);

        // Nothing pending, nothing happens.
        m.fire_pending_retry().await;
        assert_eq!(m.adapter().scan_starts(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let mut m = manager();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let p = sensor("A1");
        m.handle_advertisement(p.discovery()).await;

        m.shutdown().await;
        assert_eq!(m.state(), LinkState::Idle);
        assert_eq!(p.disconnect_count(), 1);
        assert!(m.session().is_none());
        assert!(m.retry_pending().is_none());
        assert_eq!(p.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_status_watch() {
        let mut m = manager();
        let rx = m.watch_status();
        m.handle_state_change(AdapterState::PoweredOn).await;
        let status = rx.borrow().clone();
        assert_eq!(status.state, LinkState::Scanning);
        assert!(status.scanning);
        assert!(!status.connected);
    }
}
