//! Hardware integration tests for loadlink-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```
//! cargo test --package loadlink-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the target via environment variables:
//! - `LOADLINK_DEVICE_NAME`: advertised name of the sensor (default `ESP32_Nano_Sensor`)

use std::env;
use std::time::Duration;

use futures::StreamExt;
use loadlink_core::btle::BtleAdapter;
use loadlink_core::{
    ConnectionManager, LinkEvent, RadioAdapter, RadioEvent, RetryPolicy, TargetConfig,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Target config from the environment.
fn target() -> TargetConfig {
    env::var("LOADLINK_DEVICE_NAME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(TargetConfig::new)
        .unwrap_or_default()
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_reports_advertisements() {
    let adapter = BtleAdapter::first().await.expect("no Bluetooth adapter");
    let mut events = adapter.events().await.expect("event stream");
    adapter.start_scan(&[], false).await.expect("start scan");

    let mut seen = 0;
    let _ = timeout(Duration::from_secs(10), async {
        while let Some(event) = events.next().await {
            if let RadioEvent::Discovered(discovery) = event {
                println!("  - {} ({})", discovery.info.display_name(), discovery.info.id);
                seen += 1;
            }
        }
    })
    .await;

    adapter.stop_scan().await.expect("stop scan");
    println!("Scan reported {} advertisements", seen);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_receive_samples() {
    let adapter = BtleAdapter::first().await.expect("no Bluetooth adapter");
    let mut manager = ConnectionManager::new(adapter, target(), RetryPolicy::default());
    let mut events = manager.subscribe();
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        manager.run(token).await.expect("manager run");
        manager
    });

    let received = timeout(BLE_TIMEOUT, async {
        while let Ok(event) = events.recv().await {
            if let LinkEvent::Samples { values } = event {
                return values;
            }
        }
        Vec::new()
    })
    .await;

    shutdown.cancel();
    let manager = handle.await.expect("manager task");
    assert!(!manager.is_connected());

    match received {
        Ok(values) => println!("Received values: {:?}", values),
        Err(_) => panic!("No samples within {:?}", BLE_TIMEOUT),
    }
}
