//! Example: Listing nearby BLE peripherals
//!
//! Scans for ten seconds and prints one discovery record per peripheral,
//! marking the one that matches the default sensor name.
//!
//! Run with: `cargo run --example scan_devices`

use std::time::Duration;

use futures::StreamExt;
use loadlink_core::btle::BtleAdapter;
use loadlink_core::{DiscoveryFilter, RadioAdapter, RadioEvent, TargetConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let target = TargetConfig::default();
    let adapter = BtleAdapter::first().await?;
    let mut events = adapter.events().await?;
    let mut filter = DiscoveryFilter::new(&target);

    println!("Scanning for BLE devices (target: {})...", target.name);
    println!();
    adapter.start_scan(&[], false).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(RadioEvent::Discovered(discovery)) => {
                    let observation = filter.observe(&discovery.info, false);
                    if let Some(record) = observation.record {
                        println!("{}", record);
                        if observation.matched.is_some() {
                            println!("  ^ target device");
                        }
                        println!();
                    }
                }
                Some(RadioEvent::StateChanged(state)) => println!("Adapter state: {}", state),
                None => break,
            },
        }
    }

    adapter.stop_scan().await?;
    println!("Found {} device(s).", filter.seen_count());
    Ok(())
}
