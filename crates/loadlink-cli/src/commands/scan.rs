//! Scan command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use loadlink_core::btle::BtleAdapter;
use loadlink_core::{DiscoveryFilter, RadioAdapter, RadioEvent, TargetConfig};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::format::format_record;

/// Scan without a service filter and print each peripheral once.
pub async fn cmd_scan(
    duration: u64,
    target: TargetConfig,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    target.validate()?;

    let adapter = BtleAdapter::first()
        .await
        .context("No Bluetooth adapter available")?;
    let mut events = adapter
        .events()
        .await
        .context("Failed to open adapter events")?;
    adapter
        .start_scan(&[], false)
        .await
        .context("Failed to start scan")?;

    if !quiet {
        info!("Scanning for {}s (target: {})", duration, target.name);
    }

    let mut filter = DiscoveryFilter::new(&target);
    let mut found = 0usize;

    // The stream never ends on its own, so the timeout is the normal exit.
    let _ = timeout(Duration::from_secs(duration), async {
        while let Some(event) = events.next().await {
            let RadioEvent::Discovered(discovery) = event else {
                continue;
            };
            let observation = filter.observe(&discovery.info, false);
            let Some(record) = observation.record else {
                continue;
            };
            let is_target = observation.matched.is_some();
            if is_target {
                found += 1;
            }
            let line = format_record(&record, is_target, format)?;
            println!("{}", line);
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
    .unwrap_or(Ok(()))?;

    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan: {}", e);
    }

    if !quiet {
        info!(
            "Scan finished: {} peripherals, {} matching the target",
            filter.seen_count(),
            found
        );
    }
    Ok(())
}
