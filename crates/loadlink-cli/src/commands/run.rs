//! Run command: keep a subscription to the sensor alive and print samples.

use std::io::{self, Write};

use anyhow::{Context, Result};
use loadlink_core::btle::{BtleAdapter, BtleOptions};
use loadlink_core::{ConnectionManager, EventReceiver};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{OutputFormat, RunArgs};
use crate::format::format_event;

/// Run the connection manager until Ctrl+C.
pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let target = args.target.to_config();
    target.validate()?;
    let retry = args.retry_policy();
    retry.validate()?;

    let adapter = BtleAdapter::first()
        .await
        .context("No Bluetooth adapter available")?
        .with_options(BtleOptions::default().connection_timeout(args.connection_timeout()));

    info!(
        "Looking for \"{}\" (service {}, characteristic {})",
        target.name, target.service, target.characteristic
    );

    let mut manager = ConnectionManager::new(adapter, target, retry);
    let printer = tokio::spawn(print_events(manager.subscribe(), args.format));

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        token.cancel();
    });

    let result = manager.run(shutdown).await;

    // Dropping the manager closes the event channel and ends the printer.
    drop(manager);
    if let Err(e) = printer.await {
        warn!("Event printer stopped abnormally: {}", e);
    }

    result.context("Connection manager failed")
}

async fn print_events(mut events: EventReceiver, format: OutputFormat) {
    loop {
        match events.recv().await {
            Ok(event) => match format_event(&event, format) {
                Ok(Some(line)) => {
                    let mut stdout = io::stdout().lock();
                    if writeln!(stdout, "{}", line).and_then(|()| stdout.flush()).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to format event: {}", e),
            },
            Err(RecvError::Lagged(n)) => warn!("Output fell behind, skipped {} events", n),
            Err(RecvError::Closed) => return,
        }
    }
}
