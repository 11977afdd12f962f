//! Application state shared across handlers.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use loadlink_types::SampleBatch;

use crate::config::Config;
use crate::hub::RelayHub;
use crate::messages::{ClientRole, Inbound};
use crate::sink::{PersistenceSink, Point, spawn_writer};

/// Shared application state.
pub struct AppState {
    /// Live connections by role.
    pub hub: RelayHub,
    /// Where samples are persisted; `None` when the sink is disabled.
    pub sink: Option<Arc<dyn PersistenceSink>>,
    /// Configuration the relay was started with.
    pub config: Config,
    /// When the relay started.
    pub started_at: OffsetDateTime,
    writer: Option<mpsc::Sender<Vec<Point>>>,
}

impl AppState {
    /// Create new application state.
    ///
    /// With a sink, this starts its background writer and so must be called
    /// within a Tokio runtime.
    pub fn new(config: Config, sink: Option<Arc<dyn PersistenceSink>>) -> Arc<Self> {
        let writer = sink
            .as_ref()
            .map(|sink| spawn_writer(Arc::clone(sink), config.relay.channel_capacity));
        Arc::new(Self {
            hub: RelayHub::new(config.relay.channel_capacity),
            sink,
            config,
            started_at: OffsetDateTime::now_utc(),
            writer,
        })
    }

    /// Route one frame from a classified connection.
    ///
    /// A frame that cannot be parsed is logged and dropped; the connection
    /// stays open. Persistence never delays the fan-out.
    pub async fn handle_message(&self, role: ClientRole, text: &str) {
        match Inbound::parse(role, text) {
            Ok(Inbound::Command { cmd }) => {
                let delivered = self.hub.forward_command(text).await;
                info!(clients = delivered, "Forwarded {} command to ESP", cmd);
            }
            Ok(Inbound::Samples { batch, rejected }) => {
                info!("Received {} samples from ESP", batch.len() + rejected);
                self.hub.forward_samples(text).await;
                if rejected > 0 {
                    warn!(reason = "transport_parse", rejected, "Skipping malformed samples");
                }
                for (i, sample) in batch.samples.iter().take(3).enumerate() {
                    debug!("Sample {}: {}", i + 1, sample);
                }
                self.persist(&batch);
            }
            Ok(Inbound::Other) => debug!(%role, "Ignoring message"),
            Err(e) => error!(reason = e.kind(), %role, "Error processing message: {}", e),
        }
    }

    /// Hand the batch to the sink writer without waiting for it.
    fn persist(&self, batch: &SampleBatch) {
        let Some(writer) = &self.writer else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        let measurement = &self.config.sink.measurement;
        let points = batch
            .samples
            .iter()
            .map(|sample| Point::from_sample(measurement, sample))
            .collect();
        match writer.try_send(points) {
            Ok(()) => {}
            Err(TrySendError::Full(points)) => {
                warn!(reason = "sink", "Sink backlog full, dropping {} points", points.len());
            }
            Err(TrySendError::Closed(_)) => error!(reason = "sink", "Sink writer is gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::error::SinkError;
    use crate::sink::MemorySink;

    fn state_with_sink() -> (Arc<AppState>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let state = AppState::new(
            Config::default(),
            Some(Arc::clone(&sink) as Arc<dyn PersistenceSink>),
        );
        (state, sink)
    }

    async fn wait_for_flushes(sink: &MemorySink, count: usize) {
        timeout(Duration::from_secs(5), async {
            while sink.flushes() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink was not flushed in time");
    }

    /// Holds every flush until permits are added.
    struct GatedSink {
        inner: MemorySink,
        gate: Semaphore,
    }

    #[async_trait]
    impl PersistenceSink for GatedSink {
        async fn write_point(&self, point: Point) {
            self.inner.write_point(point).await;
        }

        async fn flush(&self) -> Result<(), SinkError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SinkError::Unavailable(e.to_string()))?;
            permit.forget();
            self.inner.flush().await
        }
    }

    #[tokio::test]
    async fn test_samples_fan_out_and_persist() {
        let (state, sink) = state_with_sink();
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        let text = r#"{"samples":[{"t":1,"l":10,"r":20},{"t":2,"l":11,"r":21}]}"#;
        state.handle_message(ClientRole::Esp, text).await;

        assert_eq!(browser.recv().await.as_deref(), Some(text));
        wait_for_flushes(&sink, 1).await;
        let written = sink.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].measurement, "loadcell");
        assert_eq!(written[0].field("left"), Some(10));
        assert_eq!(written[1].field("timestamp"), Some(2));
        assert_eq!(sink.flushes(), 1);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_delay_fan_out() {
        let sink = Arc::new(GatedSink {
            inner: MemorySink::new(),
            gate: Semaphore::new(0),
        });
        let state = AppState::new(
            Config::default(),
            Some(Arc::clone(&sink) as Arc<dyn PersistenceSink>),
        );
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        let batches: Vec<String> = (0..3)
            .map(|t| format!(r#"{{"samples":[{{"t":{},"l":1,"r":2}}]}}"#, t))
            .collect();
        for text in &batches {
            timeout(
                Duration::from_secs(1),
                state.handle_message(ClientRole::Esp, text),
            )
            .await
            .expect("fan-out waited on the sink");
        }
        for text in &batches {
            assert_eq!(browser.recv().await.as_deref(), Some(text.as_str()));
        }
        assert!(sink.inner.written().is_empty());

        // Batches queued behind the held flush are written together.
        sink.gate.add_permits(8);
        timeout(Duration::from_secs(5), async {
            while sink.inner.written().len() < 3 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink never caught up");
        assert!((1..=2).contains(&sink.inner.flushes()));
    }

    #[tokio::test]
    async fn test_flush_failure_is_not_fatal() {
        let (state, sink) = state_with_sink();
        sink.set_failure(Some("influx down"));
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        let text = r#"{"samples":[{"t":1,"l":1,"r":1}]}"#;
        state.handle_message(ClientRole::Esp, text).await;
        assert!(browser.recv().await.is_some());
        wait_for_flushes(&sink, 1).await;
        state.handle_message(ClientRole::Esp, text).await;
        assert!(browser.recv().await.is_some());
        wait_for_flushes(&sink, 2).await;

        assert!(sink.written().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_samples_still_forwarded() {
        let (state, sink) = state_with_sink();
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        let text = r#"{"samples":[{"t":1,"l":5},{"t":2,"l":6,"r":7}]}"#;
        state.handle_message(ClientRole::Esp, text).await;
        assert_eq!(browser.recv().await.as_deref(), Some(text));

        wait_for_flushes(&sink, 1).await;
        let written = sink.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].field("timestamp"), Some(2));

        // Nothing usable: forwarded, not persisted.
        let text = r#"{"samples":"nope"}"#;
        state.handle_message(ClientRole::Esp, text).await;
        assert_eq!(browser.recv().await.as_deref(), Some(text));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.flushes(), 1);
    }

    #[tokio::test]
    async fn test_command_to_esp_only() {
        let (state, sink) = state_with_sink();
        let (_, mut esp) = state.hub.register(ClientRole::Esp).await;
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        state
            .handle_message(ClientRole::Browser, r#"{"cmd":"stop"}"#)
            .await;
        assert_eq!(esp.recv().await.as_deref(), Some(r#"{"cmd":"stop"}"#));
        assert!(browser.try_recv().is_err());
        assert_eq!(sink.flushes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_frames_are_dropped() {
        let (state, sink) = state_with_sink();
        let (_, mut esp) = state.hub.register(ClientRole::Esp).await;
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;

        state.handle_message(ClientRole::Browser, "{oops").await;
        state.handle_message(ClientRole::Esp, "{oops").await;
        state
            .handle_message(ClientRole::Esp, r#"{"samples":null}"#)
            .await;
        // Browsers cannot inject samples, devices cannot send commands.
        state
            .handle_message(ClientRole::Browser, r#"{"samples":[]}"#)
            .await;
        state
            .handle_message(ClientRole::Esp, r#"{"cmd":"start"}"#)
            .await;

        assert!(esp.try_recv().is_err());
        assert!(browser.try_recv().is_err());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.flushes(), 0);
    }

    #[tokio::test]
    async fn test_disabled_sink() {
        let state = AppState::new(Config::default(), None);
        let (_, mut browser) = state.hub.register(ClientRole::Browser).await;
        state
            .handle_message(ClientRole::Esp, r#"{"samples":[]}"#)
            .await;
        assert!(browser.recv().await.is_some());
    }
}
