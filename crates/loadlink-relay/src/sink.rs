//! Persistence sinks for relayed samples.
//!
//! A sink buffers points as they arrive and writes them out on
//! [`PersistenceSink::flush`]. The relay never calls a sink from a
//! connection task: batches go through [`spawn_writer`], whose task writes
//! and flushes them in the background and only logs a failed flush.
//!
//! [`InfluxSink`] speaks the InfluxDB v2 write API:
//!
//! ```text
//! POST {url}/api/v2/write?org={org}&bucket={bucket}&precision={precision}
//! Authorization: Token {token}
//!
//! loadcell left=120i,right=118i,timestamp=1000i
//! ```

use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error};

use loadlink_types::SamplePoint;

use crate::config::SinkConfig;
use crate::error::{RelayError, SinkError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Measurement name samples are written under.
pub const DEFAULT_MEASUREMENT: &str = "loadcell";

/// A measurement with integer fields.
///
/// No explicit time is attached; the backend stamps the point on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    /// Measurement name.
    pub measurement: String,
    /// Fields in insertion order.
    pub fields: Vec<(String, i64)>,
}

impl Point {
    /// Start a point with no fields.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
        }
    }

    /// Add an integer field.
    #[must_use]
    pub fn int_field(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// The point for one sample: fields `left`, `right` and `timestamp`.
    pub fn from_sample(measurement: &str, sample: &SamplePoint) -> Self {
        Self::new(measurement)
            .int_field("left", sample.left)
            .int_field("right", sample.right)
            .int_field("timestamp", sample.timestamp)
    }

    /// Value of a field, if set.
    pub fn field(&self, key: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    /// Render as one line of InfluxDB line protocol.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (i, (key, value)) in self.fields.iter().enumerate() {
            line.push(if i == 0 { ' ' } else { ',' });
            let _ = write!(line, "{}={}i", escape(key, &[',', '=', ' ']), value);
        }
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Where relayed samples are persisted.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Buffer a point for the next flush.
    async fn write_point(&self, point: Point);

    /// Write out everything buffered.
    async fn flush(&self) -> Result<(), SinkError>;
}

/// Start the background task that feeds `sink`.
///
/// Each message is one batch of points. Batches that queue up while a
/// flush is in flight are written together and flushed once. The task
/// ends when every sender is dropped. Must be called within a Tokio
/// runtime.
pub fn spawn_writer(sink: Arc<dyn PersistenceSink>, capacity: usize) -> mpsc::Sender<Vec<Point>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run_writer(sink, rx));
    tx
}

async fn run_writer(sink: Arc<dyn PersistenceSink>, mut rx: mpsc::Receiver<Vec<Point>>) {
    while let Some(points) = rx.recv().await {
        let mut count = points.len();
        for point in points {
            sink.write_point(point).await;
        }
        while let Ok(points) = rx.try_recv() {
            count += points.len();
            for point in points {
                sink.write_point(point).await;
            }
        }

        debug!(points = count, "Flushing sink");
        if let Err(e) = sink.flush().await {
            let e = RelayError::from(e);
            error!(reason = e.kind(), "Influx flush error: {}", e);
        }
    }
    debug!("Sink writer stopped");
}

/// Sink writing to InfluxDB over HTTP.
pub struct InfluxSink {
    client: Client,
    write_url: String,
    org: String,
    bucket: String,
    precision: &'static str,
    token: Option<String>,
    buffer: Mutex<Vec<String>>,
}

impl InfluxSink {
    /// Create a sink from configuration.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            precision: config.precision.as_str(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            buffer: Mutex::new(Vec::new()),
        })
    }

    /// Write endpoint, without query parameters.
    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    /// Number of lines waiting for the next flush.
    pub fn pending(&self) -> usize {
        lock(&self.buffer).len()
    }
}

#[async_trait]
impl PersistenceSink for InfluxSink {
    async fn write_point(&self, point: Point) {
        lock(&self.buffer).push(point.to_line_protocol());
    }

    /// Lines are dropped from the buffer whether or not the write succeeds.
    async fn flush(&self) -> Result<(), SinkError> {
        let lines = std::mem::take(&mut *lock(&self.buffer));
        if lines.is_empty() {
            return Ok(());
        }

        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", self.precision),
            ])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines.join("\n"));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Flush {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Flushed {} points to InfluxDB", lines.len());
        Ok(())
    }
}

/// Sink keeping points in memory.
///
/// Useful for tests and for running the relay without a database.
#[derive(Default)]
pub struct MemorySink {
    buffered: Mutex<Vec<Point>>,
    written: Mutex<Vec<Point>>,
    flushes: Mutex<usize>,
    fail: Mutex<Option<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every flush fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *lock(&self.fail) = reason.map(str::to_string);
    }

    /// Points that were flushed successfully.
    pub fn written(&self) -> Vec<Point> {
        lock(&self.written).clone()
    }

    /// Points waiting for a flush.
    pub fn buffered(&self) -> usize {
        lock(&self.buffered).len()
    }

    /// Number of flush calls.
    pub fn flushes(&self) -> usize {
        *lock(&self.flushes)
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write_point(&self, point: Point) {
        lock(&self.buffered).push(point);
    }

    async fn flush(&self) -> Result<(), SinkError> {
        *lock(&self.flushes) += 1;
        let points = std::mem::take(&mut *lock(&self.buffered));
        if let Some(reason) = lock(&self.fail).clone() {
            return Err(SinkError::Unavailable(reason));
        }
        lock(&self.written).extend(points);
        Ok(())
    }
}
