//! WebSocket relay between load-cell devices, browsers and InfluxDB.
//!
//! Every connection to `/ws` classifies itself with its first frame:
//!
//! - `{"type": "esp"}`: the sensor device. Its `{"samples": [...]}` frames
//!   go to every browser and, sample by sample, to InfluxDB.
//! - `{"type": "browser"}`: a dashboard. Its `{"cmd": "..."}` frames go
//!   to every device.
//!
//! Any other first frame closes the connection.
//!
//! # HTTP Endpoints
//!
//! - `GET /api/health` - Health check with connection counts
//! - `WS /ws` - Relay endpoint
//!
//! # Configuration
//!
//! The relay reads `~/.config/loadlink/relay.toml`; see [`config`].

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod messages;
pub mod sink;
pub mod state;
pub mod ws;

pub use config::{
    Config, ConfigError, Precision, RelayConfig, ServerConfig, SinkConfig, ValidationError,
};
pub use error::{RelayError, Result, SinkError};
pub use hub::{ClientId, RelayHub};
pub use messages::{ClientRole, Hello, Inbound};
pub use sink::{InfluxSink, MemorySink, PersistenceSink, Point};
pub use state::AppState;
