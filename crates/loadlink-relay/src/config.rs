//! Relay configuration.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//!
//! [sink]
//! enabled = true
//! url = "http://influxdb:8086"
//! org = "sport-appeal"
//! bucket = "loadcell-bucket"
//! token = "..."
//! measurement = "loadcell"
//! precision = "ns"
//!
//! [relay]
//! channel_capacity = 256
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hub::DEFAULT_CHANNEL_CAPACITY;
use crate::sink::DEFAULT_MEASUREMENT;

/// Relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Persistence sink settings.
    pub sink: SinkConfig,
    /// Fan-out settings.
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem at once.
    ///
    /// ```
    /// use loadlink_relay::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.sink.validate());
        errors.extend(self.relay.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Timestamp precision of the InfluxDB write API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Nanoseconds.
    #[default]
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
}

impl Precision {
    /// Query-string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ns => "ns",
            Self::Us => "us",
            Self::Ms => "ms",
            Self::S => "s",
        }
    }
}

/// Persistence sink configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Write samples to InfluxDB.
    pub enabled: bool,
    /// InfluxDB base URL.
    pub url: String,
    /// Organization.
    pub org: String,
    /// Bucket.
    pub bucket: String,
    /// API token.
    pub token: Option<String>,
    /// Measurement samples are written under.
    pub measurement: String,
    /// Timestamp precision.
    pub precision: Precision,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://influxdb:8086".to_string(),
            org: "sport-appeal".to_string(),
            bucket: "loadcell-bucket".to_string(),
            token: None,
            measurement: DEFAULT_MEASUREMENT.to_string(),
            precision: Precision::Ns,
            timeout_secs: 10,
        }
    }
}

// Keep the token out of logs.
impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("measurement", &self.measurement)
            .field("precision", &self.precision)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SinkConfig {
    /// Validate sink configuration. A disabled sink is always valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errors.push(ValidationError::new(
                "sink.url",
                format!("invalid URL '{}': must start with http:// or https://", self.url),
            ));
        }
        for (field, value) in [
            ("sink.org", &self.org),
            ("sink.bucket", &self.bucket),
            ("sink.measurement", &self.measurement),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::new(field, "cannot be empty"));
            }
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sink.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }

        errors
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Frames queued per connection, and batches queued for the sink,
    /// before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Validate fan-out configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.channel_capacity == 0 {
            vec![ValidationError::new(
                "relay.channel_capacity",
                "channel capacity must be at least 1",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loadlink")
        .join("relay.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(config.sink.enabled);
        assert_eq!(config.sink.org, "sport-appeal");
        assert_eq!(config.sink.bucket, "loadcell-bucket");
        assert_eq!(config.sink.measurement, "loadcell");
        assert_eq!(config.relay.channel_capacity, 256);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [sink]
            token = "secret"
            precision = "ms"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.sink.token.as_deref(), Some("secret"));
        assert_eq!(config.sink.precision, Precision::Ms);
        assert_eq!(config.sink.url, "http://influxdb:8086");
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("relay.toml");

        let config = Config {
            server: ServerConfig {
                bind: "127.0.0.1:9000".to_string(),
            },
            sink: SinkConfig {
                enabled: false,
                bucket: "test".to_string(),
                ..SinkConfig::default()
            },
            relay: RelayConfig {
                channel_capacity: 8,
            },
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/relay.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("loadlink/relay.toml"));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_server_bind_validation() {
        let bind = |s: &str| ServerConfig {
            bind: s.to_string(),
        };
        assert!(bind("127.0.0.1:3000").validate().is_empty());
        assert!(bind("[::1]:3000").validate().is_empty());
        assert!(bind("localhost:3000").validate().is_empty());

        let errors = bind("").validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cannot be empty"));

        let errors = bind("127.0.0.1").validate();
        assert!(errors[0].message.contains("host:port"));

        let errors = bind("127.0.0.1:0").validate();
        assert!(errors[0].message.contains("cannot be 0"));

        let errors = bind("127.0.0.1:abc").validate();
        assert!(errors[0].message.contains("must be a number"));
    }

    #[test]
    fn test_sink_validation() {
        let sink = SinkConfig {
            url: "influxdb:8086".to_string(),
            bucket: " ".to_string(),
            timeout_secs: 0,
            ..SinkConfig::default()
        };
        let errors = sink.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["sink.url", "sink.bucket", "sink.timeout_secs"]);

        let disabled = SinkConfig {
            enabled: false,
            ..sink
        };
        assert!(disabled.validate().is_empty());
    }

    #[test]
    fn test_all_errors_reported() {
        let config = Config {
            server: ServerConfig {
                bind: "nope".to_string(),
            },
            sink: SinkConfig {
                org: String::new(),
                ..SinkConfig::default()
            },
            relay: RelayConfig {
                channel_capacity: 0,
            },
        };
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);

        let display = ConfigError::Validation(errors).to_string();
        assert!(display.contains("server.bind"));
        assert!(display.contains("sink.org"));
        assert!(display.contains("relay.channel_capacity"));
    }

    #[test]
    fn test_sink_debug_redacts_token() {
        let sink = SinkConfig {
            token: Some("t0k3n".to_string()),
            ..SinkConfig::default()
        };
        let debug = format!("{:?}", sink);
        assert!(!debug.contains("t0k3n"));
        assert!(debug.contains("redacted"));
    }
}
