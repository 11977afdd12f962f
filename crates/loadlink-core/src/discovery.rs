//! Discovery filter for advertisement events.
//!
//! The filter reports each peripheral once per scanning epoch and decides
//! whether an advertisement is the configured target. It holds no
//! reference to the target itself; the connection manager tells it
//! whether a target is already assigned.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loadlink_types::uuids::{DEFAULT_DEVICE_NAME, SAMPLE_CHARACTERISTIC, SENSOR_SERVICE};

use crate::error::{Error, Result};
use crate::radio::PeripheralInfo;

/// Which peripheral to connect to and which capabilities to use on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Advertised name to match exactly.
    pub name: String,
    /// Data service UUID.
    pub service: Uuid,
    /// Notify characteristic UUID inside the service.
    pub characteristic: Uuid,
    /// Also promote peripherals advertising `service` when the name does not match.
    #[serde(default)]
    pub match_service: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            service: SENSOR_SERVICE,
            characteristic: SAMPLE_CHARACTERISTIC,
            match_service: false,
        }
    }
}

impl TargetConfig {
    /// Create a target config with default UUIDs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the service UUID.
    #[must_use]
    pub fn service(mut self, uuid: Uuid) -> Self {
        self.service = uuid;
        self
    }

    /// Set the characteristic UUID.
    #[must_use]
    pub fn characteristic(mut self, uuid: Uuid) -> Self {
        self.characteristic = uuid;
        self
    }

    /// Enable or disable the service UUID fallback match.
    #[must_use]
    pub fn match_service(mut self, enabled: bool) -> Self {
        self.match_service = enabled;
        self
    }

    /// Validate the config and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_config("target name must not be empty"));
        }
        Ok(())
    }
}

/// How an advertisement matched the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Advertised name equals the target name.
    Name,
    /// Advertised services include the target service.
    Service,
}

/// The one-time record emitted when a peripheral is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Advertised name.
    pub name: Option<String>,
    /// Address or platform id.
    pub id: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl DiscoveryRecord {
    fn from_info(info: &PeripheralInfo) -> Self {
        Self {
            name: info.name.clone(),
            id: info.id.clone(),
            rssi: info.rssi,
            services: info.services.clone(),
        }
    }

    /// Services as a comma separated list, or `(None Advertised)`.
    pub fn services_label(&self) -> String {
        if self.services.is_empty() {
            "(None Advertised)".to_string()
        } else {
            self.services
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

impl fmt::Display for DiscoveryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Discovered device:")?;
        writeln!(f, "  Name:     {}", self.name.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "  ID/Addr:  {}", self.id)?;
        match self.rssi {
            Some(rssi) => writeln!(f, "  RSSI:     {rssi}")?,
            None => writeln!(f, "  RSSI:     N/A")?,
        }
        write!(f, "  Services: {}", self.services_label())
    }
}

/// Result of feeding one advertisement through the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Set the first time this peripheral is seen in the current epoch.
    pub record: Option<DiscoveryRecord>,
    /// Set when the advertisement should be promoted to target.
    pub matched: Option<MatchKind>,
}

/// Deduplicates advertisements and detects the target.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    target_name: String,
    service: Option<Uuid>,
    seen: HashSet<String>,
}

impl DiscoveryFilter {
    /// Create a filter for the given target.
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            target_name: target.name.clone(),
            service: target.match_service.then_some(target.service),
            seen: HashSet::new(),
        }
    }

    /// Feed an advertisement.
    ///
    /// Promotion is only considered while no target is assigned, so the
    /// first match wins and later ones are ignored until the target clears.
    pub fn observe(&mut self, info: &PeripheralInfo, target_assigned: bool) -> Observation {
        let record = self
            .seen
            .insert(info.id.clone())
            .then(|| DiscoveryRecord::from_info(info));

        let matched = if target_assigned {
            None
        } else if info.name.as_deref() == Some(self.target_name.as_str()) {
            Some(MatchKind::Name)
        } else if self.service.is_some_and(|s| info.services.contains(&s)) {
            Some(MatchKind::Service)
        } else {
            None
        };

        Observation { record, matched }
    }

    /// Forget every peripheral seen so far.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    /// Number of distinct peripherals seen this epoch.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Whether `id` was already reported this epoch.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }
}
