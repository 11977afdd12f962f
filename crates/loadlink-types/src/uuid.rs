//! Default identifiers for the load-cell sensor peripheral.
//!
//! These match the firmware shipped on the sensor board. Every value can be
//! overridden at startup; see `TargetConfig` in loadlink-core.

use uuid::{Uuid, uuid};

/// Advertised local name of the sensor board.
pub const DEFAULT_DEVICE_NAME: &str = "ESP32_Nano_Sensor";

/// Custom GATT service exposing the sample characteristic.
pub const SENSOR_SERVICE: Uuid = uuid!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

/// Notify characteristic carrying packed little-endian `i32` samples.
pub const SAMPLE_CHARACTERISTIC: Uuid = uuid!("beb5483e-36e1-4688-b7f5-ea07361b26a8");

/// Format a UUID the way advertisement service lists report it
/// on some platforms (lowercase, no dashes).
pub fn compact(uuid: &Uuid) -> String {
    uuid.simple().to_string()
}
