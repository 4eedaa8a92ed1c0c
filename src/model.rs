// Data carried between wakes and the settings that drive a cycle

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// One measurement. Field names match the published payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: u64,
    #[serde(rename = "temp")]
    pub temperature_c: f32,
    #[serde(rename = "pressure")]
    pub pressure_hpa: f32,
    #[serde(rename = "humidity")]
    pub humidity_pct: f32,
}

impl Reading {
    /// JSON has no NaN or infinity, so only finite readings survive a round
    /// trip through retained memory.
    pub fn is_finite(&self) -> bool {
        self.temperature_c.is_finite() && self.pressure_hpa.is_finite() && self.humidity_pct.is_finite()
    }
}

/// Batch state that survives deep sleep.
///
/// `count` is the number of wakes since the last successful send. It
/// saturates at 255 instead of wrapping, so a long outage never pushes it back
/// below the batch threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetainedState {
    pub count: u8,
    pub readings: Vec<Reading>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiSettings {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSettings {
    /// Milliseconds of deep sleep between wakes.
    pub sleep: u64,
    /// Batch threshold.
    pub number: u8,
}

/// Validated node configuration, see [`crate::config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub wifi: WifiSettings,
    pub device: DeviceSettings,
    pub mqtt: MqttSettings,
    pub readings: ReadingSettings,
}
