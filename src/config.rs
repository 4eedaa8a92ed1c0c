//! Configuration store.
//!
//! The record is a JSON object holding the ten leaves in [`REQUIRED_PATHS`].
//! It is written once per provisioning, read once per boot, and removed by a
//! factory reset.

use serde_json::Value;

use log::{info, warn};

use crate::error::ConfigError;
use crate::model::Configuration;
use crate::traits::{ConfigFile, ReadError};

/// Leaves that must be present and non-null, dot separated.
pub const REQUIRED_PATHS: [&str; 10] = [
    "wifi.ssid",
    "wifi.password",
    "device.name",
    "mqtt.broker",
    "mqtt.port",
    "mqtt.username",
    "mqtt.password",
    "mqtt.topic",
    "readings.sleep",
    "readings.number",
];

fn leaf<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |node, key| node.get(key))
        .filter(|v| !v.is_null())
}

/// Check `candidate` and build the typed configuration from it. Unknown keys
/// are ignored.
pub fn validate(candidate: &Value) -> Result<Configuration, ConfigError> {
    if let Some(missing) = REQUIRED_PATHS
        .iter()
        .find(|path| leaf(candidate, path).is_none())
    {
        return Err(ConfigError::Invalid(*missing));
    }

    let config: Configuration = serde_json::from_value(candidate.clone())
        .map_err(|_| ConfigError::Invalid("value of the wrong type or out of range"))?;

    if config.readings.number == 0 {
        return Err(ConfigError::Invalid("readings.number must be at least 1"));
    }
    Ok(config)
}

pub struct ConfigStore<F: ConfigFile> {
    file: F,
}

impl<F: ConfigFile> ConfigStore<F> {
    pub fn new(file: F) -> Self {
        Self { file }
    }

    /// Load the stored configuration. A record that cannot be used is removed
    /// before returning [`ConfigError::Corrupt`], so the next boot provisions.
    /// A failed storage access leaves the record alone and reports
    /// [`ConfigError::Storage`].
    pub fn load(&mut self) -> Result<Configuration, ConfigError> {
        let bytes = match self.file.read() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(ConfigError::Absent),
            Err(ReadError::Io(e)) => {
                warn!("config: storage read failed: {}", e);
                return Err(ConfigError::Storage(e));
            }
            Err(ReadError::Damaged(e)) => {
                warn!("config: damaged record: {}", e);
                return Err(self.discard());
            }
        };

        let config = serde_json::from_slice::<Value>(&bytes)
            .map_err(|_| ConfigError::Corrupt)
            .and_then(|value| validate(&value));

        match config {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("config: stored record rejected: {}", e);
                Err(self.discard())
            }
        }
    }

    /// Validate `candidate` and persist it verbatim, replacing any previous
    /// record.
    pub fn create(&mut self, candidate: &Value) -> Result<Configuration, ConfigError> {
        let config = validate(candidate)?;
        let bytes = serde_json::to_vec(candidate)
            .map_err(|_| ConfigError::Invalid("not serializable"))?;
        self.file.write(&bytes).map_err(ConfigError::Storage)?;
        info!(
            "config: saved configuration for '{}' ({} bytes)",
            config.device.name,
            bytes.len()
        );
        Ok(config)
    }

    /// Delete the record. The caller restarts the device afterwards.
    pub fn factory_reset(&mut self) -> Result<(), ConfigError> {
        info!("config: factory reset");
        self.file.remove().map_err(ConfigError::Storage)
    }

    pub fn file(&self) -> &F {
        &self.file
    }

    fn discard(&mut self) -> ConfigError {
        if let Err(e) = self.file.remove() {
            warn!("config: could not remove corrupt record: {}", e);
        }
        ConfigError::Corrupt
    }
}
