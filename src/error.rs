//! Error kinds surfaced by the policy layer.
//!
//! Adapters report `&'static str`; the policy code folds those into the
//! enums below so callers can tell recoverable cases apart.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No configuration record exists.
    Absent,
    /// A record existed but could not be read back as a configuration. It has
    /// been removed.
    Corrupt,
    /// A candidate is missing a required leaf or carries an unusable value.
    Invalid(&'static str),
    /// The backing storage refused a write or delete.
    Storage(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Absent => write!(f, "no configuration stored"),
            ConfigError::Corrupt => write!(f, "stored configuration is corrupt"),
            ConfigError::Invalid(what) => write!(f, "invalid configuration: {}", what),
            ConfigError::Storage(what) => write!(f, "configuration storage error: {}", what),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    EncodingTooLarge { len: usize, capacity: usize },
    /// A reading holds NaN or infinity, which JSON cannot carry.
    NonFinite,
    Serialize,
    Store(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::EncodingTooLarge { len, capacity } => {
                write!(f, "encoded state is {} bytes, capacity is {}", len, capacity)
            }
            CodecError::NonFinite => write!(f, "reading is not a finite number"),
            CodecError::Serialize => write!(f, "readings could not be serialized"),
            CodecError::Store(what) => write!(f, "retained memory rejected write: {}", what),
        }
    }
}

/// Station association failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    /// Timeout, signal loss or a radio hiccup. Retry on the next wake.
    Transient,
    /// Wrong password or network not found. Stored credentials are unusable.
    Credential,
}

impl WifiError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WifiError::Credential)
    }
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WifiError::Transient => write!(f, "wifi connection failed"),
            WifiError::Credential => write!(f, "wifi credentials rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishError(pub &'static str);

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    /// Nothing was submitted before the deadline.
    Timeout,
    AccessPoint(&'static str),
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningError::Timeout => write!(f, "no configuration submitted in time"),
            ProvisioningError::AccessPoint(what) => write!(f, "access point failed: {}", what),
        }
    }
}

/// Failure that ends a measuring cycle early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    Retained(CodecError),
    Config(ConfigError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Retained(e) => write!(f, "retained state: {}", e),
            CycleError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl From<CodecError> for CycleError {
    fn from(e: CodecError) -> Self {
        CycleError::Retained(e)
    }
}

impl From<ConfigError> for CycleError {
    fn from(e: ConfigError) -> Self {
        CycleError::Config(e)
    }
}
