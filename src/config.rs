//! Station configuration, loaded from TOML.
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! power = 3000            # hundredths of a dBm
//! registry_capacity = 50
//! history_capacity = 1000
//! confirm_threshold = 5
//! names_path = "/var/lib/powder/names.json"
//! log_level = "info"
//! ```
//!
//! Every key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::codec::DEFAULT_FRAME_CAPACITY;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::registration::DEFAULT_CONFIRM_THRESHOLD;
use crate::registry::DEFAULT_REGISTRY_CAPACITY;
use crate::report::TAG_REPORT_MIN_LEN;
use crate::types::TrackerError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Serial device the R200 is attached to
    pub port: String,
    pub baud_rate: u32,
    /// Transmit power applied at startup, in hundredths of a dBm
    pub power: i16,
    pub registry_capacity: usize,
    pub history_capacity: usize,
    pub confirm_threshold: u32,
    /// Receive buffer size; longer frames are lost
    pub frame_capacity: usize,
    /// Names file; names are kept in memory only when unset
    pub names_path: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            power: 3000,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            confirm_threshold: DEFAULT_CONFIRM_THRESHOLD,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            names_path: None,
            log_level: "info".into(),
        }
    }
}

impl StationConfig {
    pub fn from_toml(text: &str) -> Result<Self, TrackerError> {
        let config: Self = toml::from_str(text).map_err(|e| TrackerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.registry_capacity == 0 {
            return Err(TrackerError::Config("registry_capacity must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(TrackerError::Config("history_capacity must be at least 1".into()));
        }
        if self.confirm_threshold == 0 {
            return Err(TrackerError::Config("confirm_threshold must be at least 1".into()));
        }
        if self.frame_capacity < TAG_REPORT_MIN_LEN {
            return Err(TrackerError::Config(format!(
                "frame_capacity must hold a tag report ({} bytes)",
                TAG_REPORT_MIN_LEN
            )));
        }
        Ok(())
    }
}
