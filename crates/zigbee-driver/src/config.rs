//! Driver configuration file.
//!
//! ```yaml
//! backend: deconz
//! serial:
//!   port: /dev/ttyACM0
//! network:
//!   channel_mask: 34637824
//!   max_retries: 3
//! settings_path: zigbee-network.json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bootstrap::DEFAULT_CHANNEL_MASK;
use crate::discovery::DEFAULT_MAX_RETRIES;
use crate::error::DriverError;
use crate::network::NetworkConfig;

/// Seconds between attempts to reopen a lost serial port.
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Deconz,
    Nxp,
    Ti,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Deconz => "deconz",
            BackendKind::Nxp => "nxp",
            BackendKind::Ti => "ti",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    /// Defaults to the backend's rate.
    pub baud_rate: Option<u32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub channel_mask: u32,
    pub max_retries: u8,
    pub reconcile_short_address: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            channel_mask: DEFAULT_CHANNEL_MASK,
            max_retries: DEFAULT_MAX_RETRIES,
            reconcile_short_address: true,
        }
    }
}

impl From<&NetworkSection> for NetworkConfig {
    fn from(section: &NetworkSection) -> Self {
        NetworkConfig {
            max_retries: section.max_retries,
            reconcile_short_address: section.reconcile_short_address,
            channel_mask: section.channel_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub backend: BackendKind,
    pub serial: SerialConfig,
    pub network: NetworkSection,
    pub reconnect_interval_secs: u64,
    pub settings_path: PathBuf,
    /// Prometheus listen address, used when the exporter is compiled in.
    pub metrics_addr: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            backend: BackendKind::Deconz,
            serial: SerialConfig::default(),
            network: NetworkSection::default(),
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            settings_path: PathBuf::from("zigbee-network.json"),
            metrics_addr: None,
        }
    }
}

impl DriverConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, DriverError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}
