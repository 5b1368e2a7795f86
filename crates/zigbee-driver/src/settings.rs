//! Persistent network settings.
//!
//! The coordinator remembers the parameters of the network it formed and the
//! addresses of the nodes it has seen, so a restart resumes the same network
//! and rediscovers known nodes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zigbee_model::{IeeeAddress, ShortAddress};

use crate::error::DriverError;

/// Addresses of one known node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub ieee: IeeeAddress,
    pub short: ShortAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub pan_id: Option<u16>,
    pub extended_pan_id: Option<u64>,
    pub channel: Option<u8>,
    #[serde(with = "key_hex")]
    pub network_key: Option<[u8; 16]>,
    pub coordinator: Option<NodeAddresses>,
    pub nodes: Vec<NodeAddresses>,
}

impl NetworkSettings {
    /// Record a node, replacing any entry with the same IEEE address.
    pub fn remember_node(&mut self, addresses: NodeAddresses) {
        match self.nodes.iter_mut().find(|n| n.ieee == addresses.ieee) {
            Some(entry) => *entry = addresses,
            None => self.nodes.push(addresses),
        }
    }

    /// Returns true if the node was known.
    pub fn forget_node(&mut self, ieee: IeeeAddress) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.ieee != ieee);
        self.nodes.len() != before
    }
}

mod key_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<[u8; 16]>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_some(&hex::encode(key)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<[u8; 16]>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let mut key = [0u8; 16];
        hex::decode_to_slice(text.trim(), &mut key).map_err(D::Error::custom)?;
        Ok(Some(key))
    }
}

/// Where network settings are kept.
pub trait SettingsStore {
    /// `None` when nothing has been stored yet.
    fn load(&mut self) -> Result<Option<NetworkSettings>, DriverError>;

    fn save(&mut self, settings: &NetworkSettings) -> Result<(), DriverError>;
}

/// Settings held in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    pub stored: Option<NetworkSettings>,
    /// Number of completed saves.
    pub saves: usize,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: NetworkSettings) -> Self {
        MemorySettings {
            stored: Some(settings),
            saves: 0,
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&mut self) -> Result<Option<NetworkSettings>, DriverError> {
        Ok(self.stored.clone())
    }

    fn save(&mut self, settings: &NetworkSettings) -> Result<(), DriverError> {
        self.stored = Some(settings.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Settings stored as a JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileSettings { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&mut self) -> Result<Option<NetworkSettings>, DriverError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored settings");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&mut self, settings: &NetworkSettings) -> Result<(), DriverError> {
        let text = serde_json::to_string_pretty(settings)?;
        // Write then rename so an interrupted save keeps the previous file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), nodes = settings.nodes.len(), "saved settings");
        Ok(())
    }
}
