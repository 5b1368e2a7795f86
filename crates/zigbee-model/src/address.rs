//! Zigbee addressing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// A 64-bit IEEE (extended) address. Immutable identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IeeeAddress(pub u64);

impl IeeeAddress {
    /// Get the address as little-endian bytes, as sent on the wire.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for IeeeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for IeeeAddress {
    type Err = ModelError;

    /// Accepts `00:15:8d:00:01:02:03:04`, `00158d0001020304` or `0x00158d0001020304`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let digits: String = hex.chars().filter(|c| *c != ':').collect();
        if digits.len() != 16 {
            return Err(ModelError::InvalidAddress(s.to_string()));
        }
        u64::from_str_radix(&digits, 16)
            .map(IeeeAddress)
            .map_err(|_| ModelError::InvalidAddress(s.to_string()))
    }
}

impl From<u64> for IeeeAddress {
    fn from(value: u64) -> Self {
        IeeeAddress(value)
    }
}

/// A 16-bit network (short) address. Volatile; may change on rejoin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// The coordinator always holds address zero.
    pub const COORDINATOR: ShortAddress = ShortAddress(0x0000);
    /// Broadcast to every device.
    pub const BROADCAST_ALL: ShortAddress = ShortAddress(0xFFFF);
    /// Broadcast to every device with its receiver on when idle.
    pub const BROADCAST_RX_ON_IDLE: ShortAddress = ShortAddress(0xFFFD);
    /// Broadcast to routers and the coordinator.
    pub const BROADCAST_ROUTERS: ShortAddress = ShortAddress(0xFFFC);

    /// Whether this is one of the reserved broadcast addresses.
    pub fn is_broadcast(self) -> bool {
        self.0 >= 0xFFF8
    }
}

impl fmt::Display for ShortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for ShortAddress {
    fn from(value: u16) -> Self {
        ShortAddress(value)
    }
}
