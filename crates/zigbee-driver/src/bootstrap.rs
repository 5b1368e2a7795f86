//! Network bootstrap sequence.
//!
//! ```text
//! Erase (only without persisted settings) -> Reset -> GetVersion
//!     -> SetExtendedPanId -> SetChannelMask -> SetSecurityKeys
//!     -> SetNodeType -> StartNetwork -> Finalize(0..n)
//! ```
//!
//! A backend may declare any step not applicable; it is skipped. Any failure
//! ends the attempt and leaves the network offline.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use zigbee_model::{IeeeAddress, ShortAddress};

use crate::settings::NetworkSettings;

/// Channels 11, 15, 20 and 25.
pub const DEFAULT_CHANNEL_MASK: u32 = 0x0210_8800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapStep {
    Erase,
    Reset,
    GetVersion,
    SetExtendedPanId,
    SetChannelMask,
    SetSecurityKeys,
    SetNodeType,
    StartNetwork,
    /// Backend-specific queries after the network is up.
    Finalize(u8),
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapStep::Erase => f.write_str("erase"),
            BootstrapStep::Reset => f.write_str("reset"),
            BootstrapStep::GetVersion => f.write_str("get version"),
            BootstrapStep::SetExtendedPanId => f.write_str("set extended PAN id"),
            BootstrapStep::SetChannelMask => f.write_str("set channel mask"),
            BootstrapStep::SetSecurityKeys => f.write_str("set security keys"),
            BootstrapStep::SetNodeType => f.write_str("set node type"),
            BootstrapStep::StartNetwork => f.write_str("start network"),
            BootstrapStep::Finalize(n) => write!(f, "finalize {}", n),
        }
    }
}

/// Parameters the coordinator forms or resumes the network with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub pan_id: u16,
    pub extended_pan_id: u64,
    pub channel_mask: u32,
    pub network_key: [u8; 16],
}

impl NetworkParameters {
    /// Fresh parameters for a new network.
    pub fn random<R: Rng>(channel_mask: u32, rng: &mut R) -> Self {
        // 0x0000 and 0xFFFF are reserved PAN ids
        let pan_id = rng.gen_range(0x0001..0xFFFF);
        let mut network_key = [0u8; 16];
        rng.fill(&mut network_key[..]);
        NetworkParameters {
            pan_id,
            extended_pan_id: rng.gen(),
            channel_mask,
            network_key,
        }
    }

    /// Parameters from persisted settings, when they describe a network.
    pub fn from_settings(settings: &NetworkSettings, channel_mask: u32) -> Option<Self> {
        let channel_mask = settings
            .channel
            .and_then(|c| 1u32.checked_shl(u32::from(c)))
            .unwrap_or(channel_mask);
        Some(NetworkParameters {
            pan_id: settings.pan_id?,
            extended_pan_id: settings.extended_pan_id?,
            channel_mask,
            network_key: settings.network_key?,
        })
    }
}

/// What the coprocessor reported during bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerInfo {
    pub firmware_version: Option<String>,
    pub short_address: Option<ShortAddress>,
    pub ieee_address: Option<IeeeAddress>,
    pub pan_id: Option<u16>,
    pub extended_pan_id: Option<u64>,
    pub channel: Option<u8>,
}

/// Position in the bootstrap sequence.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    params: NetworkParameters,
    erase: bool,
    finalize_steps: u8,
    current: Option<BootstrapStep>,
}

impl Bootstrap {
    /// Start a sequence. `persisted` skips the erase step.
    pub fn new(params: NetworkParameters, persisted: bool, finalize_steps: u8) -> Self {
        Bootstrap {
            params,
            erase: !persisted,
            finalize_steps,
            current: None,
        }
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn current(&self) -> Option<BootstrapStep> {
        self.current
    }

    /// Advance to the following step. Returns `None` once every step ran.
    pub fn advance(&mut self) -> Option<BootstrapStep> {
        let next = match self.current {
            None if self.erase => Some(BootstrapStep::Erase),
            None | Some(BootstrapStep::Erase) => Some(BootstrapStep::Reset),
            Some(BootstrapStep::Reset) => Some(BootstrapStep::GetVersion),
            Some(BootstrapStep::GetVersion) => Some(BootstrapStep::SetExtendedPanId),
            Some(BootstrapStep::SetExtendedPanId) => Some(BootstrapStep::SetChannelMask),
            Some(BootstrapStep::SetChannelMask) => Some(BootstrapStep::SetSecurityKeys),
            Some(BootstrapStep::SetSecurityKeys) => Some(BootstrapStep::SetNodeType),
            Some(BootstrapStep::SetNodeType) => Some(BootstrapStep::StartNetwork),
            Some(BootstrapStep::StartNetwork) => self.finalize(0),
            Some(BootstrapStep::Finalize(n)) => self.finalize(n.saturating_add(1)),
        };
        if next.is_some() {
            self.current = next;
        }
        next
    }

    fn finalize(&self, n: u8) -> Option<BootstrapStep> {
        (n < self.finalize_steps).then_some(BootstrapStep::Finalize(n))
    }
}
