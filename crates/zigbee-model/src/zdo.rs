//! Zigbee Device Object descriptors and ZDP message bodies.
//!
//! The descriptor layouts are the standard over-the-air encodings. Firmware
//! that reports descriptors in its own envelope (status, address, length)
//! strips that envelope and hands the descriptor bytes to these parsers.

use serde::{Deserialize, Serialize};

use crate::{ByteReader, IeeeAddress, ModelError, ShortAddress};

/// The ZDO profile id.
pub const ZDO_PROFILE: u16 = 0x0000;
/// The ZDO endpoint.
pub const ZDO_ENDPOINT: u8 = 0x00;

// ============================================================================
// ZDP Cluster IDs
// ============================================================================

/// ZDP cluster ids. Responses set bit 15 of the request id.
pub mod cluster {
    pub const NWK_ADDR_REQ: u16 = 0x0000;
    pub const IEEE_ADDR_REQ: u16 = 0x0001;
    pub const NODE_DESC_REQ: u16 = 0x0002;
    pub const POWER_DESC_REQ: u16 = 0x0003;
    pub const SIMPLE_DESC_REQ: u16 = 0x0004;
    pub const ACTIVE_EP_REQ: u16 = 0x0005;
    pub const DEVICE_ANNCE: u16 = 0x0013;
    pub const BIND_REQ: u16 = 0x0021;
    pub const UNBIND_REQ: u16 = 0x0022;
    pub const MGMT_LEAVE_REQ: u16 = 0x0034;
    pub const MGMT_PERMIT_JOIN_REQ: u16 = 0x0036;

    /// Bit set in response cluster ids.
    pub const RESPONSE_FLAG: u16 = 0x8000;

    /// Get the response cluster id for a request cluster id.
    pub const fn response(request: u16) -> u16 {
        request | RESPONSE_FLAG
    }
}

// ============================================================================
// ZDP Status Codes
// ============================================================================

/// ZDP status codes.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const INV_REQUESTTYPE: u8 = 0x80;
    pub const DEVICE_NOT_FOUND: u8 = 0x81;
    pub const INVALID_EP: u8 = 0x82;
    pub const NOT_ACTIVE: u8 = 0x83;
    pub const NOT_SUPPORTED: u8 = 0x84;
    pub const TIMEOUT: u8 = 0x85;
    pub const NO_MATCH: u8 = 0x86;
    pub const NO_ENTRY: u8 = 0x88;
    pub const NO_DESCRIPTOR: u8 = 0x89;
    pub const NOT_AUTHORIZED: u8 = 0x8D;
}

/// Logical device type from the node descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Coordinator,
    Router,
    EndDevice,
}

impl LogicalType {
    /// Decode the three low bits of the first node descriptor byte.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x07 {
            0 => Some(LogicalType::Coordinator),
            1 => Some(LogicalType::Router),
            2 => Some(LogicalType::EndDevice),
            _ => None,
        }
    }
}

/// MAC capability flags, shared by the node descriptor and device announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MacCapabilities(pub u8);

impl MacCapabilities {
    pub const ALTERNATE_PAN_COORDINATOR: u8 = 0x01;
    pub const FULL_FUNCTION_DEVICE: u8 = 0x02;
    pub const MAINS_POWERED: u8 = 0x04;
    pub const RX_ON_WHEN_IDLE: u8 = 0x08;
    pub const SECURITY_CAPABLE: u8 = 0x40;
    pub const ALLOCATE_ADDRESS: u8 = 0x80;

    pub fn is_full_function(self) -> bool {
        self.0 & Self::FULL_FUNCTION_DEVICE != 0
    }

    pub fn is_mains_powered(self) -> bool {
        self.0 & Self::MAINS_POWERED != 0
    }

    pub fn receiver_on_when_idle(self) -> bool {
        self.0 & Self::RX_ON_WHEN_IDLE != 0
    }
}

/// Node descriptor (13 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Logical type, `None` for reserved values.
    pub logical_type: Option<LogicalType>,
    pub complex_descriptor_available: bool,
    pub user_descriptor_available: bool,
    pub aps_flags: u8,
    pub frequency_band: u8,
    pub mac_capabilities: MacCapabilities,
    pub manufacturer_code: u16,
    pub max_buffer_size: u8,
    pub max_incoming_transfer_size: u16,
    pub server_mask: u16,
    pub max_outgoing_transfer_size: u16,
    pub descriptor_capabilities: u8,
}

impl NodeDescriptor {
    /// Encoded size.
    pub const LEN: usize = 13;

    /// Parse a node descriptor. Bytes beyond the descriptor are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        if data.len() < Self::LEN {
            return Err(ModelError::truncated("node descriptor", Self::LEN, data.len()));
        }
        let mut r = ByteReader::new(data, "node descriptor");
        let flags = r.u8()?;
        let band = r.u8()?;
        Ok(NodeDescriptor {
            logical_type: LogicalType::from_bits(flags),
            complex_descriptor_available: flags & 0x08 != 0,
            user_descriptor_available: flags & 0x10 != 0,
            aps_flags: band & 0x07,
            frequency_band: band >> 3,
            mac_capabilities: MacCapabilities(r.u8()?),
            manufacturer_code: r.u16()?,
            max_buffer_size: r.u8()?,
            max_incoming_transfer_size: r.u16()?,
            server_mask: r.u16()?,
            max_outgoing_transfer_size: r.u16()?,
            descriptor_capabilities: r.u8()?,
        })
    }

    /// Encode the descriptor as it appears on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let logical = match self.logical_type {
            Some(LogicalType::Coordinator) => 0,
            Some(LogicalType::Router) => 1,
            Some(LogicalType::EndDevice) => 2,
            None => 7,
        };
        let mut flags = logical;
        if self.complex_descriptor_available {
            flags |= 0x08;
        }
        if self.user_descriptor_available {
            flags |= 0x10;
        }
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(flags);
        out.push((self.frequency_band << 3) | (self.aps_flags & 0x07));
        out.push(self.mac_capabilities.0);
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.push(self.max_buffer_size);
        out.extend_from_slice(&self.max_incoming_transfer_size.to_le_bytes());
        out.extend_from_slice(&self.server_mask.to_le_bytes());
        out.extend_from_slice(&self.max_outgoing_transfer_size.to_le_bytes());
        out.push(self.descriptor_capabilities);
        out
    }
}

/// Power descriptor (2 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDescriptor {
    pub current_power_mode: u8,
    /// Bit set of available sources: mains, rechargeable, disposable.
    pub available_power_sources: u8,
    pub current_power_source: u8,
    /// 0 critical, 4 ~33%, 8 ~66%, 12 full.
    pub current_power_level: u8,
}

impl PowerDescriptor {
    /// Encoded size.
    pub const LEN: usize = 2;

    pub const SOURCE_MAINS: u8 = 0x01;
    pub const SOURCE_RECHARGEABLE: u8 = 0x02;
    pub const SOURCE_DISPOSABLE: u8 = 0x04;

    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "power descriptor");
        let first = r.u8()?;
        let second = r.u8()?;
        Ok(PowerDescriptor {
            current_power_mode: first & 0x0F,
            available_power_sources: first >> 4,
            current_power_source: second & 0x0F,
            current_power_level: second >> 4,
        })
    }

    pub fn encode(&self) -> [u8; 2] {
        [
            (self.available_power_sources << 4) | (self.current_power_mode & 0x0F),
            (self.current_power_level << 4) | (self.current_power_source & 0x0F),
        ]
    }

    pub fn is_mains_powered(&self) -> bool {
        self.current_power_source & Self::SOURCE_MAINS != 0
    }
}

/// Simple descriptor of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

impl SimpleDescriptor {
    /// Parse a simple descriptor starting at the endpoint byte.
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "simple descriptor");
        let endpoint = r.u8()?;
        let profile_id = r.u16()?;
        let device_id = r.u16()?;
        let device_version = r.u8()? & 0x0F;

        let input_count = r.u8()? as usize;
        let mut input_clusters = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            input_clusters.push(r.u16()?);
        }

        let output_count = r.u8()? as usize;
        let mut output_clusters = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            output_clusters.push(r.u16()?);
        }

        Ok(SimpleDescriptor {
            endpoint,
            profile_id,
            device_id,
            device_version,
            input_clusters,
            output_clusters,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 2 * (self.input_clusters.len() + self.output_clusters.len()));
        out.push(self.endpoint);
        out.extend_from_slice(&self.profile_id.to_le_bytes());
        out.extend_from_slice(&self.device_id.to_le_bytes());
        out.push(self.device_version & 0x0F);
        out.push(self.input_clusters.len() as u8);
        for id in &self.input_clusters {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out.push(self.output_clusters.len() as u8);
        for id in &self.output_clusters {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }
}

/// Parse an active endpoint list: count followed by endpoint ids.
pub fn parse_active_endpoints(data: &[u8]) -> Result<Vec<u8>, ModelError> {
    let mut r = ByteReader::new(data, "active endpoint list");
    let count = r.u8()? as usize;
    Ok(r.take(count)?.to_vec())
}

/// Device announcement broadcast by a node after joining or rejoining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAnnouncement {
    pub short_address: ShortAddress,
    pub ieee_address: IeeeAddress,
    pub capabilities: MacCapabilities,
}

impl DeviceAnnouncement {
    /// Encoded size.
    pub const LEN: usize = 11;

    /// Parse from network address, IEEE address and capability byte.
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "device announcement");
        Ok(DeviceAnnouncement {
            short_address: ShortAddress(r.u16()?),
            ieee_address: IeeeAddress(r.u64()?),
            capabilities: MacCapabilities(r.u8()?),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.short_address.0.to_le_bytes());
        out.extend_from_slice(&self.ieee_address.to_le_bytes());
        out.push(self.capabilities.0);
        out
    }
}

// ============================================================================
// ZDP Frames
// ============================================================================

/// ZDP request for a descriptor addressed by network address.
///
/// Used for node, power and active endpoint requests.
pub fn nwk_address_request(transaction: u8, target: ShortAddress) -> Vec<u8> {
    let mut out = vec![transaction];
    out.extend_from_slice(&target.0.to_le_bytes());
    out
}

/// ZDP simple descriptor request.
pub fn simple_descriptor_request(transaction: u8, target: ShortAddress, endpoint: u8) -> Vec<u8> {
    let mut out = nwk_address_request(transaction, target);
    out.push(endpoint);
    out
}

/// Bind destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    /// Bind to a group.
    Group(u16),
    /// Bind to an endpoint on a device.
    Device { ieee: IeeeAddress, endpoint: u8 },
}

/// Encode the body of a bind request (no transaction byte).
pub fn bind_request_body(
    source: IeeeAddress,
    source_endpoint: u8,
    cluster_id: u16,
    target: BindTarget,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(21);
    out.extend_from_slice(&source.to_le_bytes());
    out.push(source_endpoint);
    out.extend_from_slice(&cluster_id.to_le_bytes());
    match target {
        BindTarget::Group(group) => {
            out.push(0x01);
            out.extend_from_slice(&group.to_le_bytes());
        }
        BindTarget::Device { ieee, endpoint } => {
            out.push(0x03);
            out.extend_from_slice(&ieee.to_le_bytes());
            out.push(endpoint);
        }
    }
    out
}

/// ZDP bind request.
pub fn bind_request(
    transaction: u8,
    source: IeeeAddress,
    source_endpoint: u8,
    cluster_id: u16,
    target: BindTarget,
) -> Vec<u8> {
    let mut out = vec![transaction];
    out.extend(bind_request_body(source, source_endpoint, cluster_id, target));
    out
}

/// ZDP management permit-join request.
pub fn permit_join_request(transaction: u8, duration_secs: u8) -> Vec<u8> {
    vec![transaction, duration_secs, 0x01]
}

/// A ZDP response split into its common prefix and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZdpResponse<'a> {
    pub transaction: u8,
    pub status: u8,
    pub body: &'a [u8],
}

impl<'a> ZdpResponse<'a> {
    /// Split transaction and status off a ZDP response.
    pub fn parse(data: &'a [u8]) -> Result<Self, ModelError> {
        if data.len() < 2 {
            return Err(ModelError::truncated("zdp response", 2, data.len()));
        }
        Ok(ZdpResponse {
            transaction: data[0],
            status: data[1],
            body: &data[2..],
        })
    }

    /// Skip the network-address-of-interest field that precedes descriptors.
    pub fn descriptor_body(&self) -> Result<(ShortAddress, &'a [u8]), ModelError> {
        let mut r = ByteReader::new(self.body, "zdp descriptor response");
        let nwk = ShortAddress(r.u16()?);
        Ok((nwk, r.rest()))
    }
}
