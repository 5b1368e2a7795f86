//! deCONZ serial protocol backend.
//!
//! Responses echo the command id and sequence of their request and carry the
//! status in the frame header. Over-the-air traffic goes through
//! `APS_DATA_REQUEST`; the answering APS data indication is the additional
//! frame of a remote request.

use tracing::debug;
use zigbee_frame::deconz::{DeconzCodec, DeconzFrame};
use zigbee_model::zcl;
use zigbee_model::zdo::{self, ZdpResponse};
use zigbee_model::{ByteReader, IeeeAddress, ModelError, ShortAddress};

use super::{
    additional, basic_attribute_request, decode_aps_notification, decode_basic_reply, decode_zcl_reply,
    decode_zdp_descriptor, primary, zcl_request, zdp_request, aps_transaction, Backend, Notification,
    TransactionCounter,
};
use crate::bootstrap::{BootstrapStep, ControllerInfo, NetworkParameters};
use crate::command::{CommandResponse, NetworkCommand, HOST_ENDPOINT};
use crate::correlator::{Correlation, Protocol, Reply, Request, RequestSpec, REMOTE_TIMEOUT, START_TIMEOUT};
use crate::discovery::{DiscoveryQuery, DiscoveryResponse};
use crate::error::DriverError;
use crate::status::Status;

/// Command ids.
pub mod command {
    pub const APS_DATA_CONFIRM: u8 = 0x04;
    pub const DEVICE_STATE: u8 = 0x07;
    pub const CHANGE_NETWORK_STATE: u8 = 0x08;
    pub const READ_PARAMETER: u8 = 0x0A;
    pub const WRITE_PARAMETER: u8 = 0x0B;
    pub const VERSION: u8 = 0x0D;
    pub const DEVICE_STATE_CHANGED: u8 = 0x0E;
    pub const APS_DATA_REQUEST: u8 = 0x12;
    pub const APS_DATA_INDICATION: u8 = 0x17;
}

/// Network parameter ids.
pub mod param {
    pub const MAC_ADDRESS: u8 = 0x01;
    pub const NWK_PANID: u8 = 0x05;
    pub const NWK_ADDRESS: u8 = 0x07;
    pub const NWK_EXTENDED_PANID: u8 = 0x08;
    pub const APS_DESIGNED_COORDINATOR: u8 = 0x09;
    pub const CHANNEL_MASK: u8 = 0x0A;
    pub const APS_EXTENDED_PANID: u8 = 0x0B;
    pub const NETWORK_KEY: u8 = 0x18;
    pub const CURRENT_CHANNEL: u8 = 0x1C;
}

/// Network state in the low bits of the device state byte.
pub mod network_state {
    pub const MASK: u8 = 0x03;
    pub const OFFLINE: u8 = 0x00;
    pub const JOINING: u8 = 0x01;
    pub const CONNECTED: u8 = 0x02;
    pub const LEAVING: u8 = 0x03;
}

/// Parameters read after the network is up, in order.
const FINALIZE_PARAMS: [u8; 5] = [
    param::MAC_ADDRESS,
    param::NWK_PANID,
    param::NWK_ADDRESS,
    param::NWK_EXTENDED_PANID,
    param::CURRENT_CHANNEL,
];

const ADDR_GROUP: u8 = 0x01;
const ADDR_NWK: u8 = 0x02;
const ADDR_IEEE: u8 = 0x03;
const ADDR_NWK_IEEE: u8 = 0x04;

pub fn status_of(code: u8) -> Status {
    match code {
        0x00 => Status::Success,
        0x01 => Status::CommandFailed,
        0x02 => Status::Busy,
        0x04 => Status::UnhandledCommand,
        0x07 => Status::InvalidParameter,
        code => Status::FirmwareReportedError(code),
    }
}

/// Address field of an APS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApsAddress {
    Group(u16),
    Short(ShortAddress),
    Ieee(IeeeAddress),
    /// Sources may carry both addresses.
    Both(ShortAddress, IeeeAddress),
}

impl ApsAddress {
    pub fn short(self) -> Option<ShortAddress> {
        match self {
            ApsAddress::Short(short) | ApsAddress::Both(short, _) => Some(short),
            _ => None,
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, ModelError> {
        let mode = r.u8()?;
        let address = match mode {
            ADDR_GROUP => ApsAddress::Group(r.u16()?),
            ADDR_NWK => ApsAddress::Short(ShortAddress(r.u16()?)),
            ADDR_IEEE => ApsAddress::Ieee(IeeeAddress(r.u64()?)),
            ADDR_NWK_IEEE => ApsAddress::Both(ShortAddress(r.u16()?), IeeeAddress(r.u64()?)),
            other => return Err(ModelError::InvalidAddress(format!("APS address mode 0x{:02x}", other))),
        };
        Ok(address)
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            ApsAddress::Group(group) => {
                out.push(ADDR_GROUP);
                out.extend_from_slice(&group.to_le_bytes());
            }
            ApsAddress::Short(short) => {
                out.push(ADDR_NWK);
                out.extend_from_slice(&short.0.to_le_bytes());
            }
            ApsAddress::Ieee(ieee) => {
                out.push(ADDR_IEEE);
                out.extend_from_slice(&ieee.to_le_bytes());
            }
            ApsAddress::Both(short, ieee) => {
                out.push(ADDR_NWK_IEEE);
                out.extend_from_slice(&short.0.to_le_bytes());
                out.extend_from_slice(&ieee.to_le_bytes());
            }
        }
    }
}

fn with_length_prefix(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend(body);
    out
}

/// Payload of `APS_DATA_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsDataRequest {
    pub request_id: u8,
    pub destination: ShortAddress,
    pub destination_endpoint: u8,
    pub profile: u16,
    pub cluster: u16,
    pub source_endpoint: u8,
    pub asdu: Vec<u8>,
}

impl ApsDataRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![self.request_id, 0x00];
        ApsAddress::Short(self.destination).write(&mut body);
        body.push(self.destination_endpoint);
        body.extend_from_slice(&self.profile.to_le_bytes());
        body.extend_from_slice(&self.cluster.to_le_bytes());
        body.push(self.source_endpoint);
        body.extend_from_slice(&(self.asdu.len() as u16).to_le_bytes());
        body.extend_from_slice(&self.asdu);
        // tx options, radius
        body.extend_from_slice(&[0x00, 0x00]);
        with_length_prefix(body)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "aps data request");
        r.u16()?;
        let request_id = r.u8()?;
        r.u8()?;
        let destination = ApsAddress::read(&mut r)?
            .short()
            .ok_or_else(|| ModelError::InvalidAddress("group destination".into()))?;
        let destination_endpoint = r.u8()?;
        let profile = r.u16()?;
        let cluster = r.u16()?;
        let source_endpoint = r.u8()?;
        let len = r.u16()? as usize;
        let asdu = r.take(len)?.to_vec();
        Ok(ApsDataRequest {
            request_id,
            destination,
            destination_endpoint,
            profile,
            cluster,
            source_endpoint,
            asdu,
        })
    }
}

/// Payload of `APS_DATA_INDICATION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsIndication {
    pub device_state: u8,
    pub destination: ApsAddress,
    pub destination_endpoint: u8,
    pub source: ApsAddress,
    pub source_endpoint: u8,
    pub profile: u16,
    pub cluster: u16,
    pub asdu: Vec<u8>,
    pub lqi: Option<u8>,
    pub rssi: Option<i8>,
}

impl ApsIndication {
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "aps data indication");
        r.u16()?;
        let device_state = r.u8()?;
        let destination = ApsAddress::read(&mut r)?;
        let destination_endpoint = r.u8()?;
        let source = ApsAddress::read(&mut r)?;
        let source_endpoint = r.u8()?;
        let profile = r.u16()?;
        let cluster = r.u16()?;
        let len = r.u16()? as usize;
        let asdu = r.take(len)?.to_vec();
        // Two reserved bytes, LQI, two reserved bytes, RSSI; older firmware stops early
        let trailer = r.rest();
        Ok(ApsIndication {
            device_state,
            destination,
            destination_endpoint,
            source,
            source_endpoint,
            profile,
            cluster,
            asdu,
            lqi: trailer.get(2).copied(),
            rssi: trailer.get(5).map(|b| *b as i8),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![self.device_state];
        self.destination.write(&mut body);
        body.push(self.destination_endpoint);
        self.source.write(&mut body);
        body.push(self.source_endpoint);
        body.extend_from_slice(&self.profile.to_le_bytes());
        body.extend_from_slice(&self.cluster.to_le_bytes());
        body.extend_from_slice(&(self.asdu.len() as u16).to_le_bytes());
        body.extend_from_slice(&self.asdu);
        body.extend_from_slice(&[
            0x00,
            0x00,
            self.lqi.unwrap_or(0),
            0x00,
            0x00,
            self.rssi.unwrap_or(0) as u8,
        ]);
        with_length_prefix(body)
    }
}

/// Payload of `APS_DATA_CONFIRM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApsConfirm {
    pub device_state: u8,
    pub request_id: u8,
    pub destination: ApsAddress,
    pub source_endpoint: u8,
    pub status: u8,
}

impl ApsConfirm {
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "aps data confirm");
        r.u16()?;
        let device_state = r.u8()?;
        let request_id = r.u8()?;
        let destination = ApsAddress::read(&mut r)?;
        if !matches!(destination, ApsAddress::Group(_)) {
            r.u8()?;
        }
        let source_endpoint = r.u8()?;
        let status = r.u8()?;
        Ok(ApsConfirm {
            device_state,
            request_id,
            destination,
            source_endpoint,
            status,
        })
    }

    pub fn encode(&self, destination_endpoint: u8) -> Vec<u8> {
        let mut body = vec![self.device_state, self.request_id];
        self.destination.write(&mut body);
        if !matches!(self.destination, ApsAddress::Group(_)) {
            body.push(destination_endpoint);
        }
        body.push(self.source_endpoint);
        body.push(self.status);
        with_length_prefix(body)
    }
}

/// Frame a deCONZ request waits for besides its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeconzExpect {
    /// A device state change reporting the network as connected.
    NetworkConnected,
    /// The APS indication answering a remote request.
    Indication {
        profile: u16,
        cluster: u16,
        source: ShortAddress,
        transaction: u8,
    },
    /// The confirm of an APS request.
    Confirm { request_id: u8 },
}

impl DeconzExpect {
    fn matches(&self, frame: &DeconzFrame) -> bool {
        match *self {
            DeconzExpect::NetworkConnected => {
                frame.command == command::DEVICE_STATE_CHANGED
                    && frame
                        .payload
                        .first()
                        .is_some_and(|state| state & network_state::MASK == network_state::CONNECTED)
            }
            DeconzExpect::Indication {
                profile,
                cluster,
                source,
                transaction,
            } => {
                if frame.command != command::APS_DATA_INDICATION {
                    return false;
                }
                ApsIndication::parse(&frame.payload).is_ok_and(|ind| {
                    ind.profile == profile
                        && ind.cluster == cluster
                        && ind.source.short() == Some(source)
                        && aps_transaction(profile, &ind.asdu) == Some(transaction)
                })
            }
            DeconzExpect::Confirm { request_id } => {
                frame.command == command::APS_DATA_CONFIRM
                    && ApsConfirm::parse(&frame.payload).is_ok_and(|c| c.request_id == request_id)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DeconzBackend {
    transactions: TransactionCounter,
    request_ids: TransactionCounter,
}

impl DeconzBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_parameter(&self, id: u8) -> RequestSpec<Self> {
        RequestSpec::new(command::READ_PARAMETER, with_length_prefix(vec![id])).describe("read parameter")
    }

    fn write_parameter(&self, id: u8, value: &[u8]) -> RequestSpec<Self> {
        let mut body = vec![id];
        body.extend_from_slice(value);
        RequestSpec::new(command::WRITE_PARAMETER, with_length_prefix(body)).describe("write parameter")
    }

    fn change_network_state(&self, state: u8) -> RequestSpec<Self> {
        RequestSpec::new(command::CHANGE_NETWORK_STATE, vec![state]).describe("change network state")
    }

    /// APS request to a node, waiting for the indication that answers it.
    fn aps_request(
        &mut self,
        target: ShortAddress,
        endpoint: u8,
        profile: u16,
        cluster: u16,
        response_cluster: u16,
        asdu: Vec<u8>,
    ) -> RequestSpec<Self> {
        let source_endpoint = if profile == zdo::ZDO_PROFILE {
            zdo::ZDO_ENDPOINT
        } else {
            HOST_ENDPOINT
        };
        let transaction = aps_transaction(profile, &asdu).unwrap_or_default();
        let request = ApsDataRequest {
            request_id: self.request_ids.next(),
            destination: target,
            destination_endpoint: endpoint,
            profile,
            cluster,
            source_endpoint,
            asdu,
        };
        RequestSpec::new(command::APS_DATA_REQUEST, request.encode())
            .expect(DeconzExpect::Indication {
                profile,
                cluster: response_cluster,
                source: target,
                transaction,
            })
            .timeout(REMOTE_TIMEOUT)
    }

    fn indication(reply: &Reply<Self>, what: &'static str) -> Result<ApsIndication, DriverError> {
        Ok(ApsIndication::parse(&additional(reply, what)?.payload)?)
    }
}

/// Value of a parameter read response.
fn parameter_value(frame: &DeconzFrame, id: u8) -> Result<&[u8], DriverError> {
    let mut r = ByteReader::new(&frame.payload, "read parameter response");
    r.u16()?;
    if r.u8()? != id {
        return Err(DriverError::unexpected("read parameter"));
    }
    Ok(r.rest())
}

impl Protocol for DeconzBackend {
    type Frame = DeconzFrame;
    type Command = u8;
    type Additional = DeconzExpect;
    type Codec = DeconzCodec;

    const NAME: &'static str = "deconz";

    fn new_codec(&self) -> DeconzCodec {
        DeconzCodec::new()
    }

    fn encode_request(&self, request: &Request<Self>) -> DeconzFrame {
        DeconzFrame::new(request.command, request.sequence, request.payload.clone())
    }

    fn correlate(&self, request: &Request<Self>, frame: &DeconzFrame) -> Correlation {
        if frame.command == request.command {
            if frame.sequence != request.sequence {
                return Correlation::Stale;
            }
            return Correlation::Primary(status_of(frame.status));
        }
        match &request.additional {
            Some(expect) if expect.matches(frame) => Correlation::Additional,
            _ => Correlation::Unsolicited,
        }
    }
}

impl Backend for DeconzBackend {
    const DEFAULT_BAUD_RATE: u32 = 38_400;
    const FINALIZE_STEPS: u8 = FINALIZE_PARAMS.len() as u8;

    fn bootstrap_request(&mut self, step: BootstrapStep, params: &NetworkParameters) -> Option<RequestSpec<Self>> {
        let spec = match step {
            // Writing the parameters replaces the stored network
            BootstrapStep::Erase => return None,
            BootstrapStep::Reset => self.change_network_state(network_state::OFFLINE),
            BootstrapStep::GetVersion => RequestSpec::new(command::VERSION, vec![0; 4]).describe("version"),
            BootstrapStep::SetExtendedPanId => {
                self.write_parameter(param::APS_EXTENDED_PANID, &params.extended_pan_id.to_le_bytes())
            }
            BootstrapStep::SetChannelMask => {
                self.write_parameter(param::CHANNEL_MASK, &params.channel_mask.to_le_bytes())
            }
            BootstrapStep::SetSecurityKeys => {
                let mut value = vec![0x00];
                value.extend_from_slice(&params.network_key);
                self.write_parameter(param::NETWORK_KEY, &value)
            }
            BootstrapStep::SetNodeType => self.write_parameter(param::APS_DESIGNED_COORDINATOR, &[0x01]),
            BootstrapStep::StartNetwork => self
                .change_network_state(network_state::CONNECTED)
                .expect(DeconzExpect::NetworkConnected)
                .timeout(START_TIMEOUT),
            BootstrapStep::Finalize(n) => self.read_parameter(*FINALIZE_PARAMS.get(n as usize)?),
        };
        Some(spec)
    }

    fn apply_bootstrap_reply(
        &mut self,
        step: BootstrapStep,
        reply: &Reply<Self>,
        info: &mut ControllerInfo,
    ) -> Result<(), DriverError> {
        match step {
            BootstrapStep::GetVersion => {
                let frame = primary(reply, "version")?;
                let version = ByteReader::new(&frame.payload, "version").u32()?;
                info.firmware_version = Some(format!("0x{:08x}", version));
            }
            BootstrapStep::Finalize(n) => {
                let Some(&id) = FINALIZE_PARAMS.get(n as usize) else {
                    return Ok(());
                };
                let value = parameter_value(primary(reply, "read parameter")?, id)?;
                let mut r = ByteReader::new(value, "parameter value");
                match id {
                    param::MAC_ADDRESS => info.ieee_address = Some(IeeeAddress(r.u64()?)),
                    param::NWK_PANID => info.pan_id = Some(r.u16()?),
                    param::NWK_ADDRESS => info.short_address = Some(ShortAddress(r.u16()?)),
                    param::NWK_EXTENDED_PANID => info.extended_pan_id = Some(r.u64()?),
                    param::CURRENT_CHANNEL => info.channel = Some(r.u8()?),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn discovery_request(&mut self, query: &DiscoveryQuery) -> RequestSpec<Self> {
        let transaction = self.transactions.next();
        match zdp_request(query, transaction) {
            Some((cluster, asdu)) => self
                .aps_request(
                    query.target(),
                    zdo::ZDO_ENDPOINT,
                    zdo::ZDO_PROFILE,
                    cluster,
                    zdo::cluster::response(cluster),
                    asdu,
                )
                .describe("zdo descriptor request"),
            None => {
                let endpoint = match query {
                    DiscoveryQuery::BasicAttributes { endpoint, .. } => *endpoint,
                    _ => HOST_ENDPOINT,
                };
                let read = basic_attribute_request(query.target(), endpoint, transaction);
                self.aps_request(
                    read.target,
                    read.endpoint,
                    zcl::HOME_AUTOMATION_PROFILE,
                    read.cluster,
                    read.cluster,
                    read.frame,
                )
                .describe("read basic attributes")
            }
        }
    }

    fn parse_discovery_reply(
        &self,
        query: &DiscoveryQuery,
        reply: &Reply<Self>,
    ) -> Result<DiscoveryResponse, DriverError> {
        let indication = Self::indication(reply, "discovery request")?;
        match query {
            DiscoveryQuery::BasicAttributes { .. } => decode_basic_reply(&indication.asdu),
            _ => decode_zdp_descriptor(query, &indication.asdu),
        }
    }

    fn command_request(&mut self, command: &NetworkCommand) -> Result<RequestSpec<Self>, DriverError> {
        let transaction = self.transactions.next();
        if let Some(request) = zcl_request(command, transaction)? {
            return Ok(self
                .aps_request(
                    request.target,
                    request.endpoint,
                    zcl::HOME_AUTOMATION_PROFILE,
                    request.cluster,
                    request.cluster,
                    request.frame,
                )
                .describe(command.name()));
        }

        let spec = match command {
            NetworkCommand::Bind {
                target,
                source,
                source_endpoint,
                cluster,
                destination,
            } => {
                let asdu = zdo::bind_request(transaction, *source, *source_endpoint, *cluster, *destination);
                self.aps_request(
                    *target,
                    zdo::ZDO_ENDPOINT,
                    zdo::ZDO_PROFILE,
                    zdo::cluster::BIND_REQ,
                    zdo::cluster::response(zdo::cluster::BIND_REQ),
                    asdu,
                )
            }
            NetworkCommand::SendApplicationData {
                target,
                endpoint,
                profile,
                cluster,
                payload,
            } => {
                let request_id = self.request_ids.next();
                let request = ApsDataRequest {
                    request_id,
                    destination: *target,
                    destination_endpoint: *endpoint,
                    profile: *profile,
                    cluster: *cluster,
                    source_endpoint: HOST_ENDPOINT,
                    asdu: payload.clone(),
                };
                RequestSpec::new(command::APS_DATA_REQUEST, request.encode())
                    .expect(DeconzExpect::Confirm { request_id })
                    .timeout(REMOTE_TIMEOUT)
            }
            NetworkCommand::PermitJoin { duration_secs } => {
                let request = ApsDataRequest {
                    request_id: self.request_ids.next(),
                    destination: ShortAddress::BROADCAST_ROUTERS,
                    destination_endpoint: zdo::ZDO_ENDPOINT,
                    profile: zdo::ZDO_PROFILE,
                    cluster: zdo::cluster::MGMT_PERMIT_JOIN_REQ,
                    source_endpoint: zdo::ZDO_ENDPOINT,
                    asdu: zdo::permit_join_request(transaction, *duration_secs),
                };
                RequestSpec::new(command::APS_DATA_REQUEST, request.encode())
            }
            _ => return Err(DriverError::unexpected(command.name())),
        };
        Ok(spec.describe(command.name()))
    }

    fn parse_command_reply(
        &self,
        command: &NetworkCommand,
        reply: &Reply<Self>,
    ) -> Result<CommandResponse, DriverError> {
        match command {
            NetworkCommand::ReadAttributes { .. }
            | NetworkCommand::WriteAttributes { .. }
            | NetworkCommand::ConfigureReporting { .. } => {
                decode_zcl_reply(command, &Self::indication(reply, command.name())?.asdu)
            }
            NetworkCommand::Bind { .. } => {
                let indication = Self::indication(reply, "bind")?;
                let response = ZdpResponse::parse(&indication.asdu)?;
                if response.status != zdo::status::SUCCESS {
                    return Err(DriverError::ZdoStatus(response.status));
                }
                Ok(CommandResponse::Bound)
            }
            NetworkCommand::SendApplicationData { .. } => {
                let confirm = ApsConfirm::parse(&additional(reply, "send application data")?.payload)?;
                match status_of(confirm.status) {
                    Status::Success => Ok(CommandResponse::Sent),
                    status => Err(DriverError::Request(status)),
                }
            }
            NetworkCommand::PermitJoin { .. } => Ok(CommandResponse::JoinPermitted),
        }
    }

    fn decode_notification(&self, frame: &DeconzFrame) -> Option<Notification> {
        match frame.command {
            command::DEVICE_STATE_CHANGED => {
                let state = frame.payload.first()? & network_state::MASK;
                Some(Notification::NetworkState {
                    up: state == network_state::CONNECTED,
                })
            }
            command::APS_DATA_INDICATION => {
                let indication = match ApsIndication::parse(&frame.payload) {
                    Ok(indication) => indication,
                    Err(error) => {
                        debug!(%error, "undecodable APS indication");
                        return None;
                    }
                };
                decode_aps_notification(
                    indication.source.short()?,
                    indication.source_endpoint,
                    indication.profile,
                    indication.cluster,
                    &indication.asdu,
                )
            }
            _ => None,
        }
    }

    fn leave_request(&mut self) -> Option<RequestSpec<Self>> {
        Some(self.change_network_state(network_state::OFFLINE).describe("leave network"))
    }
}
