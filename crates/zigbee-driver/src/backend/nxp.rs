//! NXP coprocessor backend.
//!
//! Every request is answered by a status message (`0x8000`) echoing the
//! request's sequence and message type. Requests that produce data are then
//! answered by a response message of their own type, also carrying the
//! request's sequence.

use tracing::{debug, warn};
use zigbee_frame::nxp::{NxpCodec, NxpFrame};
use zigbee_model::zcl::{self, decode_value, AttributeRecord, DataType};
use zigbee_model::zdo::{self, DeviceAnnouncement};
use zigbee_model::{ByteReader, IeeeAddress, ModelError, ShortAddress};

use super::{additional, decode_aps_notification, decode_descriptor, Backend, Notification};
use crate::bootstrap::{BootstrapStep, ControllerInfo, NetworkParameters};
use crate::command::{CommandResponse, NetworkCommand, HOST_ENDPOINT};
use crate::correlator::{Correlation, Protocol, Reply, Request, RequestSpec, REMOTE_TIMEOUT, START_TIMEOUT};
use crate::discovery::{DiscoveryQuery, DiscoveryResponse, BASIC_ATTRIBUTES};
use crate::error::DriverError;
use crate::status::Status;

/// Message types.
pub mod msg {
    pub const GET_VERSION: u16 = 0x0010;
    pub const RESET: u16 = 0x0011;
    pub const ERASE_PERSISTENT_DATA: u16 = 0x0012;
    pub const SET_EXTENDED_PANID: u16 = 0x0020;
    pub const SET_CHANNEL_MASK: u16 = 0x0021;
    pub const SET_NETWORK_KEY: u16 = 0x0022;
    pub const SET_DEVICE_TYPE: u16 = 0x0023;
    pub const START_NETWORK: u16 = 0x0024;
    pub const BIND: u16 = 0x0030;
    pub const NODE_DESCRIPTOR: u16 = 0x0042;
    pub const SIMPLE_DESCRIPTOR: u16 = 0x0043;
    pub const POWER_DESCRIPTOR: u16 = 0x0044;
    pub const ACTIVE_ENDPOINTS: u16 = 0x0045;
    pub const PERMIT_JOIN: u16 = 0x0049;
    pub const DEVICE_ANNOUNCE: u16 = 0x004D;
    pub const READ_ATTRIBUTES: u16 = 0x0100;
    pub const WRITE_ATTRIBUTES: u16 = 0x0110;
    pub const CONFIGURE_REPORTING: u16 = 0x0120;
    pub const RAW_APS_DATA: u16 = 0x0530;

    pub const STATUS: u16 = 0x8000;
    pub const DATA_INDICATION: u16 = 0x8002;
    pub const VERSION_LIST: u16 = 0x8010;
    pub const NETWORK_JOINED: u16 = 0x8024;
    pub const BIND_RESPONSE: u16 = 0x8030;
    pub const NODE_DESCRIPTOR_RESPONSE: u16 = 0x8042;
    pub const SIMPLE_DESCRIPTOR_RESPONSE: u16 = 0x8043;
    pub const POWER_DESCRIPTOR_RESPONSE: u16 = 0x8044;
    pub const ACTIVE_ENDPOINTS_RESPONSE: u16 = 0x8045;
    pub const LEAVE_INDICATION: u16 = 0x8048;
    pub const READ_ATTRIBUTES_RESPONSE: u16 = 0x8100;
    pub const REPORT_ATTRIBUTES: u16 = 0x8102;
    pub const WRITE_ATTRIBUTES_RESPONSE: u16 = 0x8110;
    pub const CONFIGURE_REPORTING_RESPONSE: u16 = 0x8120;
}

const ADDR_MODE_SHORT: u8 = 0x02;
const DEVICE_TYPE_COORDINATOR: u8 = 0x00;

pub fn status_of(code: u8) -> Status {
    match code {
        0x00 => Status::Success,
        0x01 => Status::InvalidParameter,
        0x02 => Status::UnhandledCommand,
        0x03 => Status::CommandFailed,
        0x04 => Status::Busy,
        0x05 => Status::AlreadyRunning,
        code => Status::FirmwareReportedError(code),
    }
}

/// Payload of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: u8,
    pub sequence: u8,
    pub packet_type: u16,
}

impl StatusMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "status message");
        Ok(StatusMessage {
            status: r.u8()?,
            sequence: r.u8()?,
            packet_type: r.u16()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status, self.sequence];
        out.extend_from_slice(&self.packet_type.to_le_bytes());
        out
    }
}

/// Payload of a network joined or formed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkJoined {
    pub status: u8,
    pub short_address: ShortAddress,
    pub ieee_address: IeeeAddress,
    pub extended_pan_id: u64,
    pub channel: u8,
}

impl NetworkJoined {
    pub const JOINED: u8 = 0x00;
    pub const FORMED: u8 = 0x01;

    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "network joined");
        Ok(NetworkJoined {
            status: r.u8()?,
            short_address: ShortAddress(r.u16()?),
            ieee_address: IeeeAddress(r.u64()?),
            extended_pan_id: r.u64()?,
            channel: r.u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(&self.short_address.0.to_le_bytes());
        out.extend_from_slice(&self.ieee_address.to_le_bytes());
        out.extend_from_slice(&self.extended_pan_id.to_le_bytes());
        out.push(self.channel);
        out
    }

    pub fn is_up(&self) -> bool {
        matches!(self.status, Self::JOINED | Self::FORMED)
    }
}

/// Attribute records carried by read responses and reports.
///
/// Each record is `id, status, type, size, value`, where the value is ZCL
/// encoded and exactly `size` bytes long. `with_status` false parses records
/// that lack the status byte.
pub fn parse_nxp_records(data: &[u8], with_status: bool) -> Result<Vec<AttributeRecord>, ModelError> {
    let mut r = ByteReader::new(data, "attribute records");
    let mut records = Vec::new();
    while !r.is_empty() {
        let id = r.u16()?;
        let status = if with_status { r.u8()? } else { zcl::status::SUCCESS };
        let data_type = DataType::from_u8(r.u8()?)?;
        let size = r.u16()? as usize;
        let raw = r.take(size)?;
        if status != zcl::status::SUCCESS {
            records.push(AttributeRecord::failed(id, status));
            continue;
        }
        let (value, used) = decode_value(data_type, raw)?;
        if used != size {
            return Err(ModelError::TrailingData {
                what: "attribute value",
                extra: size - used,
            });
        }
        records.push(AttributeRecord::new(id, data_type, value, raw.to_vec()));
    }
    Ok(records)
}

/// Records from firmware builds that omit the per-record status byte.
///
/// Tried only after the regular layout failed to parse.
pub fn fallback_missing_status_byte(data: &[u8]) -> Result<Vec<AttributeRecord>, ModelError> {
    parse_nxp_records(data, false)
}

/// Records of a read response or report: `zcl seq, short, endpoint, cluster, records`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    pub transaction: u8,
    pub source: ShortAddress,
    pub endpoint: u8,
    pub cluster: u16,
    pub records: Vec<AttributeRecord>,
}

impl AttributeMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "attribute message");
        let transaction = r.u8()?;
        let source = ShortAddress(r.u16()?);
        let endpoint = r.u8()?;
        let cluster = r.u16()?;
        let body = r.rest();
        let records = match parse_nxp_records(body, true) {
            Ok(records) => records,
            Err(error) => match fallback_missing_status_byte(body) {
                Ok(records) => {
                    warn!(%source, cluster, %error, "attribute records without status bytes");
                    records
                }
                Err(_) => return Err(error),
            },
        };
        Ok(AttributeMessage {
            transaction,
            source,
            endpoint,
            cluster,
            records,
        })
    }
}

/// Status records of a write or configure response after the common prefix.
fn status_records(data: &[u8], with_direction: bool) -> Result<Vec<(u8, u16)>, ModelError> {
    let mut r = ByteReader::new(data, "status records");
    r.take(6)?;
    zcl::parse_status_records(r.rest(), with_direction)
}

/// Response a request waits for after its status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NxpExpect {
    Response(u16),
}

/// The firmware assigns ZCL and ZDP transaction numbers itself.
#[derive(Debug, Default)]
pub struct NxpBackend;

impl NxpBackend {
    pub fn new() -> Self {
        NxpBackend
    }

    /// `addr mode, short, src ep, dst ep, cluster` prefix of attribute requests.
    fn attribute_prefix(target: ShortAddress, endpoint: u8, cluster: u16) -> Vec<u8> {
        let mut out = vec![ADDR_MODE_SHORT];
        out.extend_from_slice(&target.0.to_le_bytes());
        out.extend_from_slice(&[HOST_ENDPOINT, endpoint]);
        out.extend_from_slice(&cluster.to_le_bytes());
        // client to server, no manufacturer code
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        out
    }

    fn read_attributes(target: ShortAddress, endpoint: u8, cluster: u16, attributes: &[u16]) -> Vec<u8> {
        let mut out = Self::attribute_prefix(target, endpoint, cluster);
        out.push(attributes.len() as u8);
        for id in attributes {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }

    fn remote(command: u16, payload: Vec<u8>, response: u16) -> RequestSpec<Self> {
        RequestSpec::new(command, payload)
            .expect(NxpExpect::Response(response))
            .timeout(REMOTE_TIMEOUT)
    }
}

impl Protocol for NxpBackend {
    type Frame = NxpFrame;
    type Command = u16;
    type Additional = NxpExpect;
    type Codec = NxpCodec;

    const NAME: &'static str = "nxp";

    fn new_codec(&self) -> NxpCodec {
        NxpCodec::new()
    }

    fn encode_request(&self, request: &Request<Self>) -> NxpFrame {
        NxpFrame::new(request.command, request.sequence, request.payload.clone())
    }

    fn correlate(&self, request: &Request<Self>, frame: &NxpFrame) -> Correlation {
        if frame.msg_type == msg::STATUS {
            return match StatusMessage::parse(&frame.payload) {
                Ok(status)
                    if frame.sequence == request.sequence
                        && status.sequence == request.sequence
                        && status.packet_type == request.command =>
                {
                    Correlation::Primary(status_of(status.status))
                }
                _ => Correlation::Stale,
            };
        }
        match request.additional {
            Some(NxpExpect::Response(msg_type)) if frame.msg_type == msg_type && frame.sequence == request.sequence => {
                Correlation::Additional
            }
            _ => Correlation::Unsolicited,
        }
    }
}

impl Backend for NxpBackend {
    const DEFAULT_BAUD_RATE: u32 = 115_200;
    const FINALIZE_STEPS: u8 = 0;

    fn bootstrap_request(&mut self, step: BootstrapStep, params: &NetworkParameters) -> Option<RequestSpec<Self>> {
        let spec = match step {
            BootstrapStep::Erase => RequestSpec::new(msg::ERASE_PERSISTENT_DATA, vec![]),
            BootstrapStep::Reset => RequestSpec::new(msg::RESET, vec![]),
            BootstrapStep::GetVersion => {
                RequestSpec::new(msg::GET_VERSION, vec![]).expect(NxpExpect::Response(msg::VERSION_LIST))
            }
            BootstrapStep::SetExtendedPanId => {
                RequestSpec::new(msg::SET_EXTENDED_PANID, params.extended_pan_id.to_le_bytes().to_vec())
            }
            BootstrapStep::SetChannelMask => {
                RequestSpec::new(msg::SET_CHANNEL_MASK, params.channel_mask.to_le_bytes().to_vec())
            }
            BootstrapStep::SetSecurityKeys => RequestSpec::new(msg::SET_NETWORK_KEY, params.network_key.to_vec()),
            BootstrapStep::SetNodeType => RequestSpec::new(msg::SET_DEVICE_TYPE, vec![DEVICE_TYPE_COORDINATOR]),
            BootstrapStep::StartNetwork => RequestSpec::new(msg::START_NETWORK, vec![])
                .expect(NxpExpect::Response(msg::NETWORK_JOINED))
                .timeout(START_TIMEOUT),
            BootstrapStep::Finalize(_) => return None,
        };
        Some(spec.describe("bootstrap"))
    }

    fn apply_bootstrap_reply(
        &mut self,
        step: BootstrapStep,
        reply: &Reply<Self>,
        info: &mut ControllerInfo,
    ) -> Result<(), DriverError> {
        match step {
            BootstrapStep::GetVersion => {
                let frame = additional(reply, "get version")?;
                let mut r = ByteReader::new(&frame.payload, "version list");
                let major = r.u16()?;
                let minor = r.u16()?;
                info.firmware_version = Some(format!("{}.{:04x}", major, minor));
            }
            BootstrapStep::StartNetwork => {
                let joined = NetworkJoined::parse(&additional(reply, "start network")?.payload)?;
                if !joined.is_up() {
                    return Err(DriverError::Request(Status::FirmwareReportedError(joined.status)));
                }
                info.short_address = Some(joined.short_address);
                info.ieee_address = Some(joined.ieee_address);
                info.extended_pan_id = Some(joined.extended_pan_id);
                info.channel = Some(joined.channel);
            }
            _ => {}
        }
        Ok(())
    }

    fn discovery_request(&mut self, query: &DiscoveryQuery) -> RequestSpec<Self> {
        let short = query.target().0.to_le_bytes().to_vec();
        let spec = match *query {
            DiscoveryQuery::NodeDescriptor { .. } => {
                Self::remote(msg::NODE_DESCRIPTOR, short, msg::NODE_DESCRIPTOR_RESPONSE)
            }
            DiscoveryQuery::PowerDescriptor { .. } => {
                Self::remote(msg::POWER_DESCRIPTOR, short, msg::POWER_DESCRIPTOR_RESPONSE)
            }
            DiscoveryQuery::ActiveEndpoints { .. } => {
                Self::remote(msg::ACTIVE_ENDPOINTS, short, msg::ACTIVE_ENDPOINTS_RESPONSE)
            }
            DiscoveryQuery::SimpleDescriptor { endpoint, .. } => {
                let mut payload = short;
                payload.push(endpoint);
                Self::remote(msg::SIMPLE_DESCRIPTOR, payload, msg::SIMPLE_DESCRIPTOR_RESPONSE)
            }
            DiscoveryQuery::BasicAttributes { target, endpoint } => Self::remote(
                msg::READ_ATTRIBUTES,
                Self::read_attributes(target, endpoint, zcl::cluster::BASIC, &BASIC_ATTRIBUTES),
                msg::READ_ATTRIBUTES_RESPONSE,
            ),
        };
        spec.describe("discovery")
    }

    fn parse_discovery_reply(
        &self,
        query: &DiscoveryQuery,
        reply: &Reply<Self>,
    ) -> Result<DiscoveryResponse, DriverError> {
        let frame = additional(reply, "discovery request")?;
        if let DiscoveryQuery::BasicAttributes { .. } = query {
            let message = AttributeMessage::parse(&frame.payload)?;
            return Ok(DiscoveryResponse::BasicAttributes(message.records));
        }
        let mut r = ByteReader::new(&frame.payload, "descriptor response");
        let status = r.u8()?;
        if status != zdo::status::SUCCESS {
            return Err(DriverError::ZdoStatus(status));
        }
        r.u16()?;
        decode_descriptor(query, status, r.rest())
    }

    fn command_request(&mut self, command: &NetworkCommand) -> Result<RequestSpec<Self>, DriverError> {
        let spec = match command {
            NetworkCommand::ReadAttributes {
                target,
                endpoint,
                cluster,
                attributes,
            } => Self::remote(
                msg::READ_ATTRIBUTES,
                Self::read_attributes(*target, *endpoint, *cluster, attributes),
                msg::READ_ATTRIBUTES_RESPONSE,
            ),
            NetworkCommand::WriteAttributes {
                target,
                endpoint,
                cluster,
                writes,
            } => {
                let mut payload = Self::attribute_prefix(*target, *endpoint, *cluster);
                payload.push(writes.len() as u8);
                for write in writes {
                    payload.extend_from_slice(&write.id.to_le_bytes());
                    payload.push(write.data_type.to_u8());
                    payload.extend(zcl::encode_value(write.data_type, &write.value)?);
                }
                Self::remote(msg::WRITE_ATTRIBUTES, payload, msg::WRITE_ATTRIBUTES_RESPONSE)
            }
            NetworkCommand::ConfigureReporting {
                target,
                endpoint,
                cluster,
                configs,
            } => {
                let mut payload = Self::attribute_prefix(*target, *endpoint, *cluster);
                payload.push(configs.len() as u8);
                for config in configs {
                    payload.push(0x00);
                    payload.push(config.data_type.to_u8());
                    payload.extend_from_slice(&config.attribute.to_le_bytes());
                    payload.extend_from_slice(&config.min_interval.to_le_bytes());
                    payload.extend_from_slice(&config.max_interval.to_le_bytes());
                    // timeout
                    payload.extend_from_slice(&[0x00, 0x00]);
                    if config.data_type.is_analog() {
                        let change = config
                            .reportable_change
                            .as_ref()
                            .ok_or(ModelError::ValueTypeMismatch(config.data_type))?;
                        payload.extend(zcl::encode_value(config.data_type, change)?);
                    }
                }
                Self::remote(msg::CONFIGURE_REPORTING, payload, msg::CONFIGURE_REPORTING_RESPONSE)
            }
            NetworkCommand::Bind {
                source,
                source_endpoint,
                cluster,
                destination,
                ..
            } => Self::remote(
                msg::BIND,
                zdo::bind_request_body(*source, *source_endpoint, *cluster, *destination),
                msg::BIND_RESPONSE,
            ),
            NetworkCommand::SendApplicationData {
                target,
                endpoint,
                profile,
                cluster,
                payload,
            } => {
                let len = u8::try_from(payload.len()).map_err(|_| DriverError::Unsupported {
                    backend: Self::NAME,
                    what: "payloads over 255 bytes",
                })?;
                let mut body = vec![ADDR_MODE_SHORT];
                body.extend_from_slice(&target.0.to_le_bytes());
                body.extend_from_slice(&[HOST_ENDPOINT, *endpoint]);
                body.extend_from_slice(&profile.to_le_bytes());
                body.extend_from_slice(&cluster.to_le_bytes());
                // security, radius
                body.extend_from_slice(&[0x00, 0x00, len]);
                body.extend_from_slice(payload);
                RequestSpec::new(msg::RAW_APS_DATA, body)
            }
            NetworkCommand::PermitJoin { duration_secs } => {
                let mut body = ShortAddress::BROADCAST_ROUTERS.0.to_le_bytes().to_vec();
                body.extend_from_slice(&[*duration_secs, 0x00]);
                RequestSpec::new(msg::PERMIT_JOIN, body)
            }
        };
        Ok(spec.describe(command.name()))
    }

    fn parse_command_reply(
        &self,
        command: &NetworkCommand,
        reply: &Reply<Self>,
    ) -> Result<CommandResponse, DriverError> {
        let response = match command {
            NetworkCommand::ReadAttributes { .. } => {
                let frame = additional(reply, "read attributes")?;
                CommandResponse::Attributes(AttributeMessage::parse(&frame.payload)?.records)
            }
            NetworkCommand::WriteAttributes { .. } => {
                let frame = additional(reply, "write attributes")?;
                CommandResponse::WriteStatus(status_records(&frame.payload, false)?)
            }
            NetworkCommand::ConfigureReporting { .. } => {
                let frame = additional(reply, "configure reporting")?;
                CommandResponse::ReportingStatus(status_records(&frame.payload, true)?)
            }
            NetworkCommand::Bind { .. } => {
                let frame = additional(reply, "bind")?;
                let status = ByteReader::new(&frame.payload, "bind response").u8()?;
                if status != zdo::status::SUCCESS {
                    return Err(DriverError::ZdoStatus(status));
                }
                CommandResponse::Bound
            }
            NetworkCommand::SendApplicationData { .. } => CommandResponse::Sent,
            NetworkCommand::PermitJoin { .. } => CommandResponse::JoinPermitted,
        };
        Ok(response)
    }

    fn decode_notification(&self, frame: &NxpFrame) -> Option<Notification> {
        let decoded = match frame.msg_type {
            msg::DEVICE_ANNOUNCE => DeviceAnnouncement::parse(&frame.payload).map(Notification::DeviceAnnounced),
            msg::LEAVE_INDICATION => decode_leave(&frame.payload),
            msg::REPORT_ATTRIBUTES => AttributeMessage::parse(&frame.payload).map(|m| Notification::AttributeReport {
                source: m.source,
                endpoint: m.endpoint,
                cluster: m.cluster,
                records: m.records,
            }),
            msg::NETWORK_JOINED => {
                NetworkJoined::parse(&frame.payload).map(|j| Notification::NetworkState { up: j.is_up() })
            }
            msg::DATA_INDICATION => return decode_data_indication(&frame.payload),
            _ => return None,
        };
        match decoded {
            Ok(notification) => Some(notification),
            Err(error) => {
                debug!(msg_type = frame.msg_type, %error, "undecodable notification");
                None
            }
        }
    }

    fn leave_request(&mut self) -> Option<RequestSpec<Self>> {
        Some(RequestSpec::new(msg::RESET, vec![]).describe("leave network"))
    }
}

fn decode_leave(data: &[u8]) -> Result<Notification, ModelError> {
    let mut r = ByteReader::new(data, "leave indication");
    Ok(Notification::Leave {
        ieee: IeeeAddress(r.u64()?),
        rejoin: r.u8()? != 0,
    })
}

/// `status, profile, cluster, src ep, dst ep, src mode, src, dst mode, dst, payload`
fn decode_data_indication(data: &[u8]) -> Option<Notification> {
    let mut r = ByteReader::new(data, "data indication");
    let status = r.u8().ok()?;
    if status != 0 {
        return None;
    }
    let profile = r.u16().ok()?;
    let cluster = r.u16().ok()?;
    let source_endpoint = r.u8().ok()?;
    let _destination_endpoint = r.u8().ok()?;
    if r.u8().ok()? != ADDR_MODE_SHORT {
        return None;
    }
    let source = ShortAddress(r.u16().ok()?);
    r.u8().ok()?;
    r.u16().ok()?;
    decode_aps_notification(source, source_endpoint, profile, cluster, r.rest())
}
