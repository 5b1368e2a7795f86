//! TI Z-Stack monitor-and-test (MT) backend.
//!
//! Synchronous requests are answered by an SRSP with the same subsystem and
//! command id, normally carrying a status byte first. Remote operations then
//! complete through an AREQ callback. MT frames carry no sequence number, so
//! callbacks are matched on their source address (ZDO) or on the ZCL
//! transaction sequence (AF).

use tracing::debug;
use zigbee_frame::ti::{MtSubsystem, MtType, TiCodec, TiFrame, MAX_PAYLOAD_LEN};
use zigbee_model::zcl;
use zigbee_model::zdo::{self, DeviceAnnouncement};
use zigbee_model::{ByteReader, IeeeAddress, ModelError, ShortAddress};

use super::{
    additional, aps_transaction, basic_attribute_request, decode_aps_notification, decode_basic_reply,
    decode_descriptor, decode_zcl_reply, primary, zcl_request, Backend, Notification, TransactionCounter,
    ZclRequest,
};
use crate::bootstrap::{BootstrapStep, ControllerInfo, NetworkParameters};
use crate::command::{CommandResponse, NetworkCommand, HOST_ENDPOINT};
use crate::correlator::{Correlation, Protocol, Reply, Request, RequestSpec, REMOTE_TIMEOUT, START_TIMEOUT};
use crate::discovery::{DiscoveryQuery, DiscoveryResponse};
use crate::error::DriverError;
use crate::status::Status;

pub mod sys {
    pub const RESET_REQ: u8 = 0x00;
    pub const VERSION: u8 = 0x02;
    pub const RESET_IND: u8 = 0x80;
}

pub mod af {
    pub const REGISTER: u8 = 0x00;
    pub const DATA_REQUEST: u8 = 0x01;
    pub const DATA_CONFIRM: u8 = 0x80;
    pub const INCOMING_MSG: u8 = 0x81;
}

pub mod zdo_cmd {
    pub const NODE_DESC_REQ: u8 = 0x02;
    pub const POWER_DESC_REQ: u8 = 0x03;
    pub const SIMPLE_DESC_REQ: u8 = 0x04;
    pub const ACTIVE_EP_REQ: u8 = 0x05;
    pub const BIND_REQ: u8 = 0x21;
    pub const MGMT_PERMIT_JOIN_REQ: u8 = 0x36;
    pub const STARTUP_FROM_APP: u8 = 0x40;
    pub const EXT_NWK_INFO: u8 = 0x50;
    pub const NODE_DESC_RSP: u8 = 0x82;
    pub const POWER_DESC_RSP: u8 = 0x83;
    pub const SIMPLE_DESC_RSP: u8 = 0x84;
    pub const ACTIVE_EP_RSP: u8 = 0x85;
    pub const BIND_RSP: u8 = 0xA1;
    pub const STATE_CHANGE_IND: u8 = 0xC0;
    pub const END_DEVICE_ANNCE_IND: u8 = 0xC1;
    pub const LEAVE_IND: u8 = 0xC9;
}

pub mod sapi {
    pub const WRITE_CONFIGURATION: u8 = 0x05;
}

pub mod util {
    pub const GET_DEVICE_INFO: u8 = 0x00;
}

/// Non-volatile configuration item ids.
pub mod config {
    pub const STARTUP_OPTION: u8 = 0x03;
    pub const EXTENDED_PAN_ID: u8 = 0x2D;
    pub const PRECFGKEY: u8 = 0x62;
    pub const CHANLIST: u8 = 0x84;
    pub const LOGICAL_TYPE: u8 = 0x87;

    /// Clear network state and configuration on the next start.
    pub const CLEAR_STATE: u8 = 0x03;
}

/// Device states reported by `STATE_CHANGE_IND`.
pub mod device_state {
    pub const HOLD: u8 = 0x00;
    pub const INIT: u8 = 0x01;
    pub const COORDINATOR_STARTING: u8 = 0x08;
    pub const COORDINATOR: u8 = 0x09;
}

const STARTUP_RESTORED: u8 = 0x00;
const STARTUP_NEW: u8 = 0x01;
const AF_ALREADY_REGISTERED: u8 = 0xB8;
const HA_DEVICE_CONFIGURATION_TOOL: u16 = 0x0005;
const ADDR_MODE_SHORT: u8 = 0x02;
const STARTUP_DELAY_MS: u16 = 100;
const FINALIZE_COMMANDS: u8 = 3;
/// Bytes `AF_DATA_REQUEST` puts in front of the application data.
const AF_HEADER_LEN: usize = 10;
/// Largest application payload that fits one MT frame.
pub const MAX_AF_DATA_LEN: usize = MAX_PAYLOAD_LEN - AF_HEADER_LEN;

pub fn status_of(code: u8) -> Status {
    match code {
        0x00 => Status::Success,
        0x01 => Status::CommandFailed,
        0x02 => Status::InvalidParameter,
        0x10 => Status::Busy,
        code => Status::FirmwareReportedError(code),
    }
}

/// Type, subsystem and id of an MT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiCommand {
    pub kind: MtType,
    pub subsystem: MtSubsystem,
    pub id: u8,
}

impl TiCommand {
    pub const fn sreq(subsystem: MtSubsystem, id: u8) -> Self {
        TiCommand {
            kind: MtType::Sreq,
            subsystem,
            id,
        }
    }

    pub const fn areq(subsystem: MtSubsystem, id: u8) -> Self {
        TiCommand {
            kind: MtType::Areq,
            subsystem,
            id,
        }
    }

    fn is(&self, subsystem: MtSubsystem, id: u8) -> bool {
        self.subsystem == subsystem && self.id == id
    }
}

/// Payload of `AF_INCOMING_MSG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfIncoming {
    pub group: u16,
    pub cluster: u16,
    pub source: ShortAddress,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub broadcast: bool,
    pub lqi: u8,
    pub secured: bool,
    pub timestamp: u32,
    pub transaction: u8,
    pub data: Vec<u8>,
}

impl AfIncoming {
    pub fn parse(payload: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(payload, "af incoming message");
        let group = r.u16()?;
        let cluster = r.u16()?;
        let source = ShortAddress(r.u16()?);
        let source_endpoint = r.u8()?;
        let destination_endpoint = r.u8()?;
        let broadcast = r.u8()? != 0;
        let lqi = r.u8()?;
        let secured = r.u8()? != 0;
        let timestamp = r.u32()?;
        let transaction = r.u8()?;
        let len = r.u8()? as usize;
        let data = r.take(len)?.to_vec();
        Ok(AfIncoming {
            group,
            cluster,
            source,
            source_endpoint,
            destination_endpoint,
            broadcast,
            lqi,
            secured,
            timestamp,
            transaction,
            data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + self.data.len());
        out.extend_from_slice(&self.group.to_le_bytes());
        out.extend_from_slice(&self.cluster.to_le_bytes());
        out.extend_from_slice(&self.source.0.to_le_bytes());
        out.extend_from_slice(&[
            self.source_endpoint,
            self.destination_endpoint,
            self.broadcast as u8,
            self.lqi,
            self.secured as u8,
        ]);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.transaction);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Callback a TI request waits for after its SRSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiExpect {
    /// A ZDO callback whose payload starts with the source address.
    Callback {
        subsystem: MtSubsystem,
        command: u8,
        source: ShortAddress,
    },
    /// An incoming AF message answering a ZCL request.
    AfIncoming {
        cluster: u16,
        source: ShortAddress,
        transaction: u8,
    },
    /// A device state change to `state`.
    StateChange { state: u8 },
}

impl TiExpect {
    fn matches(&self, frame: &TiFrame) -> bool {
        if frame.kind != MtType::Areq {
            return false;
        }
        match *self {
            TiExpect::Callback {
                subsystem,
                command,
                source,
            } => {
                frame.subsystem == subsystem
                    && frame.command == command
                    && frame.payload.len() >= 2
                    && ShortAddress(u16::from_le_bytes([frame.payload[0], frame.payload[1]])) == source
            }
            TiExpect::AfIncoming {
                cluster,
                source,
                transaction,
            } => {
                frame.subsystem == MtSubsystem::Af
                    && frame.command == af::INCOMING_MSG
                    && AfIncoming::parse(&frame.payload).is_ok_and(|msg| {
                        msg.cluster == cluster
                            && msg.source == source
                            && aps_transaction(zcl::HOME_AUTOMATION_PROFILE, &msg.data) == Some(transaction)
                    })
            }
            TiExpect::StateChange { state } => {
                frame.subsystem == MtSubsystem::Zdo
                    && frame.command == zdo_cmd::STATE_CHANGE_IND
                    && frame.payload.first() == Some(&state)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct TiBackend {
    transactions: TransactionCounter,
}

impl TiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_configuration(id: u8, value: &[u8]) -> RequestSpec<Self> {
        let mut payload = vec![id, value.len() as u8];
        payload.extend_from_slice(value);
        RequestSpec::new(TiCommand::sreq(MtSubsystem::Sapi, sapi::WRITE_CONFIGURATION), payload)
            .describe("write configuration")
    }

    /// ZDO request answered by a callback from `target`.
    fn zdo_request(id: u8, callback: u8, target: ShortAddress, body: &[u8]) -> RequestSpec<Self> {
        let mut payload = target.0.to_le_bytes().to_vec();
        payload.extend_from_slice(body);
        RequestSpec::new(TiCommand::sreq(MtSubsystem::Zdo, id), payload)
            .expect(TiExpect::Callback {
                subsystem: MtSubsystem::Zdo,
                command: callback,
                source: target,
            })
            .timeout(REMOTE_TIMEOUT)
    }

    fn af_data_request(&mut self, request: ZclRequest) -> RequestSpec<Self> {
        let transaction = zcl::transaction_of(&request.frame).unwrap_or_default();
        RequestSpec::new(
            TiCommand::sreq(MtSubsystem::Af, af::DATA_REQUEST),
            af_payload(request.target, request.endpoint, request.cluster, transaction, &request.frame),
        )
        .expect(TiExpect::AfIncoming {
            cluster: request.cluster,
            source: request.target,
            transaction,
        })
        .timeout(REMOTE_TIMEOUT)
    }
}

fn check_af_data_len(len: usize) -> Result<(), DriverError> {
    if len > MAX_AF_DATA_LEN {
        return Err(DriverError::Unsupported {
            backend: TiBackend::NAME,
            what: "application payloads over 240 bytes",
        });
    }
    Ok(())
}

/// `dst, dst ep, src ep, cluster, trans id, options, radius, len, data`
fn af_payload(target: ShortAddress, endpoint: u8, cluster: u16, transaction: u8, data: &[u8]) -> Vec<u8> {
    let mut out = target.0.to_le_bytes().to_vec();
    out.extend_from_slice(&[endpoint, HOST_ENDPOINT]);
    out.extend_from_slice(&cluster.to_le_bytes());
    // options, radius
    out.extend_from_slice(&[transaction, 0x00, 0x1E, data.len() as u8]);
    out.extend_from_slice(data);
    out
}

fn srsp_status(request: &TiCommand, frame: &TiFrame) -> Status {
    if request.is(MtSubsystem::Sys, sys::VERSION) || request.is(MtSubsystem::Zdo, zdo_cmd::EXT_NWK_INFO) {
        return Status::Success;
    }
    let Some(&code) = frame.payload.first() else {
        return Status::CommandFailed;
    };
    if request.is(MtSubsystem::Zdo, zdo_cmd::STARTUP_FROM_APP) {
        return match code {
            STARTUP_RESTORED | STARTUP_NEW => Status::Success,
            _ => Status::CommandFailed,
        };
    }
    if request.is(MtSubsystem::Af, af::REGISTER) && code == AF_ALREADY_REGISTERED {
        return Status::Success;
    }
    status_of(code)
}

impl Protocol for TiBackend {
    type Frame = TiFrame;
    type Command = TiCommand;
    type Additional = TiExpect;
    type Codec = TiCodec;

    const NAME: &'static str = "ti";

    fn new_codec(&self) -> TiCodec {
        TiCodec::new()
    }

    fn encode_request(&self, request: &Request<Self>) -> TiFrame {
        let command = request.command;
        TiFrame::new(command.kind, command.subsystem, command.id, request.payload.clone())
    }

    fn correlate(&self, request: &Request<Self>, frame: &TiFrame) -> Correlation {
        let command = request.command;
        match (command.kind, frame.kind) {
            (MtType::Sreq, MtType::Srsp) => {
                if frame.subsystem == command.subsystem && frame.command == command.id {
                    return Correlation::Primary(srsp_status(&command, frame));
                }
                // RPC error: error code, cmd0, cmd1 of the rejected request
                if frame.subsystem == MtSubsystem::Rpc
                    && frame.command == 0x00
                    && frame.payload.get(1).map(|c| c & 0x1F) == Some(command.subsystem.bits())
                    && frame.payload.get(2) == Some(&command.id)
                {
                    return Correlation::Primary(Status::UnhandledCommand);
                }
                return Correlation::Stale;
            }
            (MtType::Areq, MtType::Areq)
                if command.is(MtSubsystem::Sys, sys::RESET_REQ)
                    && frame.subsystem == MtSubsystem::Sys
                    && frame.command == sys::RESET_IND =>
            {
                return Correlation::Primary(Status::Success);
            }
            (_, MtType::Srsp) => return Correlation::Stale,
            _ => {}
        }
        match &request.additional {
            Some(expect) if expect.matches(frame) => Correlation::Additional,
            _ => Correlation::Unsolicited,
        }
    }
}

impl Backend for TiBackend {
    const DEFAULT_BAUD_RATE: u32 = 115_200;
    const FINALIZE_STEPS: u8 = FINALIZE_COMMANDS;

    fn bootstrap_request(&mut self, step: BootstrapStep, params: &NetworkParameters) -> Option<RequestSpec<Self>> {
        let spec = match step {
            BootstrapStep::Erase => Self::write_configuration(config::STARTUP_OPTION, &[config::CLEAR_STATE]),
            BootstrapStep::Reset => {
                // Soft reset
                RequestSpec::new(TiCommand::areq(MtSubsystem::Sys, sys::RESET_REQ), vec![0x01]).describe("reset")
            }
            BootstrapStep::GetVersion => {
                RequestSpec::new(TiCommand::sreq(MtSubsystem::Sys, sys::VERSION), vec![]).describe("version")
            }
            BootstrapStep::SetExtendedPanId => {
                Self::write_configuration(config::EXTENDED_PAN_ID, &params.extended_pan_id.to_le_bytes())
            }
            BootstrapStep::SetChannelMask => {
                Self::write_configuration(config::CHANLIST, &params.channel_mask.to_le_bytes())
            }
            BootstrapStep::SetSecurityKeys => Self::write_configuration(config::PRECFGKEY, &params.network_key),
            BootstrapStep::SetNodeType => Self::write_configuration(config::LOGICAL_TYPE, &[0x00]),
            BootstrapStep::StartNetwork => RequestSpec::new(
                TiCommand::sreq(MtSubsystem::Zdo, zdo_cmd::STARTUP_FROM_APP),
                STARTUP_DELAY_MS.to_le_bytes().to_vec(),
            )
            .expect(TiExpect::StateChange {
                state: device_state::COORDINATOR,
            })
            .timeout(START_TIMEOUT)
            .describe("startup from app"),
            BootstrapStep::Finalize(0) => {
                RequestSpec::new(TiCommand::sreq(MtSubsystem::Zdo, zdo_cmd::EXT_NWK_INFO), vec![])
                    .describe("extended network info")
            }
            BootstrapStep::Finalize(1) => {
                RequestSpec::new(TiCommand::sreq(MtSubsystem::Util, util::GET_DEVICE_INFO), vec![])
                    .describe("device info")
            }
            BootstrapStep::Finalize(2) => {
                let mut payload = vec![HOST_ENDPOINT];
                payload.extend_from_slice(&zcl::HOME_AUTOMATION_PROFILE.to_le_bytes());
                payload.extend_from_slice(&HA_DEVICE_CONFIGURATION_TOOL.to_le_bytes());
                // version, latency, no input or output clusters
                payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
                RequestSpec::new(TiCommand::sreq(MtSubsystem::Af, af::REGISTER), payload).describe("register endpoint")
            }
            BootstrapStep::Finalize(_) => return None,
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
                let mut r = ByteReader::new(&frame.payload, "version");
                let _transport = r.u8()?;
                let _product = r.u8()?;
                let (major, minor, maint) = (r.u8()?, r.u8()?, r.u8()?);
                info.firmware_version = Some(format!("{}.{}.{}", major, minor, maint));
            }
            BootstrapStep::Finalize(0) => {
                let frame = primary(reply, "extended network info")?;
                let mut r = ByteReader::new(&frame.payload, "extended network info");
                info.short_address = Some(ShortAddress(r.u16()?));
                info.pan_id = Some(r.u16()?);
                let _parent = r.u16()?;
                info.extended_pan_id = Some(r.u64()?);
                let _parent_extended = r.u64()?;
                info.channel = Some(r.u8()?);
            }
            BootstrapStep::Finalize(1) => {
                let frame = primary(reply, "device info")?;
                let mut r = ByteReader::new(&frame.payload, "device info");
                let _status = r.u8()?;
                info.ieee_address = Some(IeeeAddress(r.u64()?));
                info.short_address = Some(ShortAddress(r.u16()?));
            }
            _ => {}
        }
        Ok(())
    }

    fn discovery_request(&mut self, query: &DiscoveryQuery) -> RequestSpec<Self> {
        let spec = match *query {
            DiscoveryQuery::NodeDescriptor { target } => {
                Self::zdo_request(zdo_cmd::NODE_DESC_REQ, zdo_cmd::NODE_DESC_RSP, target, &target.0.to_le_bytes())
            }
            DiscoveryQuery::PowerDescriptor { target } => {
                Self::zdo_request(zdo_cmd::POWER_DESC_REQ, zdo_cmd::POWER_DESC_RSP, target, &target.0.to_le_bytes())
            }
            DiscoveryQuery::ActiveEndpoints { target } => {
                Self::zdo_request(zdo_cmd::ACTIVE_EP_REQ, zdo_cmd::ACTIVE_EP_RSP, target, &target.0.to_le_bytes())
            }
            DiscoveryQuery::SimpleDescriptor { target, endpoint } => {
                let mut body = target.0.to_le_bytes().to_vec();
                body.push(endpoint);
                Self::zdo_request(zdo_cmd::SIMPLE_DESC_REQ, zdo_cmd::SIMPLE_DESC_RSP, target, &body)
            }
            DiscoveryQuery::BasicAttributes { target, endpoint } => {
                let transaction = self.transactions.next();
                let request = basic_attribute_request(target, endpoint, transaction);
                self.af_data_request(request)
            }
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
            return decode_basic_reply(&AfIncoming::parse(&frame.payload)?.data);
        }
        // src, status, nwk of interest, body
        let mut r = ByteReader::new(&frame.payload, "zdo callback");
        r.u16()?;
        let status = r.u8()?;
        if status != zdo::status::SUCCESS {
            return Err(DriverError::ZdoStatus(status));
        }
        r.u16()?;
        decode_descriptor(query, status, r.rest())
    }

    fn command_request(&mut self, command: &NetworkCommand) -> Result<RequestSpec<Self>, DriverError> {
        let transaction = self.transactions.next();
        if let Some(request) = zcl_request(command, transaction)? {
            check_af_data_len(request.frame.len())?;
            return Ok(self.af_data_request(request).describe(command.name()));
        }

        let spec = match command {
            NetworkCommand::Bind {
                target,
                source,
                source_endpoint,
                cluster,
                destination,
            } => Self::zdo_request(
                zdo_cmd::BIND_REQ,
                zdo_cmd::BIND_RSP,
                *target,
                &zdo::bind_request_body(*source, *source_endpoint, *cluster, *destination),
            ),
            NetworkCommand::SendApplicationData {
                target,
                endpoint,
                profile,
                cluster,
                payload,
            } => {
                if *profile != zcl::HOME_AUTOMATION_PROFILE {
                    return Err(DriverError::Unsupported {
                        backend: Self::NAME,
                        what: "profiles other than home automation",
                    });
                }
                check_af_data_len(payload.len())?;
                RequestSpec::new(
                    TiCommand::sreq(MtSubsystem::Af, af::DATA_REQUEST),
                    af_payload(*target, *endpoint, *cluster, transaction, payload),
                )
            }
            NetworkCommand::PermitJoin { duration_secs } => {
                let mut payload = vec![ADDR_MODE_SHORT];
                payload.extend_from_slice(&ShortAddress::BROADCAST_ROUTERS.0.to_le_bytes());
                payload.extend_from_slice(&[*duration_secs, 0x00]);
                RequestSpec::new(TiCommand::sreq(MtSubsystem::Zdo, zdo_cmd::MGMT_PERMIT_JOIN_REQ), payload)
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
                let frame = additional(reply, command.name())?;
                decode_zcl_reply(command, &AfIncoming::parse(&frame.payload)?.data)
            }
            NetworkCommand::Bind { .. } => {
                let frame = additional(reply, "bind")?;
                let mut r = ByteReader::new(&frame.payload, "bind response");
                r.u16()?;
                let status = r.u8()?;
                if status != zdo::status::SUCCESS {
                    return Err(DriverError::ZdoStatus(status));
                }
                Ok(CommandResponse::Bound)
            }
            NetworkCommand::SendApplicationData { .. } => Ok(CommandResponse::Sent),
            NetworkCommand::PermitJoin { .. } => Ok(CommandResponse::JoinPermitted),
        }
    }

    fn decode_notification(&self, frame: &TiFrame) -> Option<Notification> {
        if frame.kind != MtType::Areq {
            return None;
        }
        let decoded = match (frame.subsystem, frame.command) {
            (MtSubsystem::Zdo, zdo_cmd::END_DEVICE_ANNCE_IND) => frame
                .payload
                .get(2..)
                .ok_or_else(|| ModelError::truncated("device announcement", 2, frame.payload.len()))
                .and_then(DeviceAnnouncement::parse)
                .map(Notification::DeviceAnnounced),
            (MtSubsystem::Zdo, zdo_cmd::LEAVE_IND) => decode_leave(&frame.payload),
            (MtSubsystem::Zdo, zdo_cmd::STATE_CHANGE_IND) => {
                return match frame.payload.first().copied()? {
                    device_state::COORDINATOR => Some(Notification::NetworkState { up: true }),
                    device_state::HOLD | device_state::INIT => Some(Notification::NetworkState { up: false }),
                    _ => None,
                };
            }
            (MtSubsystem::Af, af::INCOMING_MSG) => match AfIncoming::parse(&frame.payload) {
                Ok(msg) => {
                    return decode_aps_notification(
                        msg.source,
                        msg.source_endpoint,
                        zcl::HOME_AUTOMATION_PROFILE,
                        msg.cluster,
                        &msg.data,
                    )
                }
                Err(error) => Err(error),
            },
            _ => return None,
        };
        match decoded {
            Ok(notification) => Some(notification),
            Err(error) => {
                debug!(subsystem = ?frame.subsystem, command = frame.command, %error, "undecodable callback");
                None
            }
        }
    }

    fn leave_request(&mut self) -> Option<RequestSpec<Self>> {
        None
    }
}

/// `src, ieee, request, remove children, rejoin`
fn decode_leave(payload: &[u8]) -> Result<Notification, ModelError> {
    let mut r = ByteReader::new(payload, "leave indication");
    r.u16()?;
    let ieee = IeeeAddress(r.u64()?);
    let _request = r.u8()?;
    let _remove_children = r.u8()?;
    Ok(Notification::Leave {
        ieee,
        rejoin: r.u8()? != 0,
    })
}
