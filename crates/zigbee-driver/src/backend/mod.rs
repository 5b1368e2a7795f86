//! Firmware backends.
//!
//! A [`Backend`] is a [`Protocol`] plus everything the network controller
//! needs from one firmware family: the request that implements each bootstrap
//! step and discovery query, the parsing of their replies, and the decoding
//! of unsolicited frames into [`Notification`]s.
//!
//! - [`deconz`]: SLIP framed, sequence-echoing command set
//! - [`nxp`]: byte-stuffed message types with a status message per request
//! - [`ti`]: Z-Stack monitor-and-test (MT) commands with synchronous replies

pub mod deconz;
pub mod nxp;
pub mod ti;

pub use deconz::DeconzBackend;
pub use nxp::NxpBackend;
pub use ti::TiBackend;

use zigbee_model::zcl::{self, AttributeRecord, ZclFrame};
use zigbee_model::zdo::{self, DeviceAnnouncement, NodeDescriptor, PowerDescriptor, SimpleDescriptor};
use zigbee_model::{ByteReader, IeeeAddress, ShortAddress};

use crate::bootstrap::{BootstrapStep, ControllerInfo, NetworkParameters};
use crate::command::{CommandResponse, NetworkCommand};
use crate::correlator::{Protocol, Reply, RequestSpec};
use crate::discovery::{DiscoveryQuery, DiscoveryResponse, BASIC_ATTRIBUTES};
use crate::error::DriverError;

/// An unsolicited event reported by the firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A node joined or rejoined.
    DeviceAnnounced(DeviceAnnouncement),
    /// A node left the network.
    Leave { ieee: IeeeAddress, rejoin: bool },
    /// A node reported attribute values.
    AttributeReport {
        source: ShortAddress,
        endpoint: u8,
        cluster: u16,
        records: Vec<AttributeRecord>,
    },
    /// The coprocessor's own network came up or went down.
    NetworkState { up: bool },
}

/// One coprocessor firmware family.
pub trait Backend: Protocol {
    const DEFAULT_BAUD_RATE: u32;

    /// Number of [`BootstrapStep::Finalize`] steps.
    const FINALIZE_STEPS: u8;

    /// Request implementing a bootstrap step, or `None` when not applicable.
    fn bootstrap_request(
        &mut self,
        step: BootstrapStep,
        params: &NetworkParameters,
    ) -> Option<RequestSpec<Self>>;

    /// Record what a successful bootstrap reply reports.
    fn apply_bootstrap_reply(
        &mut self,
        step: BootstrapStep,
        reply: &Reply<Self>,
        info: &mut ControllerInfo,
    ) -> Result<(), DriverError>;

    fn discovery_request(&mut self, query: &DiscoveryQuery) -> RequestSpec<Self>;

    /// Parse a successful discovery reply, checking the ZDO or ZCL status it carries.
    fn parse_discovery_reply(
        &self,
        query: &DiscoveryQuery,
        reply: &Reply<Self>,
    ) -> Result<DiscoveryResponse, DriverError>;

    fn command_request(&mut self, command: &NetworkCommand) -> Result<RequestSpec<Self>, DriverError>;

    fn parse_command_reply(
        &self,
        command: &NetworkCommand,
        reply: &Reply<Self>,
    ) -> Result<CommandResponse, DriverError>;

    /// Decode a frame the correlator routed as a notification.
    fn decode_notification(&self, frame: &Self::Frame) -> Option<Notification>;

    /// Request that takes the coprocessor off the network, if it has one.
    fn leave_request(&mut self) -> Option<RequestSpec<Self>>;
}

/// Wrapping ZDP/ZCL transaction sequence.
#[derive(Debug, Default, Clone)]
pub(crate) struct TransactionCounter {
    next: u8,
}

impl TransactionCounter {
    pub(crate) fn next(&mut self) -> u8 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }
}

/// Take the primary frame of a reply or fail with `what`.
pub(crate) fn primary<'a, P: Protocol>(reply: &'a Reply<P>, what: &'static str) -> Result<&'a P::Frame, DriverError> {
    reply.primary.as_ref().ok_or(DriverError::UnexpectedReply(what))
}

/// Take the additional frame of a reply or fail with `what`.
pub(crate) fn additional<'a, P: Protocol>(
    reply: &'a Reply<P>,
    what: &'static str,
) -> Result<&'a P::Frame, DriverError> {
    reply.additional.as_ref().ok_or(DriverError::UnexpectedReply(what))
}

/// Parse a ZDO descriptor response body.
///
/// `body` starts after the network-address-of-interest field. Simple
/// descriptors carry a length byte before the descriptor.
pub(crate) fn decode_descriptor(
    query: &DiscoveryQuery,
    zdo_status: u8,
    body: &[u8],
) -> Result<DiscoveryResponse, DriverError> {
    if zdo_status != zdo::status::SUCCESS {
        return Err(DriverError::ZdoStatus(zdo_status));
    }
    let response = match query {
        DiscoveryQuery::NodeDescriptor { .. } => DiscoveryResponse::NodeDescriptor(NodeDescriptor::parse(body)?),
        DiscoveryQuery::PowerDescriptor { .. } => {
            DiscoveryResponse::PowerDescriptor(PowerDescriptor::parse(body)?)
        }
        DiscoveryQuery::ActiveEndpoints { .. } => {
            DiscoveryResponse::ActiveEndpoints(zdo::parse_active_endpoints(body)?)
        }
        DiscoveryQuery::SimpleDescriptor { endpoint, .. } => {
            let mut r = ByteReader::new(body, "simple descriptor response");
            let len = r.u8()? as usize;
            let descriptor = SimpleDescriptor::parse(r.take(len)?)?;
            if descriptor.endpoint != *endpoint {
                return Err(DriverError::unexpected("simple descriptor request"));
            }
            DiscoveryResponse::SimpleDescriptor(descriptor)
        }
        DiscoveryQuery::BasicAttributes { .. } => {
            return Err(DriverError::unexpected("basic attribute read"));
        }
    };
    Ok(response)
}

/// ZDP request cluster and body for a descriptor query.
pub(crate) fn zdp_request(query: &DiscoveryQuery, transaction: u8) -> Option<(u16, Vec<u8>)> {
    let request = match *query {
        DiscoveryQuery::NodeDescriptor { target } => {
            (zdo::cluster::NODE_DESC_REQ, zdo::nwk_address_request(transaction, target))
        }
        DiscoveryQuery::PowerDescriptor { target } => {
            (zdo::cluster::POWER_DESC_REQ, zdo::nwk_address_request(transaction, target))
        }
        DiscoveryQuery::ActiveEndpoints { target } => {
            (zdo::cluster::ACTIVE_EP_REQ, zdo::nwk_address_request(transaction, target))
        }
        DiscoveryQuery::SimpleDescriptor { target, endpoint } => (
            zdo::cluster::SIMPLE_DESC_REQ,
            zdo::simple_descriptor_request(transaction, target, endpoint),
        ),
        DiscoveryQuery::BasicAttributes { .. } => return None,
    };
    Some(request)
}

/// Parse a ZDP descriptor response carried in an APS payload.
pub(crate) fn decode_zdp_descriptor(query: &DiscoveryQuery, asdu: &[u8]) -> Result<DiscoveryResponse, DriverError> {
    let response = zdo::ZdpResponse::parse(asdu)?;
    if response.status != zdo::status::SUCCESS {
        return Err(DriverError::ZdoStatus(response.status));
    }
    let (_, body) = response.descriptor_body()?;
    decode_descriptor(query, response.status, body)
}

/// A host-built ZCL request.
pub(crate) struct ZclRequest {
    pub target: ShortAddress,
    pub endpoint: u8,
    pub cluster: u16,
    pub frame: Vec<u8>,
}

pub(crate) fn basic_attribute_request(target: ShortAddress, endpoint: u8, transaction: u8) -> ZclRequest {
    ZclRequest {
        target,
        endpoint,
        cluster: zcl::cluster::BASIC,
        frame: zcl::read_attributes_request(transaction, &BASIC_ATTRIBUTES),
    }
}

/// Build the ZCL frame for a global attribute command.
///
/// Returns `None` for commands that are not ZCL global commands.
pub(crate) fn zcl_request(command: &NetworkCommand, transaction: u8) -> Result<Option<ZclRequest>, DriverError> {
    let request = match command {
        NetworkCommand::ReadAttributes {
            target,
            endpoint,
            cluster,
            attributes,
        } => ZclRequest {
            target: *target,
            endpoint: *endpoint,
            cluster: *cluster,
            frame: zcl::read_attributes_request(transaction, attributes),
        },
        NetworkCommand::WriteAttributes {
            target,
            endpoint,
            cluster,
            writes,
        } => ZclRequest {
            target: *target,
            endpoint: *endpoint,
            cluster: *cluster,
            frame: zcl::write_attributes_request(transaction, writes)?,
        },
        NetworkCommand::ConfigureReporting {
            target,
            endpoint,
            cluster,
            configs,
        } => ZclRequest {
            target: *target,
            endpoint: *endpoint,
            cluster: *cluster,
            frame: zcl::configure_reporting_request(transaction, configs)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(request))
}

/// Parse a ZCL response frame.
///
/// A default response with a failure status becomes [`DriverError::ZclStatus`].
pub(crate) fn decode_zcl_reply(command: &NetworkCommand, data: &[u8]) -> Result<CommandResponse, DriverError> {
    let frame = ZclFrame::parse(data)?;
    let payload = frame.payload.as_slice();
    match (command, frame.header.command) {
        (_, zcl::command::DEFAULT_RESPONSE) => {
            let status = payload.get(1).copied().unwrap_or(zcl::status::FAILURE);
            Err(DriverError::ZclStatus(status))
        }
        (NetworkCommand::ReadAttributes { .. }, zcl::command::READ_ATTRIBUTES_RESPONSE) => Ok(
            CommandResponse::Attributes(zcl::parse_read_attributes_response(payload)?),
        ),
        (NetworkCommand::WriteAttributes { .. }, zcl::command::WRITE_ATTRIBUTES_RESPONSE) => Ok(
            CommandResponse::WriteStatus(zcl::parse_status_records(payload, false)?),
        ),
        (NetworkCommand::ConfigureReporting { .. }, zcl::command::CONFIGURE_REPORTING_RESPONSE) => Ok(
            CommandResponse::ReportingStatus(zcl::parse_status_records(payload, true)?),
        ),
        _ => Err(DriverError::unexpected(command.name())),
    }
}

/// Parse the Basic cluster read response of a discovery query.
pub(crate) fn decode_basic_reply(data: &[u8]) -> Result<DiscoveryResponse, DriverError> {
    let frame = ZclFrame::parse(data)?;
    if frame.header.command != zcl::command::READ_ATTRIBUTES_RESPONSE {
        return Err(DriverError::unexpected("basic attribute read"));
    }
    Ok(DiscoveryResponse::BasicAttributes(zcl::parse_read_attributes_response(
        &frame.payload,
    )?))
}

/// Decode the APS payload of an incoming message into a notification.
pub(crate) fn decode_aps_notification(
    source: ShortAddress,
    endpoint: u8,
    profile: u16,
    cluster: u16,
    asdu: &[u8],
) -> Option<Notification> {
    if profile == zdo::ZDO_PROFILE {
        if cluster == zdo::cluster::DEVICE_ANNCE {
            // Transaction sequence precedes the announcement
            let announcement = DeviceAnnouncement::parse(asdu.get(1..)?).ok()?;
            return Some(Notification::DeviceAnnounced(announcement));
        }
        return None;
    }

    let frame = ZclFrame::parse(asdu).ok()?;
    if !frame.header.is_global() || frame.header.command != zcl::command::REPORT_ATTRIBUTES {
        return None;
    }
    let records = zcl::parse_report_attributes(&frame.payload).ok()?;
    Some(Notification::AttributeReport {
        source,
        endpoint,
        cluster,
        records,
    })
}

/// Transaction sequence of an APS payload: the ZDP sequence byte or the ZCL header field.
pub(crate) fn aps_transaction(profile: u16, asdu: &[u8]) -> Option<u8> {
    if profile == zdo::ZDO_PROFILE {
        asdu.first().copied()
    } else {
        zcl::transaction_of(asdu)
    }
}
