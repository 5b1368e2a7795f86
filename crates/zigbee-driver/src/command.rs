//! Application commands sent through a network.

use zigbee_model::zcl::{AttributeRecord, AttributeWrite, ReportingConfiguration};
use zigbee_model::zdo::BindTarget;
use zigbee_model::{IeeeAddress, ShortAddress};

use crate::error::DriverError;

/// Source endpoint the host registers for its own traffic.
pub const HOST_ENDPOINT: u8 = 0x01;

/// A command addressed to a node or to the network.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCommand {
    ReadAttributes {
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attributes: Vec<u16>,
    },
    WriteAttributes {
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        writes: Vec<AttributeWrite>,
    },
    ConfigureReporting {
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        configs: Vec<ReportingConfiguration>,
    },
    /// Ask `target` to bind its `source` endpoint to a destination.
    Bind {
        target: ShortAddress,
        source: IeeeAddress,
        source_endpoint: u8,
        cluster: u16,
        destination: BindTarget,
    },
    /// Send an opaque APS payload.
    SendApplicationData {
        target: ShortAddress,
        endpoint: u8,
        profile: u16,
        cluster: u16,
        payload: Vec<u8>,
    },
    /// Open the network for joining; zero closes it.
    PermitJoin { duration_secs: u8 },
}

impl NetworkCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkCommand::ReadAttributes { .. } => "read attributes",
            NetworkCommand::WriteAttributes { .. } => "write attributes",
            NetworkCommand::ConfigureReporting { .. } => "configure reporting",
            NetworkCommand::Bind { .. } => "bind",
            NetworkCommand::SendApplicationData { .. } => "send application data",
            NetworkCommand::PermitJoin { .. } => "permit join",
        }
    }
}

/// Parsed result of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    /// Read records, including per-attribute failures.
    Attributes(Vec<AttributeRecord>),
    /// `(status, attribute)` for every attribute the node rejected.
    WriteStatus(Vec<(u8, u16)>),
    /// `(status, attribute)` for every configuration the node rejected.
    ReportingStatus(Vec<(u8, u16)>),
    Bound,
    Sent,
    JoinPermitted,
}

pub type CommandResult = Result<CommandResponse, DriverError>;

/// Invoked exactly once with the command's result.
pub type CommandCallback = Box<dyn FnOnce(CommandResult) + Send>;
