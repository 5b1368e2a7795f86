//! Simulated coprocessors for the integration tests.
//!
//! Each firmware decodes the host's requests with the real codec and answers
//! the way the firmware family does, backed by a shared [`World`] of
//! simulated devices.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zigbee_driver::backend::deconz::{self, ApsAddress, ApsConfirm, ApsDataRequest, ApsIndication};
use zigbee_driver::backend::nxp::{self, msg, NetworkJoined, StatusMessage};
use zigbee_driver::backend::ti::{self, af, sapi, sys, util, zdo_cmd, AfIncoming};
use zigbee_driver::backend::{Backend, DeconzBackend, NxpBackend, TiBackend};
use zigbee_driver::correlator::Protocol;
use zigbee_driver::network::{Network, NetworkConfig, NetworkEvent};
use zigbee_driver::settings::{MemorySettings, NetworkSettings, NodeAddresses};
use zigbee_frame::deconz::DeconzFrame;
use zigbee_frame::nxp::NxpFrame;
use zigbee_frame::ti::{MtSubsystem, MtType, TiFrame};
use zigbee_frame::FrameCodec;
use zigbee_model::zcl::{self, AttributeValue, DataType, ZclFrame, ZclHeader};
use zigbee_model::zdo::{self, DeviceAnnouncement, LogicalType, MacCapabilities, NodeDescriptor, PowerDescriptor, SimpleDescriptor};
use zigbee_model::{IeeeAddress, ShortAddress};

pub const COORDINATOR_IEEE: IeeeAddress = IeeeAddress(0x00212EFFFF001234);
pub const SENSOR_IEEE: IeeeAddress = IeeeAddress(0x00158D0001A2B3C4);
pub const SENSOR_SHORT: ShortAddress = ShortAddress(0x4F21);
pub const LIGHT_IEEE: IeeeAddress = IeeeAddress(0x0017880100ABCDEF);
pub const LIGHT_SHORT: ShortAddress = ShortAddress(0x1A2B);
pub const FORMED_PAN_ID: u16 = 0x1A62;
pub const FORMED_CHANNEL: u8 = 15;

fn node_descriptor(logical_type: LogicalType, capabilities: u8, manufacturer_code: u16) -> NodeDescriptor {
    NodeDescriptor {
        logical_type: Some(logical_type),
        complex_descriptor_available: false,
        user_descriptor_available: false,
        aps_flags: 0,
        frequency_band: 0x08,
        mac_capabilities: MacCapabilities(capabilities),
        manufacturer_code,
        max_buffer_size: 0x50,
        max_incoming_transfer_size: 0x00A0,
        server_mask: 0,
        max_outgoing_transfer_size: 0x00A0,
        descriptor_capabilities: 0,
    }
}

fn endpoint(id: u8, profile_id: u16, device_id: u16, input_clusters: &[u16]) -> SimpleDescriptor {
    SimpleDescriptor {
        endpoint: id,
        profile_id,
        device_id,
        device_version: 1,
        input_clusters: input_clusters.to_vec(),
        output_clusters: vec![zcl::cluster::OTA_UPGRADE],
    }
}

fn text(value: &str) -> (DataType, AttributeValue) {
    (DataType::CharString, AttributeValue::String(value.to_string()))
}

/// A node in the simulated network.
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub ieee: IeeeAddress,
    pub short: ShortAddress,
    pub node_descriptor: NodeDescriptor,
    pub power_descriptor: PowerDescriptor,
    pub endpoints: Vec<SimpleDescriptor>,
    /// Values by endpoint, cluster and attribute.
    pub attributes: HashMap<(u8, u16, u16), (DataType, AttributeValue)>,
    /// Unresponsive devices answer nothing over the air.
    pub responsive: bool,
}

impl SimDevice {
    pub fn coordinator() -> Self {
        SimDevice {
            ieee: COORDINATOR_IEEE,
            short: ShortAddress::COORDINATOR,
            node_descriptor: node_descriptor(LogicalType::Coordinator, 0x8E, 0x1135),
            power_descriptor: mains(),
            endpoints: vec![endpoint(1, zcl::HOME_AUTOMATION_PROFILE, 0x0005, &[zcl::cluster::BASIC])],
            attributes: HashMap::new(),
            responsive: true,
        }
    }

    /// Battery temperature sensor with one endpoint.
    pub fn sensor() -> Self {
        let mut attributes = HashMap::new();
        attributes.insert((1, zcl::cluster::BASIC, zcl::basic::MANUFACTURER_NAME), text("LUMI"));
        attributes.insert((1, zcl::cluster::BASIC, zcl::basic::MODEL_IDENTIFIER), text("TH01"));
        attributes.insert(
            (1, zcl::cluster::BASIC, zcl::basic::POWER_SOURCE),
            (DataType::Enum8, AttributeValue::Enum(0x03)),
        );
        attributes.insert(
            (1, zcl::cluster::TEMPERATURE_MEASUREMENT, 0x0000),
            (DataType::Int16, AttributeValue::Signed(2150)),
        );
        SimDevice {
            ieee: SENSOR_IEEE,
            short: SENSOR_SHORT,
            node_descriptor: node_descriptor(LogicalType::EndDevice, 0x80, 0x115F),
            power_descriptor: PowerDescriptor {
                current_power_mode: 0,
                available_power_sources: PowerDescriptor::SOURCE_DISPOSABLE,
                current_power_source: PowerDescriptor::SOURCE_DISPOSABLE,
                current_power_level: 12,
            },
            endpoints: vec![endpoint(
                1,
                zcl::HOME_AUTOMATION_PROFILE,
                0x0302,
                &[
                    zcl::cluster::BASIC,
                    zcl::cluster::POWER_CONFIGURATION,
                    zcl::cluster::TEMPERATURE_MEASUREMENT,
                ],
            )],
            attributes,
            responsive: true,
        }
    }

    /// Mains powered light with a second endpoint that has no Basic cluster.
    pub fn light() -> Self {
        let mut attributes = HashMap::new();
        attributes.insert((11, zcl::cluster::BASIC, zcl::basic::MANUFACTURER_NAME), text("Hue"));
        attributes.insert((11, zcl::cluster::BASIC, zcl::basic::MODEL_IDENTIFIER), text("LCT015"));
        attributes.insert(
            (11, zcl::cluster::ON_OFF, 0x0000),
            (DataType::Bool, AttributeValue::Bool(false)),
        );
        SimDevice {
            ieee: LIGHT_IEEE,
            short: LIGHT_SHORT,
            node_descriptor: node_descriptor(LogicalType::Router, 0x8E, 0x100B),
            power_descriptor: mains(),
            endpoints: vec![
                endpoint(
                    11,
                    zcl::HOME_AUTOMATION_PROFILE,
                    0x010D,
                    &[zcl::cluster::BASIC, zcl::cluster::ON_OFF, zcl::cluster::LEVEL_CONTROL],
                ),
                endpoint(242, 0xA1E0, 0x0061, &[]),
            ],
            attributes,
            responsive: true,
        }
    }

    pub fn announcement(&self) -> DeviceAnnouncement {
        DeviceAnnouncement {
            short_address: self.short,
            ieee_address: self.ieee,
            capabilities: self.node_descriptor.mac_capabilities,
        }
    }
}

fn mains() -> PowerDescriptor {
    PowerDescriptor {
        current_power_mode: 0,
        available_power_sources: PowerDescriptor::SOURCE_MAINS,
        current_power_source: PowerDescriptor::SOURCE_MAINS,
        current_power_level: 12,
    }
}

/// One attribute of a read response.
pub struct SimRecord {
    pub id: u16,
    pub value: Option<(DataType, Vec<u8>)>,
}

/// State shared by every simulated firmware.
#[derive(Debug)]
pub struct World {
    pub coordinator: SimDevice,
    pub devices: Vec<SimDevice>,
    /// Names of the requests received, in order.
    pub log: Vec<String>,
    pub extended_pan_id: u64,
    pub channel_mask: u32,
    pub network_key: Option<Vec<u8>>,
    /// Reject the start network request.
    pub fail_start: bool,
    /// Send NXP attribute records without the status byte.
    pub omit_status_byte: bool,
}

impl Default for World {
    fn default() -> Self {
        World {
            coordinator: SimDevice::coordinator(),
            devices: Vec::new(),
            log: Vec::new(),
            extended_pan_id: 0,
            channel_mask: 0,
            network_key: None,
            fail_start: false,
            omit_status_byte: false,
        }
    }
}

impl World {
    pub fn with_devices(devices: Vec<SimDevice>) -> Self {
        World {
            devices,
            ..World::default()
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.log.iter().filter(|entry| entry.as_str() == name).count()
    }

    fn note(&mut self, name: impl Into<String>) {
        self.log.push(name.into());
    }

    fn device(&self, short: ShortAddress) -> Option<&SimDevice> {
        std::iter::once(&self.coordinator)
            .chain(self.devices.iter())
            .find(|d| d.short == short && d.responsive)
    }

    /// Status and body (starting with the address of interest) of a ZDO descriptor request.
    fn zdo(&mut self, target: ShortAddress, request_cluster: u16, endpoint: Option<u8>) -> Option<(u8, Vec<u8>)> {
        self.note(format!("zdo 0x{:04x} {}", request_cluster, target));
        let device = self.device(target)?;
        let mut body = target.0.to_le_bytes().to_vec();
        match request_cluster {
            zdo::cluster::NODE_DESC_REQ => body.extend(device.node_descriptor.encode()),
            zdo::cluster::POWER_DESC_REQ => body.extend(device.power_descriptor.encode()),
            zdo::cluster::ACTIVE_EP_REQ => {
                body.push(device.endpoints.len() as u8);
                body.extend(device.endpoints.iter().map(|ep| ep.endpoint));
            }
            zdo::cluster::SIMPLE_DESC_REQ => {
                let Some(descriptor) = device.endpoints.iter().find(|ep| Some(ep.endpoint) == endpoint) else {
                    return Some((zdo::status::INVALID_EP, body));
                };
                let encoded = descriptor.encode();
                body.push(encoded.len() as u8);
                body.extend(encoded);
            }
            zdo::cluster::BIND_REQ => body.clear(),
            _ => return Some((zdo::status::NOT_SUPPORTED, body)),
        }
        Some((zdo::status::SUCCESS, body))
    }

    fn read_attributes(&mut self, target: ShortAddress, endpoint: u8, cluster: u16, ids: &[u16]) -> Option<Vec<SimRecord>> {
        self.note(format!("read 0x{:04x} {}", cluster, target));
        let device = self.device(target)?;
        let records = ids
            .iter()
            .map(|&id| SimRecord {
                id,
                value: device
                    .attributes
                    .get(&(endpoint, cluster, id))
                    .and_then(|(data_type, value)| Some((*data_type, zcl::encode_value(*data_type, value).ok()?))),
            })
            .collect();
        Some(records)
    }

    /// APS payload answering a ZCL frame, if the device answers it.
    fn zcl_response(&mut self, target: ShortAddress, endpoint: u8, cluster: u16, request: &[u8]) -> Option<Vec<u8>> {
        let frame = ZclFrame::parse(request).ok()?;
        if !frame.header.is_global() {
            self.note(format!("cluster command 0x{:02x} {}", frame.header.command, target));
            return None;
        }
        let transaction = frame.header.transaction;
        let (command, payload) = match frame.header.command {
            zcl::command::READ_ATTRIBUTES => {
                let ids: Vec<u16> = frame
                    .payload
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let records = self.read_attributes(target, endpoint, cluster, &ids)?;
                (zcl::command::READ_ATTRIBUTES_RESPONSE, encode_zcl_records(&records))
            }
            zcl::command::WRITE_ATTRIBUTES => {
                self.note(format!("write 0x{:04x} {}", cluster, target));
                self.device(target)?;
                (zcl::command::WRITE_ATTRIBUTES_RESPONSE, vec![zcl::status::SUCCESS])
            }
            zcl::command::CONFIGURE_REPORTING => {
                self.note(format!("configure 0x{:04x} {}", cluster, target));
                self.device(target)?;
                // First configuration rejected
                let attribute = frame.payload.get(1..3)?;
                (
                    zcl::command::CONFIGURE_REPORTING_RESPONSE,
                    vec![zcl::status::UNREPORTABLE_ATTRIBUTE, 0x00, attribute[0], attribute[1]],
                )
            }
            _ => return None,
        };
        let mut header = ZclHeader::global(transaction, command);
        header.frame_control |= zcl::FC_SERVER_TO_CLIENT | zcl::FC_DISABLE_DEFAULT_RESPONSE;
        Some(ZclFrame::new(header, payload).encode())
    }
}

/// Standard ZCL read records: `id, status[, type, value]`.
fn encode_zcl_records(records: &[SimRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.id.to_le_bytes());
        match &record.value {
            Some((data_type, value)) => {
                out.push(zcl::status::SUCCESS);
                out.push(data_type.to_u8());
                out.extend_from_slice(value);
            }
            None => out.push(zcl::status::UNSUPPORTED_ATTRIBUTE),
        }
    }
    out
}

/// ZCL report attributes frame for one attribute.
pub fn report_frame(transaction: u8, attribute: u16, data_type: DataType, value: &AttributeValue) -> Vec<u8> {
    let mut payload = attribute.to_le_bytes().to_vec();
    payload.push(data_type.to_u8());
    payload.extend(zcl::encode_value(data_type, value).unwrap());
    let mut header = ZclHeader::global(transaction, zcl::command::REPORT_ATTRIBUTES);
    header.frame_control |= zcl::FC_SERVER_TO_CLIENT;
    ZclFrame::new(header, payload).encode()
}

/// A simulated coprocessor of one firmware family.
pub trait Firmware {
    type Backend: Backend + Default;

    fn world(&mut self) -> &mut World;

    fn respond(&mut self, frame: <Self::Backend as Protocol>::Frame) -> Vec<<Self::Backend as Protocol>::Frame>;

    /// Unsolicited frame announcing `device`.
    fn announce(&self, device: &SimDevice) -> <Self::Backend as Protocol>::Frame;

    /// Unsolicited frame reporting one attribute.
    fn report(
        &self,
        source: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        data_type: DataType,
        value: &AttributeValue,
    ) -> <Self::Backend as Protocol>::Frame;
}

// ============================================================================
// deCONZ
// ============================================================================

#[derive(Debug, Default)]
pub struct DeconzFirmware {
    pub world: World,
}

impl DeconzFirmware {
    pub fn new(world: World) -> Self {
        DeconzFirmware { world }
    }

    fn parameter(&self, id: u8) -> Vec<u8> {
        match id {
            deconz::param::MAC_ADDRESS => self.world.coordinator.ieee.to_le_bytes().to_vec(),
            deconz::param::NWK_PANID => FORMED_PAN_ID.to_le_bytes().to_vec(),
            deconz::param::NWK_ADDRESS => self.world.coordinator.short.0.to_le_bytes().to_vec(),
            deconz::param::NWK_EXTENDED_PANID => self.world.extended_pan_id.to_le_bytes().to_vec(),
            deconz::param::CURRENT_CHANNEL => vec![FORMED_CHANNEL],
            _ => Vec::new(),
        }
    }

    fn indication(source: ShortAddress, source_endpoint: u8, profile: u16, cluster: u16, asdu: Vec<u8>) -> DeconzFrame {
        let indication = ApsIndication {
            device_state: deconz::network_state::CONNECTED,
            destination: ApsAddress::Short(ShortAddress::COORDINATOR),
            destination_endpoint: if profile == zdo::ZDO_PROFILE { 0 } else { 1 },
            source: ApsAddress::Short(source),
            source_endpoint,
            profile,
            cluster,
            asdu,
            lqi: Some(180),
            rssi: Some(-52),
        };
        DeconzFrame::new(deconz::command::APS_DATA_INDICATION, 0, indication.encode())
    }

    fn aps_data_request(&mut self, sequence: u8, payload: &[u8]) -> Vec<DeconzFrame> {
        let Ok(request) = ApsDataRequest::parse(payload) else {
            return vec![DeconzFrame::new(deconz::command::APS_DATA_REQUEST, sequence, vec![]).with_status(0x07)];
        };
        let mut out = vec![DeconzFrame::new(
            deconz::command::APS_DATA_REQUEST,
            sequence,
            vec![0x02, 0x00, deconz::network_state::CONNECTED, request.request_id],
        )];
        let confirm = ApsConfirm {
            device_state: deconz::network_state::CONNECTED,
            request_id: request.request_id,
            destination: ApsAddress::Short(request.destination),
            source_endpoint: request.source_endpoint,
            status: 0x00,
        };
        out.push(DeconzFrame::new(
            deconz::command::APS_DATA_CONFIRM,
            0,
            confirm.encode(request.destination_endpoint),
        ));

        if request.profile == zdo::ZDO_PROFILE {
            let transaction = request.asdu.first().copied().unwrap_or_default();
            let endpoint = request.asdu.get(3).copied();
            if let Some((status, body)) = self.world.zdo(request.destination, request.cluster, endpoint) {
                let mut asdu = vec![transaction, status];
                asdu.extend(body);
                out.push(Self::indication(
                    request.destination,
                    zdo::ZDO_ENDPOINT,
                    zdo::ZDO_PROFILE,
                    zdo::cluster::response(request.cluster),
                    asdu,
                ));
            }
        } else if let Some(asdu) = self.world.zcl_response(
            request.destination,
            request.destination_endpoint,
            request.cluster,
            &request.asdu,
        ) {
            out.push(Self::indication(
                request.destination,
                request.destination_endpoint,
                request.profile,
                request.cluster,
                asdu,
            ));
        }
        out
    }
}

impl Firmware for DeconzFirmware {
    type Backend = DeconzBackend;

    fn world(&mut self) -> &mut World {
        &mut self.world
    }

    fn respond(&mut self, frame: DeconzFrame) -> Vec<DeconzFrame> {
        use zigbee_driver::backend::deconz::command;
        let sequence = frame.sequence;
        match frame.command {
            command::CHANGE_NETWORK_STATE => {
                let state = frame.payload.first().copied().unwrap_or_default();
                if state == deconz::network_state::CONNECTED {
                    self.world.note("start network");
                    if self.world.fail_start {
                        return vec![DeconzFrame::new(command::CHANGE_NETWORK_STATE, sequence, vec![state]).with_status(0x01)];
                    }
                    return vec![
                        DeconzFrame::new(command::CHANGE_NETWORK_STATE, sequence, vec![state]),
                        DeconzFrame::new(command::DEVICE_STATE_CHANGED, 0, vec![deconz::network_state::CONNECTED]),
                    ];
                }
                self.world.note("network offline");
                vec![DeconzFrame::new(command::CHANGE_NETWORK_STATE, sequence, vec![state])]
            }
            command::VERSION => {
                self.world.note("version");
                vec![DeconzFrame::new(command::VERSION, sequence, 0x2678_0700u32.to_le_bytes().to_vec())]
            }
            command::WRITE_PARAMETER => {
                let id = frame.payload.get(2).copied().unwrap_or_default();
                let value = frame.payload.get(3..).unwrap_or_default();
                match id {
                    deconz::param::APS_EXTENDED_PANID => {
                        self.world.extended_pan_id = u64::from_le_bytes(value.try_into().unwrap_or_default());
                    }
                    deconz::param::CHANNEL_MASK => {
                        self.world.channel_mask = u32::from_le_bytes(value.try_into().unwrap_or_default());
                    }
                    deconz::param::NETWORK_KEY => self.world.network_key = Some(value[1..].to_vec()),
                    _ => {}
                }
                self.world.note(format!("write parameter 0x{:02x}", id));
                vec![DeconzFrame::new(command::WRITE_PARAMETER, sequence, vec![0x01, 0x00, id])]
            }
            command::READ_PARAMETER => {
                let id = frame.payload.get(2).copied().unwrap_or_default();
                let value = self.parameter(id);
                let mut payload = ((value.len() + 1) as u16).to_le_bytes().to_vec();
                payload.push(id);
                payload.extend(value);
                vec![DeconzFrame::new(command::READ_PARAMETER, sequence, payload)]
            }
            command::APS_DATA_REQUEST => self.aps_data_request(sequence, &frame.payload),
            other => vec![DeconzFrame::new(other, sequence, vec![]).with_status(0x04)],
        }
    }

    fn announce(&self, device: &SimDevice) -> DeconzFrame {
        let mut asdu = vec![0x81];
        asdu.extend(device.announcement().encode());
        Self::indication(device.short, 0, zdo::ZDO_PROFILE, zdo::cluster::DEVICE_ANNCE, asdu)
    }

    fn report(
        &self,
        source: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        data_type: DataType,
        value: &AttributeValue,
    ) -> DeconzFrame {
        Self::indication(
            source,
            endpoint,
            zcl::HOME_AUTOMATION_PROFILE,
            cluster,
            report_frame(0x42, attribute, data_type, value),
        )
    }
}

// ============================================================================
// NXP
// ============================================================================

#[derive(Debug, Default)]
pub struct NxpFirmware {
    pub world: World,
}

impl NxpFirmware {
    pub fn new(world: World) -> Self {
        NxpFirmware { world }
    }

    fn status(frame: &NxpFrame, status: u8) -> NxpFrame {
        let message = StatusMessage {
            status,
            sequence: frame.sequence,
            packet_type: frame.msg_type,
        };
        NxpFrame::new(msg::STATUS, frame.sequence, message.encode())
    }

    fn records(&self, records: &[SimRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        for record in records {
            match &record.value {
                Some((data_type, value)) => {
                    out.extend_from_slice(&record.id.to_le_bytes());
                    if !self.world.omit_status_byte {
                        out.push(zcl::status::SUCCESS);
                    }
                    out.push(data_type.to_u8());
                    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
                    out.extend_from_slice(value);
                }
                None if !self.world.omit_status_byte => {
                    out.extend_from_slice(&record.id.to_le_bytes());
                    out.extend_from_slice(&[zcl::status::UNSUPPORTED_ATTRIBUTE, DataType::NoData.to_u8(), 0x00, 0x00]);
                }
                None => {}
            }
        }
        out
    }

    fn descriptor(&mut self, frame: &NxpFrame, cluster: u16, response: u16) -> Vec<NxpFrame> {
        let target = ShortAddress(u16::from_le_bytes([frame.payload[0], frame.payload[1]]));
        let endpoint = frame.payload.get(2).copied();
        let mut out = vec![Self::status(frame, 0)];
        if let Some((status, body)) = self.world.zdo(target, cluster, endpoint) {
            let mut payload = vec![status];
            payload.extend(body);
            out.push(NxpFrame::new(response, frame.sequence, payload));
        }
        out
    }

    fn read_attributes(&mut self, frame: &NxpFrame) -> Vec<NxpFrame> {
        let p = &frame.payload;
        let target = ShortAddress(u16::from_le_bytes([p[1], p[2]]));
        let endpoint = p[4];
        let cluster = u16::from_le_bytes([p[5], p[6]]);
        let count = p[11] as usize;
        let ids: Vec<u16> = p[12..12 + 2 * count]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let mut out = vec![Self::status(frame, 0)];
        if let Some(records) = self.world.read_attributes(target, endpoint, cluster, &ids) {
            let mut payload = vec![0x10];
            payload.extend_from_slice(&target.0.to_le_bytes());
            payload.push(endpoint);
            payload.extend_from_slice(&cluster.to_le_bytes());
            payload.extend(self.records(&records));
            out.push(NxpFrame::new(msg::READ_ATTRIBUTES_RESPONSE, frame.sequence, payload));
        }
        out
    }
}

impl Firmware for NxpFirmware {
    type Backend = NxpBackend;

    fn world(&mut self) -> &mut World {
        &mut self.world
    }

    fn respond(&mut self, frame: NxpFrame) -> Vec<NxpFrame> {
        match frame.msg_type {
            msg::ERASE_PERSISTENT_DATA => {
                self.world.note("erase");
                vec![Self::status(&frame, 0)]
            }
            msg::RESET => {
                self.world.note("reset");
                vec![Self::status(&frame, 0)]
            }
            msg::GET_VERSION => {
                self.world.note("version");
                let mut payload = 0x0003u16.to_le_bytes().to_vec();
                payload.extend_from_slice(&0x031Du16.to_le_bytes());
                vec![
                    Self::status(&frame, 0),
                    NxpFrame::new(msg::VERSION_LIST, frame.sequence, payload),
                ]
            }
            msg::SET_EXTENDED_PANID => {
                self.world.extended_pan_id = u64::from_le_bytes(frame.payload[..8].try_into().unwrap());
                vec![Self::status(&frame, 0)]
            }
            msg::SET_CHANNEL_MASK => {
                self.world.channel_mask = u32::from_le_bytes(frame.payload[..4].try_into().unwrap());
                vec![Self::status(&frame, 0)]
            }
            msg::SET_NETWORK_KEY => {
                self.world.network_key = Some(frame.payload.clone());
                vec![Self::status(&frame, 0)]
            }
            msg::SET_DEVICE_TYPE => vec![Self::status(&frame, 0)],
            msg::START_NETWORK => {
                self.world.note("start network");
                if self.world.fail_start {
                    return vec![Self::status(&frame, 0x03)];
                }
                let joined = NetworkJoined {
                    status: NetworkJoined::FORMED,
                    short_address: self.world.coordinator.short,
                    ieee_address: self.world.coordinator.ieee,
                    extended_pan_id: self.world.extended_pan_id,
                    channel: FORMED_CHANNEL,
                };
                vec![
                    Self::status(&frame, 0),
                    NxpFrame::new(msg::NETWORK_JOINED, frame.sequence, joined.encode()),
                ]
            }
            msg::NODE_DESCRIPTOR => {
                self.descriptor(&frame, zdo::cluster::NODE_DESC_REQ, msg::NODE_DESCRIPTOR_RESPONSE)
            }
            msg::POWER_DESCRIPTOR => {
                self.descriptor(&frame, zdo::cluster::POWER_DESC_REQ, msg::POWER_DESCRIPTOR_RESPONSE)
            }
            msg::ACTIVE_ENDPOINTS => {
                self.descriptor(&frame, zdo::cluster::ACTIVE_EP_REQ, msg::ACTIVE_ENDPOINTS_RESPONSE)
            }
            msg::SIMPLE_DESCRIPTOR => {
                self.descriptor(&frame, zdo::cluster::SIMPLE_DESC_REQ, msg::SIMPLE_DESCRIPTOR_RESPONSE)
            }
            msg::READ_ATTRIBUTES => self.read_attributes(&frame),
            msg::PERMIT_JOIN => {
                self.world.note("permit join");
                vec![Self::status(&frame, 0)]
            }
            _ => vec![Self::status(&frame, 0x02)],
        }
    }

    fn announce(&self, device: &SimDevice) -> NxpFrame {
        NxpFrame::new(msg::DEVICE_ANNOUNCE, 0, device.announcement().encode())
    }

    fn report(
        &self,
        source: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        data_type: DataType,
        value: &AttributeValue,
    ) -> NxpFrame {
        let record = SimRecord {
            id: attribute,
            value: Some((data_type, zcl::encode_value(data_type, value).unwrap())),
        };
        let mut payload = vec![0x20];
        payload.extend_from_slice(&source.0.to_le_bytes());
        payload.push(endpoint);
        payload.extend_from_slice(&cluster.to_le_bytes());
        payload.extend(self.records(&[record]));
        NxpFrame::new(msg::REPORT_ATTRIBUTES, 0, payload)
    }
}

/// NXP leave indication: `ieee, rejoin`.
pub fn nxp_leave(ieee: IeeeAddress, rejoin: bool) -> NxpFrame {
    let mut payload = ieee.to_le_bytes().to_vec();
    payload.push(rejoin as u8);
    NxpFrame::new(nxp::msg::LEAVE_INDICATION, 0, payload)
}

// ============================================================================
// TI
// ============================================================================

#[derive(Debug, Default)]
pub struct TiFirmware {
    pub world: World,
}

fn srsp(subsystem: MtSubsystem, command: u8, payload: Vec<u8>) -> TiFrame {
    TiFrame::new(MtType::Srsp, subsystem, command, payload)
}

fn areq(subsystem: MtSubsystem, command: u8, payload: Vec<u8>) -> TiFrame {
    TiFrame::new(MtType::Areq, subsystem, command, payload)
}

impl TiFirmware {
    pub fn new(world: World) -> Self {
        TiFirmware { world }
    }

    fn zdo_request(&mut self, frame: &TiFrame, cluster: u16, callback: u8) -> Vec<TiFrame> {
        let target = ShortAddress(u16::from_le_bytes([frame.payload[0], frame.payload[1]]));
        let endpoint = frame.payload.get(4).copied();
        let mut out = vec![srsp(MtSubsystem::Zdo, frame.command, vec![0x00])];
        if let Some((status, body)) = self.world.zdo(target, cluster, endpoint) {
            let mut payload = target.0.to_le_bytes().to_vec();
            payload.push(status);
            payload.extend(body);
            out.push(areq(MtSubsystem::Zdo, callback, payload));
        }
        out
    }

    fn af_data_request(&mut self, frame: &TiFrame) -> Vec<TiFrame> {
        let p = &frame.payload;
        let target = ShortAddress(u16::from_le_bytes([p[0], p[1]]));
        let endpoint = p[2];
        let cluster = u16::from_le_bytes([p[4], p[5]]);
        let transaction = p[6];
        let len = p[9] as usize;
        let data = p[10..10 + len].to_vec();

        let mut out = vec![
            srsp(MtSubsystem::Af, af::DATA_REQUEST, vec![0x00]),
            areq(MtSubsystem::Af, af::DATA_CONFIRM, vec![0x00, endpoint, transaction]),
        ];
        if let Some(response) = self.world.zcl_response(target, endpoint, cluster, &data) {
            out.push(Self::incoming(target, endpoint, cluster, response));
        }
        out
    }

    fn incoming(source: ShortAddress, source_endpoint: u8, cluster: u16, data: Vec<u8>) -> TiFrame {
        let message = AfIncoming {
            group: 0,
            cluster,
            source,
            source_endpoint,
            destination_endpoint: 1,
            broadcast: false,
            lqi: 120,
            secured: false,
            timestamp: 0x0001_0000,
            transaction: 0,
            data,
        };
        areq(MtSubsystem::Af, af::INCOMING_MSG, message.encode())
    }
}

impl Firmware for TiFirmware {
    type Backend = TiBackend;

    fn world(&mut self) -> &mut World {
        &mut self.world
    }

    fn respond(&mut self, frame: TiFrame) -> Vec<TiFrame> {
        match (frame.kind, frame.subsystem, frame.command) {
            (MtType::Areq, MtSubsystem::Sys, sys::RESET_REQ) => {
                self.world.note("reset");
                vec![areq(MtSubsystem::Sys, sys::RESET_IND, vec![0x00, 0x02, 0x01, 2, 7, 1])]
            }
            (MtType::Sreq, MtSubsystem::Sys, sys::VERSION) => {
                self.world.note("version");
                vec![srsp(MtSubsystem::Sys, sys::VERSION, vec![0x02, 0x01, 2, 7, 1])]
            }
            (MtType::Sreq, MtSubsystem::Sapi, sapi::WRITE_CONFIGURATION) => {
                let id = frame.payload[0];
                let value = frame.payload[2..].to_vec();
                match id {
                    ti::config::STARTUP_OPTION if value == [ti::config::CLEAR_STATE] => self.world.note("erase"),
                    ti::config::EXTENDED_PAN_ID => {
                        self.world.extended_pan_id = u64::from_le_bytes(value[..8].try_into().unwrap());
                    }
                    ti::config::CHANLIST => {
                        self.world.channel_mask = u32::from_le_bytes(value[..4].try_into().unwrap());
                    }
                    ti::config::PRECFGKEY => self.world.network_key = Some(value),
                    _ => {}
                }
                vec![srsp(MtSubsystem::Sapi, sapi::WRITE_CONFIGURATION, vec![0x00])]
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::STARTUP_FROM_APP) => {
                self.world.note("start network");
                if self.world.fail_start {
                    return vec![srsp(MtSubsystem::Zdo, zdo_cmd::STARTUP_FROM_APP, vec![0x02])];
                }
                vec![
                    srsp(MtSubsystem::Zdo, zdo_cmd::STARTUP_FROM_APP, vec![0x01]),
                    areq(MtSubsystem::Zdo, zdo_cmd::STATE_CHANGE_IND, vec![ti::device_state::COORDINATOR_STARTING]),
                    areq(MtSubsystem::Zdo, zdo_cmd::STATE_CHANGE_IND, vec![ti::device_state::COORDINATOR]),
                ]
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::EXT_NWK_INFO) => {
                let mut payload = self.world.coordinator.short.0.to_le_bytes().to_vec();
                payload.extend_from_slice(&FORMED_PAN_ID.to_le_bytes());
                payload.extend_from_slice(&0xFFFEu16.to_le_bytes());
                payload.extend_from_slice(&self.world.extended_pan_id.to_le_bytes());
                payload.extend_from_slice(&0u64.to_le_bytes());
                payload.push(FORMED_CHANNEL);
                vec![srsp(MtSubsystem::Zdo, zdo_cmd::EXT_NWK_INFO, payload)]
            }
            (MtType::Sreq, MtSubsystem::Util, util::GET_DEVICE_INFO) => {
                let mut payload = vec![0x00];
                payload.extend_from_slice(&self.world.coordinator.ieee.to_le_bytes());
                payload.extend_from_slice(&self.world.coordinator.short.0.to_le_bytes());
                payload.extend_from_slice(&[0x07, 0x09, 0x00]);
                vec![srsp(MtSubsystem::Util, util::GET_DEVICE_INFO, payload)]
            }
            (MtType::Sreq, MtSubsystem::Af, af::REGISTER) => {
                // Endpoint survives a soft reset
                vec![srsp(MtSubsystem::Af, af::REGISTER, vec![0xB8])]
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::NODE_DESC_REQ) => {
                self.zdo_request(&frame, zdo::cluster::NODE_DESC_REQ, zdo_cmd::NODE_DESC_RSP)
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::POWER_DESC_REQ) => {
                self.zdo_request(&frame, zdo::cluster::POWER_DESC_REQ, zdo_cmd::POWER_DESC_RSP)
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::ACTIVE_EP_REQ) => {
                self.zdo_request(&frame, zdo::cluster::ACTIVE_EP_REQ, zdo_cmd::ACTIVE_EP_RSP)
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::SIMPLE_DESC_REQ) => {
                self.zdo_request(&frame, zdo::cluster::SIMPLE_DESC_REQ, zdo_cmd::SIMPLE_DESC_RSP)
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::BIND_REQ) => {
                self.zdo_request(&frame, zdo::cluster::BIND_REQ, zdo_cmd::BIND_RSP)
            }
            (MtType::Sreq, MtSubsystem::Zdo, zdo_cmd::MGMT_PERMIT_JOIN_REQ) => {
                self.world.note("permit join");
                vec![srsp(MtSubsystem::Zdo, zdo_cmd::MGMT_PERMIT_JOIN_REQ, vec![0x00])]
            }
            (MtType::Sreq, MtSubsystem::Af, af::DATA_REQUEST) => self.af_data_request(&frame),
            (MtType::Sreq, subsystem, command) => {
                // RPC error: unrecognized command
                vec![srsp(
                    MtSubsystem::Rpc,
                    0x00,
                    vec![0x02, 0x20 | subsystem.bits(), command],
                )]
            }
            _ => Vec::new(),
        }
    }

    fn announce(&self, device: &SimDevice) -> TiFrame {
        let mut payload = device.short.0.to_le_bytes().to_vec();
        payload.extend(device.announcement().encode());
        areq(MtSubsystem::Zdo, zdo_cmd::END_DEVICE_ANNCE_IND, payload)
    }

    fn report(
        &self,
        source: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        data_type: DataType,
        value: &AttributeValue,
    ) -> TiFrame {
        Self::incoming(source, endpoint, cluster, report_frame(0x42, attribute, data_type, value))
    }
}

/// TI leave indication: `src, ieee, request, remove children, rejoin`.
pub fn ti_leave(short: ShortAddress, ieee: IeeeAddress, rejoin: bool) -> TiFrame {
    let mut payload = short.0.to_le_bytes().to_vec();
    payload.extend_from_slice(&ieee.to_le_bytes());
    payload.extend_from_slice(&[0x00, 0x00, rejoin as u8]);
    areq(MtSubsystem::Zdo, zdo_cmd::LEAVE_IND, payload)
}

// ============================================================================
// Harness
// ============================================================================

/// A network wired to a simulated firmware through the real codecs.
pub struct Harness<F: Firmware> {
    pub network: Network<F::Backend, MemorySettings>,
    pub firmware: F,
    codec: <F::Backend as Protocol>::Codec,
    pub now: Instant,
    pub events: Vec<NetworkEvent>,
}

impl<F: Firmware> Harness<F> {
    pub fn new(firmware: F, store: MemorySettings) -> Self {
        Self::with_config(firmware, store, NetworkConfig::default())
    }

    pub fn with_config(firmware: F, store: MemorySettings, config: NetworkConfig) -> Self {
        let backend = F::Backend::default();
        let codec = backend.new_codec();
        let mut harness = Harness {
            network: Network::new(backend, store, config),
            firmware,
            codec,
            now: Instant::now(),
            events: Vec::new(),
        };
        harness.network.link_up(harness.now);
        harness.pump();
        harness
    }

    /// Deliver every queued request to the firmware and its replies back.
    pub fn pump(&mut self) {
        while let Some(bytes) = self.network.poll_transmit() {
            for frame in self.codec.feed(&bytes) {
                for reply in self.firmware.respond(frame) {
                    let wire = self.codec.encode(&reply);
                    self.network.handle_input(self.now, &wire);
                }
            }
        }
        while let Some(event) = self.network.poll_event() {
            self.events.push(event);
        }
    }

    /// Pump, letting requests the firmware ignores time out, until nothing is pending.
    pub fn settle(&mut self) {
        for _ in 0..1000 {
            self.pump();
            match self.network.next_deadline() {
                Some(deadline) => {
                    self.now = self.now.max(deadline);
                    self.network.handle_timeout(self.now);
                }
                None => break,
            }
        }
        self.pump();
    }

    /// Start the network and run bootstrap and discovery to completion.
    pub fn start(&mut self) {
        self.network.start(self.now).unwrap();
        self.settle();
    }

    /// Hand a firmware frame to the host without answering what it sends.
    pub fn deliver(&mut self, frame: <F::Backend as Protocol>::Frame) {
        let wire = self.codec.encode(&frame);
        self.network.handle_input(self.now, &wire);
    }

    /// Feed an unsolicited firmware frame to the host and settle.
    pub fn inject(&mut self, frame: <F::Backend as Protocol>::Frame) {
        self.deliver(frame);
        self.settle();
    }

    pub fn announce(&mut self, device: &SimDevice) {
        let frame = self.firmware.announce(device);
        self.inject(frame);
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.network.handle_timeout(self.now);
        self.pump();
    }

    pub fn take_events(&mut self) -> Vec<NetworkEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn world(&mut self) -> &mut World {
        self.firmware.world()
    }
}

/// Settings of a network that was formed before.
pub fn persisted_settings(nodes: &[(IeeeAddress, ShortAddress)]) -> NetworkSettings {
    NetworkSettings {
        pan_id: Some(FORMED_PAN_ID),
        extended_pan_id: Some(0xDDDD_0000_1111_2222),
        channel: Some(FORMED_CHANNEL),
        network_key: Some([0x5A; 16]),
        coordinator: Some(NodeAddresses {
            ieee: COORDINATOR_IEEE,
            short: ShortAddress::COORDINATOR,
        }),
        nodes: nodes
            .iter()
            .map(|&(ieee, short)| NodeAddresses { ieee, short })
            .collect(),
    }
}
