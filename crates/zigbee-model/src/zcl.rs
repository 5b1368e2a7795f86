//! Zigbee Cluster Library framing, data types and global commands.
//!
//! ```text
//! +---------------+---------------------------+-----+---------+---------+
//! | frame control | manufacturer code (2, opt) | seq | command | payload |
//! +---------------+---------------------------+-----+---------+---------+
//! ```

use crate::{ByteReader, IeeeAddress, ModelError};

/// Home Automation profile id.
pub const HOME_AUTOMATION_PROFILE: u16 = 0x0104;

// ============================================================================
// Cluster IDs
// ============================================================================

/// Common cluster ids.
pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIGURATION: u16 = 0x0001;
    pub const IDENTIFY: u16 = 0x0003;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const OTA_UPGRADE: u16 = 0x0019;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const RELATIVE_HUMIDITY: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
}

/// Basic cluster attribute ids.
pub mod basic {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const APPLICATION_VERSION: u16 = 0x0001;
    pub const STACK_VERSION: u16 = 0x0002;
    pub const HW_VERSION: u16 = 0x0003;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const DATE_CODE: u16 = 0x0006;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const SW_BUILD_ID: u16 = 0x4000;
}

/// Global (profile-wide) command ids.
pub mod command {
    pub const READ_ATTRIBUTES: u8 = 0x00;
    pub const READ_ATTRIBUTES_RESPONSE: u8 = 0x01;
    pub const WRITE_ATTRIBUTES: u8 = 0x02;
    pub const WRITE_ATTRIBUTES_UNDIVIDED: u8 = 0x03;
    pub const WRITE_ATTRIBUTES_RESPONSE: u8 = 0x04;
    pub const CONFIGURE_REPORTING: u8 = 0x06;
    pub const CONFIGURE_REPORTING_RESPONSE: u8 = 0x07;
    pub const REPORT_ATTRIBUTES: u8 = 0x0A;
    pub const DEFAULT_RESPONSE: u8 = 0x0B;
}

/// ZCL status codes.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
    pub const MALFORMED_COMMAND: u8 = 0x80;
    pub const UNSUP_CLUSTER_COMMAND: u8 = 0x81;
    pub const UNSUP_GENERAL_COMMAND: u8 = 0x82;
    pub const INVALID_FIELD: u8 = 0x85;
    pub const UNSUPPORTED_ATTRIBUTE: u8 = 0x86;
    pub const INVALID_VALUE: u8 = 0x87;
    pub const READ_ONLY: u8 = 0x88;
    pub const INVALID_DATA_TYPE: u8 = 0x8D;
    pub const UNREPORTABLE_ATTRIBUTE: u8 = 0x8C;
}

// ============================================================================
// Frame Header
// ============================================================================

/// Frame control: cluster-specific command (otherwise global).
pub const FC_CLUSTER_SPECIFIC: u8 = 0x01;
/// Frame control: manufacturer code present.
pub const FC_MANUFACTURER_SPECIFIC: u8 = 0x04;
/// Frame control: sent from server to client.
pub const FC_SERVER_TO_CLIENT: u8 = 0x08;
/// Frame control: do not send a default response.
pub const FC_DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

/// ZCL frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZclHeader {
    pub frame_control: u8,
    pub manufacturer_code: Option<u16>,
    pub transaction: u8,
    pub command: u8,
}

impl ZclHeader {
    /// Header for a global command sent from client to server.
    pub fn global(transaction: u8, command: u8) -> Self {
        ZclHeader {
            frame_control: 0,
            manufacturer_code: None,
            transaction,
            command,
        }
    }

    /// Header for a cluster-specific command sent from client to server.
    pub fn cluster_specific(transaction: u8, command: u8) -> Self {
        ZclHeader {
            frame_control: FC_CLUSTER_SPECIFIC,
            manufacturer_code: None,
            transaction,
            command,
        }
    }

    /// Set a manufacturer code.
    pub fn with_manufacturer(mut self, code: u16) -> Self {
        self.frame_control |= FC_MANUFACTURER_SPECIFIC;
        self.manufacturer_code = Some(code);
        self
    }

    pub fn is_global(&self) -> bool {
        self.frame_control & 0x03 == 0
    }

    pub fn is_from_server(&self) -> bool {
        self.frame_control & FC_SERVER_TO_CLIENT != 0
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.frame_control);
        if let Some(code) = self.manufacturer_code {
            out.extend_from_slice(&code.to_le_bytes());
        }
        out.push(self.transaction);
        out.push(self.command);
    }
}

/// A ZCL frame: header and command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    pub header: ZclHeader,
    pub payload: Vec<u8>,
}

impl ZclFrame {
    pub fn new(header: ZclHeader, payload: impl Into<Vec<u8>>) -> Self {
        ZclFrame {
            header,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.payload.len());
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, ModelError> {
        let mut r = ByteReader::new(data, "zcl frame");
        let frame_control = r.u8()?;
        let manufacturer_code = if frame_control & FC_MANUFACTURER_SPECIFIC != 0 {
            Some(r.u16()?)
        } else {
            None
        };
        let transaction = r.u8()?;
        let command = r.u8()?;
        Ok(ZclFrame {
            header: ZclHeader {
                frame_control,
                manufacturer_code,
                transaction,
                command,
            },
            payload: r.rest().to_vec(),
        })
    }
}

/// Peek the transaction sequence of an encoded ZCL frame.
pub fn transaction_of(data: &[u8]) -> Option<u8> {
    let fc = *data.first()?;
    let index = if fc & FC_MANUFACTURER_SPECIFIC != 0 { 3 } else { 1 };
    data.get(index).copied()
}

// ============================================================================
// Data Types
// ============================================================================

/// ZCL attribute data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    NoData,
    Data8,
    Data16,
    Data24,
    Data32,
    Bool,
    Bitmap8,
    Bitmap16,
    Bitmap24,
    Bitmap32,
    Uint8,
    Uint16,
    Uint24,
    Uint32,
    Uint48,
    Uint64,
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    Enum8,
    Enum16,
    Float32,
    Float64,
    OctetString,
    CharString,
    LongOctetString,
    LongCharString,
    TimeOfDay,
    Date,
    UtcTime,
    ClusterId,
    AttributeId,
    IeeeAddress,
    SecurityKey,
}

impl DataType {
    /// Decode a type tag.
    pub fn from_u8(tag: u8) -> Result<Self, ModelError> {
        use DataType::*;
        Ok(match tag {
            0x00 => NoData,
            0x08 => Data8,
            0x09 => Data16,
            0x0A => Data24,
            0x0B => Data32,
            0x10 => Bool,
            0x18 => Bitmap8,
            0x19 => Bitmap16,
            0x1A => Bitmap24,
            0x1B => Bitmap32,
            0x20 => Uint8,
            0x21 => Uint16,
            0x22 => Uint24,
            0x23 => Uint32,
            0x25 => Uint48,
            0x27 => Uint64,
            0x28 => Int8,
            0x29 => Int16,
            0x2A => Int24,
            0x2B => Int32,
            0x2F => Int64,
            0x30 => Enum8,
            0x31 => Enum16,
            0x39 => Float32,
            0x3A => Float64,
            0x41 => OctetString,
            0x42 => CharString,
            0x43 => LongOctetString,
            0x44 => LongCharString,
            0xE0 => TimeOfDay,
            0xE1 => Date,
            0xE2 => UtcTime,
            0xE8 => ClusterId,
            0xE9 => AttributeId,
            0xF0 => IeeeAddress,
            0xF1 => SecurityKey,
            other => return Err(ModelError::UnknownDataType(other)),
        })
    }

    /// Encode the type tag.
    pub fn to_u8(self) -> u8 {
        use DataType::*;
        match self {
            NoData => 0x00,
            Data8 => 0x08,
            Data16 => 0x09,
            Data24 => 0x0A,
            Data32 => 0x0B,
            Bool => 0x10,
            Bitmap8 => 0x18,
            Bitmap16 => 0x19,
            Bitmap24 => 0x1A,
            Bitmap32 => 0x1B,
            Uint8 => 0x20,
            Uint16 => 0x21,
            Uint24 => 0x22,
            Uint32 => 0x23,
            Uint48 => 0x25,
            Uint64 => 0x27,
            Int8 => 0x28,
            Int16 => 0x29,
            Int24 => 0x2A,
            Int32 => 0x2B,
            Int64 => 0x2F,
            Enum8 => 0x30,
            Enum16 => 0x31,
            Float32 => 0x39,
            Float64 => 0x3A,
            OctetString => 0x41,
            CharString => 0x42,
            LongOctetString => 0x43,
            LongCharString => 0x44,
            TimeOfDay => 0xE0,
            Date => 0xE1,
            UtcTime => 0xE2,
            ClusterId => 0xE8,
            AttributeId => 0xE9,
            IeeeAddress => 0xF0,
            SecurityKey => 0xF1,
        }
    }

    /// Encoded size for fixed-width types, `None` for length-prefixed strings.
    pub fn fixed_size(self) -> Option<usize> {
        use DataType::*;
        match self {
            NoData => Some(0),
            Data8 | Bool | Bitmap8 | Uint8 | Int8 | Enum8 => Some(1),
            Data16 | Bitmap16 | Uint16 | Int16 | Enum16 | ClusterId | AttributeId => Some(2),
            Data24 | Bitmap24 | Uint24 | Int24 => Some(3),
            Data32 | Bitmap32 | Uint32 | Int32 | Float32 | TimeOfDay | Date | UtcTime => Some(4),
            Uint48 => Some(6),
            Uint64 | Int64 | Float64 | IeeeAddress => Some(8),
            SecurityKey => Some(16),
            OctetString | CharString | LongOctetString | LongCharString => None,
        }
    }

    /// Whether reporting configuration carries a reportable-change field.
    pub fn is_analog(self) -> bool {
        use DataType::*;
        matches!(
            self,
            Uint8 | Uint16 | Uint24 | Uint32 | Uint48 | Uint64 | Int8 | Int16 | Int24 | Int32
                | Int64 | Float32 | Float64 | TimeOfDay | Date | UtcTime
        )
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Enum(u16),
    Bitmap(u64),
    Float(f64),
    String(String),
    Octets(Vec<u8>),
    Ieee(IeeeAddress),
}

impl AttributeValue {
    /// Get the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an unsigned integer, if it is integral and non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::Unsigned(v) | AttributeValue::Bitmap(v) => Some(*v),
            AttributeValue::Enum(v) => Some(u64::from(*v)),
            AttributeValue::Signed(v) if *v >= 0 => Some(*v as u64),
            AttributeValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }
}

fn read_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn sign_extend(value: u64, width: usize) -> i64 {
    let shift = 64 - 8 * width as u32;
    ((value << shift) as i64) >> shift
}

/// Decode one value of `data_type`, returning it and the bytes consumed.
pub fn decode_value(data_type: DataType, data: &[u8]) -> Result<(AttributeValue, usize), ModelError> {
    use DataType::*;
    let mut r = ByteReader::new(data, "attribute value");

    let value = match data_type {
        OctetString | CharString => {
            let len = r.u8()?;
            // 0xFF marks an invalid (unset) string
            if len == 0xFF {
                AttributeValue::Null
            } else {
                string_value(data_type, r.take(len as usize)?)
            }
        }
        LongOctetString | LongCharString => {
            let len = r.u16()?;
            if len == 0xFFFF {
                AttributeValue::Null
            } else {
                string_value(data_type, r.take(len as usize)?)
            }
        }
        _ => {
            let size = data_type.fixed_size().unwrap_or(0);
            let bytes = r.take(size)?;
            match data_type {
                NoData => AttributeValue::Null,
                Bool => AttributeValue::Bool(bytes[0] != 0),
                Uint8 | Uint16 | Uint24 | Uint32 | Uint48 | Uint64 | ClusterId | AttributeId
                | TimeOfDay | Date | UtcTime => AttributeValue::Unsigned(read_uint(bytes)),
                Int8 | Int16 | Int24 | Int32 | Int64 => {
                    AttributeValue::Signed(sign_extend(read_uint(bytes), size))
                }
                Enum8 | Enum16 => AttributeValue::Enum(read_uint(bytes) as u16),
                Data8 | Data16 | Data24 | Data32 | Bitmap8 | Bitmap16 | Bitmap24 | Bitmap32 => {
                    AttributeValue::Bitmap(read_uint(bytes))
                }
                Float32 => AttributeValue::Float(f64::from(f32::from_bits(read_uint(bytes) as u32))),
                Float64 => AttributeValue::Float(f64::from_bits(read_uint(bytes))),
                IeeeAddress => AttributeValue::Ieee(crate::IeeeAddress(read_uint(bytes))),
                SecurityKey => AttributeValue::Octets(bytes.to_vec()),
                OctetString | CharString | LongOctetString | LongCharString => AttributeValue::Null,
            }
        }
    };

    Ok((value, data.len() - r.remaining()))
}

fn string_value(data_type: DataType, bytes: &[u8]) -> AttributeValue {
    match data_type {
        DataType::CharString | DataType::LongCharString => {
            // Devices pad with NULs; keep the printable prefix
            let text = String::from_utf8_lossy(bytes);
            AttributeValue::String(text.trim_end_matches('\0').to_string())
        }
        _ => AttributeValue::Octets(bytes.to_vec()),
    }
}

/// Encode `value` as `data_type`.
pub fn encode_value(data_type: DataType, value: &AttributeValue) -> Result<Vec<u8>, ModelError> {
    use DataType::*;
    let mismatch = || ModelError::ValueTypeMismatch(data_type);

    match (data_type, value) {
        (CharString, AttributeValue::String(s)) => short_prefixed(s.as_bytes()).ok_or_else(mismatch),
        (OctetString, AttributeValue::Octets(b)) => short_prefixed(b).ok_or_else(mismatch),
        (LongCharString, AttributeValue::String(s)) => long_prefixed(s.as_bytes()).ok_or_else(mismatch),
        (LongOctetString, AttributeValue::Octets(b)) => long_prefixed(b).ok_or_else(mismatch),
        (NoData, AttributeValue::Null) => Ok(Vec::new()),
        (Bool, AttributeValue::Bool(b)) => Ok(vec![u8::from(*b)]),
        (Float32, AttributeValue::Float(f)) => Ok((*f as f32).to_le_bytes().to_vec()),
        (Float64, AttributeValue::Float(f)) => Ok(f.to_le_bytes().to_vec()),
        (IeeeAddress, AttributeValue::Ieee(addr)) => Ok(addr.to_le_bytes().to_vec()),
        (SecurityKey, AttributeValue::Octets(b)) if b.len() == 16 => Ok(b.clone()),
        (_, AttributeValue::Signed(v)) if matches!(data_type, Int8 | Int16 | Int24 | Int32 | Int64) => {
            let size = data_type.fixed_size().ok_or_else(mismatch)?;
            Ok(v.to_le_bytes()[..size].to_vec())
        }
        (_, AttributeValue::Unsigned(v) | AttributeValue::Bitmap(v))
            if !matches!(data_type, Bool | Int8 | Int16 | Int24 | Int32 | Int64 | Float32 | Float64) =>
        {
            let size = data_type.fixed_size().ok_or_else(mismatch)?;
            if size == 0 || size > 8 || (size < 8 && *v >> (8 * size) != 0) {
                return Err(mismatch());
            }
            Ok(v.to_le_bytes()[..size].to_vec())
        }
        (Enum8 | Enum16, AttributeValue::Enum(v)) => {
            let size = data_type.fixed_size().ok_or_else(mismatch)?;
            if size == 1 && *v > 0xFF {
                return Err(mismatch());
            }
            Ok(v.to_le_bytes()[..size].to_vec())
        }
        _ => Err(mismatch()),
    }
}

fn short_prefixed(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() >= 0xFF {
        return None;
    }
    let mut out = vec![bytes.len() as u8];
    out.extend_from_slice(bytes);
    Some(out)
}

fn long_prefixed(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() >= 0xFFFF {
        return None;
    }
    let mut out = (bytes.len() as u16).to_le_bytes().to_vec();
    out.extend_from_slice(bytes);
    Some(out)
}

// ============================================================================
// Attribute Records
// ============================================================================

/// One attribute from a read response or report.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub id: u16,
    /// ZCL status; reports are always [`status::SUCCESS`].
    pub status: u8,
    pub data_type: DataType,
    pub value: AttributeValue,
    /// Encoded value bytes as received.
    pub raw: Vec<u8>,
}

impl AttributeRecord {
    /// A successful record.
    pub fn new(id: u16, data_type: DataType, value: AttributeValue, raw: Vec<u8>) -> Self {
        AttributeRecord {
            id,
            status: status::SUCCESS,
            data_type,
            value,
            raw,
        }
    }

    /// A record carrying only a failure status.
    pub fn failed(id: u16, status: u8) -> Self {
        AttributeRecord {
            id,
            status,
            data_type: DataType::NoData,
            value: AttributeValue::Null,
            raw: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == status::SUCCESS
    }
}

fn read_typed(r: &mut ByteReader<'_>, id: u16) -> Result<AttributeRecord, ModelError> {
    let data_type = DataType::from_u8(r.u8()?)?;
    let rest = r.rest();
    let (value, used) = decode_value(data_type, rest)?;
    let raw = r.take(used)?.to_vec();
    Ok(AttributeRecord::new(id, data_type, value, raw))
}

/// Parse the payload of a Read Attributes Response.
pub fn parse_read_attributes_response(payload: &[u8]) -> Result<Vec<AttributeRecord>, ModelError> {
    let mut r = ByteReader::new(payload, "read attributes response");
    let mut records = Vec::new();
    while !r.is_empty() {
        let id = r.u16()?;
        let record_status = r.u8()?;
        if record_status == status::SUCCESS {
            records.push(read_typed(&mut r, id)?);
        } else {
            records.push(AttributeRecord::failed(id, record_status));
        }
    }
    Ok(records)
}

/// Parse the payload of a Report Attributes command.
pub fn parse_report_attributes(payload: &[u8]) -> Result<Vec<AttributeRecord>, ModelError> {
    let mut r = ByteReader::new(payload, "report attributes");
    let mut records = Vec::new();
    while !r.is_empty() {
        let id = r.u16()?;
        records.push(read_typed(&mut r, id)?);
    }
    Ok(records)
}

/// Parse a Write Attributes or Configure Reporting response.
///
/// Returns `(status, attribute id)` pairs. A bare success status (all
/// attributes accepted) yields an empty list.
pub fn parse_status_records(payload: &[u8], with_direction: bool) -> Result<Vec<(u8, u16)>, ModelError> {
    if payload == [status::SUCCESS] {
        return Ok(Vec::new());
    }
    let mut r = ByteReader::new(payload, "status records");
    let mut records = Vec::new();
    while !r.is_empty() {
        let record_status = r.u8()?;
        if with_direction {
            r.u8()?;
        }
        records.push((record_status, r.u16()?));
    }
    Ok(records)
}

// ============================================================================
// Request Builders
// ============================================================================

/// Build a Read Attributes request frame.
pub fn read_attributes_request(transaction: u8, attributes: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(attributes.len() * 2);
    for id in attributes {
        payload.extend_from_slice(&id.to_le_bytes());
    }
    ZclFrame::new(ZclHeader::global(transaction, command::READ_ATTRIBUTES), payload).encode()
}

/// One attribute to write.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub id: u16,
    pub data_type: DataType,
    pub value: AttributeValue,
}

/// Build a Write Attributes request frame.
pub fn write_attributes_request(transaction: u8, writes: &[AttributeWrite]) -> Result<Vec<u8>, ModelError> {
    let mut payload = Vec::new();
    for write in writes {
        payload.extend_from_slice(&write.id.to_le_bytes());
        payload.push(write.data_type.to_u8());
        payload.extend(encode_value(write.data_type, &write.value)?);
    }
    Ok(ZclFrame::new(ZclHeader::global(transaction, command::WRITE_ATTRIBUTES), payload).encode())
}

/// Reporting configuration for one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfiguration {
    pub attribute: u16,
    pub data_type: DataType,
    /// Minimum seconds between reports.
    pub min_interval: u16,
    /// Maximum seconds between reports; `0xFFFF` disables periodic reports.
    pub max_interval: u16,
    /// Change that triggers a report; required for analog types.
    pub reportable_change: Option<AttributeValue>,
}

/// Build a Configure Reporting request frame.
pub fn configure_reporting_request(
    transaction: u8,
    configs: &[ReportingConfiguration],
) -> Result<Vec<u8>, ModelError> {
    let mut payload = Vec::new();
    for config in configs {
        payload.push(0x00); // reported by the server
        payload.extend_from_slice(&config.attribute.to_le_bytes());
        payload.push(config.data_type.to_u8());
        payload.extend_from_slice(&config.min_interval.to_le_bytes());
        payload.extend_from_slice(&config.max_interval.to_le_bytes());
        if config.data_type.is_analog() {
            let change = config
                .reportable_change
                .as_ref()
                .ok_or(ModelError::ValueTypeMismatch(config.data_type))?;
            payload.extend(encode_value(config.data_type, change)?);
        }
    }
    Ok(ZclFrame::new(ZclHeader::global(transaction, command::CONFIGURE_REPORTING), payload).encode())
}
