//! TI Z-Stack monitor-and-test (MT) framing.
//!
//! ```text
//! +-----+--------+------+------+-----------------+-----+
//! | SOF | LEN(1) | CMD0 | CMD1 | payload[0..LEN] | FCS |
//! +-----+--------+------+------+-----------------+-----+
//! ```
//!
//! `CMD0` carries the frame type in its top three bits and the subsystem in
//! the low five. `FCS` is the XOR of every byte from `LEN` through the end of
//! the payload. There is no escaping; the decoder relies on the length prefix
//! and rescans for `SOF` after garbage or a failed check.

use bytes::{Buf, BufMut, BytesMut};
use log::{error, trace, warn};

use crate::{xor_checksum, CodecStats, FrameCodec, FrameError};

/// Start-of-frame marker.
pub const SOF: u8 = 0xFE;
/// Largest payload allowed by the length byte.
pub const MAX_PAYLOAD_LEN: usize = 250;
/// SOF, LEN, CMD0, CMD1 and FCS.
pub const OVERHEAD: usize = 5;

/// MT frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MtType {
    /// Poll for queued data.
    Poll,
    /// Synchronous request; answered by an SRSP.
    Sreq,
    /// Asynchronous request or callback.
    Areq,
    /// Synchronous response.
    Srsp,
}

impl MtType {
    /// Decode from the three type bits of CMD0.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(MtType::Poll),
            1 => Some(MtType::Sreq),
            2 => Some(MtType::Areq),
            3 => Some(MtType::Srsp),
            _ => None,
        }
    }

    /// Encode into the three type bits of CMD0.
    pub fn bits(self) -> u8 {
        match self {
            MtType::Poll => 0,
            MtType::Sreq => 1,
            MtType::Areq => 2,
            MtType::Srsp => 3,
        }
    }
}

/// MT subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MtSubsystem {
    Rpc,
    Sys,
    Mac,
    Nwk,
    Af,
    Zdo,
    Sapi,
    Util,
    Debug,
    App,
    AppConfig,
    GreenPower,
    /// Subsystem id this crate has no name for.
    Other(u8),
}

impl MtSubsystem {
    /// Decode from the five subsystem bits of CMD0.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x1F {
            0x00 => MtSubsystem::Rpc,
            0x01 => MtSubsystem::Sys,
            0x02 => MtSubsystem::Mac,
            0x03 => MtSubsystem::Nwk,
            0x04 => MtSubsystem::Af,
            0x05 => MtSubsystem::Zdo,
            0x06 => MtSubsystem::Sapi,
            0x07 => MtSubsystem::Util,
            0x08 => MtSubsystem::Debug,
            0x09 => MtSubsystem::App,
            0x0F => MtSubsystem::AppConfig,
            0x15 => MtSubsystem::GreenPower,
            other => MtSubsystem::Other(other),
        }
    }

    /// Encode into the five subsystem bits of CMD0.
    pub fn bits(self) -> u8 {
        match self {
            MtSubsystem::Rpc => 0x00,
            MtSubsystem::Sys => 0x01,
            MtSubsystem::Mac => 0x02,
            MtSubsystem::Nwk => 0x03,
            MtSubsystem::Af => 0x04,
            MtSubsystem::Zdo => 0x05,
            MtSubsystem::Sapi => 0x06,
            MtSubsystem::Util => 0x07,
            MtSubsystem::Debug => 0x08,
            MtSubsystem::App => 0x09,
            MtSubsystem::AppConfig => 0x0F,
            MtSubsystem::GreenPower => 0x15,
            MtSubsystem::Other(bits) => bits & 0x1F,
        }
    }
}

/// A decoded MT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiFrame {
    /// Frame type.
    pub kind: MtType,
    /// Target subsystem.
    pub subsystem: MtSubsystem,
    /// Command id within the subsystem (CMD1).
    pub command: u8,
    /// Command payload.
    pub payload: Vec<u8>,
}

impl TiFrame {
    /// Create a new frame.
    pub fn new(kind: MtType, subsystem: MtSubsystem, command: u8, payload: impl Into<Vec<u8>>) -> Self {
        TiFrame {
            kind,
            subsystem,
            command,
            payload: payload.into(),
        }
    }

    /// Get the CMD0 byte.
    pub fn cmd0(&self) -> u8 {
        (self.kind.bits() << 5) | self.subsystem.bits()
    }
}

/// Incremental MT codec.
#[derive(Debug)]
pub struct TiCodec {
    buffer: BytesMut,
    stats: CodecStats,
}

impl Default for TiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TiCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        TiCodec {
            buffer: BytesMut::with_capacity(MAX_PAYLOAD_LEN + OVERHEAD),
            stats: CodecStats::default(),
        }
    }

    /// Try to take one complete unit off the front of the buffer.
    ///
    /// Returns `None` when more bytes are needed, `Some(Err)` for a rejected
    /// unit (already removed from the buffer).
    fn next_unit(&mut self) -> Option<Result<TiFrame, FrameError>> {
        // Scan for SOF, discarding any preceding garbage
        let skip = self
            .buffer
            .iter()
            .position(|&b| b == SOF)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            trace!("ti: skipping {} bytes before SOF", skip);
            self.buffer.advance(skip);
        }

        if self.buffer.len() < 2 {
            return None;
        }

        let len = self.buffer[1] as usize;
        if len > MAX_PAYLOAD_LEN {
            // Not a real SOF; resume the scan after it
            self.buffer.advance(1);
            return Some(Err(FrameError::FrameTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: len,
            }));
        }

        let total = len + OVERHEAD;
        if self.buffer.len() < total {
            return None;
        }

        let received = self.buffer[total - 1];
        let computed = xor_checksum(&self.buffer[1..total - 1]);
        if received != computed {
            // Possibly a stray SOF; a real frame may start inside the unit
            self.buffer.advance(1);
            return Some(Err(FrameError::checksum(computed.into(), received.into())));
        }
        let unit = self.buffer.split_to(total);

        let cmd0 = unit[2];
        let kind = match MtType::from_bits(cmd0 >> 5) {
            Some(kind) => kind,
            None => {
                return Some(Err(FrameError::InvalidHeader {
                    field: "cmd0",
                    value: cmd0,
                }))
            }
        };

        Some(Ok(TiFrame {
            kind,
            subsystem: MtSubsystem::from_bits(cmd0),
            command: unit[3],
            payload: unit[4..total - 1].to_vec(),
        }))
    }
}

impl FrameCodec for TiCodec {
    type Frame = TiFrame;

    fn encode(&self, frame: &TiFrame) -> Vec<u8> {
        // The length byte cannot describe it, so nothing goes on the wire
        if frame.payload.len() > MAX_PAYLOAD_LEN {
            error!(
                "ti: refusing to encode {} byte payload, max is {}",
                frame.payload.len(),
                MAX_PAYLOAD_LEN
            );
            return Vec::new();
        }
        let mut out = Vec::with_capacity(frame.payload.len() + OVERHEAD);
        out.put_u8(SOF);
        out.put_u8(frame.payload.len() as u8);
        out.put_u8(frame.cmd0());
        out.put_u8(frame.command);
        out.extend_from_slice(&frame.payload);
        let fcs = xor_checksum(&out[1..]);
        out.put_u8(fcs);
        out
    }

    fn feed(&mut self, data: &[u8]) -> Vec<TiFrame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(unit) = self.next_unit() {
            match unit {
                Ok(frame) => {
                    trace!(
                        "ti: decoded {:?} {:?} cmd=0x{:02X} len={}",
                        frame.kind,
                        frame.subsystem,
                        frame.command,
                        frame.payload.len()
                    );
                    self.stats.record_decoded();
                    frames.push(frame);
                }
                Err(e) => {
                    warn!("ti: dropping frame: {}", e);
                    self.stats.record_dropped();
                }
            }
        }
        frames
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }
}
