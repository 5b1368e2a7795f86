//! deCONZ coprocessor framing.
//!
//! Two layers. The outer layer is SLIP: content plus a 16-bit checksum (two's
//! complement of the byte sum, little-endian), escaped and wrapped in `END`
//! bytes. The inner layer is a fixed command header:
//!
//! ```text
//! +---------+----------+--------+----------------+---------+
//! | command | sequence | status | frame_len(2 LE)| payload |
//! +---------+----------+--------+----------------+---------+
//! ```
//!
//! `frame_len` counts the header and payload, not the checksum.

use bytes::{BufMut, BytesMut};
use log::{trace, warn};

use crate::{additive_checksum, CodecStats, FrameCodec, FrameError};

/// SLIP frame delimiter.
pub const END: u8 = 0xC0;
/// SLIP escape marker.
pub const ESC: u8 = 0xDB;
/// Escaped form of [`END`].
pub const ESC_END: u8 = 0xDC;
/// Escaped form of [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Command header size.
pub const HEADER_LEN: usize = 5;
/// Trailing checksum size.
pub const CHECKSUM_LEN: usize = 2;
/// Largest unescaped unit (header, payload and checksum) accepted.
pub const MAX_FRAME_LEN: usize = 1024;

fn escape_into(out: &mut Vec<u8>, data: &[u8]) {
    for &byte in data {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
}

/// Append the checksum to `content`, escape it and wrap it in delimiters.
pub fn slip_encode(content: &[u8]) -> Vec<u8> {
    let checksum = additive_checksum(content);
    let mut out = Vec::with_capacity(content.len() + CHECKSUM_LEN + 4);
    out.push(END);
    escape_into(&mut out, content);
    escape_into(&mut out, &checksum.to_le_bytes());
    out.push(END);
    out
}

/// Incremental SLIP decoder yielding checksum-validated content.
#[derive(Debug)]
pub struct SlipDecoder {
    buffer: BytesMut,
    escaped: bool,
    /// Set after an error; bytes are ignored until the next delimiter.
    discarding: bool,
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        SlipDecoder {
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
            escaped: false,
            discarding: false,
        }
    }

    /// Push received bytes and collect the outcome of every completed unit.
    ///
    /// Each entry is either the unit content with its checksum stripped or
    /// the reason the unit was rejected.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        let mut units = Vec::new();

        for &byte in data {
            if byte == END {
                if !self.discarding && !self.buffer.is_empty() {
                    units.push(self.finish());
                }
                self.reset();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.escaped {
                self.escaped = false;
                let unescaped = match byte {
                    ESC_END => END,
                    ESC_ESC => ESC,
                    other => {
                        units.push(Err(FrameError::InvalidEscape(other)));
                        self.discard();
                        continue;
                    }
                };
                self.push_byte(unescaped, &mut units);
            } else if byte == ESC {
                self.escaped = true;
            } else {
                self.push_byte(byte, &mut units);
            }
        }

        units
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial unit.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.discarding = false;
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.discarding = true;
    }

    fn push_byte(&mut self, byte: u8, units: &mut Vec<Result<Vec<u8>, FrameError>>) {
        if self.buffer.len() >= MAX_FRAME_LEN {
            units.push(Err(FrameError::FrameTooLong {
                max: MAX_FRAME_LEN,
                actual: self.buffer.len() + 1,
            }));
            self.discard();
            return;
        }
        self.buffer.put_u8(byte);
    }

    fn finish(&mut self) -> Result<Vec<u8>, FrameError> {
        if self.escaped {
            return Err(FrameError::InvalidEscape(END));
        }
        if self.buffer.len() < CHECKSUM_LEN {
            return Err(FrameError::too_short(CHECKSUM_LEN, self.buffer.len()));
        }

        let (content, trailer) = self.buffer.split_at(self.buffer.len() - CHECKSUM_LEN);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let computed = additive_checksum(content);
        if received != computed {
            return Err(FrameError::checksum(computed, received));
        }
        Ok(content.to_vec())
    }
}

/// A decoded deCONZ frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeconzFrame {
    /// Command id.
    pub command: u8,
    /// Sequence number; responses echo the request's value.
    pub sequence: u8,
    /// Status code, zero in requests.
    pub status: u8,
    /// Command payload.
    pub payload: Vec<u8>,
}

impl DeconzFrame {
    /// Create a request frame with a zero status.
    pub fn new(command: u8, sequence: u8, payload: impl Into<Vec<u8>>) -> Self {
        DeconzFrame {
            command,
            sequence,
            status: 0,
            payload: payload.into(),
        }
    }

    /// Set the status byte.
    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    /// Serialize header and payload (without SLIP or checksum).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.put_u8(self.command);
        out.put_u8(self.sequence);
        out.put_u8(self.status);
        out.put_u16_le((HEADER_LEN + self.payload.len()) as u16);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse header and payload from validated SLIP content.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::too_short(HEADER_LEN, data.len()));
        }
        let declared = u16::from_le_bytes([data[3], data[4]]) as usize;
        if declared != data.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        Ok(DeconzFrame {
            command: data[0],
            sequence: data[1],
            status: data[2],
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Incremental deCONZ codec.
#[derive(Debug, Default)]
pub struct DeconzCodec {
    slip: SlipDecoder,
    stats: CodecStats,
}

impl DeconzCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        DeconzCodec {
            slip: SlipDecoder::new(),
            stats: CodecStats::default(),
        }
    }
}

impl FrameCodec for DeconzCodec {
    type Frame = DeconzFrame;

    fn encode(&self, frame: &DeconzFrame) -> Vec<u8> {
        slip_encode(&frame.to_bytes())
    }

    fn feed(&mut self, data: &[u8]) -> Vec<DeconzFrame> {
        let mut frames = Vec::new();
        for unit in self.slip.push(data) {
            match unit.and_then(|content| DeconzFrame::from_bytes(&content)) {
                Ok(frame) => {
                    trace!(
                        "deconz: decoded command=0x{:02X} seq={} status={} len={}",
                        frame.command,
                        frame.sequence,
                        frame.status,
                        frame.payload.len()
                    );
                    self.stats.record_decoded();
                    frames.push(frame);
                }
                Err(e) => {
                    warn!("deconz: dropping frame: {}", e);
                    self.stats.record_dropped();
                }
            }
        }
        frames
    }

    fn reset(&mut self) {
        self.slip.reset();
    }

    fn buffered_len(&self) -> usize {
        self.slip.buffered_len()
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }
}
