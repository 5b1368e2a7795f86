//! NXP coprocessor framing.
//!
//! Units are wrapped in start/end delimiters. Every body byte below `0x10`
//! (which covers all three control values) is stuffed as `ESCAPE, byte ^ 0x10`.
//!
//! ```text
//! +-------+--------------------------------------------------------------+-----+
//! | START | msg_type(2 LE) | seq(1) | len(2 LE) | payload | checksum(2 LE) | END |
//! +-------+--------------------------------------------------------------+-----+
//!          \------------------------ stuffed ----------------------------/
//! ```
//!
//! The checksum is the two's complement of the 16-bit sum of the header and
//! payload bytes.

use bytes::{BufMut, BytesMut};
use log::{trace, warn};

use crate::{additive_checksum, CodecStats, FrameCodec, FrameError};

/// Start-of-unit delimiter.
pub const START: u8 = 0x01;
/// Escape marker; the next byte is XORed with [`ESCAPE_MASK`].
pub const ESCAPE: u8 = 0x02;
/// End-of-unit delimiter.
pub const END: u8 = 0x03;
/// Mask applied to stuffed bytes.
pub const ESCAPE_MASK: u8 = 0x10;

/// Header size: message type, sequence and payload length.
pub const HEADER_LEN: usize = 5;
/// Trailing checksum size.
pub const CHECKSUM_LEN: usize = 2;
/// Largest payload accepted by the decoder.
pub const MAX_PAYLOAD_LEN: usize = 1024;

const MAX_BODY_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

/// A decoded NXP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxpFrame {
    /// Message type code.
    pub msg_type: u16,
    /// Sequence number; replies echo the request's value.
    pub sequence: u8,
    /// Message payload.
    pub payload: Vec<u8>,
}

impl NxpFrame {
    /// Create a new frame.
    pub fn new(msg_type: u16, sequence: u8, payload: impl Into<Vec<u8>>) -> Self {
        NxpFrame {
            msg_type,
            sequence,
            payload: payload.into(),
        }
    }

    /// Serialize the unstuffed body: header, payload and checksum.
    pub fn to_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        body.put_u16_le(self.msg_type);
        body.put_u8(self.sequence);
        body.put_u16_le(self.payload.len() as u16);
        body.extend_from_slice(&self.payload);
        let checksum = additive_checksum(&body);
        body.put_u16_le(checksum);
        body
    }

    /// Parse an unstuffed body, verifying checksum and declared length.
    pub fn from_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(FrameError::too_short(HEADER_LEN + CHECKSUM_LEN, body.len()));
        }

        let (content, trailer) = body.split_at(body.len() - CHECKSUM_LEN);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let computed = additive_checksum(content);
        if received != computed {
            return Err(FrameError::checksum(computed, received));
        }

        let declared = u16::from_le_bytes([content[3], content[4]]) as usize;
        let payload = &content[HEADER_LEN..];
        if declared != payload.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(NxpFrame {
            msg_type: u16::from_le_bytes([content[0], content[1]]),
            sequence: content[2],
            payload: payload.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for a start delimiter.
    Idle,
    /// Accumulating body bytes.
    Body,
    /// Previous byte was an escape marker.
    Escaped,
}

/// Incremental NXP codec.
#[derive(Debug)]
pub struct NxpCodec {
    /// Unstuffed body of the unit being received.
    buffer: BytesMut,
    state: DecodeState,
    stats: CodecStats,
}

impl Default for NxpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl NxpCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        NxpCodec {
            buffer: BytesMut::with_capacity(MAX_BODY_LEN),
            state: DecodeState::Idle,
            stats: CodecStats::default(),
        }
    }

    fn drop_unit(&mut self, error: FrameError) {
        warn!("nxp: dropping frame ({} bytes buffered): {}", self.buffer.len(), error);
        self.stats.record_dropped();
        self.buffer.clear();
        self.state = DecodeState::Idle;
    }

    fn push_body_byte(&mut self, byte: u8) {
        if self.buffer.len() >= MAX_BODY_LEN {
            self.drop_unit(FrameError::FrameTooLong {
                max: MAX_BODY_LEN,
                actual: self.buffer.len() + 1,
            });
            return;
        }
        self.buffer.put_u8(byte);
        self.state = DecodeState::Body;
    }

    fn finish_unit(&mut self, frames: &mut Vec<NxpFrame>) {
        match NxpFrame::from_body(&self.buffer) {
            Ok(frame) => {
                trace!(
                    "nxp: decoded msg_type=0x{:04X} seq={} len={}",
                    frame.msg_type,
                    frame.sequence,
                    frame.payload.len()
                );
                self.stats.record_decoded();
                self.buffer.clear();
                self.state = DecodeState::Idle;
                frames.push(frame);
            }
            Err(e) => self.drop_unit(e),
        }
    }
}

impl FrameCodec for NxpCodec {
    type Frame = NxpFrame;

    fn encode(&self, frame: &NxpFrame) -> Vec<u8> {
        let body = frame.to_body();
        let mut out = Vec::with_capacity(body.len() * 2 + 2);
        out.push(START);
        for byte in body {
            if byte < ESCAPE_MASK {
                out.push(ESCAPE);
                out.push(byte ^ ESCAPE_MASK);
            } else {
                out.push(byte);
            }
        }
        out.push(END);
        out
    }

    fn feed(&mut self, data: &[u8]) -> Vec<NxpFrame> {
        let mut frames = Vec::new();

        for &byte in data {
            if byte == START {
                if self.state != DecodeState::Idle {
                    warn!(
                        "nxp: start delimiter inside frame, discarding {} bytes",
                        self.buffer.len()
                    );
                    self.stats.record_dropped();
                    self.buffer.clear();
                }
                self.state = DecodeState::Body;
                continue;
            }

            match self.state {
                DecodeState::Idle => {
                    trace!("nxp: skipping 0x{:02X} outside frame", byte);
                }
                DecodeState::Body => match byte {
                    END => self.finish_unit(&mut frames),
                    ESCAPE => self.state = DecodeState::Escaped,
                    _ => self.push_body_byte(byte),
                },
                DecodeState::Escaped => {
                    if (ESCAPE_MASK..=ESCAPE_MASK | 0x0F).contains(&byte) {
                        self.push_body_byte(byte ^ ESCAPE_MASK);
                    } else {
                        self.drop_unit(FrameError::InvalidEscape(byte));
                    }
                }
            }
        }

        frames
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecodeState::Idle;
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }
}
