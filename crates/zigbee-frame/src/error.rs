//! Framing error types.

use thiserror::Error;

/// Errors raised while validating a received wire unit.
///
/// Decoders never return these to the caller of `feed`; a failing unit is
/// dropped and the error is logged. They are public so that layered parsers
/// (e.g. the deCONZ header on top of SLIP) can report why a unit was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Unit is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Unit exceeds the maximum size for its format.
    #[error("frame too long: maximum {max} bytes, got {actual}")]
    FrameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Integrity value does not match the unit contents.
    #[error("checksum mismatch: computed 0x{expected:04X}, received 0x{actual:04X}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u16,
        /// Checksum carried by the unit.
        actual: u16,
    },

    /// Escape marker followed by a byte that has no escaped meaning.
    #[error("invalid escape sequence: 0x{0:02X}")]
    InvalidEscape(u8),

    /// Length field disagrees with the number of bytes present.
    #[error("length mismatch: header declares {declared} bytes, got {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },

    /// Header field carries a value the format does not define.
    #[error("invalid header field {field}: 0x{value:02X}")]
    InvalidHeader {
        /// Name of the offending field.
        field: &'static str,
        /// Value found.
        value: u8,
    },
}

impl FrameError {
    /// Create a too-short error.
    pub fn too_short(expected: usize, actual: usize) -> Self {
        FrameError::FrameTooShort { expected, actual }
    }

    /// Create a checksum mismatch error.
    pub fn checksum(expected: u16, actual: u16) -> Self {
        FrameError::ChecksumMismatch { expected, actual }
    }
}
