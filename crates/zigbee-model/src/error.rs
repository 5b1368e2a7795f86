//! Model error types.

use thiserror::Error;

/// Errors raised while parsing or encoding ZDO and ZCL structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Structure ended before all fields were read.
    #[error("{what} truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Structure being parsed.
        what: &'static str,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Bytes left over after a fixed-size structure.
    #[error("{what} has {extra} trailing bytes")]
    TrailingData {
        /// Structure being parsed.
        what: &'static str,
        /// Number of unconsumed bytes.
        extra: usize,
    },

    /// ZCL data type tag this crate cannot size.
    #[error("unknown ZCL data type: 0x{0:02X}")]
    UnknownDataType(u8),

    /// Attribute value does not fit the requested data type.
    #[error("value does not match data type {0:?}")]
    ValueTypeMismatch(crate::zcl::DataType),

    /// Text could not be parsed as an address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ModelError {
    /// Create a truncation error.
    pub fn truncated(what: &'static str, expected: usize, actual: usize) -> Self {
        ModelError::Truncated {
            what,
            expected,
            actual,
        }
    }
}
