//! Error types for the driver.

use thiserror::Error;
use zigbee_model::ModelError;

use crate::network::NetworkState;
use crate::status::Status;

/// Errors from the driver, its backends and its runner.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A reply payload did not parse.
    #[error("malformed payload: {0}")]
    Model(#[from] ModelError),

    /// I/O failure on the serial link or settings file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Settings file could not be parsed or written.
    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    /// The firmware or the correlator finalized the request with a failure.
    #[error("request failed: {0}")]
    Request(Status),

    /// A ZDO response carried a non-success status.
    #[error("ZDO status 0x{0:02x}")]
    ZdoStatus(u8),

    /// A ZCL response carried a non-success status.
    #[error("ZCL status 0x{0:02x}")]
    ZclStatus(u8),

    /// The reply did not have the expected shape.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    /// The backend cannot express the command.
    #[error("{backend} does not support {what}")]
    Unsupported {
        backend: &'static str,
        what: &'static str,
    },

    /// The operation is not valid in the current network state.
    #[error("network is {0}")]
    InvalidState(NetworkState),

    /// The runner task has stopped.
    #[error("network runner has shut down")]
    RunnerClosed,

    /// The metrics exporter could not be installed.
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

impl DriverError {
    /// Shorthand for a reply that does not parse as expected.
    pub fn unexpected(what: &'static str) -> Self {
        DriverError::UnexpectedReply(what)
    }
}
