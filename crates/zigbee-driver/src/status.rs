//! Backend-independent outcome of a request.

use std::fmt;

/// How a request ended.
///
/// Firmware status codes are mapped onto this taxonomy by each backend; codes
/// without a named counterpart are kept as [`Status::FirmwareReportedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidParameter,
    UnhandledCommand,
    CommandFailed,
    Busy,
    AlreadyRunning,
    /// A firmware status with no portable meaning.
    FirmwareReportedError(u8),
    /// No complete reply before the deadline.
    Timeout,
    /// Cancelled by the caller or by link loss.
    Aborted,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::InvalidParameter => f.write_str("invalid parameter"),
            Status::UnhandledCommand => f.write_str("unhandled command"),
            Status::CommandFailed => f.write_str("command failed"),
            Status::Busy => f.write_str("busy"),
            Status::AlreadyRunning => f.write_str("already running"),
            Status::FirmwareReportedError(code) => write!(f, "firmware error 0x{:02x}", code),
            Status::Timeout => f.write_str("timeout"),
            Status::Aborted => f.write_str("aborted"),
        }
    }
}
