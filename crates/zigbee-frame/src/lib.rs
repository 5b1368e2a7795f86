//! Zigbee coprocessor serial framing
//!
//! This crate turns the raw byte stream of a serial link to a Zigbee radio
//! coprocessor into discrete, integrity-checked frames and back. Three firmware
//! families are supported, each with its own wire format:
//!
//! - **NXP** ([`nxp`]): start/end delimiters, byte stuffing of control values
//!   and a 16-bit additive checksum inside the stuffed body.
//! - **deCONZ** ([`deconz`]): SLIP framing around a small command header and a
//!   16-bit additive-inverse checksum.
//! - **TI Z-Stack** ([`ti`]): a start-of-frame byte, a length prefix and an
//!   8-bit XOR check, with no escaping.
//!
//! All three implement [`FrameCodec`]. Decoders are incremental: feed them the
//! bytes as they arrive from the port and collect whatever complete frames
//! fall out. Units that fail their integrity check are dropped and logged.
//!
//! # Example
//!
//! ```rust,ignore
//! use zigbee_frame::{FrameCodec, ti::{TiCodec, TiFrame, MtType, MtSubsystem}};
//!
//! let mut codec = TiCodec::new();
//! let wire = codec.encode(&TiFrame::new(MtType::Sreq, MtSubsystem::Sys, 0x02, vec![]));
//! port.write_all(&wire)?;
//!
//! for frame in codec.feed(&received) {
//!     println!("{:?}", frame);
//! }
//! ```

mod codec;
mod error;

pub mod deconz;
pub mod nxp;
pub mod ti;

pub use codec::*;
pub use error::*;
