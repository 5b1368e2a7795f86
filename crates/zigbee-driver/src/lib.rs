//! Zigbee coprocessor host driver
//!
//! Drives a Zigbee radio coprocessor over its serial link: requests are
//! correlated with their replies one at a time, the network is formed or
//! resumed through a fixed bootstrap sequence, and every node that joins is
//! interviewed for its descriptors and Basic cluster identity.
//!
//! - [`correlator`]: the single-in-flight request queue shared by all firmware
//!   families, with timeouts, aborts and link loss handling.
//! - [`backend`]: the deCONZ, NXP and TI firmware command sets.
//! - [`discovery`]: the per-node interview state machine.
//! - [`bootstrap`]: the network formation sequence.
//! - [`network`]: the controller tying the above to a node table and
//!   persistent [`settings`].
//! - [`transport`]: the async reactor that owns the serial port.
//!
//! Everything except [`transport`] is sans-IO: state machines take the
//! current time and received bytes, and hand back bytes to write.
//!
//! # Example
//!
//! ```rust,ignore
//! use zigbee_driver::{backend::DeconzBackend, network::{Network, NetworkConfig},
//!     settings::JsonFileSettings, transport::{self, SerialConnector}};
//!
//! let network = Network::new(DeconzBackend::new(), JsonFileSettings::new("net.json"), NetworkConfig::default());
//! let (handle, runner) = transport::channel(network, SerialConnector::new("/dev/ttyACM0", 38400), interval);
//! tokio::task::spawn_local(runner.run());
//! handle.start().await?;
//! ```

pub mod backend;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod correlator;
pub mod discovery;
mod error;
pub mod network;
pub mod settings;
mod status;
pub mod transport;

pub use error::DriverError;
pub use status::Status;
