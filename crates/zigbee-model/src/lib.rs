//! Zigbee mesh model
//!
//! Storage types for the nodes a host driver discovers, and parsers for the
//! ZDO and ZCL structures that describe them.
//!
//! - [`address`]: 64-bit IEEE and 16-bit network addresses.
//! - [`zdo`]: node, power and simple descriptors, active endpoint lists, device
//!   announcements and the ZDP request bodies that fetch them.
//! - [`zcl`]: frame headers, data types, attribute values and the global
//!   read/write/report/configure-reporting records.
//! - [`Node`], [`Endpoint`], [`Cluster`], [`Attribute`]: the per-node model.
//! - [`NodeTable`]: an arena of nodes keyed by IEEE address with a secondary
//!   index by network address.
//!
//! # Example
//!
//! ```rust,ignore
//! use zigbee_model::{zdo::SimpleDescriptor, Endpoint, Node, NodeTable};
//!
//! let descriptor = SimpleDescriptor::parse(&response_body)?;
//! let mut node = Node::new(ieee, short);
//! node.add_endpoint(Endpoint::from_descriptor(&descriptor));
//!
//! let mut table = NodeTable::new();
//! table.insert(node);
//! ```

pub mod address;
mod error;
mod node;
mod reader;
mod table;
pub mod zcl;
pub mod zdo;

pub use address::{IeeeAddress, ShortAddress};
pub use error::*;
pub use node::*;
pub use reader::ByteReader;
pub use table::*;
