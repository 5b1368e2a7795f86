//! Node, endpoint, cluster and attribute storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::zcl::{self, AttributeRecord, AttributeValue, DataType};
use crate::zdo::{LogicalType, MacCapabilities, NodeDescriptor, PowerDescriptor, SimpleDescriptor};
use crate::{IeeeAddress, ShortAddress};

/// Discovery progress of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitState {
    /// Known but not yet interviewed.
    Uninitialized,
    /// Descriptor and attribute queries in progress.
    Initializing,
    /// Fully discovered.
    Initialized,
    /// Discovery gave up.
    Error,
}

/// Cluster side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterDirection {
    /// Server cluster on the endpoint.
    Input,
    /// Client cluster on the endpoint.
    Output,
}

/// Last known value of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: u16,
    pub data_type: DataType,
    pub value: AttributeValue,
    pub raw: Vec<u8>,
}

impl From<&AttributeRecord> for Attribute {
    fn from(record: &AttributeRecord) -> Self {
        Attribute {
            id: record.id,
            data_type: record.data_type,
            value: record.value.clone(),
            raw: record.raw.clone(),
        }
    }
}

/// A cluster on an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: u16,
    pub direction: ClusterDirection,
    attributes: BTreeMap<u16, Attribute>,
}

impl Cluster {
    pub fn new(id: u16, direction: ClusterDirection) -> Self {
        Cluster {
            id,
            direction,
            attributes: BTreeMap::new(),
        }
    }

    /// Get an attribute by id.
    pub fn attribute(&self, id: u16) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    /// Iterate over stored attributes in id order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Store a successful record. Returns true when the stored value changed.
    ///
    /// Failed records are ignored.
    pub fn apply_record(&mut self, record: &AttributeRecord) -> bool {
        if !record.is_success() {
            return false;
        }
        let attribute = Attribute::from(record);
        match self.attributes.insert(record.id, attribute) {
            Some(previous) => previous.value != record.value || previous.data_type != record.data_type,
            None => true,
        }
    }
}

/// An application endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    input_clusters: BTreeMap<u16, Cluster>,
    output_clusters: BTreeMap<u16, Cluster>,
}

impl Endpoint {
    /// Create an endpoint with its cluster lists from a simple descriptor.
    pub fn from_descriptor(descriptor: &SimpleDescriptor) -> Self {
        let input_clusters = descriptor
            .input_clusters
            .iter()
            .map(|&id| (id, Cluster::new(id, ClusterDirection::Input)))
            .collect();
        let output_clusters = descriptor
            .output_clusters
            .iter()
            .map(|&id| (id, Cluster::new(id, ClusterDirection::Output)))
            .collect();
        Endpoint {
            id: descriptor.endpoint,
            profile_id: descriptor.profile_id,
            device_id: descriptor.device_id,
            device_version: descriptor.device_version,
            input_clusters,
            output_clusters,
        }
    }

    pub fn has_input_cluster(&self, id: u16) -> bool {
        self.input_clusters.contains_key(&id)
    }

    pub fn has_output_cluster(&self, id: u16) -> bool {
        self.output_clusters.contains_key(&id)
    }

    pub fn cluster(&self, direction: ClusterDirection, id: u16) -> Option<&Cluster> {
        match direction {
            ClusterDirection::Input => self.input_clusters.get(&id),
            ClusterDirection::Output => self.output_clusters.get(&id),
        }
    }

    pub fn cluster_mut(&mut self, direction: ClusterDirection, id: u16) -> Option<&mut Cluster> {
        match direction {
            ClusterDirection::Input => self.input_clusters.get_mut(&id),
            ClusterDirection::Output => self.output_clusters.get_mut(&id),
        }
    }

    pub fn input_clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.input_clusters.values()
    }

    pub fn output_clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.output_clusters.values()
    }
}

/// A node in the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    ieee: IeeeAddress,
    short: ShortAddress,
    pub state: InitState,
    pub node_descriptor: Option<NodeDescriptor>,
    pub power_descriptor: Option<PowerDescriptor>,
    pub capabilities: Option<MacCapabilities>,
    pub manufacturer_name: Option<String>,
    pub model_identifier: Option<String>,
    pub sw_build_id: Option<String>,
    pub power_source: Option<u8>,
    endpoints: BTreeMap<u8, Endpoint>,
}

impl Node {
    pub fn new(ieee: IeeeAddress, short: ShortAddress) -> Self {
        Node {
            ieee,
            short,
            state: InitState::Uninitialized,
            node_descriptor: None,
            power_descriptor: None,
            capabilities: None,
            manufacturer_name: None,
            model_identifier: None,
            sw_build_id: None,
            power_source: None,
            endpoints: BTreeMap::new(),
        }
    }

    /// Get the IEEE address. It never changes after construction.
    pub fn ieee(&self) -> IeeeAddress {
        self.ieee
    }

    /// Get the current network address.
    pub fn short(&self) -> ShortAddress {
        self.short
    }

    pub(crate) fn set_short(&mut self, short: ShortAddress) {
        self.short = short;
    }

    /// Get the logical type from the node descriptor.
    pub fn logical_type(&self) -> Option<LogicalType> {
        self.node_descriptor.as_ref().and_then(|d| d.logical_type)
    }

    /// Get the manufacturer code from the node descriptor.
    pub fn manufacturer_code(&self) -> Option<u16> {
        self.node_descriptor.as_ref().map(|d| d.manufacturer_code)
    }

    pub fn is_coordinator(&self) -> bool {
        self.logical_type() == Some(LogicalType::Coordinator) || self.short == ShortAddress::COORDINATOR
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoints.insert(endpoint.id, endpoint);
    }

    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: u8) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Apply attribute records to a cluster, returning the ids whose value changed.
    ///
    /// Records for clusters the endpoint does not list are dropped.
    pub fn apply_attributes(
        &mut self,
        endpoint: u8,
        direction: ClusterDirection,
        cluster: u16,
        records: &[AttributeRecord],
    ) -> Vec<u16> {
        let Some(cluster) = self
            .endpoints
            .get_mut(&endpoint)
            .and_then(|ep| ep.cluster_mut(direction, cluster))
        else {
            return Vec::new();
        };

        records
            .iter()
            .filter(|record| cluster.apply_record(record))
            .map(|record| record.id)
            .collect()
    }

    /// Apply Basic cluster records and lift the identity fields onto the node.
    ///
    /// The first endpoint to report a field wins.
    pub fn apply_basic_attributes(&mut self, endpoint: u8, records: &[AttributeRecord]) {
        self.apply_attributes(endpoint, ClusterDirection::Input, zcl::cluster::BASIC, records);

        for record in records.iter().filter(|r| r.is_success()) {
            match record.id {
                zcl::basic::MANUFACTURER_NAME if self.manufacturer_name.is_none() => {
                    self.manufacturer_name = record.value.as_str().map(str::to_string);
                }
                zcl::basic::MODEL_IDENTIFIER if self.model_identifier.is_none() => {
                    self.model_identifier = record.value.as_str().map(str::to_string);
                }
                zcl::basic::SW_BUILD_ID if self.sw_build_id.is_none() => {
                    self.sw_build_id = record.value.as_str().map(str::to_string);
                }
                zcl::basic::POWER_SOURCE if self.power_source.is_none() => {
                    self.power_source = record.value.as_u64().map(|v| v as u8);
                }
                _ => {}
            }
        }
    }
}
