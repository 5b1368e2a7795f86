//! Node discovery state machine.
//!
//! Nodes are interviewed one at a time, in the order they were queued:
//!
//! ```text
//! NodeDescriptor -> PowerDescriptor -> ActiveEndpoints
//!     -> SimpleDescriptors (each endpoint) -> BasicAttributes (each endpoint)
//!     -> Initialized
//! ```
//!
//! Every failed query is re-issued until it has failed `max_retries + 1`
//! times. Exhausting the node, power or active endpoint query fails the node.
//! Exhausting one endpoint's simple descriptor skips that endpoint, and the
//! node fails only when no endpoint could be described. Exhausting one
//! endpoint's Basic attribute read skips that read.
//!
//! The machine is sans-IO: [`Discovery::next_query`] yields the query to send,
//! [`Discovery::handle_response`] consumes its parsed result and
//! [`Discovery::poll_outcome`] reports finished nodes.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, info, warn};
use zigbee_metrics::{metric_defs, DriverLabels};
use zigbee_model::zcl::{self, AttributeRecord};
use zigbee_model::zdo::{NodeDescriptor, PowerDescriptor, SimpleDescriptor};
use zigbee_model::{Endpoint, IeeeAddress, InitState, Node, ShortAddress};

use crate::error::DriverError;

/// Attempts beyond the first before a query is given up.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Basic cluster attributes read from every endpoint that serves it.
pub const BASIC_ATTRIBUTES: [u16; 4] = [
    zcl::basic::MANUFACTURER_NAME,
    zcl::basic::MODEL_IDENTIFIER,
    zcl::basic::POWER_SOURCE,
    zcl::basic::SW_BUILD_ID,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryStage {
    NodeDescriptor,
    PowerDescriptor,
    ActiveEndpoints,
    SimpleDescriptors,
    BasicAttributes,
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryStage::NodeDescriptor => "node descriptor",
            DiscoveryStage::PowerDescriptor => "power descriptor",
            DiscoveryStage::ActiveEndpoints => "active endpoints",
            DiscoveryStage::SimpleDescriptors => "simple descriptors",
            DiscoveryStage::BasicAttributes => "basic attributes",
        };
        f.write_str(name)
    }
}

/// One query of the interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryQuery {
    NodeDescriptor { target: ShortAddress },
    PowerDescriptor { target: ShortAddress },
    ActiveEndpoints { target: ShortAddress },
    SimpleDescriptor { target: ShortAddress, endpoint: u8 },
    BasicAttributes { target: ShortAddress, endpoint: u8 },
}

impl DiscoveryQuery {
    pub fn target(&self) -> ShortAddress {
        match *self {
            DiscoveryQuery::NodeDescriptor { target }
            | DiscoveryQuery::PowerDescriptor { target }
            | DiscoveryQuery::ActiveEndpoints { target }
            | DiscoveryQuery::SimpleDescriptor { target, .. }
            | DiscoveryQuery::BasicAttributes { target, .. } => target,
        }
    }

    pub fn stage(&self) -> DiscoveryStage {
        match self {
            DiscoveryQuery::NodeDescriptor { .. } => DiscoveryStage::NodeDescriptor,
            DiscoveryQuery::PowerDescriptor { .. } => DiscoveryStage::PowerDescriptor,
            DiscoveryQuery::ActiveEndpoints { .. } => DiscoveryStage::ActiveEndpoints,
            DiscoveryQuery::SimpleDescriptor { .. } => DiscoveryStage::SimpleDescriptors,
            DiscoveryQuery::BasicAttributes { .. } => DiscoveryStage::BasicAttributes,
        }
    }
}

/// Parsed answer to a [`DiscoveryQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryResponse {
    NodeDescriptor(NodeDescriptor),
    PowerDescriptor(PowerDescriptor),
    ActiveEndpoints(Vec<u8>),
    SimpleDescriptor(SimpleDescriptor),
    BasicAttributes(Vec<AttributeRecord>),
}

/// A node whose interview ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryOutcome {
    Initialized(Node),
    Failed {
        ieee: IeeeAddress,
        short: ShortAddress,
        stage: DiscoveryStage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Initialized,
    Failed(DiscoveryStage),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    ieee: IeeeAddress,
    short: ShortAddress,
    coordinator: bool,
}

#[derive(Debug)]
struct Session {
    node: Node,
    coordinator: bool,
    stage: DiscoveryStage,
    attempts: u8,
    outstanding: Option<DiscoveryQuery>,
    /// Endpoints still to resolve in the current per-endpoint stage.
    pending: VecDeque<u8>,
    given_up: usize,
}

impl Session {
    fn new(candidate: Candidate) -> Self {
        let mut node = Node::new(candidate.ieee, candidate.short);
        node.state = InitState::Initializing;
        Session {
            node,
            coordinator: candidate.coordinator,
            stage: DiscoveryStage::NodeDescriptor,
            attempts: 0,
            outstanding: None,
            pending: VecDeque::new(),
            given_up: 0,
        }
    }

    /// Move through stages that need no query.
    fn settle(&mut self) -> Option<Finished> {
        loop {
            match self.stage {
                DiscoveryStage::SimpleDescriptors if self.pending.is_empty() => {
                    if self.given_up > 0 && self.node.endpoints().next().is_none() {
                        return Some(Finished::Failed(DiscoveryStage::SimpleDescriptors));
                    }
                    self.stage = DiscoveryStage::BasicAttributes;
                    self.attempts = 0;
                    self.pending = if self.coordinator {
                        VecDeque::new()
                    } else {
                        self.node
                            .endpoints()
                            .filter(|ep| ep.has_input_cluster(zcl::cluster::BASIC))
                            .map(|ep| ep.id)
                            .collect()
                    };
                }
                DiscoveryStage::BasicAttributes if self.pending.is_empty() => {
                    return Some(Finished::Initialized);
                }
                _ => return None,
            }
        }
    }

    fn query(&self) -> Option<DiscoveryQuery> {
        let target = self.node.short();
        let query = match self.stage {
            DiscoveryStage::NodeDescriptor => DiscoveryQuery::NodeDescriptor { target },
            DiscoveryStage::PowerDescriptor => DiscoveryQuery::PowerDescriptor { target },
            DiscoveryStage::ActiveEndpoints => DiscoveryQuery::ActiveEndpoints { target },
            DiscoveryStage::SimpleDescriptors => DiscoveryQuery::SimpleDescriptor {
                target,
                endpoint: *self.pending.front()?,
            },
            DiscoveryStage::BasicAttributes => DiscoveryQuery::BasicAttributes {
                target,
                endpoint: *self.pending.front()?,
            },
        };
        Some(query)
    }

    fn apply(&mut self, response: DiscoveryResponse) -> Result<(), DriverError> {
        match (self.stage, response) {
            (DiscoveryStage::NodeDescriptor, DiscoveryResponse::NodeDescriptor(descriptor)) => {
                self.node.capabilities = Some(descriptor.mac_capabilities);
                self.node.node_descriptor = Some(descriptor);
                self.stage = DiscoveryStage::PowerDescriptor;
            }
            (DiscoveryStage::PowerDescriptor, DiscoveryResponse::PowerDescriptor(descriptor)) => {
                self.node.power_descriptor = Some(descriptor);
                self.stage = DiscoveryStage::ActiveEndpoints;
            }
            (DiscoveryStage::ActiveEndpoints, DiscoveryResponse::ActiveEndpoints(endpoints)) => {
                let mut pending = VecDeque::with_capacity(endpoints.len());
                for endpoint in endpoints {
                    if !pending.contains(&endpoint) {
                        pending.push_back(endpoint);
                    }
                }
                self.pending = pending;
                self.stage = DiscoveryStage::SimpleDescriptors;
            }
            (DiscoveryStage::SimpleDescriptors, DiscoveryResponse::SimpleDescriptor(descriptor)) => {
                self.pending.pop_front();
                self.node.add_endpoint(Endpoint::from_descriptor(&descriptor));
            }
            (DiscoveryStage::BasicAttributes, DiscoveryResponse::BasicAttributes(records)) => {
                if let Some(endpoint) = self.pending.pop_front() {
                    self.node.apply_basic_attributes(endpoint, &records);
                }
            }
            _ => return Err(DriverError::unexpected("discovery query")),
        }
        self.attempts = 0;
        Ok(())
    }

    /// Retries for the current query are exhausted.
    fn give_up(&mut self) -> Option<Finished> {
        self.attempts = 0;
        match self.stage {
            DiscoveryStage::NodeDescriptor
            | DiscoveryStage::PowerDescriptor
            | DiscoveryStage::ActiveEndpoints => Some(Finished::Failed(self.stage)),
            DiscoveryStage::SimpleDescriptors => {
                self.pending.pop_front();
                self.given_up += 1;
                None
            }
            DiscoveryStage::BasicAttributes => {
                self.pending.pop_front();
                None
            }
        }
    }
}

/// FIFO interviewer of newly seen nodes.
#[derive(Debug)]
pub struct Discovery {
    queue: VecDeque<Candidate>,
    session: Option<Session>,
    outcomes: VecDeque<DiscoveryOutcome>,
    max_retries: u8,
    labels: Vec<(&'static str, String)>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl Discovery {
    pub fn new(max_retries: u8) -> Self {
        Discovery {
            queue: VecDeque::new(),
            session: None,
            outcomes: VecDeque::new(),
            max_retries,
            labels: Vec::new(),
        }
    }

    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: &DriverLabels) -> Self {
        self.labels = labels.to_labels();
        self
    }

    pub fn labels(&self) -> &[(&'static str, String)] {
        &self.labels
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Queue a node for interview.
    ///
    /// A node already queued keeps its place with the newer address. A node
    /// being interviewed under a different address is restarted from the
    /// node descriptor. Returns true when a new interview was queued or
    /// restarted.
    pub fn enqueue(&mut self, ieee: IeeeAddress, short: ShortAddress, coordinator: bool) -> bool {
        if let Some(session) = self.session.as_mut().filter(|s| s.node.ieee() == ieee) {
            if session.node.short() == short {
                return false;
            }
            info!(%ieee, old = %session.node.short(), new = %short, "restarting discovery at new address");
            *session = Session::new(Candidate {
                ieee,
                short,
                coordinator: coordinator || session.coordinator,
            });
            return true;
        }

        if let Some(candidate) = self.queue.iter_mut().find(|c| c.ieee == ieee) {
            candidate.short = short;
            candidate.coordinator |= coordinator;
            return false;
        }

        debug!(%ieee, %short, coordinator, "queued for discovery");
        self.queue.push_back(Candidate {
            ieee,
            short,
            coordinator,
        });
        true
    }

    /// Drop a node from the queue or abandon its interview.
    pub fn cancel(&mut self, ieee: IeeeAddress) -> bool {
        if self.session.as_ref().is_some_and(|s| s.node.ieee() == ieee) {
            self.session = None;
            return true;
        }
        let before = self.queue.len();
        self.queue.retain(|c| c.ieee != ieee);
        self.queue.len() != before
    }

    /// Abandon all interviews.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.session = None;
    }

    /// IEEE address of the node being interviewed.
    pub fn current(&self) -> Option<IeeeAddress> {
        self.session.as_ref().map(|s| s.node.ieee())
    }

    /// Whether a node is queued or being interviewed.
    pub fn contains(&self, ieee: IeeeAddress) -> bool {
        self.current() == Some(ieee) || self.queue.iter().any(|c| c.ieee == ieee)
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none() && self.queue.is_empty()
    }

    /// Get the next query to send, if none is outstanding.
    pub fn next_query(&mut self) -> Option<DiscoveryQuery> {
        loop {
            if self.session.is_none() {
                let candidate = self.queue.pop_front()?;
                info!(ieee = %candidate.ieee, short = %candidate.short, "starting discovery");
                self.session = Some(Session::new(candidate));
            }
            let session = self.session.as_mut()?;
            if session.outstanding.is_some() {
                return None;
            }
            match session.settle() {
                None => {
                    let query = session.query()?;
                    session.outstanding = Some(query.clone());
                    return Some(query);
                }
                Some(finished) => self.finish(finished),
            }
        }
    }

    /// Consume the result of the outstanding query.
    ///
    /// Results for a query that is no longer outstanding are ignored.
    pub fn handle_response(
        &mut self,
        query: &DiscoveryQuery,
        result: Result<DiscoveryResponse, DriverError>,
    ) {
        let max_retries = self.max_retries;
        let Some(session) = self.session.as_mut() else {
            debug!(?query, "discovery reply with no interview running");
            return;
        };
        if session.outstanding.as_ref() != Some(query) {
            debug!(?query, "discovery reply for a superseded query");
            return;
        }
        session.outstanding = None;

        let ieee = session.node.ieee();
        let finished = match result.and_then(|response| session.apply(response)) {
            Ok(()) => None,
            Err(error) => {
                session.attempts += 1;
                if session.attempts <= max_retries {
                    warn!(%ieee, stage = %query.stage(), attempt = session.attempts, %error, "discovery query failed, retrying");
                    metrics::counter!(metric_defs::DISCOVERY_RETRIES.name, &self.labels).increment(1);
                    None
                } else {
                    warn!(%ieee, stage = %query.stage(), %error, "discovery query exhausted its retries");
                    session.give_up()
                }
            }
        };

        if let Some(finished) = finished {
            self.finish(finished);
        }
    }

    pub fn poll_outcome(&mut self) -> Option<DiscoveryOutcome> {
        self.outcomes.pop_front()
    }

    fn finish(&mut self, finished: Finished) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match finished {
            Finished::Initialized => {
                session.node.state = InitState::Initialized;
                info!(
                    ieee = %session.node.ieee(),
                    short = %session.node.short(),
                    endpoints = session.node.endpoints().count(),
                    manufacturer = session.node.manufacturer_name.as_deref().unwrap_or("?"),
                    model = session.node.model_identifier.as_deref().unwrap_or("?"),
                    "node initialized"
                );
                self.outcomes.push_back(DiscoveryOutcome::Initialized(session.node));
            }
            Finished::Failed(stage) => {
                warn!(ieee = %session.node.ieee(), %stage, "node discovery failed");
                self.outcomes.push_back(DiscoveryOutcome::Failed {
                    ieee: session.node.ieee(),
                    short: session.node.short(),
                    stage,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use zigbee_model::zcl::{AttributeValue, DataType};
    use zigbee_model::zdo::{LogicalType, MacCapabilities};

    const IEEE: IeeeAddress = IeeeAddress(0x00158D0001020304);
    const SHORT: ShortAddress = ShortAddress(0x4F21);

    fn node_descriptor(logical_type: LogicalType) -> NodeDescriptor {
        NodeDescriptor {
            logical_type: Some(logical_type),
            complex_descriptor_available: false,
            user_descriptor_available: false,
            aps_flags: 0,
            frequency_band: 0x08,
            mac_capabilities: MacCapabilities(0x8E),
            manufacturer_code: 0x115F,
            max_buffer_size: 0x7F,
            max_incoming_transfer_size: 100,
            server_mask: 0x2C,
            max_outgoing_transfer_size: 100,
            descriptor_capabilities: 0,
        }
    }

    fn power_descriptor() -> PowerDescriptor {
        PowerDescriptor {
            current_power_mode: 0,
            available_power_sources: PowerDescriptor::SOURCE_MAINS,
            current_power_source: PowerDescriptor::SOURCE_MAINS,
            current_power_level: 12,
        }
    }

    fn simple_descriptor(endpoint: u8, clusters: &[u16]) -> SimpleDescriptor {
        SimpleDescriptor {
            endpoint,
            profile_id: zcl::HOME_AUTOMATION_PROFILE,
            device_id: 0x0100,
            device_version: 1,
            input_clusters: clusters.to_vec(),
            output_clusters: vec![],
        }
    }

    fn name_record(text: &str) -> AttributeRecord {
        let mut raw = vec![text.len() as u8];
        raw.extend_from_slice(text.as_bytes());
        AttributeRecord::new(
            zcl::basic::MODEL_IDENTIFIER,
            DataType::CharString,
            AttributeValue::String(text.to_string()),
            raw,
        )
    }

    fn timeout() -> Result<DiscoveryResponse, DriverError> {
        Err(DriverError::Request(Status::Timeout))
    }

    /// Answer queries until the interview is idle, using `answer` for each.
    fn drive(
        discovery: &mut Discovery,
        mut answer: impl FnMut(&DiscoveryQuery) -> Result<DiscoveryResponse, DriverError>,
    ) -> Vec<DiscoveryQuery> {
        let mut issued = Vec::new();
        while let Some(query) = discovery.next_query() {
            let result = answer(&query);
            issued.push(query.clone());
            discovery.handle_response(&query, result);
        }
        issued
    }

    fn healthy(query: &DiscoveryQuery) -> Result<DiscoveryResponse, DriverError> {
        Ok(match query {
            DiscoveryQuery::NodeDescriptor { .. } => {
                DiscoveryResponse::NodeDescriptor(node_descriptor(LogicalType::Router))
            }
            DiscoveryQuery::PowerDescriptor { .. } => DiscoveryResponse::PowerDescriptor(power_descriptor()),
            DiscoveryQuery::ActiveEndpoints { .. } => DiscoveryResponse::ActiveEndpoints(vec![1, 2]),
            DiscoveryQuery::SimpleDescriptor { endpoint, .. } => DiscoveryResponse::SimpleDescriptor(
                simple_descriptor(*endpoint, &[zcl::cluster::BASIC, zcl::cluster::ON_OFF]),
            ),
            DiscoveryQuery::BasicAttributes { .. } => {
                DiscoveryResponse::BasicAttributes(vec![name_record("TRADFRI bulb")])
            }
        })
    }

    fn initialized(discovery: &mut Discovery) -> Node {
        match discovery.poll_outcome() {
            Some(DiscoveryOutcome::Initialized(node)) => node,
            other => panic!("expected an initialized node, got {:?}", other),
        }
    }

    #[test]
    fn test_full_interview_order() {
        let mut discovery = Discovery::default();
        assert!(discovery.enqueue(IEEE, SHORT, false));

        let issued = drive(&mut discovery, healthy);
        let stages: Vec<_> = issued.iter().map(|q| q.stage()).collect();
        assert_eq!(
            stages,
            vec![
                DiscoveryStage::NodeDescriptor,
                DiscoveryStage::PowerDescriptor,
                DiscoveryStage::ActiveEndpoints,
                DiscoveryStage::SimpleDescriptors,
                DiscoveryStage::SimpleDescriptors,
                DiscoveryStage::BasicAttributes,
                DiscoveryStage::BasicAttributes,
            ]
        );
        assert!(issued.iter().all(|q| q.target() == SHORT));

        let node = initialized(&mut discovery);
        assert_eq!(node.state, InitState::Initialized);
        assert_eq!(node.endpoints().count(), 2);
        assert_eq!(node.model_identifier.as_deref(), Some("TRADFRI bulb"));
        assert_eq!(node.manufacturer_code(), Some(0x115F));
        assert!(discovery.is_idle());
    }

    #[test]
    fn test_retry_bound_fails_node() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        let issued = drive(&mut discovery, |_| timeout());
        assert_eq!(issued.len(), 4);
        assert!(issued.iter().all(|q| q.stage() == DiscoveryStage::NodeDescriptor));
        assert_eq!(
            discovery.poll_outcome(),
            Some(DiscoveryOutcome::Failed {
                ieee: IEEE,
                short: SHORT,
                stage: DiscoveryStage::NodeDescriptor,
            })
        );
        assert!(discovery.poll_outcome().is_none());
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        // Three failures at each of the first three stages stay within budget
        let mut failures = 0;
        let issued = drive(&mut discovery, |query| {
            if query.stage() != DiscoveryStage::SimpleDescriptors
                && query.stage() != DiscoveryStage::BasicAttributes
                && failures < 3
            {
                failures += 1;
                return timeout();
            }
            failures = 0;
            healthy(query)
        });
        assert_eq!(issued.len(), 7 + 9);
        initialized(&mut discovery);
    }

    #[test]
    fn test_endpoint_barrier() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        let mut simple_seen = Vec::new();
        let issued = drive(&mut discovery, |query| {
            if let DiscoveryQuery::SimpleDescriptor { endpoint, .. } = query {
                simple_seen.push(*endpoint);
            }
            if let DiscoveryQuery::BasicAttributes { .. } = query {
                assert_eq!(simple_seen, vec![1, 2], "both endpoints described first");
            }
            healthy(query)
        });
        assert_eq!(
            issued
                .iter()
                .filter(|q| q.stage() == DiscoveryStage::SimpleDescriptors)
                .count(),
            2
        );
    }

    #[test]
    fn test_simple_descriptor_give_up_skips_endpoint() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        drive(&mut discovery, |query| match query {
            DiscoveryQuery::SimpleDescriptor { endpoint: 2, .. } => timeout(),
            _ => healthy(query),
        });
        let node = initialized(&mut discovery);
        assert!(node.endpoint(1).is_some());
        assert!(node.endpoint(2).is_none());
    }

    #[test]
    fn test_all_simple_descriptors_given_up_fails() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        let issued = drive(&mut discovery, |query| match query {
            DiscoveryQuery::SimpleDescriptor { .. } => timeout(),
            _ => healthy(query),
        });
        assert_eq!(
            issued
                .iter()
                .filter(|q| q.stage() == DiscoveryStage::SimpleDescriptors)
                .count(),
            8
        );
        assert!(matches!(
            discovery.poll_outcome(),
            Some(DiscoveryOutcome::Failed {
                stage: DiscoveryStage::SimpleDescriptors,
                ..
            })
        ));
    }

    #[test]
    fn test_basic_give_up_still_initializes() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        drive(&mut discovery, |query| match query {
            DiscoveryQuery::BasicAttributes { .. } => timeout(),
            _ => healthy(query),
        });
        let node = initialized(&mut discovery);
        assert_eq!(node.model_identifier, None);
        assert_eq!(node.endpoints().count(), 2);
    }

    #[test]
    fn test_coordinator_skips_basic() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, ShortAddress::COORDINATOR, true);

        let issued = drive(&mut discovery, healthy);
        assert!(issued.iter().all(|q| q.stage() != DiscoveryStage::BasicAttributes));
        initialized(&mut discovery);
    }

    #[test]
    fn test_endpoint_without_basic_resolves_immediately() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        let issued = drive(&mut discovery, |query| match query {
            DiscoveryQuery::SimpleDescriptor { endpoint: 2, .. } => Ok(DiscoveryResponse::SimpleDescriptor(
                simple_descriptor(2, &[zcl::cluster::ON_OFF]),
            )),
            _ => healthy(query),
        });
        let basic: Vec<_> = issued
            .iter()
            .filter_map(|q| match q {
                DiscoveryQuery::BasicAttributes { endpoint, .. } => Some(*endpoint),
                _ => None,
            })
            .collect();
        assert_eq!(basic, vec![1]);
    }

    #[test]
    fn test_no_endpoints_initializes() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);

        drive(&mut discovery, |query| match query {
            DiscoveryQuery::ActiveEndpoints { .. } => Ok(DiscoveryResponse::ActiveEndpoints(vec![])),
            _ => healthy(query),
        });
        let node = initialized(&mut discovery);
        assert_eq!(node.endpoints().count(), 0);
    }

    #[test]
    fn test_wrong_response_kind_counts_as_failure() {
        let mut discovery = Discovery::new(0);
        discovery.enqueue(IEEE, SHORT, false);

        let query = discovery.next_query().unwrap();
        discovery.handle_response(&query, Ok(DiscoveryResponse::ActiveEndpoints(vec![1])));
        assert!(matches!(discovery.poll_outcome(), Some(DiscoveryOutcome::Failed { .. })));
    }

    #[test]
    fn test_fifo_and_dedup() {
        let other = IeeeAddress(0x1111);
        let mut discovery = Discovery::default();
        assert!(discovery.enqueue(IEEE, SHORT, false));
        assert!(discovery.enqueue(other, ShortAddress(0x2222), false));
        assert!(!discovery.enqueue(other, ShortAddress(0x2223), false));
        assert!(discovery.contains(other));

        let first = discovery.next_query().unwrap();
        assert_eq!(first.target(), SHORT);
        assert!(discovery.next_query().is_none(), "one query outstanding");
        assert!(!discovery.enqueue(IEEE, SHORT, false));

        discovery.handle_response(&first, healthy(&first));
        drive(&mut discovery, healthy);

        let a = initialized(&mut discovery);
        let b = initialized(&mut discovery);
        assert_eq!(a.ieee(), IEEE);
        assert_eq!(b.ieee(), other);
        assert_eq!(b.short(), ShortAddress(0x2223));
    }

    #[test]
    fn test_restart_on_new_address() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);
        let old_query = discovery.next_query().unwrap();

        assert!(discovery.enqueue(IEEE, ShortAddress(0x5555), false));
        // The reply to the superseded query changes nothing
        discovery.handle_response(&old_query, healthy(&old_query));

        let issued = drive(&mut discovery, healthy);
        assert_eq!(issued[0], DiscoveryQuery::NodeDescriptor { target: ShortAddress(0x5555) });
        assert_eq!(initialized(&mut discovery).short(), ShortAddress(0x5555));
    }

    #[test]
    fn test_cancel() {
        let mut discovery = Discovery::default();
        discovery.enqueue(IEEE, SHORT, false);
        discovery.next_query();
        assert!(discovery.cancel(IEEE));
        assert!(discovery.is_idle());
        assert!(!discovery.cancel(IEEE));
    }
}
