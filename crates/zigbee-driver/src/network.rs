//! Network controller.
//!
//! [`Network`] owns the correlator of one coprocessor and drives the
//! bootstrap sequence, node discovery and application commands over it. Like
//! the correlator it performs no I/O: bytes from the link go to
//! [`Network::handle_input`], bytes to write come from
//! [`Network::poll_transmit`] and the deadline from
//! [`Network::next_deadline`] must be served with
//! [`Network::handle_timeout`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};
use zigbee_metrics::{metric_defs, DriverLabels};
use zigbee_model::zcl::{AttributeRecord, AttributeValue};
use zigbee_model::{AddressChange, ClusterDirection, IeeeAddress, InitState, NodeTable, ShortAddress};

use crate::backend::{Backend, Notification};
use crate::bootstrap::{Bootstrap, BootstrapStep, ControllerInfo, NetworkParameters, DEFAULT_CHANNEL_MASK};
use crate::command::{CommandCallback, CommandResponse, CommandResult, NetworkCommand};
use crate::correlator::{Correlator, CorrelatorEvent, Reply, RequestId};
use crate::discovery::{Discovery, DiscoveryOutcome, DiscoveryQuery, DiscoveryStage, DEFAULT_MAX_RETRIES};
use crate::error::DriverError;
use crate::settings::{NetworkSettings, NodeAddresses, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkState {
    Offline,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkState::Offline => "offline",
            NetworkState::Starting => "starting",
            NetworkState::Running => "running",
            NetworkState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Observable change of the network.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    StateChanged(NetworkState),
    /// The serial link came up or went down.
    LinkAvailability(bool),
    NodeAdded {
        ieee: IeeeAddress,
        short: ShortAddress,
    },
    NodeRemoved {
        ieee: IeeeAddress,
    },
    NodeDiscoveryFailed {
        ieee: IeeeAddress,
        stage: DiscoveryStage,
    },
    ShortAddressChanged {
        ieee: IeeeAddress,
        old: ShortAddress,
        new: ShortAddress,
    },
    AttributeChanged {
        ieee: IeeeAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: AttributeValue,
    },
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Retries of each discovery query.
    pub max_retries: u8,
    /// Move a known node to the address it announces instead of interviewing it again.
    pub reconcile_short_address: bool,
    /// Channels offered to a newly formed network.
    pub channel_mask: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            max_retries: DEFAULT_MAX_RETRIES,
            reconcile_short_address: true,
            channel_mask: DEFAULT_CHANNEL_MASK,
        }
    }
}

/// What a request in flight was issued for.
enum Purpose {
    Bootstrap(BootstrapStep),
    Discovery(DiscoveryQuery),
    Command {
        command: NetworkCommand,
        callback: CommandCallback,
    },
    Stop,
}

pub struct Network<B: Backend, S: SettingsStore> {
    correlator: Correlator<B>,
    store: S,
    settings: NetworkSettings,
    config: NetworkConfig,
    state: NetworkState,
    nodes: NodeTable,
    discovery: Discovery,
    bootstrap: Option<Bootstrap>,
    controller: ControllerInfo,
    pending: HashMap<RequestId, Purpose>,
    events: VecDeque<NetworkEvent>,
    labels: Vec<(&'static str, String)>,
}

impl<B: Backend, S: SettingsStore> Network<B, S> {
    pub fn new(backend: B, store: S, config: NetworkConfig) -> Self {
        let labels = DriverLabels::new(B::NAME, "");
        Network {
            correlator: Correlator::new(backend),
            store,
            settings: NetworkSettings::default(),
            discovery: Discovery::new(config.max_retries).with_labels(&labels),
            config,
            state: NetworkState::Offline,
            nodes: NodeTable::new(),
            bootstrap: None,
            controller: ControllerInfo::default(),
            pending: HashMap::new(),
            events: VecDeque::new(),
            labels: labels.to_labels(),
        }
    }

    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: &DriverLabels) -> Self {
        self.correlator = self.correlator.with_labels(labels);
        self.discovery = self.discovery.with_labels(labels);
        self.labels = labels.to_labels();
        self
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn controller(&self) -> &ControllerInfo {
        &self.controller
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn backend(&self) -> &B {
        self.correlator.protocol()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether any node is queued or being interviewed.
    pub fn is_discovering(&self) -> bool {
        !self.discovery.is_idle()
    }

    /// Form or resume the network.
    ///
    /// Persisted settings resume their network; otherwise random parameters
    /// form a new one after erasing the coprocessor.
    pub fn start(&mut self, now: Instant) -> Result<(), DriverError> {
        if self.state != NetworkState::Offline {
            return Err(DriverError::InvalidState(self.state));
        }

        self.settings = self.store.load()?.unwrap_or_default();
        let (params, persisted) = match NetworkParameters::from_settings(&self.settings, self.config.channel_mask) {
            Some(params) => (params, true),
            None => (
                NetworkParameters::random(self.config.channel_mask, &mut rand::thread_rng()),
                false,
            ),
        };
        info!(
            backend = B::NAME,
            pan_id = format_args!("0x{:04x}", params.pan_id),
            extended_pan_id = format_args!("0x{:016x}", params.extended_pan_id),
            persisted,
            "starting network"
        );

        self.controller = ControllerInfo::default();
        self.bootstrap = Some(Bootstrap::new(params, persisted, B::FINALIZE_STEPS));
        self.set_state(NetworkState::Starting);
        self.advance_bootstrap(now);
        Ok(())
    }

    /// Take the network down, leaving it on the coprocessor when the backend supports it.
    pub fn stop(&mut self, now: Instant) -> Result<(), DriverError> {
        match self.state {
            NetworkState::Starting | NetworkState::Running => {}
            state => return Err(DriverError::InvalidState(state)),
        }
        self.bootstrap = None;
        self.discovery.clear();
        self.set_state(NetworkState::Stopping);
        match self.correlator.protocol_mut().leave_request() {
            Some(spec) => {
                let id = self.correlator.enqueue(now, spec);
                self.pending.insert(id, Purpose::Stop);
            }
            None => self.set_state(NetworkState::Offline),
        }
        Ok(())
    }

    /// Issue a command; `callback` runs exactly once with its result.
    ///
    /// Returns `None` when the command was rejected before reaching the link.
    pub fn submit(&mut self, now: Instant, command: NetworkCommand, callback: CommandCallback) -> Option<RequestId> {
        if self.state != NetworkState::Running {
            debug!(command = command.name(), state = %self.state, "command rejected");
            callback(Err(DriverError::InvalidState(self.state)));
            return None;
        }
        match self.correlator.protocol_mut().command_request(&command) {
            Ok(spec) => {
                let id = self.correlator.enqueue(now, spec);
                debug!(%id, command = command.name(), "command queued");
                self.pending.insert(id, Purpose::Command { command, callback });
                Some(id)
            }
            Err(error) => {
                callback(Err(error));
                None
            }
        }
    }

    /// Abort a queued or in-flight command.
    pub fn cancel(&mut self, now: Instant, id: RequestId) -> bool {
        if !matches!(self.pending.get(&id), Some(Purpose::Command { .. })) {
            return false;
        }
        let aborted = self.correlator.abort(now, id);
        self.process(now);
        aborted
    }

    pub fn handle_input(&mut self, now: Instant, data: &[u8]) {
        self.correlator.handle_input(now, data);
        self.process(now);
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.correlator.handle_timeout(now);
        self.process(now);
    }

    pub fn link_up(&mut self, now: Instant) {
        info!(backend = B::NAME, "link up");
        self.correlator.link_up(now);
        self.events.push_back(NetworkEvent::LinkAvailability(true));
        self.process(now);
    }

    pub fn link_down(&mut self, now: Instant) {
        warn!(backend = B::NAME, "link down");
        self.correlator.link_down(now);
        self.events.push_back(NetworkEvent::LinkAvailability(false));
        self.process(now);
    }

    pub fn is_link_up(&self) -> bool {
        self.correlator.is_link_up()
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.correlator.poll_transmit()
    }

    pub fn poll_event(&mut self) -> Option<NetworkEvent> {
        self.events.pop_front()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.correlator.next_deadline()
    }

    fn set_state(&mut self, state: NetworkState) {
        if self.state == state {
            return;
        }
        info!(backend = B::NAME, from = %self.state, to = %state, "network state");
        self.state = state;
        self.events.push_back(NetworkEvent::StateChanged(state));
    }

    fn process(&mut self, now: Instant) {
        while let Some(event) = self.correlator.poll_event() {
            match event {
                CorrelatorEvent::Completed(reply) => self.on_reply(now, reply),
                CorrelatorEvent::Notification(frame) => match self.correlator.protocol().decode_notification(&frame) {
                    Some(notification) => self.on_notification(notification),
                    None => trace!(backend = B::NAME, ?frame, "ignored frame"),
                },
            }
            self.pump_discovery(now);
        }
        self.pump_discovery(now);
    }

    fn on_reply(&mut self, now: Instant, reply: Reply<B>) {
        let Some(purpose) = self.pending.remove(&reply.request.id) else {
            debug!(id = %reply.request.id, "reply for an untracked request");
            return;
        };
        match purpose {
            Purpose::Bootstrap(step) => self.on_bootstrap_reply(now, step, &reply),
            Purpose::Discovery(query) => {
                let result = if reply.status.is_success() {
                    self.correlator.protocol().parse_discovery_reply(&query, &reply)
                } else {
                    Err(DriverError::Request(reply.status))
                };
                self.discovery.handle_response(&query, result);
            }
            Purpose::Command { command, callback } => {
                let result: CommandResult = if reply.status.is_success() {
                    self.correlator.protocol().parse_command_reply(&command, &reply)
                } else {
                    Err(DriverError::Request(reply.status))
                };
                if let (NetworkCommand::ReadAttributes { target, endpoint, cluster, .. }, Ok(CommandResponse::Attributes(records))) =
                    (&command, &result)
                {
                    self.apply_attributes(*target, *endpoint, *cluster, records);
                }
                if let Err(error) = &result {
                    debug!(id = %reply.request.id, command = command.name(), %error, "command failed");
                }
                callback(result);
            }
            Purpose::Stop => {
                if !reply.status.is_success() {
                    warn!(status = %reply.status, "leave request failed");
                }
                self.set_state(NetworkState::Offline);
            }
        }
    }

    fn advance_bootstrap(&mut self, now: Instant) {
        loop {
            let Some(bootstrap) = self.bootstrap.as_mut() else {
                return;
            };
            let Some(step) = bootstrap.advance() else {
                self.finish_bootstrap(now);
                return;
            };
            match self.correlator.protocol_mut().bootstrap_request(step, bootstrap.params()) {
                Some(spec) => {
                    debug!(backend = B::NAME, %step, "bootstrap step");
                    let id = self.correlator.enqueue(now, spec);
                    self.pending.insert(id, Purpose::Bootstrap(step));
                    return;
                }
                None => debug!(backend = B::NAME, %step, "bootstrap step not applicable"),
            }
        }
    }

    fn on_bootstrap_reply(&mut self, now: Instant, step: BootstrapStep, reply: &Reply<B>) {
        if self.bootstrap.as_ref().and_then(Bootstrap::current) != Some(step) {
            debug!(%step, "reply for an abandoned bootstrap");
            return;
        }
        let result = if reply.status.is_success() {
            self.correlator
                .protocol_mut()
                .apply_bootstrap_reply(step, reply, &mut self.controller)
        } else {
            Err(DriverError::Request(reply.status))
        };
        match result {
            Ok(()) => self.advance_bootstrap(now),
            Err(error) => {
                error!(backend = B::NAME, %step, %error, "bootstrap failed");
                self.bootstrap = None;
                self.set_state(NetworkState::Offline);
            }
        }
    }

    fn finish_bootstrap(&mut self, now: Instant) {
        let Some(bootstrap) = self.bootstrap.take() else {
            return;
        };
        let params = bootstrap.params();

        self.settings.pan_id = Some(self.controller.pan_id.unwrap_or(params.pan_id));
        self.settings.extended_pan_id = Some(self.controller.extended_pan_id.unwrap_or(params.extended_pan_id));
        self.settings.channel = self.controller.channel.or(self.settings.channel);
        self.settings.network_key = Some(params.network_key);
        if let Some(ieee) = self.controller.ieee_address {
            self.settings.coordinator = Some(NodeAddresses {
                ieee,
                short: self.controller.short_address.unwrap_or(ShortAddress::COORDINATOR),
            });
        }
        self.persist();

        info!(
            backend = B::NAME,
            firmware = self.controller.firmware_version.as_deref().unwrap_or("unknown"),
            channel = ?self.controller.channel,
            "network running"
        );
        self.set_state(NetworkState::Running);

        if let Some(coordinator) = self.settings.coordinator {
            self.discovery.enqueue(coordinator.ieee, coordinator.short, true);
        }
        for known in self.settings.nodes.clone() {
            self.discovery.enqueue(known.ieee, known.short, false);
        }
        self.pump_discovery(now);
    }

    fn pump_discovery(&mut self, now: Instant) {
        if self.state == NetworkState::Running {
            if let Some(query) = self.discovery.next_query() {
                let spec = self.correlator.protocol_mut().discovery_request(&query);
                let id = self.correlator.enqueue(now, spec);
                self.pending.insert(id, Purpose::Discovery(query));
            }
        }
        while let Some(outcome) = self.discovery.poll_outcome() {
            self.on_discovery_outcome(outcome);
        }
    }

    fn on_discovery_outcome(&mut self, outcome: DiscoveryOutcome) {
        match outcome {
            DiscoveryOutcome::Initialized(node) => {
                let ieee = node.ieee();
                let short = node.short();
                let coordinator = self.settings.coordinator.is_some_and(|c| c.ieee == ieee);
                self.nodes.insert(node);
                metrics::counter!(metric_defs::NODES_INITIALIZED.name, &self.labels).increment(1);
                self.record_active_nodes();
                self.events.push_back(NetworkEvent::NodeAdded { ieee, short });
                if !coordinator {
                    self.settings.remember_node(NodeAddresses { ieee, short });
                    self.persist();
                }
            }
            DiscoveryOutcome::Failed { ieee, short, stage } => {
                warn!(%ieee, %short, %stage, "node discovery failed");
                metrics::counter!(metric_defs::DISCOVERY_FAILURES.name, &self.labels).increment(1);
                if let Some(node) = self.nodes.get_mut(ieee) {
                    node.state = InitState::Error;
                }
                self.events.push_back(NetworkEvent::NodeDiscoveryFailed { ieee, stage });
            }
        }
    }

    fn on_notification(&mut self, notification: Notification) {
        match notification {
            Notification::DeviceAnnounced(announcement) => {
                let ieee = announcement.ieee_address;
                let short = announcement.short_address;
                if self.state != NetworkState::Running {
                    debug!(%ieee, %short, state = %self.state, "announcement ignored");
                    return;
                }
                info!(%ieee, %short, "device announced");
                self.on_announcement(ieee, short);
            }
            Notification::Leave { ieee, rejoin } => {
                if rejoin {
                    debug!(%ieee, "node leaving to rejoin");
                    return;
                }
                info!(%ieee, "node left");
                self.discovery.cancel(ieee);
                if self.nodes.remove(ieee).is_some() {
                    self.record_active_nodes();
                    self.events.push_back(NetworkEvent::NodeRemoved { ieee });
                }
                if self.settings.forget_node(ieee) {
                    self.persist();
                }
            }
            Notification::AttributeReport {
                source,
                endpoint,
                cluster,
                records,
            } => self.apply_attributes(source, endpoint, cluster, &records),
            Notification::NetworkState { up } => {
                if !up && self.state == NetworkState::Running {
                    warn!(backend = B::NAME, "coprocessor reports the network down");
                    self.discovery.clear();
                    self.set_state(NetworkState::Offline);
                }
            }
        }
    }

    fn on_announcement(&mut self, ieee: IeeeAddress, short: ShortAddress) {
        let initialized = self
            .nodes
            .get(ieee)
            .is_some_and(|node| node.state == InitState::Initialized);
        if !initialized {
            self.discovery.enqueue(ieee, short, false);
            return;
        }

        if !self.config.reconcile_short_address {
            if self.nodes.get(ieee).is_some_and(|node| node.short() != short) {
                info!(%ieee, %short, "known node at a new address, interviewing again");
                self.discovery.enqueue(ieee, short, false);
            }
            return;
        }

        match self.nodes.reassign_short(ieee, short) {
            AddressChange::Reassigned { old } => {
                info!(%ieee, %old, new = %short, "node moved");
                self.events.push_back(NetworkEvent::ShortAddressChanged { ieee, old, new: short });
                self.settings.remember_node(NodeAddresses { ieee, short });
                self.persist();
            }
            AddressChange::Unchanged => debug!(%ieee, "node rejoined at the same address"),
            AddressChange::UnknownNode => {
                self.discovery.enqueue(ieee, short, false);
            }
        }
    }

    fn apply_attributes(&mut self, source: ShortAddress, endpoint: u8, cluster: u16, records: &[AttributeRecord]) {
        let Some(node) = self.nodes.by_short_mut(source) else {
            debug!(%source, cluster, "attributes from an unknown node");
            return;
        };
        let ieee = node.ieee();
        for attribute in node.apply_attributes(endpoint, ClusterDirection::Input, cluster, records) {
            let Some(record) = records.iter().find(|r| r.id == attribute) else {
                continue;
            };
            self.events.push_back(NetworkEvent::AttributeChanged {
                ieee,
                endpoint,
                cluster,
                attribute,
                value: record.value.clone(),
            });
        }
    }

    fn persist(&mut self) {
        if let Err(error) = self.store.save(&self.settings) {
            warn!(%error, "failed to save network settings");
        }
    }

    fn record_active_nodes(&self) {
        metrics::gauge!(metric_defs::ACTIVE_NODES.name, &self.labels).set(self.nodes.len() as f64);
    }
}
