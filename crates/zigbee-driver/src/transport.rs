//! Serial link reactor.
//!
//! [`NetworkRunner`] owns a [`Network`] and drives it from one task: bytes
//! read from the port, deadlines and requests from [`NetworkHandle`]s are
//! served in a single `select!` loop, so the network itself never needs a
//! lock. When the port fails the runner reports the link down, waits the
//! reconnect interval and opens the port again.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};
use zigbee_metrics::{metric_defs, DriverLabels};
use zigbee_model::zcl::{AttributeRecord, AttributeWrite, ReportingConfiguration};
use zigbee_model::zdo::BindTarget;
use zigbee_model::{IeeeAddress, Node, ShortAddress};

use crate::backend::Backend;
use crate::command::{CommandResponse, CommandResult, NetworkCommand};
use crate::error::DriverError;
use crate::network::{Network, NetworkEvent, NetworkState};
use crate::settings::SettingsStore;

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const READ_BUFFER: usize = 512;

/// Opens the byte stream to the coprocessor.
pub trait Connector {
    type Io: AsyncRead + AsyncWrite + Unpin;

    fn connect(&mut self) -> impl Future<Output = io::Result<Self::Io>>;
}

/// A serial port at 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub port: String,
    pub baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        SerialConnector {
            port: port.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    type Io = SerialStream;

    fn connect(&mut self) -> impl Future<Output = io::Result<SerialStream>> {
        let builder = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);
        async move { builder.open_native_async().map_err(io::Error::from) }
    }
}

enum HandleCommand {
    Start(oneshot::Sender<Result<(), DriverError>>),
    Stop(oneshot::Sender<Result<(), DriverError>>),
    State(oneshot::Sender<NetworkState>),
    Nodes(oneshot::Sender<Vec<Node>>),
    Submit(NetworkCommand, oneshot::Sender<CommandResult>),
}

/// Cloneable access to a running network.
#[derive(Clone)]
pub struct NetworkHandle {
    commands: mpsc::Sender<HandleCommand>,
    events: broadcast::Sender<NetworkEvent>,
}

impl NetworkHandle {
    /// Receive network events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self) -> Result<(), DriverError> {
        self.call(HandleCommand::Start).await?
    }

    pub async fn stop(&self) -> Result<(), DriverError> {
        self.call(HandleCommand::Stop).await?
    }

    pub async fn state(&self) -> Result<NetworkState, DriverError> {
        self.call(HandleCommand::State).await
    }

    /// Snapshot of the node table.
    pub async fn nodes(&self) -> Result<Vec<Node>, DriverError> {
        self.call(HandleCommand::Nodes).await
    }

    pub async fn submit(&self, command: NetworkCommand) -> CommandResult {
        self.call(|reply| HandleCommand::Submit(command, reply)).await?
    }

    pub async fn read_attributes(
        &self,
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        attributes: Vec<u16>,
    ) -> Result<Vec<AttributeRecord>, DriverError> {
        let command = NetworkCommand::ReadAttributes {
            target,
            endpoint,
            cluster,
            attributes,
        };
        match self.submit(command).await? {
            CommandResponse::Attributes(records) => Ok(records),
            _ => Err(DriverError::unexpected("read attributes")),
        }
    }

    /// Returns the attributes the node rejected.
    pub async fn write_attributes(
        &self,
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        writes: Vec<AttributeWrite>,
    ) -> Result<Vec<(u8, u16)>, DriverError> {
        let command = NetworkCommand::WriteAttributes {
            target,
            endpoint,
            cluster,
            writes,
        };
        match self.submit(command).await? {
            CommandResponse::WriteStatus(rejected) => Ok(rejected),
            _ => Err(DriverError::unexpected("write attributes")),
        }
    }

    /// Returns the configurations the node rejected.
    pub async fn configure_reporting(
        &self,
        target: ShortAddress,
        endpoint: u8,
        cluster: u16,
        configs: Vec<ReportingConfiguration>,
    ) -> Result<Vec<(u8, u16)>, DriverError> {
        let command = NetworkCommand::ConfigureReporting {
            target,
            endpoint,
            cluster,
            configs,
        };
        match self.submit(command).await? {
            CommandResponse::ReportingStatus(rejected) => Ok(rejected),
            _ => Err(DriverError::unexpected("configure reporting")),
        }
    }

    pub async fn bind(
        &self,
        target: ShortAddress,
        source: IeeeAddress,
        source_endpoint: u8,
        cluster: u16,
        destination: BindTarget,
    ) -> Result<(), DriverError> {
        let command = NetworkCommand::Bind {
            target,
            source,
            source_endpoint,
            cluster,
            destination,
        };
        self.submit(command).await.map(|_| ())
    }

    pub async fn send_application_data(
        &self,
        target: ShortAddress,
        endpoint: u8,
        profile: u16,
        cluster: u16,
        payload: Vec<u8>,
    ) -> Result<(), DriverError> {
        let command = NetworkCommand::SendApplicationData {
            target,
            endpoint,
            profile,
            cluster,
            payload,
        };
        self.submit(command).await.map(|_| ())
    }

    pub async fn permit_join(&self, duration_secs: u8) -> Result<(), DriverError> {
        self.submit(NetworkCommand::PermitJoin { duration_secs }).await.map(|_| ())
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HandleCommand) -> Result<T, DriverError> {
        let (reply, receive) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| DriverError::RunnerClosed)?;
        receive.await.map_err(|_| DriverError::RunnerClosed)
    }
}

/// Create a runner for `network` and a handle to it.
pub fn channel<B, S, C>(
    network: Network<B, S>,
    connector: C,
    reconnect_interval: Duration,
) -> (NetworkHandle, NetworkRunner<B, S, C>)
where
    B: Backend,
    S: SettingsStore,
    C: Connector,
{
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let handle = NetworkHandle {
        commands: commands_tx,
        events: events.clone(),
    };
    let runner = NetworkRunner {
        network,
        connector,
        commands: commands_rx,
        events,
        reconnect_interval,
        labels: DriverLabels::new(B::NAME, "").to_labels(),
    };
    (handle, runner)
}

enum LinkExit {
    Lost,
    Shutdown,
}

pub struct NetworkRunner<B: Backend, S: SettingsStore, C: Connector> {
    network: Network<B, S>,
    connector: C,
    commands: mpsc::Receiver<HandleCommand>,
    events: broadcast::Sender<NetworkEvent>,
    reconnect_interval: Duration,
    labels: Vec<(&'static str, String)>,
}

impl<B: Backend, S: SettingsStore, C: Connector> NetworkRunner<B, S, C> {
    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: &DriverLabels) -> Self {
        self.labels = labels.to_labels();
        self
    }

    /// Serve the network until every handle is dropped.
    pub async fn run(mut self) -> Result<Network<B, S>, DriverError> {
        loop {
            match self.connector.connect().await {
                Ok(io) => {
                    self.network.link_up(now());
                    let exit = self.serve(io).await;
                    self.network.link_down(now());
                    self.publish_events();
                    if let LinkExit::Shutdown = exit {
                        info!(backend = B::NAME, "all handles dropped, runner exiting");
                        return Ok(self.network);
                    }
                }
                Err(error) => warn!(backend = B::NAME, %error, "failed to open link"),
            }

            if self.backoff().await {
                return Ok(self.network);
            }
            metrics::counter!(metric_defs::RECONNECTS.name, &self.labels).increment(1);
            info!(backend = B::NAME, "reconnecting");
        }
    }

    async fn serve(&mut self, io: C::Io) -> LinkExit {
        let (mut reader, mut writer) = tokio::io::split(io);
        let mut buf = [0u8; READ_BUFFER];

        loop {
            while let Some(bytes) = self.network.poll_transmit() {
                if let Err(error) = writer.write_all(&bytes).await {
                    warn!(backend = B::NAME, %error, "write failed");
                    return LinkExit::Lost;
                }
                if let Err(error) = writer.flush().await {
                    warn!(backend = B::NAME, %error, "flush failed");
                    return LinkExit::Lost;
                }
            }
            self.publish_events();

            let deadline = self.network.next_deadline().map(Instant::from_std);
            let timer = sleep_until(deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)));

            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        warn!(backend = B::NAME, "link closed");
                        return LinkExit::Lost;
                    }
                    Ok(n) => {
                        metrics::counter!(metric_defs::BYTES_READ.name, &self.labels).increment(n as u64);
                        self.network.handle_input(now(), &buf[..n]);
                    }
                    Err(error) => {
                        warn!(backend = B::NAME, %error, "read failed");
                        return LinkExit::Lost;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return LinkExit::Shutdown,
                },
                _ = timer, if deadline.is_some() => self.network.handle_timeout(now()),
            }
        }
    }

    /// Wait out the reconnect interval, serving handles meanwhile.
    ///
    /// Returns true when every handle has been dropped.
    async fn backoff(&mut self) -> bool {
        let until = Instant::now() + self.reconnect_interval;
        loop {
            self.publish_events();
            tokio::select! {
                _ = sleep_until(until) => return false,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return true,
                },
            }
        }
    }

    fn handle_command(&mut self, command: HandleCommand) {
        match command {
            HandleCommand::Start(reply) => {
                let _ = reply.send(self.network.start(now()));
            }
            HandleCommand::Stop(reply) => {
                let _ = reply.send(self.network.stop(now()));
            }
            HandleCommand::State(reply) => {
                let _ = reply.send(self.network.state());
            }
            HandleCommand::Nodes(reply) => {
                let _ = reply.send(self.network.nodes().iter().cloned().collect());
            }
            HandleCommand::Submit(command, reply) => {
                self.network.submit(
                    now(),
                    command,
                    Box::new(move |result| {
                        let _ = reply.send(result);
                    }),
                );
            }
        }
    }

    fn publish_events(&mut self) {
        while let Some(event) = self.network.poll_event() {
            debug!(?event, "network event");
            // No subscribers is not an error
            let _ = self.events.send(event);
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
