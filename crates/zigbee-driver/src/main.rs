//! Zigbee coprocessor host.
//!
//! Opens the coprocessor's serial port, forms or resumes the network and logs
//! every network event until interrupted.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zigbee_driver::backend::{Backend, DeconzBackend, NxpBackend, TiBackend};
use zigbee_driver::config::{BackendKind, DriverConfig};
use zigbee_driver::network::{Network, NetworkConfig, NetworkEvent, NetworkState};
use zigbee_driver::settings::JsonFileSettings;
use zigbee_driver::transport::{self, SerialConnector};
use zigbee_driver::DriverError;
use zigbee_metrics::DriverLabels;

/// Time allowed for the coprocessor to leave the network on shutdown.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "zigbee-host")]
#[command(about = "Run a Zigbee network through a radio coprocessor")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Firmware family of the coprocessor
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// Serial port path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overriding the backend default
    #[arg(long)]
    baud: Option<u32>,

    /// Where network settings are persisted
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn driver_config(&self) -> Result<DriverConfig, DriverError> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load(path)?,
            None => DriverConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = Some(baud);
        }
        if let Some(settings) = &self.settings {
            config.settings_path = settings.clone();
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.driver_config() {
        Ok(config) => match config.backend {
            BackendKind::Deconz => run(DeconzBackend::new(), &config).await,
            BackendKind::Nxp => run(NxpBackend::new(), &config).await,
            BackendKind::Ti => run(TiBackend::new(), &config).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "zigbee-host failed");
            ExitCode::FAILURE
        }
    }
}

async fn run<B: Backend>(backend: B, config: &DriverConfig) -> Result<(), DriverError> {
    install_metrics(config)?;

    let baud_rate = config.serial.baud_rate.unwrap_or(B::DEFAULT_BAUD_RATE);
    let labels = DriverLabels::new(B::NAME, config.serial.port.clone());
    info!(backend = B::NAME, port = %config.serial.port, baud_rate, "opening coprocessor");

    let network = Network::new(
        backend,
        JsonFileSettings::new(&config.settings_path),
        NetworkConfig::from(&config.network),
    )
    .with_labels(&labels);
    let (handle, runner) = transport::channel(
        network,
        SerialConnector::new(config.serial.port.clone(), baud_rate),
        config.reconnect_interval(),
    );
    let runner = runner.with_labels(&labels);

    let (interrupt_tx, mut interrupt) = mpsc::channel(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.blocking_send(());
    })
    .map_err(|e| DriverError::Io(io::Error::other(e)))?;

    let control = async move {
        let mut events = handle.subscribe();
        handle.start().await?;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = interrupt.recv() => {
                    info!("interrupted, stopping network");
                    if let Err(e) = handle.stop().await {
                        warn!(error = %e, "stop failed");
                        break;
                    }
                    let offline = async {
                        while let Ok(event) = events.recv().await {
                            if event == NetworkEvent::StateChanged(NetworkState::Offline) {
                                break;
                            }
                        }
                    };
                    if tokio::time::timeout(STOP_GRACE, offline).await.is_err() {
                        warn!("coprocessor did not confirm leaving the network");
                    }
                    break;
                }
            }
        }
        Ok::<_, DriverError>(())
    };

    let (runner_result, control_result) = tokio::join!(runner.run(), control);
    let network = runner_result?;
    control_result?;
    info!(nodes = network.nodes().len(), "network closed");
    Ok(())
}

#[cfg(feature = "prometheus")]
fn install_metrics(config: &DriverConfig) -> Result<(), DriverError> {
    let Some(addr) = &config.metrics_addr else {
        return Ok(());
    };
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| DriverError::Metrics(format!("invalid listen address {}: {}", addr, e)))?;
    zigbee_metrics::install_prometheus(addr).map_err(|e| DriverError::Metrics(e.to_string()))?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn install_metrics(config: &DriverConfig) -> Result<(), DriverError> {
    if config.metrics_addr.is_some() {
        warn!("metrics_addr is set but the prometheus exporter is not compiled in");
    }
    Ok(())
}

fn log_event(event: &NetworkEvent) {
    match event {
        NetworkEvent::StateChanged(state) => info!(%state, "network state"),
        NetworkEvent::LinkAvailability(up) => info!(up, "link availability"),
        NetworkEvent::NodeAdded { ieee, short } => info!(%ieee, %short, "node added"),
        NetworkEvent::NodeRemoved { ieee } => info!(%ieee, "node removed"),
        NetworkEvent::NodeDiscoveryFailed { ieee, stage } => warn!(%ieee, %stage, "node discovery failed"),
        NetworkEvent::ShortAddressChanged { ieee, old, new } => info!(%ieee, %old, %new, "node moved"),
        NetworkEvent::AttributeChanged {
            ieee,
            endpoint,
            cluster,
            attribute,
            value,
        } => info!(
            %ieee,
            endpoint,
            cluster = format_args!("0x{:04x}", cluster),
            attribute = format_args!("0x{:04x}", attribute),
            ?value,
            "attribute changed"
        ),
    }
}
