//! Metric declarations for the Zigbee host driver.
//!
//! Every metric the driver emits is a [`Metric`] constant in [`metric_defs`].
//! Call sites use the constant's `name` with the labels of a
//! [`DriverLabels`], and [`describe_metrics`] registers units and help text
//! with whatever recorder the binary installs.
//!
//! ```rust
//! use zigbee_metrics::{metric_defs, DriverLabels, MetricKind};
//!
//! let labels = DriverLabels::new("deconz", "/dev/ttyACM0").to_labels();
//! metrics::counter!(metric_defs::REQUESTS_DISPATCHED.name, &labels).increment(1);
//! assert_eq!(metric_defs::REQUESTS_DISPATCHED.kind, MetricKind::Counter);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        };
        f.write_str(name)
    }
}

/// Name, kind and help text of one metric.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    pub unit: Unit,
}

impl Metric {
    /// A counter of events.
    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Counter,
            help,
            unit: Unit::Count,
        }
    }

    /// A gauge of items.
    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Gauge,
            help,
            unit: Unit::Count,
        }
    }

    pub const fn histogram(name: &'static str, help: &'static str, unit: Unit) -> Self {
        Metric {
            name,
            kind: MetricKind::Histogram,
            help,
            unit,
        }
    }

    /// Measure in `unit` instead of a plain count.
    pub const fn in_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Register the unit and help text with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.help),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.help),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.help),
        }
    }
}

/// Every metric the driver emits, all labelled with [`LABEL_KEYS`].
pub mod metric_defs {
    use super::{Metric, Unit};

    // Framing and link

    pub const FRAMES_DECODED: Metric = Metric::counter("zigbee.frame.decoded", "Frames that passed integrity validation");
    pub const FRAMES_DROPPED: Metric = Metric::counter(
        "zigbee.frame.dropped",
        "Wire units dropped for checksum, escape or length errors",
    );
    pub const BYTES_WRITTEN: Metric =
        Metric::counter("zigbee.link.bytes_written", "Bytes written to the serial link").in_unit(Unit::Bytes);
    pub const BYTES_READ: Metric =
        Metric::counter("zigbee.link.bytes_read", "Bytes read from the serial link").in_unit(Unit::Bytes);
    pub const RECONNECTS: Metric = Metric::counter("zigbee.link.reconnects", "Serial port reopen attempts");

    // Correlator

    pub const REQUESTS_DISPATCHED: Metric =
        Metric::counter("zigbee.correlator.dispatched", "Requests written to the firmware");
    pub const REQUESTS_SUCCEEDED: Metric =
        Metric::counter("zigbee.correlator.succeeded", "Requests finalized with a success status");
    pub const REQUESTS_FAILED: Metric = Metric::counter(
        "zigbee.correlator.failed",
        "Requests finalized with a firmware-reported failure",
    );
    pub const REQUESTS_TIMED_OUT: Metric = Metric::counter(
        "zigbee.correlator.timed_out",
        "Requests finalized because no reply arrived in time",
    );
    pub const REQUESTS_ABORTED: Metric =
        Metric::counter("zigbee.correlator.aborted", "Requests aborted by the caller or by link loss");
    /// Response-shaped frames that matched nothing in flight.
    pub const STALE_FRAMES: Metric = Metric::counter(
        "zigbee.correlator.stale",
        "Response frames discarded for a sequence or command mismatch",
    );
    pub const REPLY_LATENCY: Metric = Metric::histogram(
        "zigbee.correlator.reply_latency_ms",
        "Time from dispatch to reply finalization in milliseconds",
        Unit::Milliseconds,
    );
    /// Requests waiting behind the in-flight slot.
    pub const QUEUE_DEPTH: Metric = Metric::gauge("zigbee.correlator.queue_depth", "Requests waiting for dispatch");

    // Network

    pub const NODES_INITIALIZED: Metric =
        Metric::counter("zigbee.discovery.initialized", "Nodes that completed discovery");
    pub const DISCOVERY_FAILURES: Metric =
        Metric::counter("zigbee.discovery.failed", "Nodes whose discovery exhausted its retries");
    pub const DISCOVERY_RETRIES: Metric =
        Metric::counter("zigbee.discovery.retries", "Discovery queries re-issued after a failure");
    pub const ACTIVE_NODES: Metric =
        Metric::gauge("zigbee.network.active_nodes", "Fully discovered nodes in the network");

    pub const ALL: &[Metric] = &[
        FRAMES_DECODED,
        FRAMES_DROPPED,
        BYTES_WRITTEN,
        BYTES_READ,
        RECONNECTS,
        REQUESTS_DISPATCHED,
        REQUESTS_SUCCEEDED,
        REQUESTS_FAILED,
        REQUESTS_TIMED_OUT,
        REQUESTS_ABORTED,
        STALE_FRAMES,
        REPLY_LATENCY,
        QUEUE_DEPTH,
        NODES_INITIALIZED,
        DISCOVERY_FAILURES,
        DISCOVERY_RETRIES,
        ACTIVE_NODES,
    ];
}

/// Label keys carried by every driver metric.
pub const LABEL_KEYS: [&str; 2] = ["backend", "port"];

/// Identifies one driver instance in emitted metrics.
#[derive(Debug, Clone)]
pub struct DriverLabels {
    pub backend: String,
    pub port: String,
}

impl DriverLabels {
    pub fn new(backend: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            port: port.into(),
        }
    }

    /// Labels in the form the `metrics` macros accept.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let [backend, port] = LABEL_KEYS;
        vec![(backend, self.backend.clone()), (port, self.port.clone())]
    }
}

/// Describe every metric in [`metric_defs::ALL`].
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    metric_defs::ALL.iter().for_each(Metric::describe);
}

/// Install a Prometheus recorder serving `addr` and describe every metric.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
