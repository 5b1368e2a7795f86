//! Request/reply correlation over a framed link.
//!
//! The [`Correlator`] owns the codec and a FIFO of pending requests. At most
//! one request is on the wire at a time; it completes when the backend's
//! primary reply arrives and, if the request declared one, its additional
//! frame. Every request is finalized exactly once, with a [`Status`] from the
//! firmware or with [`Status::Timeout`] / [`Status::Aborted`]. Nothing is
//! retried here; issuers decide.
//!
//! The correlator is sans-IO: callers pass `now` explicitly, push received
//! bytes through [`Correlator::handle_input`], drain outbound bytes with
//! [`Correlator::poll_transmit`] and completions with
//! [`Correlator::poll_event`].

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use zigbee_frame::{CodecStats, FrameCodec};
use zigbee_metrics::{metric_defs, DriverLabels};

use crate::status::Status;

/// Deadline for requests answered by the coprocessor itself.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for ZDO/ZCL requests answered by a remote node.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(12);
/// Deadline for forming or resuming the network.
pub const START_TIMEOUT: Duration = Duration::from_secs(30);

/// How an inbound frame relates to the request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The direct reply, carrying the firmware status.
    Primary(Status),
    /// The additional frame the request declared.
    Additional,
    /// Response-shaped but for another request.
    Stale,
    /// Not a reply; routed as a notification.
    Unsolicited,
}

/// The per-backend seam of the correlator.
pub trait Protocol: Sized {
    type Frame: Clone + fmt::Debug;
    type Command: Copy + fmt::Debug + PartialEq;
    /// Describes the additional frame a request waits for.
    type Additional: Clone + fmt::Debug;
    type Codec: FrameCodec<Frame = Self::Frame>;

    /// Short name used in logs and metric labels.
    const NAME: &'static str;

    fn new_codec(&self) -> Self::Codec;

    /// Build the wire frame for a request.
    fn encode_request(&self, request: &Request<Self>) -> Self::Frame;

    /// Classify an inbound frame against the request in flight.
    fn correlate(&self, request: &Request<Self>, frame: &Self::Frame) -> Correlation;
}

/// Caller-visible identity of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What to send, before the correlator assigns identity and sequence.
pub struct RequestSpec<P: Protocol> {
    pub command: P::Command,
    pub payload: Vec<u8>,
    pub description: &'static str,
    pub additional: Option<P::Additional>,
    pub timeout: Duration,
    /// Retry budget of the issuer. The correlator itself never retries.
    pub retries: u8,
}

impl<P: Protocol> RequestSpec<P> {
    pub fn new(command: P::Command, payload: impl Into<Vec<u8>>) -> Self {
        RequestSpec {
            command,
            payload: payload.into(),
            description: "request",
            additional: None,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
        }
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Wait for an additional frame after the primary reply.
    pub fn expect(mut self, additional: P::Additional) -> Self {
        self.additional = Some(additional);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }
}

/// A request owned by the correlator.
pub struct Request<P: Protocol> {
    pub id: RequestId,
    /// Wire sequence number, assigned at enqueue time.
    pub sequence: u8,
    pub command: P::Command,
    pub payload: Vec<u8>,
    pub description: &'static str,
    pub additional: Option<P::Additional>,
    pub timeout: Duration,
    pub retries: u8,
}

impl<P: Protocol> Clone for Request<P> {
    fn clone(&self) -> Self {
        Request {
            id: self.id,
            sequence: self.sequence,
            command: self.command,
            payload: self.payload.clone(),
            description: self.description,
            additional: self.additional.clone(),
            timeout: self.timeout,
            retries: self.retries,
        }
    }
}

impl<P: Protocol> fmt::Debug for Request<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("command", &self.command)
            .field("description", &self.description)
            .field("payload_len", &self.payload.len())
            .field("additional", &self.additional)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The finalized outcome of a request.
pub struct Reply<P: Protocol> {
    pub request: Request<P>,
    pub status: Status,
    pub primary: Option<P::Frame>,
    pub additional: Option<P::Frame>,
    /// `None` when the request was aborted before dispatch.
    pub dispatched_at: Option<Instant>,
    pub finished_at: Instant,
}

impl<P: Protocol> Reply<P> {
    /// Time between dispatch and finalization.
    pub fn latency(&self) -> Option<Duration> {
        self.dispatched_at
            .map(|at| self.finished_at.saturating_duration_since(at))
    }
}

impl<P: Protocol> fmt::Debug for Reply<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("request", &self.request)
            .field("status", &self.status)
            .field("primary", &self.primary)
            .field("additional", &self.additional)
            .field("latency", &self.latency())
            .finish()
    }
}

/// Output of the correlator.
pub enum CorrelatorEvent<P: Protocol> {
    Completed(Reply<P>),
    Notification(P::Frame),
}

impl<P: Protocol> fmt::Debug for CorrelatorEvent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelatorEvent::Completed(reply) => f.debug_tuple("Completed").field(reply).finish(),
            CorrelatorEvent::Notification(frame) => f.debug_tuple("Notification").field(frame).finish(),
        }
    }
}

struct InFlight<P: Protocol> {
    request: Request<P>,
    dispatched_at: Instant,
    deadline: Instant,
    status: Option<Status>,
    primary: Option<P::Frame>,
    additional: Option<P::Frame>,
}

impl<P: Protocol> InFlight<P> {
    fn is_complete(&self) -> bool {
        match self.status {
            Some(status) if !status.is_success() => true,
            Some(_) => self.request.additional.is_none() || self.additional.is_some(),
            None => false,
        }
    }
}

/// Single in-flight request/reply engine for one link.
pub struct Correlator<P: Protocol> {
    protocol: P,
    codec: P::Codec,
    queue: VecDeque<Request<P>>,
    in_flight: Option<InFlight<P>>,
    next_id: u64,
    next_sequence: u8,
    link_up: bool,
    transmit: VecDeque<Vec<u8>>,
    events: VecDeque<CorrelatorEvent<P>>,
    labels: Vec<(&'static str, String)>,
    reported_stats: CodecStats,
}

impl<P: Protocol> Correlator<P> {
    /// Create a correlator with the link down.
    pub fn new(protocol: P) -> Self {
        let codec = protocol.new_codec();
        Correlator {
            protocol,
            codec,
            queue: VecDeque::new(),
            in_flight: None,
            next_id: 1,
            next_sequence: 0,
            link_up: false,
            transmit: VecDeque::new(),
            events: VecDeque::new(),
            labels: DriverLabels::new(P::NAME, "").to_labels(),
            reported_stats: CodecStats::default(),
        }
    }

    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: &DriverLabels) -> Self {
        self.labels = labels.to_labels();
        self
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Append a request to the queue, dispatching it if the link is idle.
    pub fn enqueue(&mut self, now: Instant, spec: RequestSpec<P>) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let request = Request {
            id,
            sequence,
            command: spec.command,
            payload: spec.payload,
            description: spec.description,
            additional: spec.additional,
            timeout: spec.timeout,
            retries: spec.retries,
        };
        trace!(backend = P::NAME, %id, sequence, description = request.description, "queued");
        self.queue.push_back(request);
        self.dispatch_next(now);
        self.record_queue_depth();
        id
    }

    /// Push received bytes through the codec and route every decoded frame.
    pub fn handle_input(&mut self, now: Instant, data: &[u8]) {
        let frames = self.codec.feed(data);
        self.record_codec_stats();
        for frame in frames {
            self.route(now, frame);
        }
    }

    /// Finalize the in-flight request if its deadline has passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| now >= flight.deadline);
        if !expired {
            return;
        }
        if let Some(flight) = self.in_flight.take() {
            warn!(
                backend = P::NAME,
                id = %flight.request.id,
                description = flight.request.description,
                timeout_ms = flight.request.timeout.as_millis() as u64,
                "request timed out"
            );
            self.finalize(now, flight, Status::Timeout);
        }
        self.dispatch_next(now);
        self.record_queue_depth();
    }

    /// Abort a queued or in-flight request. Returns false if it is unknown.
    pub fn abort(&mut self, now: Instant, id: RequestId) -> bool {
        if self.in_flight.as_ref().is_some_and(|f| f.request.id == id) {
            if let Some(flight) = self.in_flight.take() {
                debug!(backend = P::NAME, %id, "aborting in-flight request");
                self.finalize(now, flight, Status::Aborted);
            }
            self.dispatch_next(now);
            self.record_queue_depth();
            return true;
        }

        let Some(index) = self.queue.iter().position(|r| r.id == id) else {
            return false;
        };
        if let Some(request) = self.queue.remove(index) {
            debug!(backend = P::NAME, %id, "aborting queued request");
            metrics::counter!(metric_defs::REQUESTS_ABORTED.name, &self.labels).increment(1);
            self.events.push_back(CorrelatorEvent::Completed(Reply {
                request,
                status: Status::Aborted,
                primary: None,
                additional: None,
                dispatched_at: None,
                finished_at: now,
            }));
        }
        self.record_queue_depth();
        true
    }

    /// The link went away: abort the request in flight and hold the queue.
    pub fn link_down(&mut self, now: Instant) {
        if !self.link_up {
            return;
        }
        self.link_up = false;
        self.transmit.clear();
        if let Some(flight) = self.in_flight.take() {
            warn!(backend = P::NAME, id = %flight.request.id, "link lost with request in flight");
            self.finalize(now, flight, Status::Aborted);
        }
    }

    /// The link is back: drop partial input and resume dispatch.
    pub fn link_up(&mut self, now: Instant) {
        self.link_up = true;
        self.codec.reset();
        self.dispatch_next(now);
        self.record_queue_depth();
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    /// Take the next chunk of bytes to write to the link.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmit.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<CorrelatorEvent<P>> {
        self.events.pop_front()
    }

    /// Deadline of the request in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.deadline)
    }

    /// Number of requests waiting behind the in-flight slot.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<&Request<P>> {
        self.in_flight.as_ref().map(|f| &f.request)
    }

    pub fn codec_stats(&self) -> CodecStats {
        self.codec.stats()
    }

    fn dispatch_next(&mut self, now: Instant) {
        if !self.link_up || self.in_flight.is_some() {
            return;
        }
        let Some(request) = self.queue.pop_front() else {
            return;
        };

        let frame = self.protocol.encode_request(&request);
        let bytes = self.codec.encode(&frame);
        debug!(
            backend = P::NAME,
            id = %request.id,
            sequence = request.sequence,
            command = ?request.command,
            description = request.description,
            len = bytes.len(),
            "dispatching"
        );
        metrics::counter!(metric_defs::REQUESTS_DISPATCHED.name, &self.labels).increment(1);
        metrics::counter!(metric_defs::BYTES_WRITTEN.name, &self.labels).increment(bytes.len() as u64);
        self.transmit.push_back(bytes);

        self.in_flight = Some(InFlight {
            deadline: now + request.timeout,
            request,
            dispatched_at: now,
            status: None,
            primary: None,
            additional: None,
        });
    }

    fn route(&mut self, now: Instant, frame: P::Frame) {
        let Some(flight) = self.in_flight.as_mut() else {
            self.events.push_back(CorrelatorEvent::Notification(frame));
            return;
        };

        match self.protocol.correlate(&flight.request, &frame) {
            Correlation::Primary(status) => {
                if flight.status.is_some() {
                    warn!(backend = P::NAME, id = %flight.request.id, ?frame, "duplicate reply discarded");
                    return;
                }
                flight.status = Some(status);
                flight.primary = Some(frame);
            }
            Correlation::Additional if flight.request.additional.is_some() && flight.additional.is_none() => {
                flight.additional = Some(frame);
            }
            Correlation::Additional | Correlation::Unsolicited => {
                self.events.push_back(CorrelatorEvent::Notification(frame));
                return;
            }
            Correlation::Stale => {
                warn!(
                    backend = P::NAME,
                    id = %flight.request.id,
                    sequence = flight.request.sequence,
                    ?frame,
                    "stale reply discarded"
                );
                metrics::counter!(metric_defs::STALE_FRAMES.name, &self.labels).increment(1);
                return;
            }
        }

        if flight.is_complete() {
            if let Some(flight) = self.in_flight.take() {
                let status = flight.status.unwrap_or(Status::Timeout);
                self.finalize(now, flight, status);
            }
            self.dispatch_next(now);
            self.record_queue_depth();
        }
    }

    fn finalize(&mut self, now: Instant, flight: InFlight<P>, status: Status) {
        let latency = now.saturating_duration_since(flight.dispatched_at);
        metrics::histogram!(metric_defs::REPLY_LATENCY.name, &self.labels)
            .record(latency.as_secs_f64() * 1000.0);
        let counter = match status {
            Status::Success => metric_defs::REQUESTS_SUCCEEDED.name,
            Status::Timeout => metric_defs::REQUESTS_TIMED_OUT.name,
            Status::Aborted => metric_defs::REQUESTS_ABORTED.name,
            _ => metric_defs::REQUESTS_FAILED.name,
        };
        metrics::counter!(counter, &self.labels).increment(1);

        debug!(
            backend = P::NAME,
            id = %flight.request.id,
            description = flight.request.description,
            %status,
            latency_ms = latency.as_millis() as u64,
            "finalized"
        );
        self.events.push_back(CorrelatorEvent::Completed(Reply {
            request: flight.request,
            status,
            primary: flight.primary,
            additional: flight.additional,
            dispatched_at: Some(flight.dispatched_at),
            finished_at: now,
        }));
    }

    fn record_queue_depth(&self) {
        metrics::gauge!(metric_defs::QUEUE_DEPTH.name, &self.labels).set(self.queue.len() as f64);
    }

    fn record_codec_stats(&mut self) {
        let stats = self.codec.stats();
        let decoded = stats.frames_decoded - self.reported_stats.frames_decoded;
        let dropped = stats.frames_dropped - self.reported_stats.frames_dropped;
        if decoded > 0 {
            metrics::counter!(metric_defs::FRAMES_DECODED.name, &self.labels).increment(decoded);
        }
        if dropped > 0 {
            metrics::counter!(metric_defs::FRAMES_DROPPED.name, &self.labels).increment(dropped);
        }
        self.reported_stats = stats;
    }
}
