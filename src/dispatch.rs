//! Dispatcher seam between the engine and the host I/O loop.
//!
//! The engine never opens a socket or arms a timer. It hands outgoing
//! datagrams and timing requests to a [`Dispatcher`] supplied by the
//! host, and the host feeds received datagrams and clock ticks back in.
//! [`RecordingDispatcher`] is the in-memory implementation used by the
//! test suites here and available to downstream users for theirs.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::{CommunityMessage, Message};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::value::Value;
use crate::varbind::VarBind;

/// Host-side transport and timer services.
///
/// Implementations are driven from a single thread at a time; methods
/// take `&mut self`. Only [`send_message`](Self::send_message) is
/// required: an embedding that never waits on timers can ignore the
/// tick plumbing, and the job hooks exist for hosts that gate shutdown
/// on outstanding work.
pub trait Dispatcher {
    /// Send one encoded message to `target`.
    fn send_message(&mut self, target: SocketAddr, data: Bytes) -> Result<()>;

    /// Seconds per engine tick. Timeouts are quantized to this.
    fn timer_resolution(&self) -> f64 {
        0.5
    }

    /// Ask the host to call `Engine::on_tick` every `interval` seconds
    /// while requests are outstanding.
    fn schedule_tick(&mut self, interval: f64) {
        let _ = interval;
    }

    /// An exchange that expects a response has been started.
    fn job_started(&mut self) {}

    /// An outstanding exchange has completed or timed out.
    fn job_finished(&mut self) {}
}

/// A message captured by [`RecordingDispatcher`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub target: SocketAddr,
    /// The raw encoded message.
    pub data: Bytes,
    /// Request-id extracted from the message where the payload is
    /// readable (best effort; `None` for encrypted payloads).
    pub request_id: Option<i32>,
}

struct RecordingInner {
    sent: Vec<SentMessage>,
    send_errors: VecDeque<String>,
    scheduled_ticks: Vec<f64>,
    jobs_started: u64,
    jobs_finished: u64,
    resolution: f64,
}

/// In-memory [`Dispatcher`] that records everything the engine does.
///
/// Clones share state, so a test can keep one handle while the engine
/// drives another. Responses are not simulated here: tests feed them
/// back through the engine's receive path directly.
///
/// ```
/// use bytes::Bytes;
/// use snmp_engine::dispatch::{Dispatcher, RecordingDispatcher};
///
/// let mut dispatcher = RecordingDispatcher::new();
/// dispatcher
///     .send_message("127.0.0.1:161".parse().unwrap(), Bytes::from_static(&[0x30, 0x00]))
///     .unwrap();
/// assert_eq!(dispatcher.sent_count(), 1);
/// ```
#[derive(Clone)]
pub struct RecordingDispatcher {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingDispatcher {
    /// Create a recorder with the default 0.5 s tick resolution.
    pub fn new() -> Self {
        Self::with_resolution(0.5)
    }

    /// Create a recorder with a specific tick resolution.
    pub fn with_resolution(resolution: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordingInner {
                sent: Vec::new(),
                send_errors: VecDeque::new(),
                scheduled_ticks: Vec::new(),
                jobs_started: 0,
                jobs_finished: 0,
                resolution,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue a failure for the next send.
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        self.lock().send_errors.push_back(reason.into());
    }

    /// All captured messages, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// The most recently captured message.
    pub fn last_sent(&self) -> Option<SentMessage> {
        self.lock().sent.last().cloned()
    }

    /// Number of captured messages.
    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Discard captured messages.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Tick intervals the engine asked for, in request order.
    pub fn scheduled_ticks(&self) -> Vec<f64> {
        self.lock().scheduled_ticks.clone()
    }

    /// Number of `job_started` calls.
    pub fn jobs_started(&self) -> u64 {
        self.lock().jobs_started
    }

    /// Number of `job_finished` calls.
    pub fn jobs_finished(&self) -> u64 {
        self.lock().jobs_finished
    }

    /// Jobs started minus jobs finished.
    pub fn outstanding_jobs(&self) -> i64 {
        let inner = self.lock();
        inner.jobs_started as i64 - inner.jobs_finished as i64
    }

    fn extract_request_id(data: &Bytes) -> Option<i32> {
        Message::decode(data.clone())
            .ok()
            .and_then(|msg| msg.try_pdu().map(|pdu| pdu.request_id))
    }
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn send_message(&mut self, target: SocketAddr, data: Bytes) -> Result<()> {
        let mut inner = self.lock();
        if let Some(reason) = inner.send_errors.pop_front() {
            return Err(Error::Io {
                target,
                source: std::io::Error::other(reason),
            }
            .boxed());
        }
        let request_id = Self::extract_request_id(&data);
        inner.sent.push(SentMessage {
            target,
            data,
            request_id,
        });
        Ok(())
    }

    fn timer_resolution(&self) -> f64 {
        self.lock().resolution
    }

    fn schedule_tick(&mut self, interval: f64) {
        self.lock().scheduled_ticks.push(interval);
    }

    fn job_started(&mut self) {
        self.lock().jobs_started += 1;
    }

    fn job_finished(&mut self) {
        self.lock().jobs_finished += 1;
    }
}

/// Builder for community-version response messages, for tests that
/// feed canned agent responses into the engine.
pub struct ResponseBuilder {
    request_id: i32,
    varbinds: Vec<(Oid, Value)>,
    error_status: i32,
    error_index: i32,
}

impl ResponseBuilder {
    /// Start a response for the given request-id.
    pub fn new(request_id: i32) -> Self {
        Self {
            request_id,
            varbinds: Vec::new(),
            error_status: 0,
            error_index: 0,
        }
    }

    /// Append a varbind.
    pub fn varbind(mut self, oid: Oid, value: Value) -> Self {
        self.varbinds.push((oid, value));
        self
    }

    /// Set the error-status field.
    pub fn error_status(mut self, status: i32) -> Self {
        self.error_status = status;
        self
    }

    /// Set the error-index field.
    pub fn error_index(mut self, index: i32) -> Self {
        self.error_index = index;
        self
    }

    fn pdu(self) -> Pdu {
        Pdu {
            pdu_type: PduType::Response,
            request_id: self.request_id,
            error_status: self.error_status,
            error_index: self.error_index,
            varbinds: self
                .varbinds
                .into_iter()
                .map(|(oid, value)| VarBind::new(oid, value))
                .collect(),
        }
    }

    /// Encode as a v2c response message.
    pub fn build_v2c(self, community: &[u8]) -> Bytes {
        let community = Bytes::copy_from_slice(community);
        let pdu = self.pdu();
        CommunityMessage::v2c(community, pdu).encode()
    }

    /// Encode as a v1 response message.
    pub fn build_v1(self, community: &[u8]) -> Bytes {
        let community = Bytes::copy_from_slice(community);
        let pdu = self.pdu();
        CommunityMessage::v1(community, pdu).encode()
    }
}
