//! Command generator (RFC 3413 Section 3.1).
//!
//! [`CommandGenerator`] drives confirmed-class requests to completion:
//! it hands the PDU to the message layer, waits for the matched reply
//! or a deadline sweep, and resends on recoverable failures. Every
//! request is an explicit [`PendingRequest`] record looked up and
//! mutated on each step, with two separate resend budgets:
//!
//! - discovery failures (`unknownEngineId`, `notInTimeWindow`) consume
//!   the discovery budget and reset the plain retry counter, since the
//!   retry that follows is the first attempt the peer can accept;
//! - everything else, timeouts included, consumes the plain budget.
//!
//! Each resend reuses the original application PDU; the message layer
//! stamps a fresh request-id per attempt. The caller's callback fires
//! exactly once, with the response PDU or the last failure indication.

use std::fmt;

use crate::cache::{REQUEST_HANDLE_CEILING, StateCache};
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::error::{Error, ErrorIndication, Result};
use crate::mp::{MessageProcessor, ReplyData, SendEntry, Target};
use crate::pdu::{Pdu, PduType};
use crate::v3::usm::Usm;

/// Delivery of a settled request's outcome.
///
/// Fired exactly once per submitted request, after the pending record
/// is gone, so the callback may submit follow-up requests freely.
pub type ResponseCallback = Box<
    dyn FnOnce(
        &mut Engine,
        &mut dyn Dispatcher,
        u32,
        std::result::Result<Pdu, ErrorIndication>,
    ),
>;

/// State for one confirmed request in flight.
pub struct PendingRequest {
    pub target: Target,
    /// The application PDU, resent as-is on every attempt.
    pub pdu: Pdu,
    pub callback: ResponseCallback,
    /// Message-layer handle of the current attempt.
    pub send_handle: u32,
    /// Ticks each attempt waits before expiring.
    pub timeout_ticks: u64,
    pub retries_used: u32,
    pub discovery_used: u32,
}

/// What became of a reply or timeout fed into the generator.
pub enum Disposition {
    /// The request was resent; its record stays pending.
    Resent,
    /// The request settled; invoke the callback with this outcome.
    Settled {
        request_handle: u32,
        callback: ResponseCallback,
        outcome: std::result::Result<Pdu, ErrorIndication>,
    },
    /// No pending record matched (cancelled or already settled).
    Unmatched,
}

impl fmt::Debug for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Resent => write!(f, "Resent"),
            Disposition::Settled {
                request_handle,
                outcome,
                ..
            } => f
                .debug_struct("Settled")
                .field("request_handle", request_handle)
                .field("outcome", outcome)
                .finish_non_exhaustive(),
            Disposition::Unmatched => write!(f, "Unmatched"),
        }
    }
}

/// Retry machine for confirmed-class requests.
pub struct CommandGenerator {
    pending: StateCache<PendingRequest>,
}

impl CommandGenerator {
    pub fn new() -> Self {
        Self {
            pending: StateCache::new(REQUEST_HANDLE_CEILING),
        }
    }

    /// Number of requests still waiting for an outcome.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Whether `request_handle` is still pending.
    pub fn contains(&self, request_handle: u32) -> bool {
        self.pending.contains(request_handle)
    }

    /// Send a confirmed-class PDU and record it for retry.
    ///
    /// Returns the stable request handle the callback will be invoked
    /// under. A send failure on this first attempt is returned to the
    /// caller directly; the callback is never invoked for it.
    pub fn submit(
        &mut self,
        mp: &mut MessageProcessor,
        usm: &mut Usm,
        dispatcher: &mut dyn Dispatcher,
        now_tick: u64,
        target: Target,
        pdu: Pdu,
        callback: ResponseCallback,
    ) -> Result<u32> {
        if !pdu.is_confirmed() {
            return Err(Error::Config("submit requires a confirmed-class PDU".into()).boxed());
        }

        let timeout_ticks = timeout_ticks(target.timeout, dispatcher.timer_resolution());
        let handle = self.pending.push(PendingRequest {
            target,
            pdu,
            callback,
            send_handle: 0,
            timeout_ticks,
            retries_used: 0,
            discovery_used: 0,
        });

        let request = match self.pending.get_mut(handle) {
            Some(request) => request,
            None => return Err(Error::CacheMiss { handle }.boxed()),
        };
        let deadline = now_tick + request.timeout_ticks;
        let outgoing =
            match mp.prepare_outgoing(usm, &request.target, &request.pdu, handle, deadline) {
                Ok(outgoing) => outgoing,
                Err(error) => {
                    let _ = self.pending.pop(handle);
                    return Err(error);
                }
            };
        request.send_handle = outgoing.send_handle;
        let addr = request.target.addr;

        if let Err(error) = dispatcher.send_message(addr, outgoing.data) {
            mp.release(outgoing.send_handle);
            let _ = self.pending.pop(handle);
            return Err(error);
        }

        tracing::debug!(
            target: "snmp_engine::cmd",
            { snmp.addr = %addr, snmp.request_handle = handle, snmp.discovery = outgoing.discovery },
            "request submitted"
        );
        Ok(handle)
    }

    /// Fold a matched reply, report indication, or timeout into the
    /// pending record it belongs to.
    ///
    /// `entry` is the message-layer record of the attempt being
    /// answered; timeouts feed the swept entry through the same path
    /// with a [`ErrorIndication::RequestTimedOut`] outcome.
    pub fn on_reply(
        &mut self,
        mp: &mut MessageProcessor,
        usm: &mut Usm,
        dispatcher: &mut dyn Dispatcher,
        now_tick: u64,
        entry: &SendEntry,
        outcome: std::result::Result<ReplyData, ErrorIndication>,
    ) -> Disposition {
        let handle = entry.request_handle;
        if !self.pending.contains(handle) {
            tracing::debug!(
                target: "snmp_engine::cmd",
                { snmp.request_handle = handle },
                "reply for a request no longer pending"
            );
            return Disposition::Unmatched;
        }

        let indication = match outcome {
            Ok(data) => match validate_reply(entry, &data) {
                Ok(()) => return self.settle(handle, Ok(data.pdu)),
                Err(indication) => indication,
            },
            Err(indication) => indication,
        };

        let Some(request) = self.pending.get_mut(handle) else {
            return Disposition::Unmatched;
        };
        if indication.is_discovery() {
            if request.discovery_used >= request.target.discovery_retries {
                return self.settle(handle, Err(indication));
            }
            request.discovery_used += 1;
            // The peer can finally authenticate us; attempts so far
            // never had a chance.
            request.retries_used = 0;
        } else {
            if request.retries_used >= request.target.retries {
                return self.settle(handle, Err(indication));
            }
            request.retries_used += 1;
        }

        tracing::debug!(
            target: "snmp_engine::cmd",
            { snmp.request_handle = handle, snmp.indication = %indication, snmp.retries = request.retries_used, snmp.discovery_retries = request.discovery_used },
            "retrying request"
        );
        self.resend(mp, usm, dispatcher, now_tick, handle, indication)
    }

    /// Drop a pending request without firing its callback.
    ///
    /// Returns false when nothing was pending under the handle.
    pub fn cancel(&mut self, mp: &mut MessageProcessor, request_handle: u32) -> bool {
        match self.pending.pop(request_handle) {
            Ok(request) => {
                mp.release(request.send_handle);
                tracing::debug!(
                    target: "snmp_engine::cmd",
                    { snmp.request_handle = request_handle },
                    "request cancelled"
                );
                true
            }
            Err(_) => false,
        }
    }

    fn resend(
        &mut self,
        mp: &mut MessageProcessor,
        usm: &mut Usm,
        dispatcher: &mut dyn Dispatcher,
        now_tick: u64,
        handle: u32,
        indication: ErrorIndication,
    ) -> Disposition {
        let Some(request) = self.pending.get_mut(handle) else {
            return Disposition::Unmatched;
        };
        let deadline = now_tick + request.timeout_ticks;
        match mp.prepare_outgoing(usm, &request.target, &request.pdu, handle, deadline) {
            Ok(outgoing) => {
                request.send_handle = outgoing.send_handle;
                let addr = request.target.addr;
                if let Err(error) = dispatcher.send_message(addr, outgoing.data) {
                    // The attempt stays cached; the deadline sweep
                    // turns the lost send into a normal timeout retry.
                    tracing::warn!(
                        target: "snmp_engine::cmd",
                        { snmp.addr = %addr, snmp.request_handle = handle, error = %error },
                        "resend failed, waiting for the deadline sweep"
                    );
                }
                Disposition::Resent
            }
            Err(error) => {
                let indication = error.indication().unwrap_or(indication);
                self.settle(handle, Err(indication))
            }
        }
    }

    fn settle(
        &mut self,
        handle: u32,
        outcome: std::result::Result<Pdu, ErrorIndication>,
    ) -> Disposition {
        match self.pending.pop(handle) {
            Ok(request) => {
                tracing::debug!(
                    target: "snmp_engine::cmd",
                    { snmp.request_handle = handle, snmp.ok = outcome.is_ok() },
                    "request settled"
                );
                Disposition::Settled {
                    request_handle: handle,
                    callback: request.callback,
                    outcome,
                }
            }
            Err(_) => Disposition::Unmatched,
        }
    }
}

impl Default for CommandGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandGenerator")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Ticks until an attempt expires, always at least one.
fn timeout_ticks(timeout_secs: f64, resolution: f64) -> u64 {
    let resolution = if resolution > 0.0 { resolution } else { 0.5 };
    (timeout_secs / resolution).ceil().max(1.0) as u64
}

/// Check that a reply matches the request it correlated to. Any
/// mismatch downgrades the reply to `badResponse` instead of handing
/// the application a PDU it never asked for.
fn validate_reply(entry: &SendEntry, data: &ReplyData) -> std::result::Result<(), ErrorIndication> {
    if data.pdu.pdu_type != PduType::Response {
        return Err(ErrorIndication::BadResponse);
    }
    if data.pdu.request_id != entry.request_id {
        return Err(ErrorIndication::BadResponse);
    }
    if !data.security.matches_target(&entry.target.security) {
        return Err(ErrorIndication::BadResponse);
    }
    if data.context_engine_id != entry.context_engine_id
        || data.context_name != entry.context_name
    {
        return Err(ErrorIndication::BadResponse);
    }
    Ok(())
}
