//! Message Processing Model (RFC 3412).
//!
//! [`MessageProcessor`] turns application PDUs into wire messages and
//! decodes inbound datagrams back into protocol events. Every confirmed
//! send gets a cache entry under a fresh send handle; replies are
//! matched to their entry by msgID (request-id for community versions),
//! and entries whose deadline tick passes are swept out for the retry
//! layer to act on.
//!
//! v3 targets whose authoritative engine is still unknown get an
//! RFC 3414 Section 4 discovery probe in place of the first secured
//! attempt. The Report that comes back teaches the address-to-engine
//! binding here and the engine's notion of time in [`Usm`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::ber::Decoder;
use crate::cache::{HandleGenerator, REQUEST_HANDLE_CEILING, StateCache};
use crate::error::{Error, ErrorIndication, Result};
use crate::message::{
    CommunityMessage, DEFAULT_MSG_MAX_SIZE, Message, MsgFlags, MsgGlobalData, ScopedPdu,
    SecurityLevel, V3Message, Version,
};
use crate::pdu::{Pdu, PduType};
use crate::util::hex;
use crate::v3::engine::{LocalEngine, report_indication};
use crate::v3::usm::{SecurityOutcome, SecurityRejection, Usm, UsmResult};
use crate::value::Value;
use crate::varbind::VarBind;

/// Security selection for a [`Target`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSecurity {
    /// Community-based v1/v2c.
    Community {
        version: Version,
        community: Bytes,
    },
    /// User-based Security Model (v3).
    Usm {
        user_name: Bytes,
        security_level: SecurityLevel,
    },
}

/// Where and how to send requests.
#[derive(Debug, Clone)]
pub struct Target {
    pub addr: SocketAddr,
    pub security: TargetSecurity,
    /// Scoped-PDU context engine ID; empty selects the authoritative
    /// engine's own. Ignored for community targets.
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    /// Seconds to wait for a response before resending.
    pub timeout: f64,
    /// Resends allowed for timeouts and other recoverable failures.
    pub retries: u32,
    /// Resends allowed for engine discovery and time resynchronization.
    pub discovery_retries: u32,
}

impl Target {
    /// Default response timeout in seconds.
    pub const DEFAULT_TIMEOUT: f64 = 1.0;
    /// Default resend budget.
    pub const DEFAULT_RETRIES: u32 = 5;
    /// Default discovery and resynchronization budget.
    pub const DEFAULT_DISCOVERY_RETRIES: u32 = 4;

    fn new(addr: SocketAddr, security: TargetSecurity) -> Self {
        Self {
            addr,
            security,
            context_engine_id: Bytes::new(),
            context_name: Bytes::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            retries: Self::DEFAULT_RETRIES,
            discovery_retries: Self::DEFAULT_DISCOVERY_RETRIES,
        }
    }

    /// Community target (v1 or v2c).
    ///
    /// # Panics
    /// Panics if `version` is V3; v3 targets use [`Target::usm`].
    pub fn community(addr: SocketAddr, version: Version, community: impl Into<Bytes>) -> Self {
        assert!(
            matches!(version, Version::V1 | Version::V2c),
            "community targets only speak V1/V2c, not {version:?}"
        );
        Self::new(
            addr,
            TargetSecurity::Community {
                version,
                community: community.into(),
            },
        )
    }

    /// USM target (v3).
    pub fn usm(
        addr: SocketAddr,
        user_name: impl Into<Bytes>,
        security_level: SecurityLevel,
    ) -> Self {
        Self::new(
            addr,
            TargetSecurity::Usm {
                user_name: user_name.into(),
                security_level,
            },
        )
    }

    /// Set the scoped-PDU context.
    pub fn with_context(mut self, engine_id: impl Into<Bytes>, name: impl Into<Bytes>) -> Self {
        self.context_engine_id = engine_id.into();
        self.context_name = name.into();
        self
    }

    /// Set the per-attempt response timeout in seconds.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the resend budget for recoverable failures.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the resend budget for discovery and resynchronization.
    pub fn with_discovery_retries(mut self, retries: u32) -> Self {
        self.discovery_retries = retries;
        self
    }

    /// The wire version this target speaks.
    pub fn version(&self) -> Version {
        match &self.security {
            TargetSecurity::Community { version, .. } => *version,
            TargetSecurity::Usm { .. } => Version::V3,
        }
    }
}

/// Security identity a message actually arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityInfo {
    Community {
        version: Version,
        community: Bytes,
    },
    Usm {
        user_name: Bytes,
        security_level: SecurityLevel,
        /// Authoritative engine the message was secured against.
        engine_id: Bytes,
    },
}

impl SecurityInfo {
    /// Whether a reply's security matches what the request went out
    /// under. The engine ID is not compared; it is learned at
    /// discovery time rather than configured on the target.
    pub fn matches_target(&self, target: &TargetSecurity) -> bool {
        match (self, target) {
            (
                SecurityInfo::Community { version, community },
                TargetSecurity::Community {
                    version: target_version,
                    community: target_community,
                },
            ) => version == target_version && community == target_community,
            (
                SecurityInfo::Usm {
                    user_name,
                    security_level,
                    ..
                },
                TargetSecurity::Usm {
                    user_name: target_user,
                    security_level: target_level,
                },
            ) => user_name == target_user && security_level == target_level,
            _ => false,
        }
    }
}

/// Cache entry for one in-flight confirmed send attempt.
#[derive(Debug, Clone)]
pub struct SendEntry {
    /// Stable application handle this attempt belongs to.
    pub request_handle: u32,
    pub target: Target,
    /// request-id stamped into this attempt's PDU.
    pub request_id: i32,
    /// Reply correlation key: msgID for v3, request-id otherwise.
    pub correlation_key: i32,
    /// True for an engine-id discovery probe.
    pub discovery: bool,
    /// Context the scoped PDU actually went out under (empty for
    /// community versions and probes); replies must echo it.
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
}

/// A prepared wire message.
#[derive(Debug)]
pub struct Outgoing {
    /// Cache handle for the attempt, or 0 when no response is expected.
    pub send_handle: u32,
    pub data: Bytes,
    /// True when a discovery probe was substituted for the request.
    pub discovery: bool,
}

/// Validated payload of a matched reply.
#[derive(Debug)]
pub struct ReplyData {
    pub pdu: Pdu,
    pub security: SecurityInfo,
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
}

/// Descriptor of an unsolicited inbound message.
#[derive(Debug)]
pub struct InboundMeta {
    pub source: SocketAddr,
    pub security: SecurityInfo,
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    /// msgID to echo in a reply (request-id for community versions).
    pub msg_id: i32,
    /// Security state for building the reply; present only when the
    /// message expects one.
    pub state_reference: Option<u32>,
}

/// What an inbound datagram turned out to be.
#[derive(Debug)]
pub enum InboundMessage {
    /// A reply matched to an in-flight request.
    Reply {
        entry: SendEntry,
        outcome: std::result::Result<ReplyData, ErrorIndication>,
    },
    /// An unsolicited notification (trap or inform).
    Notification { meta: InboundMeta, pdu: Pdu },
    /// A Report built for a rejected message; send it back.
    ReportDue { data: Bytes },
    /// Fully consumed; nothing further to do.
    Handled,
}

/// RFC 3412 message processing state.
pub struct MessageProcessor {
    sends: StateCache<SendEntry>,
    /// Correlation key to send handle.
    replies: HashMap<i32, u32>,
    /// Learned address-to-engine bindings.
    engines: HashMap<SocketAddr, Bytes>,
    msg_ids: HandleGenerator,
    request_ids: HandleGenerator,
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self {
            sends: StateCache::new(REQUEST_HANDLE_CEILING),
            replies: HashMap::new(),
            engines: HashMap::new(),
            msg_ids: HandleGenerator::randomized(REQUEST_HANDLE_CEILING),
            request_ids: HandleGenerator::randomized(REQUEST_HANDLE_CEILING),
        }
    }

    /// The engine ID learned for an address, if any.
    pub fn engine_for(&self, addr: &SocketAddr) -> Option<&Bytes> {
        self.engines.get(addr)
    }

    /// Record the authoritative engine behind an address.
    pub fn learn_engine(&mut self, addr: SocketAddr, engine_id: Bytes) {
        if self.engines.get(&addr) != Some(&engine_id) {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.addr = %addr, snmp.engine_id = %hex::Bytes(&engine_id) },
                "authoritative engine learned"
            );
            self.engines.insert(addr, engine_id);
        }
    }

    /// Number of in-flight send entries.
    pub fn outstanding(&self) -> usize {
        self.sends.len()
    }

    /// Build the wire form of `pdu` for `target`, caching a send entry
    /// when a response is expected.
    ///
    /// The PDU's request-id is replaced with a fresh one for this
    /// attempt. For v3 targets with no learned engine a discovery probe
    /// goes out instead, and the caller's PDU waits for the retry that
    /// follows the probe's Report.
    pub fn prepare_outgoing(
        &mut self,
        usm: &mut Usm,
        target: &Target,
        pdu: &Pdu,
        request_handle: u32,
        deadline_tick: u64,
    ) -> Result<Outgoing> {
        let request_id = self.request_ids.next() as i32;
        let expect_response = pdu.is_confirmed();
        let mut context_engine_id = Bytes::new();
        let mut context_name = Bytes::new();

        let (data, correlation_key, discovery) = match &target.security {
            TargetSecurity::Community { version, community } => {
                let mut wire_pdu = pdu.clone();
                wire_pdu.request_id = request_id;
                let msg = CommunityMessage::new(*version, community.clone(), wire_pdu);
                (msg.encode(), request_id, false)
            }
            TargetSecurity::Usm {
                user_name,
                security_level,
            } => {
                let msg_id = self.msg_ids.next() as i32;
                match self.engines.get(&target.addr) {
                    None => {
                        tracing::debug!(
                            target: "snmp_engine::mp",
                            { snmp.addr = %target.addr, snmp.msg_id = msg_id, snmp.request_id = request_id },
                            "no engine binding, sending discovery probe"
                        );
                        let probe = V3Message::discovery_request(msg_id, request_id);
                        (probe.encode(), msg_id, true)
                    }
                    Some(engine_id) => {
                        let mut wire_pdu = pdu.clone();
                        wire_pdu.request_id = request_id;
                        context_engine_id = if target.context_engine_id.is_empty() {
                            engine_id.clone()
                        } else {
                            target.context_engine_id.clone()
                        };
                        context_name = target.context_name.clone();
                        let scoped = ScopedPdu::new(
                            context_engine_id.clone(),
                            context_name.clone(),
                            wire_pdu,
                        );
                        let global = MsgGlobalData::new(
                            msg_id,
                            DEFAULT_MSG_MAX_SIZE,
                            MsgFlags::new(*security_level, expect_response),
                        );
                        let engine_id = engine_id.clone();
                        let data =
                            usm.generate_request_msg(&global, &engine_id, user_name, &scoped)?;
                        (data, msg_id, false)
                    }
                }
            }
        };

        let send_handle = if expect_response {
            let entry = SendEntry {
                request_handle,
                target: target.clone(),
                request_id,
                correlation_key,
                discovery,
                context_engine_id,
                context_name,
            };
            let handle = self.sends.push_with_deadline(entry, deadline_tick);
            self.replies.insert(correlation_key, handle);
            handle
        } else {
            0
        };

        tracing::trace!(
            target: "snmp_engine::mp",
            { snmp.addr = %target.addr, snmp.send_handle = send_handle, snmp.request_id = request_id },
            "outgoing message prepared"
        );

        Ok(Outgoing {
            send_handle,
            data,
            discovery,
        })
    }

    /// Build the wire form of a reply to an inbound confirmed message.
    pub fn prepare_response(
        &mut self,
        usm: &mut Usm,
        local: &LocalEngine,
        meta: &InboundMeta,
        pdu: &Pdu,
    ) -> Result<Bytes> {
        match &meta.security {
            SecurityInfo::Community { version, community } => {
                Ok(CommunityMessage::new(*version, community.clone(), pdu.clone()).encode())
            }
            SecurityInfo::Usm { security_level, .. } => {
                let Some(state_reference) = meta.state_reference else {
                    return Err(Error::CacheMiss { handle: 0 }.boxed());
                };
                let global = MsgGlobalData::new(
                    meta.msg_id,
                    DEFAULT_MSG_MAX_SIZE,
                    MsgFlags::new(*security_level, false),
                );
                let scoped = ScopedPdu::new(
                    meta.context_engine_id.clone(),
                    meta.context_name.clone(),
                    pdu.clone(),
                );
                usm.generate_response_msg(&global, local, state_reference, &scoped)
            }
        }
    }

    /// Decode an inbound datagram and fold it into protocol state.
    ///
    /// Replies come back matched to their send entry, Reports
    /// classified into the indication their usmStats varbind names.
    /// Rejected messages turn into Reports of our own when the sender
    /// asked for one; notifications come out annotated with the
    /// security identity they arrived under.
    pub fn prepare_data_elements(
        &mut self,
        usm: &mut Usm,
        local: &LocalEngine,
        source: SocketAddr,
        data: Bytes,
    ) -> Result<InboundMessage> {
        let mut decoder = Decoder::with_target(data.clone(), source);
        match Message::decode_with(&mut decoder)? {
            Message::Community(msg) => self.accept_community(source, msg),
            Message::V3(msg) => self.accept_v3(usm, local, source, &data, msg),
        }
    }

    /// Remove and return the entries whose deadline has passed.
    pub fn sweep(&mut self, now_tick: u64) -> Vec<SendEntry> {
        let expired = self.sends.sweep(now_tick);
        let mut out = Vec::with_capacity(expired.len());
        for (handle, entry) in expired {
            self.replies.remove(&entry.correlation_key);
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.addr = %entry.target.addr, snmp.send_handle = handle, snmp.request_id = entry.request_id },
                "send entry expired"
            );
            out.push(entry);
        }
        out
    }

    /// Drop the entry for `send_handle`, tolerating misses.
    pub fn release(&mut self, send_handle: u32) {
        if let Ok(entry) = self.sends.pop(send_handle) {
            self.replies.remove(&entry.correlation_key);
            tracing::trace!(
                target: "snmp_engine::mp",
                { snmp.send_handle = send_handle },
                "send entry released"
            );
        }
    }

    fn take_reply(&mut self, correlation_key: i32) -> Option<SendEntry> {
        let handle = self.replies.remove(&correlation_key)?;
        self.sends.pop(handle).ok()
    }

    fn accept_community(
        &mut self,
        source: SocketAddr,
        msg: CommunityMessage,
    ) -> Result<InboundMessage> {
        let security = SecurityInfo::Community {
            version: msg.version,
            community: msg.community.clone(),
        };

        match msg.pdu.pdu_type {
            PduType::Response => {
                let Some(entry) = self.take_reply(msg.pdu.request_id) else {
                    tracing::debug!(
                        target: "snmp_engine::mp",
                        { snmp.addr = %source, snmp.request_id = msg.pdu.request_id },
                        "response matches no outstanding request"
                    );
                    return Ok(InboundMessage::Handled);
                };
                Ok(InboundMessage::Reply {
                    entry,
                    outcome: Ok(ReplyData {
                        pdu: msg.pdu,
                        security,
                        context_engine_id: Bytes::new(),
                        context_name: Bytes::new(),
                    }),
                })
            }
            PduType::TrapV1 | PduType::TrapV2 | PduType::InformRequest => {
                let meta = InboundMeta {
                    source,
                    security,
                    context_engine_id: Bytes::new(),
                    context_name: Bytes::new(),
                    msg_id: msg.pdu.request_id,
                    state_reference: None,
                };
                Ok(InboundMessage::Notification { meta, pdu: msg.pdu })
            }
            other => {
                tracing::debug!(
                    target: "snmp_engine::mp",
                    { snmp.addr = %source, snmp.pdu_type = %other },
                    "unsupported inbound PDU dropped"
                );
                Ok(InboundMessage::Handled)
            }
        }
    }

    fn accept_v3(
        &mut self,
        usm: &mut Usm,
        local: &LocalEngine,
        source: SocketAddr,
        whole_msg: &Bytes,
        msg: V3Message,
    ) -> Result<InboundMessage> {
        let msg_id = msg.msg_id();
        let reportable = msg.global_data.msg_flags.reportable;

        let rejection = match usm.process_incoming_msg(whole_msg, &msg, local)? {
            UsmResult::Accepted(outcome) => {
                return self.accept_secured(usm, source, msg_id, outcome);
            }
            UsmResult::Rejected(rejection) => rejection,
        };
        let SecurityRejection { indication, report } = rejection;

        // A reply that fails security still settles its request.
        if let Some(entry) = self.take_reply(msg_id) {
            if let Some(report) = report {
                usm.release_exchange(report.state_reference);
            }
            return Ok(InboundMessage::Reply {
                entry,
                outcome: Err(indication),
            });
        }

        let Some(report) = report else {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.addr = %source, snmp.indication = %indication },
                "message rejected"
            );
            return Ok(InboundMessage::Handled);
        };

        if !reportable {
            usm.release_exchange(report.state_reference);
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.addr = %source, snmp.indication = %indication },
                "message rejected, sender declined a report"
            );
            return Ok(InboundMessage::Handled);
        }

        let request_id = msg.pdu().map(|p| p.request_id).unwrap_or(0);
        let report_pdu = Pdu::report(
            request_id,
            vec![VarBind::new(
                report.oid.clone(),
                Value::Counter32(report.value),
            )],
        );
        let level = if report.secured {
            SecurityLevel::AuthNoPriv
        } else {
            SecurityLevel::NoAuthNoPriv
        };
        let global = MsgGlobalData::new(msg_id, DEFAULT_MSG_MAX_SIZE, MsgFlags::new(level, false));
        // Echo the request's context when it is readable; an
        // undecryptable payload falls back to our own.
        let scoped = match msg.scoped_pdu() {
            Some(request_scoped) => ScopedPdu::new(
                request_scoped.context_engine_id.clone(),
                request_scoped.context_name.clone(),
                report_pdu,
            ),
            None => ScopedPdu::new(local.engine_id().clone(), Bytes::new(), report_pdu),
        };
        let data = usm.generate_response_msg(&global, local, report.state_reference, &scoped)?;

        tracing::debug!(
            target: "snmp_engine::mp",
            { snmp.addr = %source, snmp.indication = %indication, snmp.report_oid = %report.oid },
            "sending report for rejected message"
        );
        Ok(InboundMessage::ReportDue { data })
    }

    fn accept_secured(
        &mut self,
        usm: &mut Usm,
        source: SocketAddr,
        msg_id: i32,
        outcome: SecurityOutcome,
    ) -> Result<InboundMessage> {
        self.learn_engine(source, outcome.engine_id.clone());

        let security = SecurityInfo::Usm {
            user_name: outcome.user_name.clone(),
            security_level: outcome.security_level,
            engine_id: outcome.engine_id.clone(),
        };
        let state_reference = outcome.state_reference;
        let scoped = outcome.scoped_pdu;
        let pdu = scoped.pdu;

        match pdu.pdu_type {
            PduType::Response | PduType::Report => {
                usm.release_exchange(state_reference);
                let Some(entry) = self.take_reply(msg_id) else {
                    tracing::debug!(
                        target: "snmp_engine::mp",
                        { snmp.addr = %source, snmp.msg_id = msg_id, snmp.pdu_type = %pdu.pdu_type },
                        "reply matches no outstanding request"
                    );
                    return Ok(InboundMessage::Handled);
                };
                let outcome = if pdu.pdu_type == PduType::Report {
                    Err(classify_report(&pdu))
                } else {
                    Ok(ReplyData {
                        pdu,
                        security,
                        context_engine_id: scoped.context_engine_id,
                        context_name: scoped.context_name,
                    })
                };
                Ok(InboundMessage::Reply { entry, outcome })
            }
            PduType::InformRequest => {
                let meta = InboundMeta {
                    source,
                    security,
                    context_engine_id: scoped.context_engine_id,
                    context_name: scoped.context_name,
                    msg_id,
                    state_reference: Some(state_reference),
                };
                Ok(InboundMessage::Notification { meta, pdu })
            }
            PduType::TrapV1 | PduType::TrapV2 => {
                usm.release_exchange(state_reference);
                let meta = InboundMeta {
                    source,
                    security,
                    context_engine_id: scoped.context_engine_id,
                    context_name: scoped.context_name,
                    msg_id,
                    state_reference: None,
                };
                Ok(InboundMessage::Notification { meta, pdu })
            }
            other => {
                usm.release_exchange(state_reference);
                tracing::debug!(
                    target: "snmp_engine::mp",
                    { snmp.addr = %source, snmp.pdu_type = %other },
                    "unsupported inbound PDU dropped"
                );
                Ok(InboundMessage::Handled)
            }
        }
    }
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("outstanding", &self.sends.len())
            .field("engines", &self.engines.len())
            .finish()
    }
}

/// Map a Report PDU to the indication its usmStats varbind names.
fn classify_report(pdu: &Pdu) -> ErrorIndication {
    pdu.varbinds
        .first()
        .and_then(|vb| report_indication(&vb.oid))
        .unwrap_or(ErrorIndication::BadResponse)
}
