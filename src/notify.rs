//! Trap and inform reception (RFC 3413 Section 3.4).
//!
//! Inbound notifications arrive here after the message processor has
//! authenticated and decoded them. The receiver re-shapes each one into
//! a [`NotificationEvent`], confirms informs on the wire, consults the
//! access-control oracle, and hands accepted events to one registered
//! callback. SNMPv1 traps were already rewritten to the v2 varbind
//! layout during decode, so a single event shape covers every version.
//!
//! Nothing in this path propagates errors upward: a notification that
//! cannot be processed is counted and dropped, and a confirmation that
//! cannot be sent leaves the inform's sender to retry on its own.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::dispatch::Dispatcher;
use crate::engine::AccessControl;
use crate::mp::{InboundMeta, MessageProcessor, SecurityInfo};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::v3::engine::LocalEngine;
use crate::v3::usm::Usm;
use crate::value::Value;
use crate::varbind::VarBind;

/// View name the receiver presents to [`AccessControl`] checks.
pub const NOTIFY_VIEW: &str = "notify";

/// Callback invoked for every accepted notification.
pub type NotificationCallback = Box<dyn FnMut(&NotificationEvent)>;

/// A received trap or inform, normalized to the v2 varbind shape.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub source: SocketAddr,
    /// Verified sender identity: community string or USM user.
    pub security: SecurityInfo,
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    /// sysUpTime.0 from the leading varbind, in hundredths of a second.
    pub uptime: u32,
    /// snmpTrapOID.0 naming the notification type.
    pub trap_oid: Oid,
    /// Payload varbinds after the two-element header.
    pub varbinds: Vec<VarBind>,
    pub request_id: i32,
    /// True for informs, which were confirmed before delivery.
    pub confirmed: bool,
}

/// Delivery and drop counters for the receiver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyStats {
    /// Events that passed every check and reached the callback stage.
    pub delivered: u32,
    /// Notifications without the RFC 3416 header varbinds.
    pub dropped_malformed: u32,
    /// Notifications refused by the access-control oracle.
    pub dropped_denied: u32,
    /// Inform confirmations that could not be built or sent.
    pub confirm_send_failures: u32,
}

/// Inbound side of the engine: accepts traps and informs.
pub struct NotificationReceiver {
    callback: Option<NotificationCallback>,
    stats: NotifyStats,
}

impl NotificationReceiver {
    pub fn new() -> Self {
        Self {
            callback: None,
            stats: NotifyStats::default(),
        }
    }

    /// Register the callback, replacing any previous one.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&NotificationEvent) + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn stats(&self) -> NotifyStats {
        self.stats
    }

    /// Process one inbound notification.
    ///
    /// Informs are confirmed on the wire before the callback runs, so
    /// the sender's retransmit clock stops even when the callback is
    /// slow. A failed confirmation is counted and delivery continues;
    /// the sender will retry and the event is delivered again.
    pub fn deliver(
        &mut self,
        mp: &mut MessageProcessor,
        usm: &mut Usm,
        local: &LocalEngine,
        access: &dyn AccessControl,
        dispatcher: &mut dyn Dispatcher,
        meta: InboundMeta,
        pdu: Pdu,
    ) {
        let Some((uptime, trap_oid, varbinds)) = split_notification(&pdu) else {
            tracing::debug!(
                target: "snmp_engine::notify",
                { snmp.source = %meta.source, snmp.varbinds = pdu.varbinds.len() },
                "notification missing the v2 header varbinds"
            );
            self.stats.dropped_malformed += 1;
            if let Some(state_reference) = meta.state_reference {
                usm.release_exchange(state_reference);
            }
            return;
        };

        if !access.is_allowed(&meta.security, NOTIFY_VIEW, &trap_oid) {
            tracing::debug!(
                target: "snmp_engine::notify",
                { snmp.source = %meta.source, snmp.trap_oid = %trap_oid },
                "notification refused by access control"
            );
            self.stats.dropped_denied += 1;
            if let Some(state_reference) = meta.state_reference {
                usm.release_exchange(state_reference);
            }
            return;
        }

        let confirmed = pdu.pdu_type == PduType::InformRequest;
        if confirmed {
            // Echoed varbinds, noError, same request-id; the security
            // state parked under meta is consumed while building it.
            match mp.prepare_response(usm, local, &meta, &pdu.to_response()) {
                Ok(data) => match dispatcher.send_message(meta.source, data) {
                    Ok(()) => {
                        tracing::debug!(
                            target: "snmp_engine::notify",
                            { snmp.source = %meta.source, snmp.request_id = pdu.request_id },
                            "sent inform response"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            target: "snmp_engine::notify",
                            { snmp.source = %meta.source, error = %error },
                            "inform response not sent"
                        );
                        self.stats.confirm_send_failures += 1;
                    }
                },
                Err(error) => {
                    tracing::warn!(
                        target: "snmp_engine::notify",
                        { snmp.source = %meta.source, error = %error },
                        "inform response not built"
                    );
                    self.stats.confirm_send_failures += 1;
                }
            }
        }

        let event = NotificationEvent {
            source: meta.source,
            security: meta.security,
            context_engine_id: meta.context_engine_id,
            context_name: meta.context_name,
            uptime,
            trap_oid,
            varbinds,
            request_id: pdu.request_id,
            confirmed,
        };
        self.stats.delivered += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(&event);
        }
    }
}

impl Default for NotificationReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationReceiver")
            .field("callback", &self.callback.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Split the RFC 3416 notification varbind layout into its parts.
///
/// The first varbind carries sysUpTime.0 as TimeTicks and the second
/// carries snmpTrapOID.0 as an OID; everything after them is payload.
/// Only the value types are checked, tolerating agents that mislabel
/// the header instances.
fn split_notification(pdu: &Pdu) -> Option<(u32, Oid, Vec<VarBind>)> {
    if pdu.varbinds.len() < 2 {
        return None;
    }
    let uptime = match pdu.varbinds[0].value {
        Value::TimeTicks(ticks) => ticks,
        _ => return None,
    };
    let trap_oid = match &pdu.varbinds[1].value {
        Value::ObjectIdentifier(oid) => oid.clone(),
        _ => return None,
    };
    Some((uptime, trap_oid, pdu.varbinds[2..].to_vec()))
}

/// Well-known notification OIDs.
pub mod oids {
    use crate::oid;
    use crate::oid::Oid;

    /// sysUpTime.0, the leading varbind of the v2 notification shape.
    pub fn sys_uptime() -> Oid {
        oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
    }

    /// snmpTrapOID.0, the second varbind naming the notification.
    pub fn snmp_trap_oid() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0)
    }

    /// snmpTrapAddress.0, appended when a v1 trap is rewritten.
    pub fn snmp_trap_address() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 18, 1, 3, 0)
    }

    /// snmpTrapEnterprise.0, appended when a v1 trap is rewritten.
    pub fn snmp_trap_enterprise() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 3, 0)
    }

    /// The snmpTraps subtree holding the generic trap identities.
    pub fn snmp_traps() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5)
    }

    /// coldStart (snmpTraps.1)
    pub fn cold_start() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 1)
    }

    /// warmStart (snmpTraps.2)
    pub fn warm_start() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 2)
    }

    /// linkDown (snmpTraps.3)
    pub fn link_down() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)
    }

    /// linkUp (snmpTraps.4)
    pub fn link_up() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 4)
    }

    /// authenticationFailure (snmpTraps.5)
    pub fn auth_failure() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 5)
    }

    /// egpNeighborLoss (snmpTraps.6)
    pub fn egp_neighbor_loss() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 6)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use crate::engine::AllowAll;
    use crate::message::{Message, SecurityLevel, Version};
    use crate::mp::{InboundMessage, Target};
    use crate::oid;
    use crate::pdu::{GenericTrap, TrapV1Pdu};
    use crate::v3::{AuthProtocol, PrivProtocol, UsmUserConfig};

    const RECEIVER_ENGINE: &[u8] = b"\x80\x00\x4f\xb8\x05rcvr";

    fn source() -> SocketAddr {
        "203.0.113.9:56012".parse().unwrap()
    }

    fn community_meta(version: Version) -> InboundMeta {
        InboundMeta {
            source: source(),
            security: SecurityInfo::Community {
                version,
                community: Bytes::from_static(b"public"),
            },
            context_engine_id: Bytes::new(),
            context_name: Bytes::new(),
            msg_id: 42,
            state_reference: None,
        }
    }

    fn trap_pdu(trap_oid: Oid) -> Pdu {
        Pdu {
            pdu_type: PduType::TrapV2,
            request_id: 42,
            error_status: 0,
            error_index: 0,
            varbinds: vec![
                VarBind::new(oids::sys_uptime(), Value::TimeTicks(1234)),
                VarBind::new(oids::snmp_trap_oid(), Value::ObjectIdentifier(trap_oid)),
                VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 3), Value::Integer(3)),
            ],
        }
    }

    fn inform_pdu() -> Pdu {
        Pdu {
            pdu_type: PduType::InformRequest,
            ..trap_pdu(oids::link_up())
        }
    }

    fn collector() -> (Arc<Mutex<Vec<NotificationEvent>>>, NotificationReceiver) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut receiver = NotificationReceiver::new();
        receiver.set_callback(move |event: &NotificationEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        (events, receiver)
    }

    /// Run a secured AuthPriv inform through a second engine's message
    /// processor so the receiver side holds real security state.
    fn secured_inform() -> (MessageProcessor, Usm, LocalEngine, InboundMeta, Pdu) {
        let admin = || {
            UsmUserConfig::new("admin")
                .auth(AuthProtocol::Sha256, "authpass123")
                .privacy(PrivProtocol::Aes128, "privpass123")
        };

        let receiver_local = LocalEngine::with_boots(RECEIVER_ENGINE, 3);
        let mut receiver_mp = MessageProcessor::new();
        let mut receiver_usm = Usm::new();
        receiver_usm.add_user(admin()).unwrap();

        let receiver_addr: SocketAddr = "198.51.100.23:162".parse().unwrap();
        let mut notifier_mp = MessageProcessor::new();
        let mut notifier_usm = Usm::new();
        notifier_usm.add_user(admin()).unwrap();
        notifier_mp.learn_engine(receiver_addr, Bytes::from_static(RECEIVER_ENGINE));
        notifier_usm.observe_engine(RECEIVER_ENGINE, 3, 40);

        let target = Target::usm(receiver_addr, b"admin".as_slice(), SecurityLevel::AuthPriv);
        let out = notifier_mp
            .prepare_outgoing(&mut notifier_usm, &target, &inform_pdu(), 9, 10)
            .unwrap();

        let inbound = receiver_mp
            .prepare_data_elements(&mut receiver_usm, &receiver_local, source(), out.data)
            .unwrap();
        let InboundMessage::Notification { meta, pdu } = inbound else {
            panic!("expected a notification, got {inbound:?}");
        };
        (receiver_mp, receiver_usm, receiver_local, meta, pdu)
    }

    struct DenyAll;

    impl AccessControl for DenyAll {
        fn is_allowed(&self, _security: &SecurityInfo, _view: &str, _oid: &Oid) -> bool {
            false
        }
    }

    #[test]
    fn trap_reaches_the_callback() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        let (events, mut receiver) = collector();

        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            trap_pdu(oids::link_down()),
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.uptime, 1234);
        assert_eq!(event.trap_oid, oids::link_down());
        assert_eq!(event.varbinds.len(), 1);
        assert_eq!(event.request_id, 42);
        assert!(!event.confirmed);
        assert_eq!(dispatcher.sent_count(), 0);
        assert_eq!(receiver.stats().delivered, 1);
    }

    #[test]
    fn inform_confirmed_before_the_callback() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();

        let sends_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sends_seen);
        let watcher = dispatcher.clone();
        let mut receiver = NotificationReceiver::new();
        receiver.set_callback(move |_event: &NotificationEvent| {
            sink.lock().unwrap().push(watcher.sent_count());
        });

        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            inform_pdu(),
        );

        // One send had already happened when the callback observed it.
        assert_eq!(*sends_seen.lock().unwrap(), vec![1]);

        let sent = dispatcher.last_sent().unwrap();
        assert_eq!(sent.target, source());
        assert_eq!(sent.request_id, Some(42));
        let message = Message::decode(sent.data.clone()).unwrap();
        let response = message.try_pdu().unwrap();
        assert_eq!(response.pdu_type, PduType::Response);
        assert_eq!(response.error_status, 0);
        assert_eq!(response.varbinds.len(), 3);
    }

    #[test]
    fn normalized_v1_trap_is_an_unconfirmed_event() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        let (events, mut receiver) = collector();

        let trap = TrapV1Pdu::new(
            oid!(1, 3, 6, 1, 4, 1, 9),
            [192, 0, 2, 7],
            GenericTrap::LinkDown,
            0,
            500,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2),
                Value::Integer(2),
            )],
        )
        .to_v2_pdu();

        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V1),
            trap,
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.trap_oid, oids::link_down());
        assert_eq!(event.uptime, 500);
        assert!(!event.confirmed);
        // Payload keeps the rewrite's trailing address and enterprise.
        assert_eq!(event.varbinds.len(), 3);
        assert_eq!(event.varbinds[1].oid, oids::snmp_trap_address());
        assert_eq!(dispatcher.sent_count(), 0);
    }

    #[test]
    fn secured_inform_confirmed_and_delivered() {
        let (mut mp, mut usm, local, meta, pdu) = secured_inform();
        assert_eq!(usm.pending_exchanges(), 1);

        let mut dispatcher = RecordingDispatcher::new();
        let (events, mut receiver) = collector();
        receiver.deliver(&mut mp, &mut usm, &local, &AllowAll, &mut dispatcher, meta, pdu);

        assert_eq!(dispatcher.sent_count(), 1);
        assert_eq!(usm.pending_exchanges(), 0);
        assert_eq!(receiver.stats().delivered, 1);

        let events = events.lock().unwrap();
        let event = &events[0];
        assert!(event.confirmed);
        assert_eq!(event.trap_oid, oids::link_up());
        assert_eq!(event.context_engine_id.as_ref(), RECEIVER_ENGINE);
        assert!(matches!(
            &event.security,
            SecurityInfo::Usm { user_name, .. } if user_name.as_ref() == b"admin"
        ));
    }

    #[test]
    fn denied_notification_dropped_without_reply() {
        let (mut mp, mut usm, local, meta, pdu) = secured_inform();
        assert_eq!(usm.pending_exchanges(), 1);

        let mut dispatcher = RecordingDispatcher::new();
        let (events, mut receiver) = collector();
        receiver.deliver(&mut mp, &mut usm, &local, &DenyAll, &mut dispatcher, meta, pdu);

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(dispatcher.sent_count(), 0);
        assert_eq!(receiver.stats().dropped_denied, 1);
        assert_eq!(receiver.stats().delivered, 0);
        // The parked security state is released, not leaked.
        assert_eq!(usm.pending_exchanges(), 0);
    }

    #[test]
    fn access_oracle_sees_the_notify_view() {
        struct Probe(Arc<Mutex<Vec<(String, Oid)>>>);

        impl AccessControl for Probe {
            fn is_allowed(&self, _security: &SecurityInfo, view: &str, oid: &Oid) -> bool {
                self.0.lock().unwrap().push((view.to_string(), oid.clone()));
                true
            }
        }

        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        let (_events, mut receiver) = collector();

        let checks = Arc::new(Mutex::new(Vec::new()));
        let probe = Probe(Arc::clone(&checks));
        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &probe,
            &mut dispatcher,
            community_meta(Version::V2c),
            trap_pdu(oids::cold_start()),
        );

        let checks = checks.lock().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].0, NOTIFY_VIEW);
        assert_eq!(checks[0].1, oids::cold_start());
    }

    #[test]
    fn malformed_notification_dropped() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        let (events, mut receiver) = collector();

        let mut short = trap_pdu(oids::link_down());
        short.varbinds.truncate(1);
        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            short,
        );

        let mut wrong_type = trap_pdu(oids::link_down());
        wrong_type.varbinds[1].value = Value::Integer(9);
        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            wrong_type,
        );

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(dispatcher.sent_count(), 0);
        assert_eq!(receiver.stats().dropped_malformed, 2);
        assert_eq!(receiver.stats().delivered, 0);
    }

    #[test]
    fn confirm_send_failure_counted_not_fatal() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        dispatcher.fail_next_send("socket closed");
        let (events, mut receiver) = collector();

        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            inform_pdu(),
        );

        assert_eq!(receiver.stats().confirm_send_failures, 1);
        assert_eq!(receiver.stats().delivered, 1);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn delivery_without_callback_is_harmless() {
        let mut mp = MessageProcessor::new();
        let mut usm = Usm::new();
        let local = LocalEngine::new(RECEIVER_ENGINE);
        let mut dispatcher = RecordingDispatcher::new();
        let mut receiver = NotificationReceiver::new();

        receiver.deliver(
            &mut mp,
            &mut usm,
            &local,
            &AllowAll,
            &mut dispatcher,
            community_meta(Version::V2c),
            trap_pdu(oids::warm_start()),
        );

        assert_eq!(receiver.stats().delivered, 1);
    }
}
