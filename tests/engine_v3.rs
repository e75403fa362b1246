//! SNMPv3 flows between two engines: discovery, secured informs, and
//! the report machinery when security checks fail.
//!
//! The sender engine plays the notification originator; the receiver
//! engine is authoritative for the informs it accepts. Datagrams move
//! between them by lifting bytes off one recording dispatcher and
//! feeding them to the other engine.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use snmp_engine::notify::oids;
use snmp_engine::v3::{AuthProtocol, PrivProtocol, UsmUserConfig};
use snmp_engine::{
    Dispatcher, Engine, ErrorIndication, LocalEngine, NotificationEvent, Pdu, PduType,
    RecordingDispatcher, SecurityInfo, SecurityLevel, Target, Value, VarBind, oid,
};

const SENDER_ENGINE: &[u8] = b"\x80\x00\x4f\xb8\x05sendr";
const RECEIVER_ENGINE: &[u8] = b"\x80\x00\x4f\xb8\x05recvr";

fn sender_addr() -> SocketAddr {
    "198.51.100.50:5161".parse().unwrap()
}

fn receiver_addr() -> SocketAddr {
    "198.51.100.51:162".parse().unwrap()
}

fn admin_user() -> UsmUserConfig {
    UsmUserConfig::new("admin")
        .auth(AuthProtocol::Sha256, "authpass123")
        .privacy(PrivProtocol::Aes128, "privpass123")
}

fn engine_pair() -> (Engine, RecordingDispatcher, Engine, RecordingDispatcher) {
    let mut sender = Engine::new(LocalEngine::new(SENDER_ENGINE));
    let mut sender_net = RecordingDispatcher::new();
    sender.attach(&mut sender_net);
    sender.add_usm_user(admin_user()).unwrap();

    let mut receiver = Engine::new(LocalEngine::with_boots(RECEIVER_ENGINE, 4));
    let mut receiver_net = RecordingDispatcher::new();
    receiver.attach(&mut receiver_net);
    receiver.add_usm_user(admin_user()).unwrap();

    (sender, sender_net, receiver, receiver_net)
}

fn inform_target(level: SecurityLevel) -> Target {
    Target::usm(receiver_addr(), b"admin".as_slice(), level)
}

fn link_up_inform() -> Pdu {
    Pdu {
        pdu_type: PduType::InformRequest,
        request_id: 0,
        error_status: 0,
        error_index: 0,
        varbinds: vec![
            VarBind::new(oids::sys_uptime(), Value::TimeTicks(4321)),
            VarBind::new(
                oids::snmp_trap_oid(),
                Value::ObjectIdentifier(oids::link_up()),
            ),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2),
                Value::Integer(2),
            ),
        ],
    }
}

fn watch_events(engine: &mut Engine) -> Arc<Mutex<Vec<NotificationEvent>>> {
    let events: Arc<Mutex<Vec<NotificationEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.on_notification(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    events
}

fn deliver_last(
    from: &RecordingDispatcher,
    engine: &mut Engine,
    dispatcher: &mut RecordingDispatcher,
    source: SocketAddr,
) {
    let data = from.last_sent().unwrap().data;
    engine.receive_message(dispatcher, source, data).unwrap();
}

#[test]
fn discovery_then_secured_inform_round_trip() {
    let (mut sender, mut sender_net, mut receiver, mut receiver_net) = engine_pair();
    let events = watch_events(&mut receiver);

    let outcomes: Arc<Mutex<Vec<std::result::Result<Pdu, ErrorIndication>>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthPriv),
            link_up_inform(),
            Box::new(
                move |_: &mut Engine, _: &mut dyn Dispatcher, _: u32, outcome| {
                    sink.lock().unwrap().push(outcome);
                },
            ),
        )
        .unwrap();

    // The sender has never talked to this engine, so the first
    // datagram is an unauthenticated discovery probe.
    assert_eq!(sender_net.sent_count(), 1);
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());

    // The receiver answers with an unknown-engine report that carries
    // its engine ID, boots and time; the sender resends secured.
    assert_eq!(receiver_net.sent_count(), 1);
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    assert_eq!(sender_net.sent_count(), 2);
    assert!(outcomes.lock().unwrap().is_empty());

    // The secured inform is accepted in one pass and confirmed before
    // the event callback fires.
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    assert_eq!(receiver.notify_stats().delivered, 1);
    assert_eq!(receiver_net.sent_count(), 2);

    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.confirmed);
        assert_eq!(event.trap_oid, oids::link_up());
        assert_eq!(event.uptime, 4321);
        assert_eq!(event.varbinds.len(), 1);
        assert!(matches!(
            &event.security,
            SecurityInfo::Usm { user_name, security_level, engine_id }
                if &user_name[..] == b"admin"
                    && *security_level == SecurityLevel::AuthPriv
                    && &engine_id[..] == RECEIVER_ENGINE
        ));
    }

    // The confirmation settles the sender's request.
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    let pdu = outcomes[0].as_ref().unwrap();
    assert_eq!(pdu.varbinds.len(), 3);
    assert_eq!(sender.outstanding(), 0);
    assert_eq!(sender_net.outstanding_jobs(), 0);
}

#[test]
fn auth_no_priv_inform_never_touches_the_cipher() {
    let (mut sender, mut sender_net, mut receiver, mut receiver_net) = engine_pair();
    let events = watch_events(&mut receiver);

    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthNoPriv),
            link_up_inform(),
            Box::new(|_: &mut Engine, _: &mut dyn Dispatcher, _: u32, _| {}),
        )
        .unwrap();
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());

    assert_eq!(receiver.notify_stats().delivered, 1);
    assert_eq!(receiver.usm_stats().decryption_errors, 0);
    let events = events.lock().unwrap();
    assert!(matches!(
        &events[0].security,
        SecurityInfo::Usm { security_level, .. } if *security_level == SecurityLevel::AuthNoPriv
    ));
}

#[test]
fn tampered_inform_is_reported_not_delivered() {
    let (mut sender, mut sender_net, mut receiver, mut receiver_net) = engine_pair();
    let events = watch_events(&mut receiver);

    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthPriv),
            link_up_inform(),
            Box::new(|_: &mut Engine, _: &mut dyn Dispatcher, _: u32, _| {}),
        )
        .unwrap();
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());

    // Flip the last ciphertext byte of the secured message.
    let mut data = sender_net.last_sent().unwrap().data.to_vec();
    let last = data.len() - 1;
    data[last] ^= 0x01;
    receiver
        .receive_message(&mut receiver_net, sender_addr(), Bytes::from(data))
        .unwrap();

    assert_eq!(receiver.usm_stats().wrong_digests, 1);
    assert_eq!(receiver.notify_stats().delivered, 0);
    assert!(events.lock().unwrap().is_empty());
    // Discovery report plus the wrong-digest report.
    assert_eq!(receiver_net.sent_count(), 2);
}

#[test]
fn wrong_password_settles_as_authentication_failure() {
    let (mut sender, mut sender_net, mut receiver, mut receiver_net) = engine_pair();
    // Re-provision the sender's user with a different secret.
    assert!(sender.remove_usm_user(b"admin"));
    sender
        .add_usm_user(
            UsmUserConfig::new("admin")
                .auth(AuthProtocol::Sha256, "wrongsecret99")
                .privacy(PrivProtocol::Aes128, "privpass123"),
        )
        .unwrap();

    let outcomes: Arc<Mutex<Vec<std::result::Result<Pdu, ErrorIndication>>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthPriv).with_retries(0),
            link_up_inform(),
            Box::new(
                move |_: &mut Engine, _: &mut dyn Dispatcher, _: u32, outcome| {
                    sink.lock().unwrap().push(outcome);
                },
            ),
        )
        .unwrap();
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    // Secured attempt, signed with the wrong key.
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    assert_eq!(receiver.usm_stats().wrong_digests, 1);
    assert_eq!(receiver_net.sent_count(), 2);

    // The wrong-digest report comes back; with no retries left the
    // request settles as a security failure.
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(ErrorIndication::AuthenticationFailure)
    ));
    assert_eq!(sender.outstanding(), 0);
    assert_eq!(sender_net.outstanding_jobs(), 0);
}

// Once the authoritative engine is known, later requests go out
// secured on the first attempt.
#[test]
fn second_inform_skips_discovery() {
    let (mut sender, mut sender_net, mut receiver, mut receiver_net) = engine_pair();

    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthPriv),
            link_up_inform(),
            Box::new(|_: &mut Engine, _: &mut dyn Dispatcher, _: u32, _| {}),
        )
        .unwrap();
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    deliver_last(&receiver_net, &mut sender, &mut sender_net, receiver_addr());
    assert_eq!(sender_net.sent_count(), 2);
    assert_eq!(receiver.notify_stats().delivered, 1);

    sender
        .submit(
            &mut sender_net,
            inform_target(SecurityLevel::AuthPriv),
            link_up_inform(),
            Box::new(|_: &mut Engine, _: &mut dyn Dispatcher, _: u32, _| {}),
        )
        .unwrap();
    // No probe this time: one secured datagram, accepted directly.
    assert_eq!(sender_net.sent_count(), 3);
    deliver_last(&sender_net, &mut receiver, &mut receiver_net, sender_addr());
    assert_eq!(receiver.notify_stats().delivered, 2);
    assert_eq!(receiver.usm_stats().not_in_time_windows, 0);
}
