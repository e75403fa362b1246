//! Shared test infrastructure for snmp-engine.
//!
//! Provides a simulated in-process agent backed by a sorted object
//! table, plus hex helpers for known-answer vectors. The agent never
//! opens a socket: tests pull the engine's last datagram off the
//! recording dispatcher, answer it here, and feed the response back
//! through `Engine::receive_message`.

// each test binary compiles this module and uses a subset of it
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use snmp_engine::message::{CommunityMessage, Message};
use snmp_engine::{Engine, Oid, Pdu, PduType, RecordingDispatcher, Value, VarBind, Version, oid};

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn decode_hex(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0, "odd-length hex string");
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("hex digit"))
        .collect()
}

/// A community-version agent simulated over a sorted object table.
pub struct SimAgent {
    version: Version,
    community: Bytes,
    objects: BTreeMap<Oid, Value>,
}

impl SimAgent {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            community: Bytes::from_static(b"public"),
            objects: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, oid: Oid, value: Value) {
        self.objects.insert(oid, value);
    }

    /// Answer the engine's most recent request and feed the response
    /// back in.
    pub fn respond(&mut self, engine: &mut Engine, dispatcher: &mut RecordingDispatcher) {
        let sent = dispatcher.last_sent().expect("engine sent nothing");
        let message = Message::decode(sent.data).expect("outgoing message must decode");
        let request = message.try_into_pdu().expect("outgoing message has no PDU");
        let reply = self.answer(&request);
        let data = CommunityMessage::new(self.version, self.community.clone(), reply).encode();
        engine
            .receive_message(dispatcher, sent.target, data)
            .expect("response must be accepted");
    }

    /// Build the response PDU for one request.
    pub fn answer(&mut self, request: &Pdu) -> Pdu {
        match request.pdu_type {
            PduType::GetRequest => self.answer_get(request),
            PduType::GetNextRequest => self.answer_next(request),
            PduType::GetBulkRequest => self.answer_bulk(request),
            PduType::SetRequest => self.answer_set(request),
            other => panic!("SimAgent cannot answer {other:?}"),
        }
    }

    fn answer_get(&self, request: &Pdu) -> Pdu {
        let mut varbinds = Vec::with_capacity(request.varbinds.len());
        for (index, vb) in request.varbinds.iter().enumerate() {
            match self.objects.get(&vb.oid) {
                Some(value) => varbinds.push(VarBind::new(vb.oid.clone(), value.clone())),
                None if self.version == Version::V1 => {
                    return self.no_such_name(request, index);
                }
                None => varbinds.push(VarBind::new(vb.oid.clone(), Value::NoSuchInstance)),
            }
        }
        response(request, varbinds)
    }

    fn answer_next(&self, request: &Pdu) -> Pdu {
        let mut varbinds = Vec::with_capacity(request.varbinds.len());
        for (index, vb) in request.varbinds.iter().enumerate() {
            match self.next_after(&vb.oid) {
                Some((oid, value)) => varbinds.push(VarBind::new(oid, value)),
                None if self.version == Version::V1 => {
                    return self.no_such_name(request, index);
                }
                None => varbinds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView)),
            }
        }
        response(request, varbinds)
    }

    fn answer_bulk(&self, request: &Pdu) -> Pdu {
        let non_repeaters = request.non_repeaters().max(0) as usize;
        let max_repetitions = request.max_repetitions().max(0) as usize;
        let mut varbinds = Vec::new();

        for vb in request.varbinds.iter().take(non_repeaters) {
            match self.next_after(&vb.oid) {
                Some((oid, value)) => varbinds.push(VarBind::new(oid, value)),
                None => varbinds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView)),
            }
        }

        let mut cursors: Vec<Oid> = request
            .varbinds
            .iter()
            .skip(non_repeaters)
            .map(|vb| vb.oid.clone())
            .collect();
        for _ in 0..max_repetitions {
            for cursor in &mut cursors {
                match self.next_after(cursor) {
                    Some((oid, value)) => {
                        varbinds.push(VarBind::new(oid.clone(), value));
                        *cursor = oid;
                    }
                    None => varbinds.push(VarBind::new(cursor.clone(), Value::EndOfMibView)),
                }
            }
        }
        response(request, varbinds)
    }

    fn answer_set(&mut self, request: &Pdu) -> Pdu {
        for vb in &request.varbinds {
            self.objects.insert(vb.oid.clone(), vb.value.clone());
        }
        response(request, request.varbinds.clone())
    }

    fn next_after(&self, oid: &Oid) -> Option<(Oid, Value)> {
        self.objects
            .range((Bound::Excluded(oid.clone()), Bound::Unbounded))
            .next()
            .map(|(oid, value)| (oid.clone(), value.clone()))
    }

    fn no_such_name(&self, request: &Pdu, index: usize) -> Pdu {
        Pdu {
            pdu_type: PduType::Response,
            request_id: request.request_id,
            error_status: 2,
            error_index: (index + 1) as i32,
            varbinds: request.varbinds.clone(),
        }
    }
}

fn response(request: &Pdu, varbinds: Vec<VarBind>) -> Pdu {
    Pdu {
        pdu_type: PduType::Response,
        request_id: request.request_id,
        error_status: 0,
        error_index: 0,
        varbinds,
    }
}

pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}

pub fn if_index_column() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1)
}

pub fn if_descr_column() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2)
}

/// System group and a three-row interface table.
pub fn system_mib(version: Version) -> SimAgent {
    let mut agent = SimAgent::new(version);
    agent.insert(sys_descr(), Value::from("Simulated router"));
    agent.insert(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(123_456));
    agent.insert(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Value::from("sim-router-1"));
    for (row, name) in [(1u32, "eth0"), (2, "eth1"), (3, "lo")] {
        agent.insert(if_index_column().child(row), Value::Integer(row as i32));
        agent.insert(if_descr_column().child(row), Value::from(name));
    }
    agent
}
