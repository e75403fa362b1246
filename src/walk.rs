//! Subtree walking on top of the command generator.
//!
//! A walk repeatedly issues GetNext (or GetBulk) requests, advancing a
//! set of column positions by the OIDs each response returns. Columns
//! retire individually: an exception value ends its column, and a
//! returned OID that fails to advance is a protocol violation that ends
//! the column and flags the step. The walk stops when no columns
//! remain, when a response is terminal, or when the per-step callback
//! returns `false`.
//!
//! Each step is an ordinary engine submission with its own retry
//! budget; the per-step callback receives the complete response row,
//! exception values included.

use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::error::{Error, ErrorIndication, ErrorStatus, Result};
use crate::message::Version;
use crate::mp::Target;
use crate::oid::Oid;
use crate::pdu::Pdu;
use crate::varbind::VarBind;

/// One walk step: the response row for a single request.
///
/// A step is terminal when `indication` names a failure other than
/// [`ErrorIndication::OidNotIncreasing`], when `error_status` is
/// non-zero, or when every active column has retired. A clean end of
/// the walk shows up as a step with no varbinds and no error, or as a
/// row whose entries are all exception values.
#[derive(Debug, Clone)]
pub struct WalkStep {
    /// Failure indication, or the non-increasing flag on a data row.
    pub indication: Option<ErrorIndication>,
    /// Protocol error-status reported by the peer, zero on data rows.
    pub error_status: i32,
    pub error_index: i32,
    /// The full response row, exception values included.
    pub varbinds: Vec<VarBind>,
}

/// Per-step walk callback; return `false` to stop walking.
pub type WalkCallback = Box<dyn FnMut(&mut Engine, &mut dyn Dispatcher, &WalkStep) -> bool>;

enum WalkKind {
    Next,
    Bulk {
        non_repeaters: usize,
        max_repetitions: i32,
    },
}

struct WalkState {
    target: Target,
    /// Current position of each active column. For GetBulk the leading
    /// `non_repeaters` entries never move.
    columns: Vec<Oid>,
    kind: WalkKind,
    callback: WalkCallback,
}

pub(crate) fn start_next(
    engine: &mut Engine,
    dispatcher: &mut dyn Dispatcher,
    target: Target,
    oids: &[Oid],
    callback: WalkCallback,
) -> Result<u32> {
    if oids.is_empty() {
        return Err(Error::Config("a walk needs at least one seed OID".into()).boxed());
    }
    submit_step(
        engine,
        dispatcher,
        WalkState {
            target,
            columns: oids.to_vec(),
            kind: WalkKind::Next,
            callback,
        },
    )
}

pub(crate) fn start_bulk(
    engine: &mut Engine,
    dispatcher: &mut dyn Dispatcher,
    target: Target,
    non_repeaters: &[Oid],
    repeating: &[Oid],
    max_repetitions: i32,
    callback: WalkCallback,
) -> Result<u32> {
    if target.version() == Version::V1 {
        return Err(Error::Config("GetBulk requires v2c or v3".into()).boxed());
    }
    if repeating.is_empty() {
        return Err(Error::Config("a bulk walk needs at least one repeating OID".into()).boxed());
    }
    let mut columns = non_repeaters.to_vec();
    columns.extend_from_slice(repeating);
    submit_step(
        engine,
        dispatcher,
        WalkState {
            target,
            columns,
            kind: WalkKind::Bulk {
                non_repeaters: non_repeaters.len(),
                max_repetitions,
            },
            callback,
        },
    )
}

fn next_request(state: &WalkState) -> Pdu {
    match state.kind {
        WalkKind::Next => Pdu::get_next_request(0, &state.columns),
        WalkKind::Bulk {
            non_repeaters,
            max_repetitions,
        } => Pdu::get_bulk(0, non_repeaters as i32, max_repetitions, &state.columns),
    }
}

fn submit_step(
    engine: &mut Engine,
    dispatcher: &mut dyn Dispatcher,
    state: WalkState,
) -> Result<u32> {
    let pdu = next_request(&state);
    let target = state.target.clone();
    engine.submit(
        dispatcher,
        target,
        pdu,
        Box::new(move |engine, dispatcher, _handle, outcome| {
            advance(engine, dispatcher, state, outcome);
        }),
    )
}

/// Process one response and issue the follow-up request.
fn advance(
    engine: &mut Engine,
    dispatcher: &mut dyn Dispatcher,
    mut state: WalkState,
    outcome: std::result::Result<Pdu, ErrorIndication>,
) {
    let pdu = match outcome {
        Ok(pdu) => pdu,
        Err(indication) => {
            let step = WalkStep {
                indication: Some(indication),
                error_status: 0,
                error_index: 0,
                varbinds: Vec::new(),
            };
            (state.callback)(engine, dispatcher, &step);
            return;
        }
    };

    if pdu.is_error() {
        // A v1 agent reports the end of the tree as noSuchName; that is
        // the normal end of a v1 walk, not a failure.
        let step = if state.target.version() == Version::V1
            && pdu.error_status_enum() == ErrorStatus::NoSuchName
        {
            WalkStep {
                indication: None,
                error_status: 0,
                error_index: 0,
                varbinds: Vec::new(),
            }
        } else {
            WalkStep {
                indication: None,
                error_status: pdu.error_status,
                error_index: pdu.error_index,
                varbinds: pdu.varbinds,
            }
        };
        (state.callback)(engine, dispatcher, &step);
        return;
    }

    if pdu.varbinds.is_empty() {
        let step = WalkStep {
            indication: Some(ErrorIndication::EmptyResponse),
            error_status: 0,
            error_index: 0,
            varbinds: Vec::new(),
        };
        (state.callback)(engine, dispatcher, &step);
        return;
    }

    let (next_columns, violation) = derive_next(&state, &pdu.varbinds);

    let step = WalkStep {
        indication: violation.then_some(ErrorIndication::OidNotIncreasing),
        error_status: 0,
        error_index: 0,
        varbinds: pdu.varbinds,
    };
    if !(state.callback)(engine, dispatcher, &step) {
        tracing::debug!(target: "snmp_engine::walk", "application stopped the walk");
        return;
    }
    if next_columns.is_empty() {
        tracing::debug!(target: "snmp_engine::walk", "walk complete, no columns left");
        return;
    }

    state.columns = next_columns;
    if let Err(error) = submit_step(engine, dispatcher, state) {
        // Nothing is pending for this walk anymore; hand the error to
        // the engine call that was processing the response.
        tracing::warn!(
            target: "snmp_engine::walk",
            { error = %error },
            "walk could not continue"
        );
        engine.stash_walk_error(error);
    }
}

/// Derive the next request's column positions from a response row.
fn derive_next(state: &WalkState, returned: &[VarBind]) -> (Vec<Oid>, bool) {
    match state.kind {
        WalkKind::Next => advance_row(&state.columns, returned),
        WalkKind::Bulk { non_repeaters, .. } => {
            let leading = non_repeaters.min(state.columns.len());
            let repeating = &state.columns[leading..];
            if repeating.is_empty() {
                return (Vec::new(), false);
            }
            // Repetitions come in rows of the repeating width; a short
            // final row is a size-limit truncation and is ignored.
            let tail = &returned[non_repeaters.min(returned.len())..];
            let (advanced, violation) = match tail.chunks_exact(repeating.len()).last() {
                Some(last_row) => advance_row(repeating, last_row),
                None => (Vec::new(), false),
            };
            if advanced.is_empty() {
                // Only the fixed leading entries would remain, and they
                // never advance; the walk is done.
                return (Vec::new(), violation);
            }
            let mut next = state.columns[..leading].to_vec();
            next.extend(advanced);
            (next, violation)
        }
    }
}

/// Row-advance rule shared by both walk styles.
///
/// Exception-valued entries retire their column. A returned OID that is
/// not strictly greater than the requested one is a protocol violation:
/// the column retires and the violation is reported. Surviving columns
/// move to the returned OID. A row shorter than the request drops the
/// unanswered columns.
fn advance_row(requested: &[Oid], returned: &[VarBind]) -> (Vec<Oid>, bool) {
    let mut next = Vec::with_capacity(requested.len());
    let mut violation = false;
    for (position, varbind) in requested.iter().zip(returned) {
        if varbind.value.is_exception() {
            continue;
        }
        if varbind.oid <= *position {
            tracing::debug!(
                target: "snmp_engine::walk",
                { snmp.requested = %position, snmp.returned = %varbind.oid },
                "peer did not advance the tree"
            );
            violation = true;
            continue;
        }
        next.push(varbind.oid.clone());
    }
    if returned.len() < requested.len() {
        tracing::debug!(
            target: "snmp_engine::walk",
            { snmp.requested = requested.len(), snmp.returned = returned.len() },
            "response row shorter than the request"
        );
    }
    (next, violation)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::dispatch::{RecordingDispatcher, ResponseBuilder};
    use crate::message::Message;
    use crate::oid;
    use crate::pdu::PduType;
    use crate::v3::engine::LocalEngine;
    use crate::value::Value;

    fn noop_callback() -> WalkCallback {
        Box::new(|_, _, _| true)
    }

    fn next_state(columns: &[Oid]) -> WalkState {
        WalkState {
            target: community_target(),
            columns: columns.to_vec(),
            kind: WalkKind::Next,
            callback: noop_callback(),
        }
    }

    fn bulk_state(columns: &[Oid], non_repeaters: usize) -> WalkState {
        WalkState {
            target: community_target(),
            columns: columns.to_vec(),
            kind: WalkKind::Bulk {
                non_repeaters,
                max_repetitions: 2,
            },
            callback: noop_callback(),
        }
    }

    fn addr() -> SocketAddr {
        "198.51.100.40:161".parse().unwrap()
    }

    fn community_target() -> Target {
        Target::community(addr(), Version::V2c, b"public".as_slice())
    }

    fn engine_fixture() -> (Engine, RecordingDispatcher) {
        let engine = Engine::new(LocalEngine::new(b"\x80\x00\x4f\xb8\x05walkr".as_slice()));
        (engine, RecordingDispatcher::new())
    }

    fn collector() -> (
        Arc<Mutex<Vec<WalkStep>>>,
        impl FnMut(&mut Engine, &mut dyn Dispatcher, &WalkStep) -> bool + 'static,
    ) {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&steps);
        let callback = move |_: &mut Engine, _: &mut dyn Dispatcher, step: &WalkStep| {
            sink.lock().unwrap().push(step.clone());
            true
        };
        (steps, callback)
    }

    /// Answer the engine's most recent request.
    fn respond(
        engine: &mut Engine,
        dispatcher: &mut RecordingDispatcher,
        build: impl FnOnce(ResponseBuilder) -> Bytes,
    ) {
        let request_id = dispatcher.last_sent().unwrap().request_id.unwrap();
        let data = build(ResponseBuilder::new(request_id));
        engine.receive_message(dispatcher, addr(), data).unwrap();
    }

    fn sent_request(dispatcher: &RecordingDispatcher, index: usize) -> Pdu {
        let sent = dispatcher.sent();
        let message = Message::decode(sent[index].data.clone()).unwrap();
        message.try_into_pdu().unwrap()
    }

    // Row-advance rules.

    #[test]
    fn exceptions_retire_their_columns() {
        let requested = [oid!(1, 3, 1), oid!(1, 3, 2), oid!(1, 3, 3)];
        let returned = [
            VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 2, 1), Value::NoSuchObject),
            VarBind::new(oid!(1, 3, 3, 1), Value::Integer(3)),
        ];

        let (next, violation) = advance_row(&requested, &returned);
        assert_eq!(next, vec![oid!(1, 3, 1, 1), oid!(1, 3, 3, 1)]);
        assert!(!violation);
    }

    #[test]
    fn non_increasing_is_flagged_and_dropped() {
        let requested = [oid!(1, 3, 1), oid!(1, 3, 2)];
        let returned = [
            VarBind::new(oid!(1, 3, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 2, 1), Value::Integer(2)),
        ];

        let (next, violation) = advance_row(&requested, &returned);
        assert_eq!(next, vec![oid!(1, 3, 2, 1)]);
        assert!(violation);
    }

    #[test]
    fn all_end_of_mib_empties_the_set() {
        let requested = [oid!(1, 3, 1), oid!(1, 3, 2)];
        let returned = [
            VarBind::new(oid!(1, 3, 1, 9), Value::EndOfMibView),
            VarBind::new(oid!(1, 3, 2, 9), Value::EndOfMibView),
        ];

        let (next, violation) = advance_row(&requested, &returned);
        assert!(next.is_empty());
        assert!(!violation);
    }

    #[test]
    fn short_row_drops_unanswered_columns() {
        let requested = [oid!(1, 3, 1), oid!(1, 3, 2), oid!(1, 3, 3)];
        let returned = [VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1))];

        let (next, violation) = advance_row(&requested, &returned);
        assert_eq!(next, vec![oid!(1, 3, 1, 1)]);
        assert!(!violation);
    }

    #[test]
    fn bulk_advances_from_the_last_full_row() {
        let state = bulk_state(&[oid!(1, 3, 1), oid!(1, 3, 2)], 0);
        let returned = [
            VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 2, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 1, 2), Value::Integer(2)),
            VarBind::new(oid!(1, 3, 2, 2), Value::Integer(2)),
            // Truncated final row; must not drive the advance.
            VarBind::new(oid!(1, 3, 1, 3), Value::Integer(3)),
        ];

        let (next, violation) = derive_next(&state, &returned);
        assert_eq!(next, vec![oid!(1, 3, 1, 2), oid!(1, 3, 2, 2)]);
        assert!(!violation);
    }

    #[test]
    fn bulk_keeps_non_repeaters_and_stops_without_a_full_row() {
        let state = bulk_state(&[oid!(1, 3, 9), oid!(1, 3, 1), oid!(1, 3, 2)], 1);

        let full = [
            VarBind::new(oid!(1, 3, 9, 0), Value::TimeTicks(5)),
            VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 2, 1), Value::Integer(1)),
        ];
        let (next, _) = derive_next(&state, &full);
        assert_eq!(next, vec![oid!(1, 3, 9), oid!(1, 3, 1, 1), oid!(1, 3, 2, 1)]);

        // No complete repetition row: nothing can advance.
        let short = [
            VarBind::new(oid!(1, 3, 9, 0), Value::TimeTicks(5)),
            VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1)),
        ];
        let (next, violation) = derive_next(&state, &short);
        assert!(next.is_empty());
        assert!(!violation);
    }

    #[test]
    fn bulk_retires_a_column_at_end_of_mib() {
        let state = bulk_state(&[oid!(1, 3, 1), oid!(1, 3, 2)], 0);
        let returned = [
            VarBind::new(oid!(1, 3, 1, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 2, 1), Value::EndOfMibView),
        ];

        let (next, violation) = derive_next(&state, &returned);
        assert_eq!(next, vec![oid!(1, 3, 1, 1)]);
        assert!(!violation);
    }

    // Full walk flows over the engine.

    #[test]
    fn getnext_walks_until_end_of_mib() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1, 1)],
                callback,
            )
            .unwrap();
        assert_eq!(dispatcher.sent_count(), 1);

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::from("row one"))
                .build_v2c(b"public")
        });
        // The follow-up asks from the returned OID.
        let followup = sent_request(&dispatcher, 1);
        assert_eq!(followup.pdu_type, PduType::GetNextRequest);
        assert_eq!(followup.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 2, 0), Value::Integer(7))
                .build_v2c(b"public")
        });
        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 2, 0), Value::EndOfMibView)
                .build_v2c(b"public")
        });

        // Three requests went out; the all-exceptions row ended it.
        assert_eq!(dispatcher.sent_count(), 3);
        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].varbinds[0].value, Value::from("row one"));
        assert_eq!(steps[1].varbinds[0].value, Value::Integer(7));
        assert_eq!(steps[2].varbinds[0].value, Value::EndOfMibView);
        assert!(steps.iter().all(|s| s.indication.is_none()));
        assert_eq!(dispatcher.jobs_started(), 3);
        assert_eq!(dispatcher.jobs_finished(), 3);
    }

    #[test]
    fn callback_false_stops_the_walk() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let steps = Arc::new(Mutex::new(0_u32));
        let sink = Arc::clone(&steps);

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1)],
                move |_: &mut Engine, _: &mut dyn Dispatcher, _: &WalkStep| {
                    *sink.lock().unwrap() += 1;
                    false
                },
            )
            .unwrap();

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(1))
                .build_v2c(b"public")
        });

        assert_eq!(*steps.lock().unwrap(), 1);
        assert_eq!(dispatcher.sent_count(), 1);
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn unmoved_oid_reports_not_increasing_and_stops() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1, 1)],
                callback,
            )
            .unwrap();

        // The peer echoes the requested OID without advancing.
        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1), Value::Integer(0))
                .build_v2c(b"public")
        });

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].indication, Some(ErrorIndication::OidNotIncreasing));
        assert_eq!(dispatcher.sent_count(), 1);
    }

    #[test]
    fn surviving_columns_walk_on_alone() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 2), oid!(1, 3, 6, 1, 2, 1, 3)],
                callback,
            )
            .unwrap();

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 2, 1), Value::Integer(1))
                .varbind(oid!(1, 3, 6, 1, 2, 1, 3, 1), Value::EndOfMibView)
                .build_v2c(b"public")
        });

        let followup = sent_request(&dispatcher, 1);
        assert_eq!(followup.varbinds.len(), 1);
        assert_eq!(followup.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 2, 1));

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 2, 2), Value::EndOfMibView)
                .build_v2c(b"public")
        });

        assert_eq!(dispatcher.sent_count(), 2);
        assert_eq!(steps.lock().unwrap().len(), 2);
    }

    #[test]
    fn v1_no_such_name_ends_the_walk_cleanly() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();
        let target = Target::community(addr(), Version::V1, b"public".as_slice());

        engine
            .walk_next(&mut dispatcher, target, &[oid!(1, 3, 6, 1, 2, 1, 1)], callback)
            .unwrap();

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::from("v1 row"))
                .build_v1(b"public")
        });
        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null)
                .error_status(2)
                .error_index(1)
                .build_v1(b"public")
        });

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 2);
        let last = &steps[1];
        assert!(last.indication.is_none());
        assert_eq!(last.error_status, 0);
        assert!(last.varbinds.is_empty());
        assert_eq!(dispatcher.sent_count(), 2);
    }

    #[test]
    fn protocol_error_status_ends_the_walk() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1)],
                callback,
            )
            .unwrap();

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1), Value::Null)
                .error_status(5)
                .error_index(1)
                .build_v2c(b"public")
        });

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].error_status, 5);
        assert_eq!(steps[0].error_index, 1);
        assert_eq!(steps[0].varbinds.len(), 1);
        assert_eq!(dispatcher.sent_count(), 1);
    }

    #[test]
    fn zero_varbind_response_is_flagged_empty() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_next(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1)],
                callback,
            )
            .unwrap();

        respond(&mut engine, &mut dispatcher, |r| r.build_v2c(b"public"));

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].indication, Some(ErrorIndication::EmptyResponse));
        assert_eq!(dispatcher.sent_count(), 1);
    }

    #[test]
    fn bulk_walk_requests_and_advances_rows() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        engine
            .walk_bulk(
                &mut dispatcher,
                community_target(),
                &[oid!(1, 3, 6, 1, 2, 1, 1, 3)],
                &[oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1)],
                2,
                callback,
            )
            .unwrap();

        let first = sent_request(&dispatcher, 0);
        assert_eq!(first.pdu_type, PduType::GetBulkRequest);
        assert_eq!(first.non_repeaters(), 1);
        assert_eq!(first.max_repetitions(), 2);

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(99))
                .varbind(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1), Value::Integer(1))
                .varbind(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2), Value::Integer(2))
                .build_v2c(b"public")
        });

        // Fixed entry unchanged, repeating column moved to the last row.
        let followup = sent_request(&dispatcher, 1);
        assert_eq!(followup.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 3));
        assert_eq!(followup.varbinds[1].oid, oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2));

        respond(&mut engine, &mut dispatcher, |r| {
            r.varbind(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(99))
                .varbind(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 2), Value::EndOfMibView)
                .build_v2c(b"public")
        });

        assert_eq!(dispatcher.sent_count(), 2);
        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].varbinds.len(), 3);
    }

    #[test]
    fn bulk_walk_rejects_v1_targets() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let target = Target::community(addr(), Version::V1, b"public".as_slice());

        let err = engine
            .walk_bulk(
                &mut dispatcher,
                target,
                &[],
                &[oid!(1, 3, 6, 1, 2, 1, 2)],
                10,
                |_: &mut Engine, _: &mut dyn Dispatcher, _: &WalkStep| true,
            )
            .unwrap_err();
        assert!(matches!(*err, Error::Config(_)));
        assert_eq!(dispatcher.sent_count(), 0);
    }

    #[test]
    fn timeout_surfaces_as_a_terminal_step() {
        let (mut engine, mut dispatcher) = engine_fixture();
        let (steps, callback) = collector();

        let target = Target::community(addr(), Version::V2c, b"public".as_slice())
            .with_timeout(1.0)
            .with_retries(0);
        engine
            .walk_next(&mut dispatcher, target, &[oid!(1, 3, 6, 1, 2, 1, 1)], callback)
            .unwrap();

        for _ in 0..4 {
            engine.on_tick(&mut dispatcher);
        }

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].indication, Some(ErrorIndication::RequestTimedOut));
        assert!(steps[0].varbinds.is_empty());
        assert_eq!(dispatcher.jobs_started(), dispatcher.jobs_finished());
    }
}
