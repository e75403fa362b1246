//! Engine identity and time synchronization (RFC 3414 §2.2-2.3).
//!
//! Authenticated SNMPv3 exchanges are anchored to the authoritative
//! engine's boots counter and clock. This module carries both sides of
//! that relationship:
//!
//! - [`LocalEngine`]: this engine's identity when it is authoritative
//!   (responding to requests, receiving Informs)
//! - [`EngineState`]: the learned timeline of one remote authoritative
//!   engine, updated by authenticated traffic and checked against the
//!   150-second window
//! - [`report_oids`] and [`report_indication`]: the usmStats instances
//!   carried in Report PDUs and their mapping back to status indications

use std::time::Instant;

use bytes::Bytes;

use crate::error::ErrorIndication;
use crate::oid::Oid;

/// Time window in seconds (RFC 3414 §2.2.3).
pub const TIME_WINDOW: u32 = 150;

/// Maximum valid snmpEngineTime/snmpEngineBoots value (RFC 3414 §2.2.2).
///
/// snmpEngineTime is a 31-bit value. A boots counter stuck at this
/// maximum latches the engine: no message is ever inside its window.
pub const MAX_ENGINE_TIME: u32 = 2147483647;

// Engine ID prefix: enterprise arc with the high bit set, format octet 5
// (administratively assigned octets), per RFC 3411 SnmpEngineID.
const ENGINE_ID_PREFIX: [u8; 5] = [0x80, 0x00, 0x4f, 0xb8, 0x05];

/// usmStats counter instances carried in Report PDUs (RFC 3414 §5).
pub mod report_oids {
    use crate::oid::Oid;

    /// usmStatsUnsupportedSecLevels.0
    pub fn unsupported_sec_levels() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0)
    }

    /// usmStatsNotInTimeWindows.0
    pub fn not_in_time_windows() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0)
    }

    /// usmStatsUnknownUserNames.0
    pub fn unknown_user_names() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0)
    }

    /// usmStatsUnknownEngineIDs.0
    pub fn unknown_engine_ids() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0)
    }

    /// usmStatsWrongDigests.0
    pub fn wrong_digests() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0)
    }

    /// usmStatsDecryptionErrors.0
    pub fn decryption_errors() -> Oid {
        crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0)
    }
}

/// Map a Report PDU's usmStats OID back to the status indication it
/// conveys. Returns `None` for OIDs that are not USM report instances.
pub fn report_indication(oid: &Oid) -> Option<ErrorIndication> {
    const USM_STATS: [u32; 9] = [1, 3, 6, 1, 6, 3, 15, 1, 1];

    let arcs = oid.arcs();
    if arcs.len() != 11 || arcs[..9] != USM_STATS || arcs[10] != 0 {
        return None;
    }
    match arcs[9] {
        1 => Some(ErrorIndication::UnsupportedSecurityLevel),
        2 => Some(ErrorIndication::NotInTimeWindow),
        3 => Some(ErrorIndication::UnknownUserName),
        4 => Some(ErrorIndication::UnknownEngineId),
        5 => Some(ErrorIndication::AuthenticationFailure),
        6 => Some(ErrorIndication::DecryptionError),
        _ => None,
    }
}

/// This engine's identity in the authoritative role.
///
/// Boots would normally be persisted across restarts; callers that do so
/// pass the incremented value to [`LocalEngine::with_boots`].
#[derive(Debug, Clone)]
pub struct LocalEngine {
    engine_id: Bytes,
    boots: u32,
    started: Instant,
}

impl LocalEngine {
    /// Create a local engine with the given ID and a boots count of 1.
    pub fn new(engine_id: impl Into<Bytes>) -> Self {
        Self::with_boots(engine_id, 1)
    }

    /// Create a local engine with an explicit boots count.
    pub fn with_boots(engine_id: impl Into<Bytes>, boots: u32) -> Self {
        Self {
            engine_id: engine_id.into(),
            boots,
            started: Instant::now(),
        }
    }

    /// Create a local engine with a freshly generated random engine ID.
    pub fn with_random_id() -> Self {
        let mut suffix = [0u8; 8];
        if getrandom::fill(&mut suffix).is_err() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            suffix = nanos.to_be_bytes();
        }
        let mut engine_id = Vec::with_capacity(13);
        engine_id.extend_from_slice(&ENGINE_ID_PREFIX);
        engine_id.extend_from_slice(&suffix);
        Self::new(engine_id)
    }

    /// The engine ID.
    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    /// snmpEngineBoots.
    pub fn boots(&self) -> u32 {
        self.boots
    }

    /// snmpEngineTime: seconds since this engine instance started,
    /// capped at [`MAX_ENGINE_TIME`].
    pub fn time(&self) -> u32 {
        std::cmp::min(self.started.elapsed().as_secs(), MAX_ENGINE_TIME as u64) as u32
    }

    /// Whether the given ID names this engine.
    pub fn is_local(&self, engine_id: &[u8]) -> bool {
        self.engine_id == engine_id
    }

    /// Authoritative time-window check (RFC 3414 §3.2.7a): the message
    /// must carry our current boots and a time within 150 seconds of our
    /// clock. A boots counter latched at the maximum rejects everything.
    pub fn in_window(&self, msg_boots: u32, msg_time: u32) -> bool {
        if self.boots == MAX_ENGINE_TIME {
            return false;
        }
        if msg_boots != self.boots {
            return false;
        }
        msg_time.abs_diff(self.time()) <= TIME_WINDOW
    }
}

/// Learned timeline of one remote authoritative engine.
///
/// `latest_received_engine_time` tracks the highest authenticated time
/// seen for the current boots value; it only moves forward, which is what
/// makes replayed messages fall out of the window.
#[derive(Debug, Clone)]
pub struct EngineState {
    engine_id: Bytes,
    engine_boots: u32,
    engine_time: u32,
    synced_at: Instant,
    latest_received_engine_time: u32,
}

impl EngineState {
    /// Record a first sighting of an engine.
    ///
    /// Discovery starts from `(0, 0)`; real values arrive with the first
    /// authenticated message and are applied via [`EngineState::update_time`].
    pub fn new(engine_id: impl Into<Bytes>, engine_boots: u32, engine_time: u32) -> Self {
        Self {
            engine_id: engine_id.into(),
            engine_boots,
            engine_time,
            synced_at: Instant::now(),
            latest_received_engine_time: engine_time,
        }
    }

    /// The engine ID this timeline belongs to.
    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    /// snmpEngineBoots as last synchronized.
    pub fn engine_boots(&self) -> u32 {
        self.engine_boots
    }

    /// Estimate the engine's current snmpEngineTime by adding the local
    /// seconds elapsed since the last synchronization.
    pub fn estimated_time(&self) -> u32 {
        let elapsed = self.synced_at.elapsed().as_secs();
        std::cmp::min(self.engine_time as u64 + elapsed, MAX_ENGINE_TIME as u64) as u32
    }

    /// Apply time values from an authenticated message (RFC 3414 §3.2.7b).
    ///
    /// Values are adopted when the boots counter advances, or when the
    /// boots counter matches and the time is newer than any seen so far.
    /// Returns whether the timeline moved.
    pub fn update_time(&mut self, msg_boots: u32, msg_time: u32) -> bool {
        if msg_boots > self.engine_boots {
            self.engine_boots = msg_boots;
            self.engine_time = msg_time;
            self.latest_received_engine_time = msg_time;
            self.synced_at = Instant::now();
            true
        } else if msg_boots == self.engine_boots && msg_time > self.latest_received_engine_time {
            self.engine_time = msg_time;
            self.latest_received_engine_time = msg_time;
            self.synced_at = Instant::now();
            true
        } else {
            false
        }
    }

    /// Non-authoritative time-window check against this timeline.
    pub fn is_in_time_window(&self, msg_boots: u32, msg_time: u32) -> bool {
        if self.engine_boots == MAX_ENGINE_TIME {
            return false;
        }
        if msg_boots != self.engine_boots {
            return false;
        }
        msg_time.abs_diff(self.estimated_time()) <= TIME_WINDOW
    }
}
