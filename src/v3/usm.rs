//! User-based Security Model (RFC 3414).
//!
//! USM security parameters are encoded as an OCTET STRING containing
//! a BER-encoded SEQUENCE:
//!
//! ```text
//! UsmSecurityParameters ::= SEQUENCE {
//!     msgAuthoritativeEngineID     OCTET STRING,
//!     msgAuthoritativeEngineBoots  INTEGER (0..2147483647),
//!     msgAuthoritativeEngineTime   INTEGER (0..2147483647),
//!     msgUserName                  OCTET STRING (SIZE(0..32)),
//!     msgAuthenticationParameters  OCTET STRING,
//!     msgPrivacyParameters         OCTET STRING
//! }
//! ```
//!
//! [`Usm`] is the security subsystem itself: it owns the user table,
//! localized keys, the timeline of every authoritative engine it has
//! talked to, and the usmStats counters. Message processing follows
//! RFC 3414 Section 3.2: engine triage, user resolution, level check,
//! authentication, time window, then decryption. Nothing derived from
//! the payload is trusted before the digest has been verified.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::cache::{STATE_REFERENCE_CEILING, StateCache};
use crate::error::{ErrorIndication, Result};
use crate::message::{MsgGlobalData, ScopedPdu, SecurityLevel, V3Message, V3MessageData};
use crate::oid::Oid;
use crate::util::hex;
use crate::v3::UsmUserConfig;
use crate::v3::auth::{self, LocalizedKey};
use crate::v3::engine::{EngineState, LocalEngine, report_oids};
use crate::v3::privacy::{PrivKey, SaltCounter};

/// Engine IDs are 5 to 32 octets (RFC 3411); anything else cannot name
/// a real authoritative engine and triggers discovery instead.
const ENGINE_ID_MIN_LEN: usize = 5;
const ENGINE_ID_MAX_LEN: usize = 32;

/// USM security parameters.
#[derive(Debug, Clone)]
pub struct UsmSecurityParams {
    /// Authoritative engine ID
    pub engine_id: Bytes,
    /// Engine boot count
    pub engine_boots: u32,
    /// Engine time (seconds since last boot)
    pub engine_time: u32,
    /// Username
    pub username: Bytes,
    /// Authentication parameters (HMAC digest, or empty)
    pub auth_params: Bytes,
    /// Privacy parameters (salt/IV, or empty)
    pub priv_params: Bytes,
}

impl UsmSecurityParams {
    /// Create new USM security parameters.
    pub fn new(
        engine_id: impl Into<Bytes>,
        engine_boots: u32,
        engine_time: u32,
        username: impl Into<Bytes>,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            engine_boots,
            engine_time,
            username: username.into(),
            auth_params: Bytes::new(),
            priv_params: Bytes::new(),
        }
    }

    /// Create empty security parameters for discovery.
    pub fn empty() -> Self {
        Self {
            engine_id: Bytes::new(),
            engine_boots: 0,
            engine_time: 0,
            username: Bytes::new(),
            auth_params: Bytes::new(),
            priv_params: Bytes::new(),
        }
    }

    /// Set authentication parameters.
    pub fn with_auth_params(mut self, auth_params: impl Into<Bytes>) -> Self {
        self.auth_params = auth_params.into();
        self
    }

    /// Set privacy parameters.
    pub fn with_priv_params(mut self, priv_params: impl Into<Bytes>) -> Self {
        self.priv_params = priv_params.into();
        self
    }

    /// Create placeholder auth params for MAC computation.
    ///
    /// For authenticated messages, the auth params field is filled with
    /// zeros during encoding, the MAC is computed over the entire
    /// message, and the zeros are then replaced with the actual MAC.
    pub fn with_auth_placeholder(mut self, mac_len: usize) -> Self {
        self.auth_params = Bytes::from(vec![0u8; mac_len]);
        self
    }

    /// Encode to BER bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode_to_buf(&mut buf);
        buf.finish()
    }

    /// Encode to an existing buffer.
    pub fn encode_to_buf(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_octet_string(&self.priv_params);
            buf.push_octet_string(&self.auth_params);
            buf.push_octet_string(&self.username);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_time);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_boots);
            buf.push_octet_string(&self.engine_id);
        });
    }

    /// Decode from BER bytes.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        Self::decode_from(&mut decoder)
    }

    /// Decode from an existing decoder.
    pub fn decode_from(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let engine_id = seq.read_octet_string()?;

        // RFC 3414: msgAuthoritativeEngineBoots INTEGER (0..2147483647)
        let raw_boots = seq.read_integer()?;
        if raw_boots < 0 {
            tracing::debug!(
                target: "snmp_engine::usm",
                { snmp.offset = seq.offset(), snmp.engine_boots = raw_boots },
                "negative engine boots"
            );
            return Err(seq.malformed());
        }
        let engine_boots = raw_boots as u32;

        // RFC 3414: msgAuthoritativeEngineTime INTEGER (0..2147483647)
        let raw_time = seq.read_integer()?;
        if raw_time < 0 {
            tracing::debug!(
                target: "snmp_engine::usm",
                { snmp.offset = seq.offset(), snmp.engine_time = raw_time },
                "negative engine time"
            );
            return Err(seq.malformed());
        }
        let engine_time = raw_time as u32;

        let username = seq.read_octet_string()?;
        let auth_params = seq.read_octet_string()?;
        let priv_params = seq.read_octet_string()?;

        Ok(Self {
            engine_id,
            engine_boots,
            engine_time,
            username,
            auth_params,
            priv_params,
        })
    }
}

/// Localized key material for one (user, engine) pair.
#[derive(Clone)]
struct EngineKeys {
    auth: Option<LocalizedKey>,
    privacy: Option<PrivKey>,
}

impl EngineKeys {
    fn derive(config: &UsmUserConfig, engine_id: &[u8]) -> Self {
        let auth = match (config.auth_protocol, &config.auth_password) {
            (Some(protocol), Some(password)) => Some(LocalizedKey::from_password(
                protocol,
                password.as_bytes(),
                engine_id,
            )),
            _ => None,
        };
        let privacy = match (
            config.auth_protocol,
            config.priv_protocol,
            &config.priv_password,
        ) {
            (Some(auth_protocol), Some(protocol), Some(password)) => Some(PrivKey::from_password(
                auth_protocol,
                protocol,
                password.as_bytes(),
                engine_id,
            )),
            _ => None,
        };
        Self { auth, privacy }
    }
}

/// Security state parked between receiving a message and answering it.
#[derive(Debug, Clone)]
struct SecurityExchange {
    user_name: Bytes,
    security_level: SecurityLevel,
}

/// usmStats counters (RFC 3414 Section 5, usmStats subtree).
///
/// Each counter backs the report OID of the same name; the value sent
/// in a report varbind is the counter value after the triggering event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UsmStats {
    /// usmStatsUnsupportedSecLevels
    pub unsupported_sec_levels: u32,
    /// usmStatsNotInTimeWindows
    pub not_in_time_windows: u32,
    /// usmStatsUnknownUserNames
    pub unknown_user_names: u32,
    /// usmStatsUnknownEngineIDs
    pub unknown_engine_ids: u32,
    /// usmStatsWrongDigests
    pub wrong_digests: u32,
    /// usmStatsDecryptionErrors
    pub decryption_errors: u32,
}

fn bump(counter: &mut u32) -> u32 {
    *counter = counter.wrapping_add(1);
    *counter
}

/// A message that passed all security checks.
#[derive(Debug, Clone)]
pub struct SecurityOutcome {
    /// Authoritative engine ID claimed by the message.
    pub engine_id: Bytes,
    /// User the message was secured under.
    pub user_name: Bytes,
    /// Level the message was actually secured at.
    pub security_level: SecurityLevel,
    /// The (decrypted) payload.
    pub scoped_pdu: ScopedPdu,
    /// Handle for answering through [`Usm::generate_response_msg`];
    /// release it if no answer will be sent.
    pub state_reference: u32,
}

/// Instruction to send a Report PDU for a rejected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSpec {
    /// usmStats instance OID to carry in the report varbind.
    pub oid: Oid,
    /// Counter value after the failure.
    pub value: u32,
    /// Whether the report must be authenticated (only notInTimeWindow
    /// reports are, per RFC 3414 Section 3.2.7a).
    pub secured: bool,
    /// Handle for building the report through
    /// [`Usm::generate_response_msg`].
    pub state_reference: u32,
}

/// A message that failed a security check.
///
/// `report` is present when this engine is authoritative for the
/// failure and a Report PDU may be sent back; whether one actually goes
/// out depends on the reportable flag of the offending message, which
/// is the message processing layer's call.
#[derive(Debug, Clone)]
pub struct SecurityRejection {
    /// Why the message was rejected.
    pub indication: ErrorIndication,
    /// Report to send back, if this side is authoritative.
    pub report: Option<ReportSpec>,
}

/// Outcome of incoming message processing.
#[derive(Debug, Clone)]
pub enum UsmResult {
    /// Message passed; the payload is safe to act on.
    Accepted(SecurityOutcome),
    /// Message failed a security check. Hostile or stale input lands
    /// here, not in `Err`: only malformed or local-state errors are
    /// fatal.
    Rejected(SecurityRejection),
}

/// The User-based Security Model.
///
/// One instance serves both directions: it secures outgoing messages
/// (as the non-authoritative sender of requests, or the authoritative
/// sender of responses and reports) and vets incoming ones. Engine
/// timelines are learned from traffic: the first message from an
/// unknown but plausible engine ID seeds its timeline, and only
/// authenticated messages may advance it afterwards.
pub struct Usm {
    users: HashMap<Bytes, UsmUserConfig>,
    /// Localized keys per (user name, engine ID).
    key_cache: HashMap<(Bytes, Bytes), EngineKeys>,
    /// Boot/time timeline per authoritative engine ID.
    engines: HashMap<Bytes, EngineState>,
    exchanges: StateCache<SecurityExchange>,
    salt: SaltCounter,
    stats: UsmStats,
}

impl Usm {
    /// Create a security model with no users and no known engines.
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            key_cache: HashMap::new(),
            engines: HashMap::new(),
            exchanges: StateCache::new(STATE_REFERENCE_CEILING),
            salt: SaltCounter::new(),
            stats: UsmStats::default(),
        }
    }

    /// Register a user, replacing any previous registration under the
    /// same name. Cached keys for the old registration are dropped.
    pub fn add_user(&mut self, config: UsmUserConfig) -> Result<()> {
        use crate::error::Error;

        if config.priv_protocol.is_some() && config.auth_protocol.is_none() {
            return Err(Error::Config("privacy requires authentication".into()).boxed());
        }
        if config.auth_protocol.is_some() && config.auth_password.is_none() {
            return Err(Error::Config("authentication protocol requires a password".into()).boxed());
        }
        if config.priv_protocol.is_some() && config.priv_password.is_none() {
            return Err(Error::Config("privacy protocol requires a password".into()).boxed());
        }
        if let (Some(auth_protocol), Some(priv_protocol)) =
            (config.auth_protocol, config.priv_protocol)
        {
            if !auth_protocol.is_compatible_with(priv_protocol) {
                tracing::debug!(
                    target: "snmp_engine::usm",
                    { snmp.user = %config.user_name, snmp.auth_protocol = %auth_protocol, snmp.priv_protocol = %priv_protocol },
                    "privacy key exceeds digest length, key extension engaged"
                );
            }
        }

        let name = Bytes::copy_from_slice(config.user_name.as_bytes());
        self.key_cache.retain(|(user, _), _| user != &name);
        self.users.insert(name, config);
        Ok(())
    }

    /// Remove a user and their cached keys. Returns whether the user
    /// was registered.
    pub fn remove_user(&mut self, user_name: &[u8]) -> bool {
        self.key_cache
            .retain(|(user, _), _| user.as_ref() != user_name);
        self.users.remove(user_name).is_some()
    }

    /// The timeline entry for an authoritative engine, if one has been
    /// learned.
    pub fn engine(&self, engine_id: &[u8]) -> Option<&EngineState> {
        self.engines.get(engine_id)
    }

    /// Record an engine timeline learned out of band, replacing any
    /// existing entry.
    pub fn observe_engine(&mut self, engine_id: impl Into<Bytes>, boots: u32, time: u32) {
        let engine_id = engine_id.into();
        self.engines
            .insert(engine_id.clone(), EngineState::new(engine_id, boots, time));
    }

    /// Current usmStats counter values.
    pub fn stats(&self) -> UsmStats {
        self.stats
    }

    /// Number of exchanges awaiting a response or release.
    pub fn pending_exchanges(&self) -> usize {
        self.exchanges.len()
    }

    /// Discard the security state parked under `state_reference`.
    ///
    /// Releasing a reference that was already consumed is a no-op;
    /// abandoning an exchange must be safe to do from any path.
    pub fn release_exchange(&mut self, state_reference: u32) {
        if self.exchanges.pop(state_reference).is_ok() {
            tracing::trace!(
                target: "snmp_engine::usm",
                { snmp.state_reference = state_reference },
                "security state released"
            );
        }
    }

    /// Secure an outgoing request or notification for `engine_id`.
    ///
    /// Boots and time come from the learned timeline, or (0, 0) when
    /// the engine has not been heard from yet; the authoritative side
    /// answers the latter with a notInTimeWindow report that
    /// resynchronizes us.
    pub fn generate_request_msg(
        &mut self,
        global_data: &MsgGlobalData,
        engine_id: &Bytes,
        user_name: &Bytes,
        scoped_pdu: &ScopedPdu,
    ) -> Result<Bytes> {
        if !self.users.contains_key(user_name) {
            tracing::debug!(
                target: "snmp_engine::usm",
                { snmp.user = %String::from_utf8_lossy(user_name) },
                "unknown user for outgoing message"
            );
            return Err(ErrorIndication::UnknownUserName.into());
        }

        let (engine_boots, engine_time) = match self.engines.get(engine_id) {
            Some(entry) => (entry.engine_boots(), entry.estimated_time()),
            None => (0, 0),
        };

        self.build_message(
            global_data,
            engine_id,
            engine_boots,
            engine_time,
            user_name,
            scoped_pdu,
        )
    }

    /// Secure an outgoing response or report as the authoritative
    /// engine, consuming the exchange parked under `state_reference`.
    ///
    /// Fails with a cache miss if the exchange was already consumed or
    /// released; each received message is answered at most once.
    pub fn generate_response_msg(
        &mut self,
        global_data: &MsgGlobalData,
        local: &LocalEngine,
        state_reference: u32,
        scoped_pdu: &ScopedPdu,
    ) -> Result<Bytes> {
        let exchange = self.exchanges.pop(state_reference)?;
        tracing::trace!(
            target: "snmp_engine::usm",
            { snmp.state_reference = state_reference, snmp.user = %String::from_utf8_lossy(&exchange.user_name), snmp.security_level = %exchange.security_level },
            "answering through cached security state"
        );

        self.build_message(
            global_data,
            local.engine_id(),
            local.boots(),
            local.time(),
            &exchange.user_name,
            scoped_pdu,
        )
    }

    /// Encode, encrypt, and sign one outgoing message.
    ///
    /// `engine_id`, `engine_boots` and `engine_time` are the
    /// authoritative values to claim: the remote engine's for requests,
    /// our own for responses.
    fn build_message(
        &mut self,
        global_data: &MsgGlobalData,
        engine_id: &Bytes,
        engine_boots: u32,
        engine_time: u32,
        user_name: &Bytes,
        scoped_pdu: &ScopedPdu,
    ) -> Result<Bytes> {
        let security_level = global_data.msg_flags.security_level;

        if !security_level.requires_auth() {
            let params = UsmSecurityParams::new(
                engine_id.clone(),
                engine_boots,
                engine_time,
                user_name.clone(),
            );
            let msg = V3Message::new(global_data.clone(), params.encode(), scoped_pdu.clone());
            return Ok(msg.encode());
        }

        let Some(config) = self.users.get(user_name) else {
            return Err(ErrorIndication::UnknownUserName.into());
        };
        if config.auth_protocol.is_none()
            || (security_level.requires_priv() && config.priv_protocol.is_none())
        {
            tracing::debug!(
                target: "snmp_engine::usm",
                { snmp.user = %config.user_name, snmp.security_level = %security_level },
                "user cannot provide the requested security level"
            );
            return Err(ErrorIndication::UnsupportedSecurityLevel.into());
        }

        let Some(keys) = self.localized_keys(user_name, engine_id) else {
            return Err(ErrorIndication::UnknownUserName.into());
        };
        let Some(auth_key) = keys.auth.as_ref() else {
            return Err(ErrorIndication::UnsupportedSecurityLevel.into());
        };

        let mut params = UsmSecurityParams::new(
            engine_id.clone(),
            engine_boots,
            engine_time,
            user_name.clone(),
        )
        .with_auth_placeholder(auth_key.mac_len());

        let encrypted = if security_level.requires_priv() {
            let Some(priv_key) = keys.privacy.as_ref() else {
                return Err(ErrorIndication::UnsupportedSecurityLevel.into());
            };
            let plaintext = scoped_pdu.encode_to_bytes();
            let (ciphertext, priv_params) =
                priv_key.encrypt(&plaintext, engine_boots, engine_time, &self.salt)?;
            params = params.with_priv_params(priv_params);
            Some(ciphertext)
        } else {
            None
        };

        let msg = match encrypted {
            Some(ciphertext) => {
                V3Message::new_encrypted(global_data.clone(), params.encode(), ciphertext)
            }
            None => V3Message::new(global_data.clone(), params.encode(), scoped_pdu.clone()),
        };

        let mut whole_msg = msg.encode().to_vec();
        auth::authenticate_outgoing(Some(auth_key), &mut whole_msg)?;
        Ok(Bytes::from(whole_msg))
    }

    /// Vet one incoming message (RFC 3414 Section 3.2).
    ///
    /// `whole_msg` must be the exact bytes received from the wire; the
    /// digest covers all of them. Checks run in protocol order: engine
    /// triage, user resolution, level support, authentication, time
    /// window, decryption. Security failures come back as
    /// [`UsmResult::Rejected`]; only malformed security parameters or
    /// local-state errors are `Err`.
    pub fn process_incoming_msg(
        &mut self,
        whole_msg: &Bytes,
        msg: &V3Message,
        local: &LocalEngine,
    ) -> Result<UsmResult> {
        let security_level = msg.security_level();
        let params = UsmSecurityParams::decode(msg.security_params.clone())?;
        let authoritative = local.is_local(&params.engine_id);

        // 3.2.3: engine ID triage. A plausible unknown engine seeds a
        // timeline from its claimed boots/time; first contact is the
        // only moment unauthenticated values are believed, and a
        // discovery report is exactly that moment.
        if !authoritative {
            let plausible = (ENGINE_ID_MIN_LEN..=ENGINE_ID_MAX_LEN)
                .contains(&params.engine_id.len());
            if !plausible {
                let count = bump(&mut self.stats.unknown_engine_ids);
                tracing::debug!(
                    target: "snmp_engine::usm",
                    { snmp.engine_id = %hex::Bytes(&params.engine_id), snmp.count = count },
                    "unknown engine id"
                );
                let state_reference = self.exchanges.push(SecurityExchange {
                    user_name: params.username.clone(),
                    security_level: SecurityLevel::NoAuthNoPriv,
                });
                return Ok(UsmResult::Rejected(SecurityRejection {
                    indication: ErrorIndication::UnknownEngineId,
                    report: Some(ReportSpec {
                        oid: report_oids::unknown_engine_ids(),
                        value: count,
                        secured: false,
                        state_reference,
                    }),
                }));
            }
            if !self.engines.contains_key(&params.engine_id) {
                self.engines.insert(
                    params.engine_id.clone(),
                    EngineState::new(
                        params.engine_id.clone(),
                        params.engine_boots,
                        params.engine_time,
                    ),
                );
                tracing::debug!(
                    target: "snmp_engine::usm",
                    { snmp.engine_id = %hex::Bytes(&params.engine_id), snmp.engine_boots = params.engine_boots, snmp.engine_time = params.engine_time },
                    "learned authoritative engine"
                );
            }
        }

        // 3.2.4: user resolution. The empty user at noAuthNoPriv is
        // the discovery binding and carries no keys.
        let user = match self.users.get(&params.username) {
            Some(config) => Some(config.clone()),
            None if params.username.is_empty()
                && security_level == SecurityLevel::NoAuthNoPriv =>
            {
                None
            }
            None => {
                let count = bump(&mut self.stats.unknown_user_names);
                tracing::debug!(
                    target: "snmp_engine::usm",
                    { snmp.user = %String::from_utf8_lossy(&params.username), snmp.count = count },
                    "unknown user"
                );
                let report = authoritative.then(|| ReportSpec {
                    oid: report_oids::unknown_user_names(),
                    value: count,
                    secured: false,
                    state_reference: self.exchanges.push(SecurityExchange {
                        user_name: params.username.clone(),
                        security_level: SecurityLevel::NoAuthNoPriv,
                    }),
                });
                return Ok(UsmResult::Rejected(SecurityRejection {
                    indication: ErrorIndication::UnknownUserName,
                    report,
                }));
            }
        };

        // 3.2.5: the claimed level must be within the user's
        // provisioning.
        let supported = match &user {
            Some(config) => {
                !(security_level.requires_auth() && config.auth_protocol.is_none()
                    || security_level.requires_priv() && config.priv_protocol.is_none())
            }
            None => !security_level.requires_auth(),
        };
        if !supported {
            let count = bump(&mut self.stats.unsupported_sec_levels);
            tracing::debug!(
                target: "snmp_engine::usm",
                { snmp.user = %String::from_utf8_lossy(&params.username), snmp.security_level = %security_level, snmp.count = count },
                "unsupported security level"
            );
            let report = authoritative.then(|| ReportSpec {
                oid: report_oids::unsupported_sec_levels(),
                value: count,
                secured: false,
                state_reference: self.exchanges.push(SecurityExchange {
                    user_name: params.username.clone(),
                    security_level: SecurityLevel::NoAuthNoPriv,
                }),
            });
            return Ok(UsmResult::Rejected(SecurityRejection {
                indication: ErrorIndication::UnsupportedSecurityLevel,
                report,
            }));
        }

        let keys = match &user {
            Some(_) if security_level.requires_auth() => {
                self.localized_keys(&params.username, &params.engine_id)
            }
            _ => None,
        };

        // 3.2.6: authenticate before trusting anything further, the
        // claimed boots/time and the payload included.
        if security_level.requires_auth() {
            let auth_key = keys.as_ref().and_then(|k| k.auth.as_ref());
            if let Err(error) = auth::authenticate_incoming(auth_key, whole_msg, &params.auth_params)
            {
                let Some(indication) = error.indication() else {
                    return Err(error);
                };
                let count = bump(&mut self.stats.wrong_digests);
                tracing::debug!(
                    target: "snmp_engine::usm",
                    { snmp.user = %String::from_utf8_lossy(&params.username), snmp.indication = %indication, snmp.count = count },
                    "authentication failed"
                );
                let report = authoritative.then(|| ReportSpec {
                    oid: report_oids::wrong_digests(),
                    value: count,
                    secured: false,
                    state_reference: self.exchanges.push(SecurityExchange {
                        user_name: params.username.clone(),
                        security_level: SecurityLevel::NoAuthNoPriv,
                    }),
                });
                return Ok(UsmResult::Rejected(SecurityRejection { indication, report }));
            }
        }

        // 3.2.7: time window, only meaningful once authenticated. As
        // the authoritative side we judge against our own clock and
        // answer with a signed report; as the non-authoritative side
        // the verified values advance the timeline first.
        if security_level.requires_auth() {
            if authoritative {
                if !local.in_window(params.engine_boots, params.engine_time) {
                    let count = bump(&mut self.stats.not_in_time_windows);
                    tracing::debug!(
                        target: "snmp_engine::usm",
                        { snmp.engine_boots = params.engine_boots, snmp.engine_time = params.engine_time, snmp.local_boots = local.boots(), snmp.local_time = local.time(), snmp.count = count },
                        "message outside the time window"
                    );
                    let state_reference = self.exchanges.push(SecurityExchange {
                        user_name: params.username.clone(),
                        security_level: SecurityLevel::AuthNoPriv,
                    });
                    return Ok(UsmResult::Rejected(SecurityRejection {
                        indication: ErrorIndication::NotInTimeWindow,
                        report: Some(ReportSpec {
                            oid: report_oids::not_in_time_windows(),
                            value: count,
                            secured: true,
                            state_reference,
                        }),
                    }));
                }
            } else if let Some(entry) = self.engines.get_mut(&params.engine_id) {
                entry.update_time(params.engine_boots, params.engine_time);
                if !entry.is_in_time_window(params.engine_boots, params.engine_time) {
                    let count = bump(&mut self.stats.not_in_time_windows);
                    tracing::debug!(
                        target: "snmp_engine::usm",
                        { snmp.engine_id = %hex::Bytes(&params.engine_id), snmp.engine_boots = params.engine_boots, snmp.engine_time = params.engine_time, snmp.count = count },
                        "stale message from authoritative engine"
                    );
                    return Ok(UsmResult::Rejected(SecurityRejection {
                        indication: ErrorIndication::NotInTimeWindow,
                        report: None,
                    }));
                }
            }
        }

        // 3.2.8: decrypt last. A payload that will not decrypt or will
        // not parse is hostile input, never a local fault.
        let scoped_pdu = if security_level.requires_priv() {
            let Some(priv_key) = keys.as_ref().and_then(|k| k.privacy.as_ref()) else {
                let count = bump(&mut self.stats.unsupported_sec_levels);
                let report = authoritative.then(|| ReportSpec {
                    oid: report_oids::unsupported_sec_levels(),
                    value: count,
                    secured: false,
                    state_reference: self.exchanges.push(SecurityExchange {
                        user_name: params.username.clone(),
                        security_level: SecurityLevel::NoAuthNoPriv,
                    }),
                });
                return Ok(UsmResult::Rejected(SecurityRejection {
                    indication: ErrorIndication::UnsupportedSecurityLevel,
                    report,
                }));
            };

            let decrypted = match &msg.data {
                V3MessageData::Encrypted(ciphertext) => priv_key.decrypt(
                    ciphertext,
                    params.engine_boots,
                    params.engine_time,
                    &params.priv_params,
                ),
                // flags demanded privacy but the payload arrived bare
                V3MessageData::Plaintext(_) => Err(ErrorIndication::DecryptionError.into()),
            };

            let plaintext = match decrypted {
                Ok(plaintext) => plaintext,
                Err(error) => {
                    let Some(indication) = error.indication() else {
                        return Err(error);
                    };
                    return Ok(self.reject_undecryptable(&params, authoritative, indication));
                }
            };

            let mut decoder = Decoder::new(plaintext);
            match ScopedPdu::decode(&mut decoder) {
                Ok(scoped_pdu) => scoped_pdu,
                Err(_) => {
                    // decrypted into garbage; same as not decrypting
                    return Ok(self.reject_undecryptable(
                        &params,
                        authoritative,
                        ErrorIndication::DecryptionError,
                    ));
                }
            }
        } else {
            match &msg.data {
                V3MessageData::Plaintext(scoped_pdu) => scoped_pdu.clone(),
                V3MessageData::Encrypted(_) => {
                    return Ok(self.reject_undecryptable(
                        &params,
                        authoritative,
                        ErrorIndication::DecryptionError,
                    ));
                }
            }
        };

        let state_reference = self.exchanges.push(SecurityExchange {
            user_name: params.username.clone(),
            security_level,
        });
        tracing::trace!(
            target: "snmp_engine::usm",
            { snmp.user = %String::from_utf8_lossy(&params.username), snmp.security_level = %security_level, snmp.state_reference = state_reference },
            "message accepted"
        );
        Ok(UsmResult::Accepted(SecurityOutcome {
            engine_id: params.engine_id,
            user_name: params.username,
            security_level,
            scoped_pdu,
            state_reference,
        }))
    }

    fn reject_undecryptable(
        &mut self,
        params: &UsmSecurityParams,
        authoritative: bool,
        indication: ErrorIndication,
    ) -> UsmResult {
        let count = bump(&mut self.stats.decryption_errors);
        tracing::debug!(
            target: "snmp_engine::usm",
            { snmp.user = %String::from_utf8_lossy(&params.username), snmp.indication = %indication, snmp.count = count },
            "payload could not be decrypted"
        );
        let report = authoritative.then(|| ReportSpec {
            oid: report_oids::decryption_errors(),
            value: count,
            secured: false,
            state_reference: self.exchanges.push(SecurityExchange {
                user_name: params.username.clone(),
                security_level: SecurityLevel::NoAuthNoPriv,
            }),
        });
        UsmResult::Rejected(SecurityRejection { indication, report })
    }

    /// Keys for (user, engine), derived on first use and cached.
    fn localized_keys(&mut self, user_name: &Bytes, engine_id: &Bytes) -> Option<EngineKeys> {
        let cache_key = (user_name.clone(), engine_id.clone());
        if let Some(keys) = self.key_cache.get(&cache_key) {
            return Some(keys.clone());
        }
        let config = self.users.get(user_name)?;
        let keys = EngineKeys::derive(config, engine_id);
        self.key_cache.insert(cache_key, keys.clone());
        Some(keys)
    }
}

impl Default for Usm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Usm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Usm")
            .field("users", &self.users.len())
            .field("engines", &self.engines.len())
            .field("pending_exchanges", &self.exchanges.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::MsgFlags;
    use crate::oid;
    use crate::pdu::{Pdu, PduType};
    use crate::v3::{AuthProtocol, PrivProtocol};
    use crate::value::Value;
    use crate::varbind::VarBind;

    const AGENT_ENGINE: &[u8] = b"\x80\x00\x4f\xb8\x05agent";
    const CLIENT_ENGINE: &[u8] = b"\x80\x00\x4f\xb8\x05client";

    fn admin_user() -> UsmUserConfig {
        UsmUserConfig::new("admin")
            .auth(AuthProtocol::Sha256, "authpass123")
            .privacy(PrivProtocol::Aes128, "privpass123")
    }

    fn usm_with_admin() -> Usm {
        let mut usm = Usm::new();
        usm.add_user(admin_user()).unwrap();
        usm
    }

    fn scoped_get(request_id: i32) -> ScopedPdu {
        ScopedPdu::new(
            AGENT_ENGINE,
            &b""[..],
            Pdu::get_request(request_id, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]),
        )
    }

    fn global(msg_id: i32, level: SecurityLevel) -> MsgGlobalData {
        MsgGlobalData::new(msg_id, 65507, MsgFlags::new(level, true))
    }

    fn report_pdu(request_id: i32, spec: &ReportSpec) -> Pdu {
        Pdu {
            pdu_type: PduType::Report,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: vec![VarBind::new(spec.oid.clone(), Value::Counter32(spec.value))],
        }
    }

    #[test]
    fn security_params_round_trip() {
        let params =
            UsmSecurityParams::new(&b"engine-id"[..], 1234, 5678, &b"admin"[..])
                .with_auth_params(&b"auth123456789012"[..])
                .with_priv_params(&b"priv1234"[..]);

        let decoded = UsmSecurityParams::decode(params.encode()).unwrap();
        assert_eq!(decoded.engine_id.as_ref(), b"engine-id");
        assert_eq!(decoded.engine_boots, 1234);
        assert_eq!(decoded.engine_time, 5678);
        assert_eq!(decoded.username.as_ref(), b"admin");
        assert_eq!(decoded.auth_params.as_ref(), b"auth123456789012");
        assert_eq!(decoded.priv_params.as_ref(), b"priv1234");
    }

    #[test]
    fn empty_params_for_discovery() {
        let decoded = UsmSecurityParams::decode(UsmSecurityParams::empty().encode()).unwrap();
        assert!(decoded.engine_id.is_empty());
        assert_eq!(decoded.engine_boots, 0);
        assert_eq!(decoded.engine_time, 0);
        assert!(decoded.username.is_empty());
        assert!(decoded.auth_params.is_empty());
        assert!(decoded.priv_params.is_empty());
    }

    #[test]
    fn auth_placeholder_is_zeroed() {
        let params =
            UsmSecurityParams::new(&b"engine"[..], 100, 200, &b"user"[..]).with_auth_placeholder(24);
        assert_eq!(params.auth_params.len(), 24);
        assert!(params.auth_params.iter().all(|&b| b == 0));
    }

    #[test]
    fn negative_engine_boots_rejected() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_integer(100);
            buf.push_integer(-1);
            buf.push_octet_string(&[]);
        });

        let result = UsmSecurityParams::decode(buf.finish());
        assert!(matches!(
            *result.unwrap_err(),
            Error::MalformedMessage { .. }
        ));
    }

    #[test]
    fn negative_engine_time_rejected() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_integer(-1);
            buf.push_integer(100);
            buf.push_octet_string(&[]);
        });

        let result = UsmSecurityParams::decode(buf.finish());
        assert!(matches!(
            *result.unwrap_err(),
            Error::MalformedMessage { .. }
        ));
    }

    #[test]
    fn max_engine_values_accepted() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_octet_string(&[]);
            buf.push_integer(i32::MAX);
            buf.push_integer(i32::MAX);
            buf.push_octet_string(&[]);
        });

        let decoded = UsmSecurityParams::decode(buf.finish()).unwrap();
        assert_eq!(decoded.engine_boots, i32::MAX as u32);
        assert_eq!(decoded.engine_time, i32::MAX as u32);
    }

    #[test]
    fn auth_priv_round_trip() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 7);
        let mut agent = usm_with_admin();
        let mut client = usm_with_admin();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let engine_id = Bytes::from_static(AGENT_ENGINE);
        let user = Bytes::from_static(b"admin");
        let wire = client
            .generate_request_msg(
                &global(1001, SecurityLevel::AuthPriv),
                &engine_id,
                &user,
                &scoped_get(42),
            )
            .unwrap();

        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();
        let UsmResult::Accepted(outcome) = result else {
            panic!("expected acceptance, got {result:?}");
        };
        assert_eq!(outcome.user_name.as_ref(), b"admin");
        assert_eq!(outcome.security_level, SecurityLevel::AuthPriv);
        assert_eq!(outcome.scoped_pdu.pdu.request_id, 42);
        assert_eq!(agent.pending_exchanges(), 1);

        // the agent answers through the cached exchange
        let response = ScopedPdu::new(
            engine_id.clone(),
            Bytes::new(),
            outcome.scoped_pdu.pdu.to_response(),
        );
        let reply_global = MsgGlobalData::new(1001, 65507, MsgFlags::new(SecurityLevel::AuthPriv, false));
        let reply = agent
            .generate_response_msg(&reply_global, &agent_local, outcome.state_reference, &response)
            .unwrap();
        assert_eq!(agent.pending_exchanges(), 0);

        // and the client accepts the answer
        let client_local = LocalEngine::new(CLIENT_ENGINE);
        let reply_msg = V3Message::decode(reply.clone()).unwrap();
        let result = client
            .process_incoming_msg(&reply, &reply_msg, &client_local)
            .unwrap();
        let UsmResult::Accepted(outcome) = result else {
            panic!("expected acceptance, got {result:?}");
        };
        assert_eq!(outcome.scoped_pdu.pdu.request_id, 42);
        client.release_exchange(outcome.state_reference);
        assert_eq!(client.pending_exchanges(), 0);
    }

    #[test]
    fn discovery_report_teaches_the_client() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 3);
        let mut agent = usm_with_admin();
        let mut client = usm_with_admin();
        let client_local = LocalEngine::new(CLIENT_ENGINE);

        // probe with empty engine id, empty user, noAuthNoPriv
        let probe_wire = V3Message::discovery_request(900, 77).encode();
        let probe_msg = V3Message::decode(probe_wire.clone()).unwrap();
        let result = agent
            .process_incoming_msg(&probe_wire, &probe_msg, &agent_local)
            .unwrap();
        let UsmResult::Rejected(rejection) = result else {
            panic!("probe should be rejected, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::UnknownEngineId);
        let spec = rejection.report.unwrap();
        assert_eq!(spec.oid, report_oids::unknown_engine_ids());
        assert!(!spec.secured);
        assert_eq!(agent.stats().unknown_engine_ids, 1);

        // the unauthenticated report carries the agent's real engine id
        let report_scoped = ScopedPdu::new(
            agent_local.engine_id().clone(),
            Bytes::new(),
            report_pdu(77, &spec),
        );
        let report_global =
            MsgGlobalData::new(900, 65507, MsgFlags::new(SecurityLevel::NoAuthNoPriv, false));
        let report_wire = agent
            .generate_response_msg(&report_global, &agent_local, spec.state_reference, &report_scoped)
            .unwrap();

        // the client adopts the engine from the report
        let report_msg = V3Message::decode(report_wire.clone()).unwrap();
        let result = client
            .process_incoming_msg(&report_wire, &report_msg, &client_local)
            .unwrap();
        let UsmResult::Accepted(outcome) = result else {
            panic!("report should be accepted, got {result:?}");
        };
        assert_eq!(&outcome.engine_id, agent_local.engine_id());
        client.release_exchange(outcome.state_reference);

        let entry = client.engine(AGENT_ENGINE).unwrap();
        assert_eq!(entry.engine_boots(), 3);

        // an authenticated request built from the learned timeline passes
        let wire = client
            .generate_request_msg(
                &global(901, SecurityLevel::AuthPriv),
                agent_local.engine_id(),
                &Bytes::from_static(b"admin"),
                &scoped_get(78),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();
        assert!(matches!(result, UsmResult::Accepted(_)));
    }

    #[test]
    fn wrong_auth_key_rejected_before_decrypt() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 2);
        let mut agent = usm_with_admin();

        let mut client = Usm::new();
        client
            .add_user(
                UsmUserConfig::new("admin")
                    .auth(AuthProtocol::Sha256, "wrongwrong1")
                    .privacy(PrivProtocol::Aes128, "privpass123"),
            )
            .unwrap();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let wire = client
            .generate_request_msg(
                &global(31, SecurityLevel::AuthPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(5),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();

        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::AuthenticationFailure);
        let spec = rejection.report.unwrap();
        assert_eq!(spec.oid, report_oids::wrong_digests());
        assert_eq!(agent.stats().wrong_digests, 1);
        // privacy never ran on the forged message
        assert_eq!(agent.stats().decryption_errors, 0);
    }

    #[test]
    fn tampered_message_rejected() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 2);
        let mut agent = usm_with_admin();
        let mut client = usm_with_admin();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let wire = client
            .generate_request_msg(
                &global(32, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(6),
            )
            .unwrap();

        // flip one bit inside the context engine id, the last place the
        // engine id bytes occur in the message
        let mut tampered = wire.to_vec();
        let pos = tampered
            .windows(AGENT_ENGINE.len())
            .rposition(|w| w == AGENT_ENGINE)
            .unwrap();
        tampered[pos + AGENT_ENGINE.len() - 1] ^= 0x20;
        let tampered = Bytes::from(tampered);

        let msg = V3Message::decode(tampered.clone()).unwrap();
        let result = agent
            .process_incoming_msg(&tampered, &msg, &agent_local)
            .unwrap();
        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::AuthenticationFailure);
        assert_eq!(agent.stats().wrong_digests, 1);
    }

    #[test]
    fn unknown_user_gets_report() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 2);
        let mut agent = usm_with_admin();

        let mut client = Usm::new();
        client
            .add_user(UsmUserConfig::new("outsider").auth(AuthProtocol::Sha1, "secretpass"))
            .unwrap();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let wire = client
            .generate_request_msg(
                &global(33, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"outsider"),
                &scoped_get(7),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();

        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::UnknownUserName);
        let spec = rejection.report.unwrap();
        assert_eq!(spec.oid, report_oids::unknown_user_names());
        assert!(!spec.secured);
        assert_eq!(agent.stats().unknown_user_names, 1);
    }

    #[test]
    fn unsupported_level_gets_report() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 2);
        let mut agent = Usm::new();
        // agent knows the user, but without privacy
        agent
            .add_user(UsmUserConfig::new("admin").auth(AuthProtocol::Sha256, "authpass123"))
            .unwrap();

        let mut client = usm_with_admin();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let wire = client
            .generate_request_msg(
                &global(34, SecurityLevel::AuthPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(8),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();

        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::UnsupportedSecurityLevel);
        let spec = rejection.report.unwrap();
        assert_eq!(spec.oid, report_oids::unsupported_sec_levels());
        assert_eq!(agent.stats().unsupported_sec_levels, 1);
    }

    #[test]
    fn stale_boots_resync_through_signed_report() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 9);
        let mut agent = usm_with_admin();
        let mut client = usm_with_admin();
        let client_local = LocalEngine::new(CLIENT_ENGINE);
        // the client remembers the previous incarnation of the agent
        client.observe_engine(AGENT_ENGINE, 8, 500);

        let wire = client
            .generate_request_msg(
                &global(35, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(9),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();

        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::NotInTimeWindow);
        let spec = rejection.report.unwrap();
        assert_eq!(spec.oid, report_oids::not_in_time_windows());
        assert!(spec.secured);
        assert_eq!(agent.stats().not_in_time_windows, 1);

        // the signed report carries the agent's current boots and time
        let report_scoped = ScopedPdu::new(
            agent_local.engine_id().clone(),
            Bytes::new(),
            report_pdu(9, &spec),
        );
        let report_global =
            MsgGlobalData::new(35, 65507, MsgFlags::new(SecurityLevel::AuthNoPriv, false));
        let report_wire = agent
            .generate_response_msg(&report_global, &agent_local, spec.state_reference, &report_scoped)
            .unwrap();

        // processing it resynchronizes the client's timeline
        let report_msg = V3Message::decode(report_wire.clone()).unwrap();
        let result = client
            .process_incoming_msg(&report_wire, &report_msg, &client_local)
            .unwrap();
        let UsmResult::Accepted(outcome) = result else {
            panic!("report should verify, got {result:?}");
        };
        client.release_exchange(outcome.state_reference);
        assert_eq!(client.engine(AGENT_ENGINE).unwrap().engine_boots(), 9);

        // the retried request is now inside the window
        let wire = client
            .generate_request_msg(
                &global(36, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(9),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();
        assert!(matches!(result, UsmResult::Accepted(_)));
    }

    #[test]
    fn stale_response_rejected_without_report() {
        let client_local = LocalEngine::new(CLIENT_ENGINE);
        let mut client = usm_with_admin();
        client.observe_engine(AGENT_ENGINE, 5, 10_000);

        // a correctly signed message claiming a long-gone engine time
        let mut stale_peer = usm_with_admin();
        stale_peer.observe_engine(AGENT_ENGINE, 5, 1_000);
        let wire = stale_peer
            .generate_request_msg(
                &global(37, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(10),
            )
            .unwrap();

        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = client
            .process_incoming_msg(&wire, &msg, &client_local)
            .unwrap();
        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::NotInTimeWindow);
        // the non-authoritative side never reports
        assert!(rejection.report.is_none());
        assert_eq!(client.stats().not_in_time_windows, 1);
    }

    #[test]
    fn noauth_round_trip() {
        let agent_local = LocalEngine::new(AGENT_ENGINE);
        let mut agent = Usm::new();
        agent.add_user(UsmUserConfig::new("public")).unwrap();
        let mut client = Usm::new();
        client.add_user(UsmUserConfig::new("public")).unwrap();

        // no timeline needed: boots and time go out as zero and the
        // window check does not apply without authentication
        let wire = client
            .generate_request_msg(
                &global(38, SecurityLevel::NoAuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"public"),
                &scoped_get(11),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();

        let UsmResult::Accepted(outcome) = result else {
            panic!("expected acceptance, got {result:?}");
        };
        assert_eq!(outcome.security_level, SecurityLevel::NoAuthNoPriv);
        assert_eq!(outcome.user_name.as_ref(), b"public");
    }

    #[test]
    fn add_user_rejects_priv_without_auth() {
        let mut usm = Usm::new();
        let config = UsmUserConfig::new("broken").privacy(PrivProtocol::Aes128, "privpass123");
        assert!(matches!(
            *usm.add_user(config).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn add_user_requires_passwords() {
        let mut usm = Usm::new();
        let config = UsmUserConfig {
            user_name: "keyless".into(),
            auth_protocol: Some(AuthProtocol::Sha1),
            auth_password: None,
            priv_protocol: None,
            priv_password: None,
        };
        assert!(matches!(
            *usm.add_user(config).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn removed_user_no_longer_accepted() {
        let agent_local = LocalEngine::with_boots(AGENT_ENGINE, 1);
        let mut agent = usm_with_admin();
        let mut client = usm_with_admin();
        client.observe_engine(AGENT_ENGINE, agent_local.boots(), agent_local.time());

        let wire = client
            .generate_request_msg(
                &global(39, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(12),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        assert!(matches!(
            agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap(),
            UsmResult::Accepted(_)
        ));

        assert!(agent.remove_user(b"admin"));
        assert!(!agent.remove_user(b"admin"));

        let wire = client
            .generate_request_msg(
                &global(40, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(13),
            )
            .unwrap();
        let msg = V3Message::decode(wire.clone()).unwrap();
        let result = agent.process_incoming_msg(&wire, &msg, &agent_local).unwrap();
        let UsmResult::Rejected(rejection) = result else {
            panic!("expected rejection, got {result:?}");
        };
        assert_eq!(rejection.indication, ErrorIndication::UnknownUserName);
    }

    #[test]
    fn respond_without_exchange_is_cache_miss() {
        let mut agent = usm_with_admin();
        let local = LocalEngine::new(AGENT_ENGINE);
        let scoped = ScopedPdu::with_empty_context(Pdu::get_request(1, &[]));
        let err = agent
            .generate_response_msg(&global(41, SecurityLevel::NoAuthNoPriv), &local, 4242, &scoped)
            .unwrap_err();
        assert!(matches!(*err, Error::CacheMiss { handle: 4242 }));
    }

    #[test]
    fn release_exchange_tolerates_misses() {
        let mut usm = Usm::new();
        usm.release_exchange(99);
        assert_eq!(usm.pending_exchanges(), 0);
    }

    #[test]
    fn outgoing_with_unknown_user_fails() {
        let mut usm = Usm::new();
        let err = usm
            .generate_request_msg(
                &global(42, SecurityLevel::AuthNoPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"ghost"),
                &scoped_get(1),
            )
            .unwrap_err();
        assert_eq!(err.indication(), Some(ErrorIndication::UnknownUserName));
    }

    #[test]
    fn outgoing_level_beyond_user_fails() {
        let mut usm = Usm::new();
        usm.add_user(UsmUserConfig::new("admin").auth(AuthProtocol::Sha1, "authpass123"))
            .unwrap();
        let err = usm
            .generate_request_msg(
                &global(43, SecurityLevel::AuthPriv),
                &Bytes::from_static(AGENT_ENGINE),
                &Bytes::from_static(b"admin"),
                &scoped_get(1),
            )
            .unwrap_err();
        assert_eq!(
            err.indication(),
            Some(ErrorIndication::UnsupportedSecurityLevel)
        );
    }
}
