//! SNMP Protocol Data Units.
//!
//! One [`Pdu`] shape covers every v2-style operation; the v1 trap has
//! its own layout ([`TrapV1Pdu`]) per RFC 1157.

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{ErrorStatus, Result};
use crate::oid::Oid;
use crate::value::Value;
use crate::varbind::{VarBind, decode_varbind_list, encode_varbind_list};
use std::fmt;

/// PDU type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    GetRequest = 0xA0,
    GetNextRequest = 0xA1,
    Response = 0xA2,
    SetRequest = 0xA3,
    TrapV1 = 0xA4,
    GetBulkRequest = 0xA5,
    InformRequest = 0xA6,
    TrapV2 = 0xA7,
    Report = 0xA8,
}

impl PduType {
    /// Map a tag byte back to the type. `None` outside 0xA0..=0xA8.
    pub fn from_tag(tag: u8) -> Option<Self> {
        const BY_TAG: [PduType; 9] = [
            PduType::GetRequest,
            PduType::GetNextRequest,
            PduType::Response,
            PduType::SetRequest,
            PduType::TrapV1,
            PduType::GetBulkRequest,
            PduType::InformRequest,
            PduType::TrapV2,
            PduType::Report,
        ];
        BY_TAG.get(tag.wrapping_sub(0xA0) as usize).copied()
    }

    /// The tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GetRequest => "GetRequest",
            Self::GetNextRequest => "GetNextRequest",
            Self::Response => "Response",
            Self::SetRequest => "SetRequest",
            Self::TrapV1 => "TrapV1",
            Self::GetBulkRequest => "GetBulkRequest",
            Self::InformRequest => "InformRequest",
            Self::TrapV2 => "TrapV2",
            Self::Report => "Report",
        })
    }
}

/// An SNMP PDU (RFC 3416 Section 3).
///
/// For GETBULK requests, `error_status` carries `non-repeaters` and
/// `error_index` carries `max-repetitions`; use the named accessors.
#[derive(Debug, Clone)]
pub struct Pdu {
    pub pdu_type: PduType,
    /// Request ID correlating responses with requests.
    pub request_id: i32,
    /// Error status (0 for requests).
    pub error_status: i32,
    /// 1-based index of the failing varbind, or 0.
    pub error_index: i32,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    fn with_bindings(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    fn null_bound(pdu_type: PduType, request_id: i32, oids: &[Oid]) -> Self {
        let varbinds = oids.iter().map(|oid| VarBind::null(oid.clone())).collect();
        Self::with_bindings(pdu_type, request_id, varbinds)
    }

    /// Build a GET request.
    pub fn get_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::null_bound(PduType::GetRequest, request_id, oids)
    }

    /// Build a GETNEXT request.
    pub fn get_next_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::null_bound(PduType::GetNextRequest, request_id, oids)
    }

    /// Build a SET request.
    pub fn set_request(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_bindings(PduType::SetRequest, request_id, varbinds)
    }

    /// Build a GETBULK request (RFC 3416 Section 4.2.3).
    pub fn get_bulk(request_id: i32, non_repeaters: i32, max_repetitions: i32, oids: &[Oid]) -> Self {
        let mut pdu = Self::null_bound(PduType::GetBulkRequest, request_id, oids);
        pdu.error_status = non_repeaters;
        pdu.error_index = max_repetitions;
        pdu
    }

    /// Build a Report PDU (RFC 3412 Section 4.1.2).
    pub fn report(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self::with_bindings(PduType::Report, request_id, varbinds)
    }

    /// `non-repeaters` for a GETBULK request.
    pub fn non_repeaters(&self) -> i32 {
        self.error_status
    }

    /// `max-repetitions` for a GETBULK request.
    pub fn max_repetitions(&self) -> i32 {
        self.error_index
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(self.pdu_type.tag(), |buf| {
            encode_varbind_list(buf, &self.varbinds);
            buf.push_integer(self.error_index);
            buf.push_integer(self.error_status);
            buf.push_integer(self.request_id);
        });
    }

    /// Decode from BER.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let tag = decoder.read_tag()?;
        let Some(pdu_type) = PduType::from_tag(tag) else {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %(decoder.offset() - 1), pdu_tag = tag },
                "unknown PDU type",
            );
            return Err(decoder.malformed());
        };

        let len = decoder.read_length()?;
        let mut pdu_decoder = decoder.sub_decoder(len)?;

        let request_id = pdu_decoder.read_integer()?;
        let error_status = pdu_decoder.read_integer()?;
        let error_index = pdu_decoder.read_integer()?;
        let varbinds = decode_varbind_list(&mut pdu_decoder)?;

        Ok(Pdu {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }

    /// True when a non-zero error-status is set.
    pub fn is_error(&self) -> bool {
        self.error_status != 0
    }

    /// The error-status as an enum.
    pub fn error_status_enum(&self) -> ErrorStatus {
        ErrorStatus::from_i32(self.error_status)
    }

    /// The Response PDU confirming this PDU (Inform handling): same
    /// request-id, same varbinds, noError.
    pub fn to_response(&self) -> Self {
        self.to_error_response(ErrorStatus::NoError, 0)
    }

    /// A Response PDU carrying an error-status.
    pub fn to_error_response(&self, error_status: ErrorStatus, error_index: i32) -> Self {
        Self {
            pdu_type: PduType::Response,
            request_id: self.request_id,
            error_status: error_status.as_i32(),
            error_index,
            varbinds: self.varbinds.clone(),
        }
    }

    /// True for notification-class PDUs (traps and informs).
    pub fn is_notification(&self) -> bool {
        matches!(
            self.pdu_type,
            PduType::TrapV1 | PduType::TrapV2 | PduType::InformRequest
        )
    }

    /// True for confirmed-class PDUs, which expect a response.
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.pdu_type,
            PduType::GetRequest
                | PduType::GetNextRequest
                | PduType::GetBulkRequest
                | PduType::SetRequest
                | PduType::InformRequest
        )
    }
}

/// SNMPv1 generic-trap values (RFC 1157 Section 4.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GenericTrap {
    ColdStart = 0,
    WarmStart = 1,
    LinkDown = 2,
    LinkUp = 3,
    AuthenticationFailure = 4,
    EgpNeighborLoss = 5,
    /// Vendor trap; see the `specific_trap` field.
    EnterpriseSpecific = 6,
}

impl GenericTrap {
    pub fn from_i32(v: i32) -> Option<Self> {
        const BY_VALUE: [GenericTrap; 7] = [
            GenericTrap::ColdStart,
            GenericTrap::WarmStart,
            GenericTrap::LinkDown,
            GenericTrap::LinkUp,
            GenericTrap::AuthenticationFailure,
            GenericTrap::EgpNeighborLoss,
            GenericTrap::EnterpriseSpecific,
        ];
        usize::try_from(v).ok().and_then(|i| BY_VALUE.get(i).copied())
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// SNMPv1 Trap PDU (RFC 1157 Section 4.1.6). Its layout is unrelated to
/// every other PDU type and only appears in v1 messages.
#[derive(Debug, Clone)]
pub struct TrapV1Pdu {
    /// sysObjectID of the agent that raised the trap.
    pub enterprise: Oid,
    /// IPv4 address of the agent, 0.0.0.0 when the transport is not IP.
    pub agent_addr: [u8; 4],
    pub generic_trap: i32,
    /// Meaningful when `generic_trap` is enterpriseSpecific(6).
    pub specific_trap: i32,
    /// sysUpTime when the trap fired, hundredths of a second.
    pub time_stamp: u32,
    pub varbinds: Vec<VarBind>,
}

impl TrapV1Pdu {
    pub fn new(
        enterprise: Oid,
        agent_addr: [u8; 4],
        generic_trap: GenericTrap,
        specific_trap: i32,
        time_stamp: u32,
        varbinds: Vec<VarBind>,
    ) -> Self {
        Self {
            enterprise,
            agent_addr,
            generic_trap: generic_trap.as_i32(),
            specific_trap,
            time_stamp,
            varbinds,
        }
    }

    /// The generic-trap field as an enum, if in range.
    pub fn generic_trap_enum(&self) -> Option<GenericTrap> {
        GenericTrap::from_i32(self.generic_trap)
    }

    pub fn is_enterprise_specific(&self) -> bool {
        self.generic_trap == GenericTrap::EnterpriseSpecific as i32
    }

    /// Translate to the v2 snmpTrapOID.0 value (RFC 3584 Section 3.1).
    ///
    /// Generic traps 0-5 map to `snmpTraps.{generic_trap + 1}`;
    /// enterprise-specific traps map to `enterprise.0.specific_trap`.
    ///
    /// ```
    /// use snmp_engine::oid;
    /// use snmp_engine::pdu::{GenericTrap, TrapV1Pdu};
    ///
    /// let trap = TrapV1Pdu::new(
    ///     oid!(1, 3, 6, 1, 4, 1, 5089),
    ///     [172, 16, 254, 3],
    ///     GenericTrap::ColdStart,
    ///     0,
    ///     4200,
    ///     vec![],
    /// );
    /// assert_eq!(trap.v2_trap_oid(), oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 1));
    /// ```
    pub fn v2_trap_oid(&self) -> Oid {
        if self.is_enterprise_specific() {
            self.enterprise.child(0).child(self.specific_trap as u32)
        } else {
            // snmpTraps subtree, 1.3.6.1.6.3.1.1.5
            // wrapping_add so a hostile generic-trap cannot overflow
            let trap_num = self.generic_trap.wrapping_add(1) as u32;
            crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 5).child(trap_num)
        }
    }

    /// Translate the whole trap to the v2 PDU shape (RFC 3584 Section 3.1).
    ///
    /// Prepends `sysUpTime.0` and `snmpTrapOID.0`, then appends
    /// `snmpTrapAddress.0` and `snmpTrapEnterprise.0` after the original
    /// bindings. The result keeps [`PduType::TrapV1`] so receivers can
    /// still tell the origin apart.
    pub fn to_v2_pdu(&self) -> Pdu {
        let mut varbinds = Vec::with_capacity(self.varbinds.len() + 4);
        varbinds.push(VarBind::new(
            crate::oid!(1, 3, 6, 1, 2, 1, 1, 3, 0),
            Value::TimeTicks(self.time_stamp),
        ));
        varbinds.push(VarBind::new(
            crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
            Value::ObjectIdentifier(self.v2_trap_oid()),
        ));
        varbinds.extend(self.varbinds.iter().cloned());
        varbinds.push(VarBind::new(
            crate::oid!(1, 3, 6, 1, 6, 3, 18, 1, 3, 0),
            Value::IpAddress(self.agent_addr),
        ));
        varbinds.push(VarBind::new(
            crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 3, 0),
            Value::ObjectIdentifier(self.enterprise.clone()),
        ));

        Pdu {
            pdu_type: PduType::TrapV1,
            request_id: 0,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(PduType::TrapV1.tag(), |buf| {
            encode_varbind_list(buf, &self.varbinds);
            buf.push_unsigned32(tag::application::TIMETICKS, self.time_stamp);
            buf.push_integer(self.specific_trap);
            buf.push_integer(self.generic_trap);
            buf.push_ip_address(self.agent_addr);
            buf.push_oid(&self.enterprise);
        });
    }

    /// Decode from BER.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut pdu = decoder.read_constructed(PduType::TrapV1.tag())?;

        let enterprise = pdu.read_oid()?;
        let agent_addr = pdu.read_ip_address()?;
        let generic_trap = pdu.read_integer()?;
        let specific_trap = pdu.read_integer()?;
        let time_stamp = pdu.read_unsigned32(tag::application::TIMETICKS)?;
        let varbinds = decode_varbind_list(&mut pdu)?;

        Ok(TrapV1Pdu {
            enterprise,
            agent_addr,
            generic_trap,
            specific_trap,
            time_stamp,
            varbinds,
        })
    }
}
