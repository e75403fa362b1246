//! SNMPv3 message framing (RFC 3412 Section 6).
//!
//! On the wire a message is one outer SEQUENCE holding the version
//! integer, the msgGlobalData header, the security parameters as an
//! opaque OCTET STRING, and finally msgData: either a plaintext scoped
//! PDU or the ciphertext OCTET STRING that USM produced. Everything
//! security-model-specific stays inside the opaque parameters, which is
//! why this module never looks at their content.

use bytes::Bytes;
use std::fmt;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;
use crate::pdu::Pdu;

/// Largest payload a UDP datagram can carry; advertised as our
/// msgMaxSize on outgoing messages.
pub const DEFAULT_MSG_MAX_SIZE: i32 = 65507;

/// Smallest msgMaxSize RFC 3412 permits a sender to advertise.
pub const MSG_MAX_SIZE_MINIMUM: i32 = 484;

/// msgSecurityModel values this engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SecurityModel {
    /// User-based Security Model (RFC 3414).
    Usm = 3,
}

impl SecurityModel {
    pub fn from_i32(value: i32) -> Option<Self> {
        (value == 3).then_some(Self::Usm)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// USM security level.
///
/// Ordered least to most secure, so `actual >= required` expresses the
/// RFC 3414 level comparison directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityLevel {
    /// No authentication, no privacy.
    NoAuthNoPriv,
    /// Authentication only.
    AuthNoPriv,
    /// Authentication and encryption.
    AuthPriv,
}

impl SecurityLevel {
    /// Decode from the msgFlags byte. `None` for the invalid
    /// priv-without-auth combination.
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags & 0x03 {
            0x00 => Some(Self::NoAuthNoPriv),
            0x01 => Some(Self::AuthNoPriv),
            0x03 => Some(Self::AuthPriv),
            // 0x02: priv bit set without the auth bit
            _ => None,
        }
    }

    /// Encode to msgFlags bits (without the reportable flag).
    pub fn to_flags(self) -> u8 {
        match self {
            Self::NoAuthNoPriv => 0x00,
            Self::AuthNoPriv => 0x01,
            Self::AuthPriv => 0x03,
        }
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, Self::AuthNoPriv | Self::AuthPriv)
    }

    pub fn requires_priv(self) -> bool {
        matches!(self, Self::AuthPriv)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoAuthNoPriv => "noAuthNoPriv",
            Self::AuthNoPriv => "authNoPriv",
            Self::AuthPriv => "authPriv",
        })
    }
}

/// The msgFlags byte, split into its level bits and the reportable bit
/// (RFC 3412 Section 6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlags {
    pub security_level: SecurityLevel,
    /// Whether the sender expects a response or report.
    pub reportable: bool,
}

impl MsgFlags {
    pub fn new(security_level: SecurityLevel, reportable: bool) -> Self {
        Self {
            security_level,
            reportable,
        }
    }

    /// Decode from the wire byte.
    pub fn from_byte(decoder: &Decoder, byte: u8) -> Result<Self> {
        let Some(security_level) = SecurityLevel::from_flags(byte) else {
            tracing::debug!(
                target: "snmp_engine::mp",
                { flags = byte },
                "invalid msgFlags: priv without auth",
            );
            return Err(decoder.malformed());
        };
        Ok(Self {
            security_level,
            reportable: byte & 0x04 != 0,
        })
    }

    /// Encode to the wire byte.
    pub fn to_byte(self) -> u8 {
        let mut flags = self.security_level.to_flags();
        if self.reportable {
            flags |= 0x04;
        }
        flags
    }
}

/// msgGlobalData header (RFC 3412 Section 6).
#[derive(Debug, Clone)]
pub struct MsgGlobalData {
    /// Message identifier correlating responses with requests.
    pub msg_id: i32,
    /// Largest message the sender can accept.
    pub msg_max_size: i32,
    pub msg_flags: MsgFlags,
    pub msg_security_model: SecurityModel,
}

impl MsgGlobalData {
    pub fn new(msg_id: i32, msg_max_size: i32, msg_flags: MsgFlags) -> Self {
        Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model: SecurityModel::Usm,
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.msg_security_model.as_i32());
            // one-byte OCTET STRING on the wire
            buf.push_octet_string(&[self.msg_flags.to_byte()]);
            buf.push_integer(self.msg_max_size);
            buf.push_integer(self.msg_id);
        });
    }

    /// Decode and validate per the RFC 3412 HeaderData ranges:
    /// msgID 0..2147483647, msgMaxSize 484..2147483647, and a known
    /// security model.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let msg_id = seq.read_integer()?;
        let msg_max_size = seq.read_integer()?;

        if msg_id < 0 {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), msg_id },
                "msgID out of range",
            );
            return Err(seq.malformed());
        }

        // Negative means the sender encoded a value over 2^31-1
        if msg_max_size < 0 || msg_max_size < MSG_MAX_SIZE_MINIMUM {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), msg_max_size, minimum = MSG_MAX_SIZE_MINIMUM },
                "msgMaxSize out of range",
            );
            return Err(seq.malformed());
        }

        let flags_bytes = seq.read_octet_string()?;
        if flags_bytes.len() != 1 {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), length = flags_bytes.len() },
                "msgFlags must be one byte",
            );
            return Err(seq.malformed());
        }
        let msg_flags = MsgFlags::from_byte(&seq, flags_bytes[0])?;

        let model_raw = seq.read_integer()?;
        // Unknown security models rejected per RFC 3412 Section 7.2
        let Some(msg_security_model) = SecurityModel::from_i32(model_raw) else {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), model = model_raw },
                "unknown security model",
            );
            return Err(seq.malformed());
        };

        Ok(Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model,
        })
    }
}

/// Scoped PDU: contextEngineID, contextName, and the PDU itself.
#[derive(Debug, Clone)]
pub struct ScopedPdu {
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    pub pdu: Pdu,
}

impl ScopedPdu {
    pub fn new(
        context_engine_id: impl Into<Bytes>,
        context_name: impl Into<Bytes>,
        pdu: Pdu,
    ) -> Self {
        Self {
            context_engine_id: context_engine_id.into(),
            context_name: context_name.into(),
            pdu,
        }
    }

    /// Empty context, the common case.
    pub fn with_empty_context(pdu: Pdu) -> Self {
        Self::new(Bytes::new(), Bytes::new(), pdu)
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.context_name);
            buf.push_octet_string(&self.context_engine_id);
        });
    }

    /// Encode standalone, as the plaintext for encryption.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    /// Decode a scoped-PDU SEQUENCE.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let context_engine_id = seq.read_octet_string()?;
        let context_name = seq.read_octet_string()?;
        let pdu = Pdu::decode(&mut seq)?;

        Ok(Self {
            context_engine_id,
            context_name,
            pdu,
        })
    }
}

/// An SNMPv3 message.
#[derive(Debug, Clone)]
pub struct V3Message {
    pub global_data: MsgGlobalData,
    /// Opaque USM-encoded security parameters.
    pub security_params: Bytes,
    pub data: V3MessageData,
}

/// The msgData payload.
#[derive(Debug, Clone)]
pub enum V3MessageData {
    /// Plaintext scoped PDU (noAuthNoPriv or authNoPriv).
    Plaintext(ScopedPdu),
    /// Ciphertext of a scoped PDU (authPriv); USM decrypts it.
    Encrypted(Bytes),
}

impl V3Message {
    /// Create a message with plaintext data.
    pub fn new(global_data: MsgGlobalData, security_params: Bytes, scoped_pdu: ScopedPdu) -> Self {
        Self {
            global_data,
            security_params,
            data: V3MessageData::Plaintext(scoped_pdu),
        }
    }

    /// Create a message with encrypted data.
    pub fn new_encrypted(
        global_data: MsgGlobalData,
        security_params: Bytes,
        encrypted: Bytes,
    ) -> Self {
        Self {
            global_data,
            security_params,
            data: V3MessageData::Encrypted(encrypted),
        }
    }

    /// The scoped PDU, if plaintext.
    pub fn scoped_pdu(&self) -> Option<&ScopedPdu> {
        match &self.data {
            V3MessageData::Plaintext(pdu) => Some(pdu),
            V3MessageData::Encrypted(_) => None,
        }
    }

    /// Consume and return the scoped PDU, if plaintext.
    pub fn into_scoped_pdu(self) -> Option<ScopedPdu> {
        match self.data {
            V3MessageData::Plaintext(pdu) => Some(pdu),
            V3MessageData::Encrypted(_) => None,
        }
    }

    /// The inner PDU, if plaintext.
    pub fn pdu(&self) -> Option<&Pdu> {
        self.scoped_pdu().map(|s| &s.pdu)
    }

    /// Consume and return the inner PDU, if plaintext.
    pub fn into_pdu(self) -> Option<Pdu> {
        self.into_scoped_pdu().map(|s| s.pdu)
    }

    pub fn msg_id(&self) -> i32 {
        self.global_data.msg_id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.global_data.msg_flags.security_level
    }

    /// Encode to BER.
    ///
    /// For authenticated messages the security parameters must carry the
    /// all-zero MAC placeholder; the USM layer computes the HMAC over
    /// the encoded message and patches it in.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();

        buf.push_sequence(|buf| {
            match &self.data {
                V3MessageData::Plaintext(scoped_pdu) => scoped_pdu.encode(buf),
                V3MessageData::Encrypted(ciphertext) => buf.push_octet_string(ciphertext),
            }
            buf.push_octet_string(&self.security_params);
            self.global_data.encode(buf);
            buf.push_integer(3);
        });

        buf.finish()
    }

    /// Decode from BER. Encrypted payloads come back as
    /// [`V3MessageData::Encrypted`] for USM to decrypt.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let version = seq.read_integer()?;
        if version != 3 {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), version },
                "not a v3 message",
            );
            return Err(seq.malformed());
        }

        Self::decode_from_sequence(&mut seq)
    }

    /// Decode the remainder once the version integer has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder) -> Result<Self> {
        let global_data = MsgGlobalData::decode(seq)?;
        let security_params = seq.read_octet_string()?;

        let data = if global_data.msg_flags.security_level.requires_priv() {
            V3MessageData::Encrypted(seq.read_octet_string()?)
        } else {
            V3MessageData::Plaintext(ScopedPdu::decode(seq)?)
        };

        Ok(Self {
            global_data,
            security_params,
            data,
        })
    }

    /// Build an engine-discovery request (RFC 3414 Section 4): empty
    /// engine ID and user name, noAuthNoPriv, reportable, with an empty
    /// GetRequest payload.
    pub fn discovery_request(msg_id: i32, request_id: i32) -> Self {
        let global_data = MsgGlobalData::new(
            msg_id,
            DEFAULT_MSG_MAX_SIZE,
            MsgFlags::new(SecurityLevel::NoAuthNoPriv, true),
        );
        let security_params = crate::v3::UsmSecurityParams::empty().encode();
        let scoped_pdu = ScopedPdu::with_empty_context(Pdu::get_request(request_id, &[]));

        Self::new(global_data, security_params, scoped_pdu)
    }
}
