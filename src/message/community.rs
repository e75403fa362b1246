//! Community-based message format (v1/v2c).
//!
//! Both versions share one structure,
//! `SEQUENCE { version INTEGER, community OCTET STRING, pdu }`,
//! and differ only in the version number.

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;
use crate::message::Version;
use crate::pdu::{Pdu, PduType, TrapV1Pdu};

/// A v1 or v2c message: version, community string, PDU.
#[derive(Debug, Clone)]
pub struct CommunityMessage {
    /// SNMP version (V1 or V2c).
    pub version: Version,
    /// Community string.
    pub community: Bytes,
    pub pdu: Pdu,
}

impl CommunityMessage {
    /// Create a community message.
    ///
    /// # Panics
    /// Panics if `version` is V3; v3 messages use [`V3Message`](crate::message::V3Message).
    pub fn new(version: Version, community: impl Into<Bytes>, pdu: Pdu) -> Self {
        assert!(
            matches!(version, Version::V1 | Version::V2c),
            "CommunityMessage only supports V1/V2c, not {version:?}"
        );
        Self {
            version,
            community: community.into(),
            pdu,
        }
    }

    /// Create a v1 message.
    pub fn v1(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self::new(Version::V1, community, pdu)
    }

    /// Create a v2c message.
    pub fn v2c(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self::new(Version::V2c, community, pdu)
    }

    /// Encode to BER.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.community);
            buf.push_integer(self.version.as_i32());
        });
        buf.finish()
    }

    /// Decode from BER.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let version_num = seq.read_integer()?;
        let Some(version) = Version::from_i32(version_num) else {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset(), version = version_num },
                "unknown SNMP version",
            );
            return Err(seq.malformed());
        };

        Self::decode_from_sequence(&mut seq, version)
    }

    /// Decode the remainder once the version integer has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, version: Version) -> Result<Self> {
        if version == Version::V3 {
            tracing::debug!(
                target: "snmp_engine::mp",
                { snmp.offset = %seq.offset() },
                "v3 message routed to community decoder",
            );
            return Err(seq.malformed());
        }

        let community = seq.read_octet_string()?;

        // RFC 1157 Trap-PDU has its own body layout; normalize it to the
        // v2 shape on the way in (RFC 3584 Section 3.1).
        let pdu = if seq.peek_tag() == Some(PduType::TrapV1.tag()) {
            TrapV1Pdu::decode(seq)?.to_v2_pdu()
        } else {
            Pdu::decode(seq)?
        };

        Ok(CommunityMessage {
            version,
            community,
            pdu,
        })
    }

    /// Take the PDU out of the message.
    pub fn into_pdu(self) -> Pdu {
        self.pdu
    }
}
