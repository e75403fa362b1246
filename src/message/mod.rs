//! Message framing for every protocol version.
//!
//! A message is a PDU plus version and security wrapping:
//! [`CommunityMessage`] for v1/v2c, [`V3Message`] for v3 under USM.
//! [`Message`] decodes either, branching on the version integer that
//! every format puts first.

mod community;
mod v3;

pub use community::CommunityMessage;
pub use v3::{
    DEFAULT_MSG_MAX_SIZE, MSG_MAX_SIZE_MINIMUM, MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel,
    SecurityModel, V3Message, V3MessageData,
};

use std::fmt;

use bytes::Bytes;

use crate::ber::Decoder;
use crate::error::Result;
use crate::pdu::Pdu;

/// SNMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum Version {
    V1 = 0,
    V2c = 1,
    V3 = 3,
}

impl Version {
    /// Create from the on-wire version integer.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::V1),
            1 => Some(Self::V2c),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// The on-wire version integer.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V2c => "v2c",
            Self::V3 => "v3",
        })
    }
}

/// A decoded SNMP message of any version.
#[derive(Debug)]
pub enum Message {
    /// v1 or v2c message with a community string.
    Community(CommunityMessage),
    /// v3 message under USM.
    V3(V3Message),
}

impl Message {
    /// The PDU, unless the payload is still encrypted.
    pub fn try_pdu(&self) -> Option<&Pdu> {
        match self {
            Message::Community(m) => Some(&m.pdu),
            Message::V3(m) => m.pdu(),
        }
    }

    /// Consume and return the PDU, unless the payload is still encrypted.
    pub fn try_into_pdu(self) -> Option<Pdu> {
        match self {
            Message::Community(m) => Some(m.into_pdu()),
            Message::V3(m) => m.into_pdu(),
        }
    }

    /// The SNMP version.
    pub fn version(&self) -> Version {
        match self {
            Message::Community(m) => m.version,
            Message::V3(_) => Version::V3,
        }
    }

    /// Decode a message, detecting the version from the header.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        Self::decode_with(&mut decoder)
    }

    /// Decode from an existing decoder (which may carry a peer address
    /// for error context).
    pub fn decode_with(decoder: &mut Decoder) -> Result<Self> {
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

        match version {
            Version::V1 | Version::V2c => {
                let msg = CommunityMessage::decode_from_sequence(&mut seq, version)?;
                Ok(Message::Community(msg))
            }
            Version::V3 => {
                let msg = V3Message::decode_from_sequence(&mut seq)?;
                Ok(Message::V3(msg))
            }
        }
    }
}

impl From<CommunityMessage> for Message {
    fn from(msg: CommunityMessage) -> Self {
        Message::Community(msg)
    }
}

impl From<V3Message> for Message {
    fn from(msg: V3Message) -> Self {
        Message::V3(msg)
    }
}
