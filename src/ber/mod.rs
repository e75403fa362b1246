//! BER (Basic Encoding Rules) codec.
//!
//! SNMP uses a small subset of BER: definite lengths only, primitive
//! encodings, and a handful of application-class tags. The decoder is
//! zero-copy over [`bytes::Bytes`]; the encoder builds messages back to
//! front so every length is known when it is written.

use std::fmt;

mod decode;
mod encode;
mod length;

pub use decode::Decoder;
pub use encode::EncodeBuf;
pub use length::{MAX_LENGTH, decode_length, encode_length};

/// BER tag constants.
pub mod tag {
    /// Universal class tags.
    pub mod universal {
        pub const INTEGER: u8 = 0x02;
        pub const OCTET_STRING: u8 = 0x04;
        pub const NULL: u8 = 0x05;
        pub const OBJECT_IDENTIFIER: u8 = 0x06;
        pub const SEQUENCE: u8 = 0x30;
        /// Constructed OCTET STRING, rejected by the decoder.
        pub const OCTET_STRING_CONSTRUCTED: u8 = 0x24;
    }

    /// Application class tags (RFC 2578).
    pub mod application {
        pub const IP_ADDRESS: u8 = 0x40;
        pub const COUNTER32: u8 = 0x41;
        pub const GAUGE32: u8 = 0x42;
        pub const TIMETICKS: u8 = 0x43;
        pub const OPAQUE: u8 = 0x44;
        pub const COUNTER64: u8 = 0x46;
    }

    /// Context class tags used for v2c/v3 exception values.
    pub mod context {
        pub const NO_SUCH_OBJECT: u8 = 0x80;
        pub const NO_SUCH_INSTANCE: u8 = 0x81;
        pub const END_OF_MIB_VIEW: u8 = 0x82;
    }
}

/// Decode failure detail. Peers only ever see `Error::MalformedMessage`;
/// the kind goes into the `snmp_engine::ber` debug log next to the
/// offset where decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeErrorKind {
    /// The buffer ended inside a TLV.
    TruncatedData,
    /// A read asked for more bytes than remain.
    InsufficientData { needed: usize, available: usize },
    /// The tag on the wire is not the tag the structure requires.
    UnexpectedTag { expected: u8, actual: u8 },
    /// INTEGER with empty content octets.
    ZeroLengthInteger,
    /// Counter64 content octets beyond what fits in 64 bits.
    Integer64TooLong { length: usize },
    /// NULL carrying content octets.
    InvalidNull,
    /// IpAddress whose content is not exactly four octets.
    InvalidIpAddressLength { length: usize },
    /// A nested TLV claims more bytes than its container holds.
    TlvOverflow,
    /// Indefinite-form length, which SNMP never uses.
    IndefiniteLength,
    /// Length octets that violate the definite form.
    InvalidLength,
    /// More length octets than this decoder accepts.
    LengthTooLong { octets: usize },
    /// Length above the decoder's hard cap.
    LengthExceedsMax { length: usize, max: usize },
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedData => f.write_str("input ends inside a TLV"),
            Self::InsufficientData { needed, available } => {
                write!(f, "need {needed} bytes, {available} left")
            }
            Self::UnexpectedTag { expected, actual } => {
                write!(f, "expected tag 0x{expected:02X}, found 0x{actual:02X}")
            }
            Self::ZeroLengthInteger => f.write_str("INTEGER with no content octets"),
            Self::Integer64TooLong { length } => {
                write!(f, "{length} content octets will not fit in 64 bits")
            }
            Self::InvalidNull => f.write_str("NULL with content octets"),
            Self::InvalidIpAddressLength { length } => {
                write!(f, "IpAddress content is {length} octets, not 4")
            }
            Self::TlvOverflow => f.write_str("TLV runs past its container"),
            Self::IndefiniteLength => f.write_str("indefinite-form length"),
            Self::InvalidLength => f.write_str("malformed length octets"),
            Self::LengthTooLong { octets } => {
                write!(f, "{octets} length octets is more than the decoder accepts")
            }
            Self::LengthExceedsMax { length, max } => {
                write!(f, "length {length} above the {max} byte cap")
            }
        }
    }
}
