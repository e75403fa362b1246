//! BER definite-length encoding and decoding.

use std::net::SocketAddr;

use crate::ber::DecodeErrorKind;
use crate::error::{Error, Result, UNKNOWN_TARGET};

/// Maximum accepted BER length (2 MiB). Anything larger is treated as
/// hostile input rather than a legitimate SNMP message.
pub const MAX_LENGTH: usize = 0x20_0000;

/// Encode a BER definite length.
///
/// Returns the encoded octets in **reverse order**, ready to append to a
/// back-to-front [`EncodeBuf`](crate::ber::EncodeBuf), together with the
/// number of octets used.
pub fn encode_length(len: usize) -> ([u8; 5], usize) {
    let mut buf = [0u8; 5];
    if len <= 0x7F {
        buf[0] = len as u8;
        (buf, 1)
    } else if len <= 0xFF {
        buf[0] = len as u8;
        buf[1] = 0x81;
        (buf, 2)
    } else if len <= 0xFFFF {
        buf[0] = len as u8;
        buf[1] = (len >> 8) as u8;
        buf[2] = 0x82;
        (buf, 3)
    } else if len <= 0xFF_FFFF {
        buf[0] = len as u8;
        buf[1] = (len >> 8) as u8;
        buf[2] = (len >> 16) as u8;
        buf[3] = 0x83;
        (buf, 4)
    } else {
        buf[0] = len as u8;
        buf[1] = (len >> 8) as u8;
        buf[2] = (len >> 16) as u8;
        buf[3] = (len >> 24) as u8;
        buf[4] = 0x84;
        (buf, 5)
    }
}

/// Decode a BER definite length starting at `data[0]`, returning
/// `(length, octets_consumed)`.
///
/// `base_offset` is the absolute offset of `data[0]` in the enclosing
/// message and is used for diagnostics only.
///
/// Indefinite lengths (X.690 8.1.3.6) are rejected: SNMP requires the
/// definite form. Non-minimal long-form encodings are accepted per
/// X.690 8.1.3.5 Note 2; lenient agents in the field emit them.
pub fn decode_length(
    data: &[u8],
    base_offset: usize,
    target: Option<SocketAddr>,
) -> Result<(usize, usize)> {
    let malformed = || {
        Error::MalformedMessage {
            target: target.unwrap_or(UNKNOWN_TARGET),
        }
        .boxed()
    };

    let Some(&first) = data.first() else {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::TruncatedData },
            "length field missing",
        );
        return Err(malformed());
    };

    if first == 0x80 {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::IndefiniteLength },
            "indefinite length rejected",
        );
        return Err(malformed());
    }

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let num_octets = (first & 0x7F) as usize;
    if num_octets == 0 {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::InvalidLength },
            "reserved length octet",
        );
        return Err(malformed());
    }
    if num_octets > 4 {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::LengthTooLong { octets: num_octets } },
            "unsupported length-of-length",
        );
        return Err(malformed());
    }
    if data.len() < 1 + num_octets {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::TruncatedData },
            "length field truncated",
        );
        return Err(malformed());
    }

    let mut length = 0usize;
    for &byte in &data[1..=num_octets] {
        length = (length << 8) | byte as usize;
    }

    if length > MAX_LENGTH {
        tracing::debug!(
            target: "snmp_engine::ber",
            { snmp.offset = %base_offset, kind = %DecodeErrorKind::LengthExceedsMax { length, max: MAX_LENGTH } },
            "length over cap",
        );
        return Err(malformed());
    }

    Ok((length, 1 + num_octets))
}
