//! BER decoding.
//!
//! Readers slice the input `Bytes` rather than copying it, so decoded
//! octet strings share the incoming buffer for as long as they live.

use std::net::SocketAddr;

use bytes::Bytes;

use super::DecodeErrorKind;
use super::length::decode_length;
use super::tag;
use crate::error::{Error, Result, UNKNOWN_TARGET};
use crate::oid::Oid;

/// Cursor over a BER-encoded buffer.
pub struct Decoder {
    data: Bytes,
    offset: usize,
    target: Option<SocketAddr>,
}

impl Decoder {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            target: None,
        }
    }

    /// A decoder that carries the peer address into any error it raises.
    pub fn with_target(data: Bytes, target: SocketAddr) -> Self {
        Self {
            target: Some(target),
            ..Self::new(data)
        }
    }

    /// Copy a slice into an owned decoder. Test convenience mostly.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    fn target(&self) -> SocketAddr {
        self.target.unwrap_or(UNKNOWN_TARGET)
    }

    /// The malformed-message error for this decoder's peer. Callers log
    /// the detail before raising this.
    pub(crate) fn malformed(&self) -> Box<Error> {
        Error::MalformedMessage {
            target: self.target(),
        }
        .boxed()
    }

    /// Current offset into the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// The next byte, if any, without advancing.
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// The next tag without advancing. SNMP sticks to low tag numbers,
    /// so a tag is always one octet.
    pub fn peek_tag(&self) -> Option<u8> {
        self.peek_byte()
    }

    /// Consume one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let Some(byte) = self.peek_byte() else {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::TruncatedData },
                "unexpected end of input",
            );
            return Err(self.malformed());
        };
        self.offset += 1;
        Ok(byte)
    }

    /// Consume a tag octet.
    pub fn read_tag(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Read a definite length field.
    pub fn read_length(&mut self) -> Result<usize> {
        let (len, consumed) = decode_length(&self.data[self.offset..], self.offset, self.target)?;
        self.offset += consumed;
        Ok(len)
    }

    /// Read `len` raw bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        // saturating_add so a hostile length cannot wrap past the bounds check
        let end = self.offset.saturating_add(len);
        if end > self.data.len() {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::InsufficientData { needed: len, available: self.remaining() } },
                "insufficient data",
            );
            return Err(self.malformed());
        }
        let bytes = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(bytes)
    }

    /// Require the next tag to be `expected` and return the content length.
    pub fn expect_tag(&mut self, expected: u8) -> Result<usize> {
        let tag = self.read_tag()?;
        if tag != expected {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset - 1, kind = %DecodeErrorKind::UnexpectedTag { expected, actual: tag } },
                "unexpected tag",
            );
            return Err(self.malformed());
        }
        self.read_length()
    }

    /// Read a signed INTEGER.
    pub fn read_integer(&mut self) -> Result<i32> {
        let len = self.expect_tag(tag::universal::INTEGER)?;
        self.read_integer_value(len)
    }

    /// Read a signed integer value whose tag and length were already consumed.
    pub fn read_integer_value(&mut self, len: usize) -> Result<i32> {
        if len == 0 {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::ZeroLengthInteger },
                "zero-length integer",
            );
            return Err(self.malformed());
        }
        if len > 4 {
            // net-snmp truncates here too, so stay interoperable
            tracing::warn!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, length = len },
                "integer too long, truncating to 4 bytes",
            );
        }

        let bytes = self.read_bytes(len)?;

        // seed with all-ones so sign extension falls out of the shifts
        let seed: i32 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
        Ok(bytes
            .iter()
            .take(4)
            .fold(seed, |acc, &b| acc << 8 | i32::from(b)))
    }

    /// Read an unsigned 32-bit value with the given application tag.
    pub fn read_unsigned32(&mut self, expected_tag: u8) -> Result<u32> {
        let len = self.expect_tag(expected_tag)?;
        self.read_unsigned32_value(len)
    }

    /// Read an unsigned 32-bit value whose tag and length were already consumed.
    pub fn read_unsigned32_value(&mut self, len: usize) -> Result<u32> {
        if len == 0 {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::ZeroLengthInteger },
                "zero-length integer",
            );
            return Err(self.malformed());
        }
        if len > 5 {
            // 5 bytes max: one leading zero plus four value bytes
            tracing::warn!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, length = len },
                "unsigned integer too long, truncating to 4 bytes",
            );
        }

        let bytes = self.read_bytes(len)?;
        Ok(bytes
            .iter()
            .take(5)
            .fold(0u32, |acc, &b| acc << 8 | u32::from(b)))
    }

    /// Read an unsigned 64-bit value (Counter64) with the given tag.
    pub fn read_unsigned64(&mut self, expected_tag: u8) -> Result<u64> {
        let len = self.expect_tag(expected_tag)?;
        self.read_unsigned64_value(len)
    }

    /// Read an unsigned 64-bit value whose tag and length were already consumed.
    pub fn read_unsigned64_value(&mut self, len: usize) -> Result<u64> {
        if len == 0 {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::ZeroLengthInteger },
                "zero-length integer",
            );
            return Err(self.malformed());
        }
        if len > 9 {
            // 9 bytes max: one leading zero plus eight value bytes
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::Integer64TooLong { length: len } },
                "integer64 too long",
            );
            return Err(self.malformed());
        }

        let bytes = self.read_bytes(len)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b)))
    }

    /// Read an OCTET STRING, borrowing its content from the buffer.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        let len = self.expect_tag(tag::universal::OCTET_STRING)?;
        self.read_bytes(len)
    }

    /// Read a NULL, which must be empty.
    pub fn read_null(&mut self) -> Result<()> {
        let len = self.expect_tag(tag::universal::NULL)?;
        if len != 0 {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::InvalidNull },
                "NULL with non-zero length",
            );
            return Err(self.malformed());
        }
        Ok(())
    }

    /// Read an OBJECT IDENTIFIER TLV.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let len = self.expect_tag(tag::universal::OBJECT_IDENTIFIER)?;
        self.read_oid_value(len)
    }

    /// Read OID content octets once the tag and length are consumed.
    pub fn read_oid_value(&mut self, len: usize) -> Result<Oid> {
        let bytes = self.read_bytes(len)?;
        Oid::from_ber(&bytes)
    }

    /// Descend into a SEQUENCE, returning a decoder scoped to its content.
    pub fn read_sequence(&mut self) -> Result<Decoder> {
        self.read_constructed(tag::universal::SEQUENCE)
    }

    /// Descend into any constructed type, checking its tag first.
    pub fn read_constructed(&mut self, expected_tag: u8) -> Result<Decoder> {
        let len = self.expect_tag(expected_tag)?;
        self.sub_decoder(len)
    }

    /// Read an IpAddress (application tag 0, four octets).
    pub fn read_ip_address(&mut self) -> Result<[u8; 4]> {
        let len = self.expect_tag(tag::application::IP_ADDRESS)?;
        if len != 4 {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::InvalidIpAddressLength { length: len } },
                "IP address must be 4 bytes",
            );
            return Err(self.malformed());
        }
        let octets = self.read_bytes(4)?;
        let mut addr = [0u8; 4];
        addr.copy_from_slice(&octets);
        Ok(addr)
    }

    /// Skip one TLV without parsing its contents.
    pub fn skip_tlv(&mut self) -> Result<()> {
        let _tag = self.read_tag()?;
        let len = self.read_length()?;
        // check before committing the offset so overflow cannot slip through
        let end = self.offset.saturating_add(len);
        if end > self.data.len() {
            tracing::debug!(
                target: "snmp_engine::ber",
                { snmp.offset = %self.offset, kind = %DecodeErrorKind::TlvOverflow },
                "TLV extends past end of data",
            );
            return Err(self.malformed());
        }
        self.offset = end;
        Ok(())
    }

    /// Split off a sub-decoder over the next `len` bytes.
    pub fn sub_decoder(&mut self, len: usize) -> Result<Decoder> {
        let content = self.read_bytes(len)?;
        Ok(Decoder {
            data: content,
            offset: 0,
            target: self.target,
        })
    }

    /// The entire underlying buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// The unread remainder as a slice.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}
