//! SNMP values.
//!
//! [`Value`] covers the ASN.1 universal types SNMP uses, the SMIv2
//! application types, and the three exception markers that v2c and v3
//! responses carry in place of data.

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::Result;
use crate::oid::Oid;
use crate::util::hex;
use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// INTEGER, signed 32-bit.
    Integer(i32),

    /// OCTET STRING.
    ///
    /// SMIv2 caps these at 65535 octets; the decoder stays permissive
    /// and leaves enforcement to the application.
    OctetString(Bytes),

    /// NULL, the placeholder requests bind.
    Null,

    /// OBJECT IDENTIFIER.
    ObjectIdentifier(Oid),

    /// IpAddress, four octets in network order.
    IpAddress([u8; 4]),

    /// Counter32, wraps at 2^32.
    Counter32(u32),

    /// Gauge32 / Unsigned32, latches at 2^32 - 1.
    Gauge32(u32),

    /// TimeTicks, hundredths of a second.
    TimeTicks(u32),

    /// Opaque, a legacy wrapper around arbitrary bytes.
    Opaque(Bytes),

    /// Counter64, wraps at 2^64. Not representable in SNMPv1.
    Counter64(u64),

    /// noSuchObject: the agent does not implement this object at all.
    NoSuchObject,

    /// noSuchInstance: the object exists but this instance of it does not.
    NoSuchInstance,

    /// endOfMibView: nothing lexicographically follows. Ends a walk.
    EndOfMibView,

    /// Any tag the decoder does not recognize, kept verbatim so the
    /// value survives a re-encode.
    Unknown { tag: u8, data: Bytes },
}

impl Value {
    /// The integer, if this is an `Integer`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen to `u32` where that loses nothing: `Counter32`, `Gauge32`,
    /// `TimeTicks`, or a non-negative `Integer`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v),
            Value::Integer(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }

    /// Widen to `u64`: `Counter64` plus everything [`Value::as_u32`]
    /// accepts.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Counter64(v) => Some(*v),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as u64),
            Value::Integer(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Borrow the payload of an `OctetString` or `Opaque`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::OctetString(v) | Value::Opaque(v) => Some(v),
            _ => None,
        }
    }

    /// The payload as text, when it is bytes and those bytes are UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Borrow the OID of an `ObjectIdentifier`.
    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Value::ObjectIdentifier(oid) => Some(oid),
            _ => None,
        }
    }

    /// The address of an `IpAddress`.
    pub fn as_ip(&self) -> Option<Ipv4Addr> {
        match self {
            Value::IpAddress(octets) => Some(Ipv4Addr::from(*octets)),
            _ => None,
        }
    }

    /// True for the three exception markers.
    ///
    /// ```
    /// use snmp_engine::Value;
    ///
    /// assert!(Value::EndOfMibView.is_exception());
    /// assert!(!Value::Integer(1).is_exception());
    /// ```
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// Push the BER form onto `buf`.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Value::Integer(v) => buf.push_integer(*v),
            Value::OctetString(data) => buf.push_octet_string(data),
            Value::Null => buf.push_null(),
            Value::ObjectIdentifier(oid) => buf.push_oid(oid),
            Value::IpAddress(octets) => buf.push_ip_address(*octets),
            Value::Counter32(v) => buf.push_unsigned32(tag::application::COUNTER32, *v),
            Value::Gauge32(v) => buf.push_unsigned32(tag::application::GAUGE32, *v),
            Value::TimeTicks(v) => buf.push_unsigned32(tag::application::TIMETICKS, *v),
            Value::Opaque(data) => {
                buf.push_bytes(data);
                buf.push_length(data.len());
                buf.push_tag(tag::application::OPAQUE);
            }
            Value::Counter64(v) => buf.push_unsigned64(tag::application::COUNTER64, *v),
            Value::NoSuchObject => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_OBJECT);
            }
            Value::NoSuchInstance => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_INSTANCE);
            }
            Value::EndOfMibView => {
                buf.push_length(0);
                buf.push_tag(tag::context::END_OF_MIB_VIEW);
            }
            Value::Unknown { tag: t, data } => {
                buf.push_bytes(data);
                buf.push_length(data.len());
                buf.push_tag(*t);
            }
        }
    }

    /// Read one TLV and classify it by tag.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let tag = decoder.read_tag()?;
        let len = decoder.read_length()?;

        match tag {
            tag::universal::INTEGER => Ok(Value::Integer(decoder.read_integer_value(len)?)),
            tag::universal::OCTET_STRING => Ok(Value::OctetString(decoder.read_bytes(len)?)),
            tag::universal::NULL => {
                if len != 0 {
                    tracing::debug!(
                        target: "snmp_engine::ber",
                        { snmp.offset = decoder.offset(), snmp.length = len },
                        "NULL with non-zero length"
                    );
                    return Err(decoder.malformed());
                }
                Ok(Value::Null)
            }
            tag::universal::OBJECT_IDENTIFIER => {
                Ok(Value::ObjectIdentifier(decoder.read_oid_value(len)?))
            }
            tag::application::IP_ADDRESS => {
                if len != 4 {
                    tracing::debug!(
                        target: "snmp_engine::ber",
                        { snmp.offset = decoder.offset(), snmp.length = len },
                        "IpAddress must be 4 bytes"
                    );
                    return Err(decoder.malformed());
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&decoder.read_bytes(4)?);
                Ok(Value::IpAddress(octets))
            }
            t @ (tag::application::COUNTER32
            | tag::application::GAUGE32
            | tag::application::TIMETICKS) => {
                let v = decoder.read_unsigned32_value(len)?;
                Ok(match t {
                    tag::application::COUNTER32 => Value::Counter32(v),
                    tag::application::GAUGE32 => Value::Gauge32(v),
                    _ => Value::TimeTicks(v),
                })
            }
            tag::application::OPAQUE => Ok(Value::Opaque(decoder.read_bytes(len)?)),
            tag::application::COUNTER64 => Ok(Value::Counter64(decoder.read_unsigned64_value(len)?)),
            t @ (tag::context::NO_SUCH_OBJECT
            | tag::context::NO_SUCH_INSTANCE
            | tag::context::END_OF_MIB_VIEW) => {
                // exceptions are empty on the wire, but skip any content
                // rather than fail
                if len != 0 {
                    let _ = decoder.read_bytes(len)?;
                }
                Ok(match t {
                    tag::context::NO_SUCH_OBJECT => Value::NoSuchObject,
                    tag::context::NO_SUCH_INSTANCE => Value::NoSuchInstance,
                    _ => Value::EndOfMibView,
                })
            }
            // Constructed OCTET STRING (0x24) is documented but unparsed by
            // net-snmp; reject it the same way.
            tag::universal::OCTET_STRING_CONSTRUCTED => {
                tracing::debug!(
                    target: "snmp_engine::ber",
                    { snmp.offset = decoder.offset() },
                    "constructed OCTET STRING not supported"
                );
                Err(decoder.malformed())
            }
            other => {
                let data = decoder.read_bytes(len)?;
                Ok(Value::Unknown { tag: other, data })
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::OctetString(data) => match std::str::from_utf8(data) {
                Ok(s) => f.write_str(s),
                Err(_) => write!(f, "0x{}", hex::encode(data)),
            },
            Value::Null => f.write_str("NULL"),
            Value::ObjectIdentifier(oid) => write!(f, "{oid}"),
            Value::IpAddress(octets) => write!(f, "{}", Ipv4Addr::from(*octets)),
            Value::Counter32(v) | Value::Gauge32(v) => write!(f, "{v}"),
            Value::TimeTicks(v) => {
                let total = v / 100;
                let days = total / 86400;
                let hours = total % 86400 / 3600;
                let mins = total % 3600 / 60;
                let secs = total % 60;
                write!(f, "{days}d {hours}h {mins}m {secs}s")
            }
            Value::Opaque(data) => write!(f, "Opaque(0x{})", hex::Bytes(data)),
            Value::Counter64(v) => write!(f, "{v}"),
            Value::NoSuchObject => f.write_str("noSuchObject"),
            Value::NoSuchInstance => f.write_str("noSuchInstance"),
            Value::EndOfMibView => f.write_str("endOfMibView"),
            Value::Unknown { tag, data } => {
                write!(f, "Unknown(tag=0x{tag:02X}, data=0x{})", hex::Bytes(data))
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Counter64(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::OctetString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::OctetString(Bytes::from(s))
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Value::OctetString(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::OctetString(data)
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::ObjectIdentifier(oid)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(addr: Ipv4Addr) -> Self {
        Value::IpAddress(addr.octets())
    }
}

impl From<[u8; 4]> for Value {
    fn from(octets: [u8; 4]) -> Self {
        Value::IpAddress(octets)
    }
}
