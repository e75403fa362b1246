//! Variable bindings.
//!
//! The var-bind list is the payload of every PDU: a sequence of
//! OID/value pairs, where requests bind NULL and responses bind data
//! or an exception marker.

use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;
use crate::oid::Oid;
use crate::value::Value;
use std::fmt;

/// A single OID/value pair.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    /// Object identifier naming the variable.
    pub oid: Oid,
    /// The bound value, exception markers included.
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    /// Bind NULL, the form requests carry.
    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            value: Value::Null,
        }
    }

    /// Encode as `SEQUENCE { name, value }`.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            self.value.encode(buf);
            buf.push_oid(&self.oid);
        });
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;
        let oid = seq.read_oid()?;
        let value = Value::decode(&mut seq)?;
        Ok(VarBind { oid, value })
    }
}

impl fmt::Display for VarBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.oid, self.value)
    }
}

/// Encode `varbinds` as the outer var-bind-list SEQUENCE.
pub fn encode_varbind_list(buf: &mut EncodeBuf, varbinds: &[VarBind]) {
    buf.push_sequence(|buf| {
        // fields are pushed back-to-front
        for binding in varbinds.iter().rev() {
            binding.encode(buf);
        }
    });
}

/// Decode a var-bind-list SEQUENCE to the end of its length.
pub fn decode_varbind_list(decoder: &mut Decoder) -> Result<Vec<VarBind>> {
    let mut seq = decoder.read_sequence()?;

    // a binding is rarely under 16 bytes, so this only over-reserves
    let estimate = (seq.remaining() / 16).max(1);
    let mut varbinds = Vec::with_capacity(estimate);

    while !seq.is_empty() {
        varbinds.push(VarBind::decode(&mut seq)?);
    }

    Ok(varbinds)
}

/// Encode the request form of a var-bind list: every OID bound to NULL.
///
/// Skips building intermediate [`VarBind`] values, since GET, GETNEXT,
/// and GETBULK requests only ever carry names.
pub fn encode_null_varbinds(buf: &mut EncodeBuf, oids: &[Oid]) {
    buf.push_sequence(|buf| {
        for oid in oids.iter().rev() {
            buf.push_sequence(|buf| {
                buf.push_null();
                buf.push_oid(oid);
            });
        }
    });
}
